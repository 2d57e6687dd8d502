//! Defaults and validation behavior for the configuration tree.

use fin_domain::config::{Config, ConfigSeverity};

#[test]
fn empty_toml_yields_working_defaults() {
    let config: Config = toml::from_str("").expect("empty config must parse");

    assert_eq!(config.server.port, 8864);
    assert_eq!(config.server.rate_limit, "600/h");
    assert_eq!(config.sessions.ttl_secs, 3_600);
    assert_eq!(config.sessions.artifact_max_count, 32);
    assert_eq!(config.sessions.artifact_max_chars, 200_000);
    assert_eq!(config.research.max_sub, 5);
    assert_eq!(config.research.max_iterations, 3);
    assert_eq!(config.research.max_parallel, 5);
    assert_eq!(config.guards.leak_window_size, 200);
    assert_eq!(config.guards.leak_check_interval, 50);
    assert_eq!(config.guards.soft_limit_mb, 450);
    assert!(config.llm.aliases.contains_key("gpt-4o"));
    assert!(config.llm.aliases.contains_key("deepseek-chat"));
}

#[test]
fn defaults_pass_validation() {
    let config = Config::default();
    let errors: Vec<_> = config
        .validate()
        .into_iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .collect();
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

#[test]
fn bad_rate_limit_is_flagged() {
    let config: Config = toml::from_str(
        r#"
        [server]
        rate_limit = "lots"
        "#,
    )
    .unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.field == "server.rate_limit"));
}

#[test]
fn unknown_default_alias_is_flagged() {
    let config: Config = toml::from_str(
        r#"
        [llm]
        default_alias = "gpt-99"
        "#,
    )
    .unwrap();
    let issues = config.validate();
    assert!(issues.iter().any(|i| i.field == "llm.default_alias"));
}

#[test]
fn partial_section_keeps_sibling_defaults() {
    let config: Config = toml::from_str(
        r#"
        [research]
        max_sub = 8
        "#,
    )
    .unwrap();
    assert_eq!(config.research.max_sub, 8);
    assert_eq!(config.research.max_iterations, 3);
}
