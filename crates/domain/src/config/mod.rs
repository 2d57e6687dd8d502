mod guards;
mod llm;
mod mcp;
mod research;
mod server;
mod sessions;
mod tools;

pub use guards::*;
pub use llm::*;
pub use mcp::*;
pub use research::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub guards: GuardsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    /// Optional directory of prompt-fragment overrides. When unset, the
    /// embedded fragments ship with the binary.
    #[serde(default)]
    pub prompts_dir: Option<std::path::PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overlay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Overlay the documented environment variables onto the loaded file.
    /// Env always wins over the file; absent vars leave the file values.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("API_RATE_LIMIT") {
            self.server.rate_limit = v;
        }
        overlay_parse(&mut self.guards.leak_window_size, "MEMORY_LEAK_WINDOW_SIZE");
        overlay_parse(
            &mut self.guards.leak_check_interval,
            "MEMORY_LEAK_CHECK_INTERVAL",
        );
        overlay_parse(
            &mut self.guards.leak_slope_threshold_mb,
            "MEMORY_LEAK_SLOPE_THRESHOLD",
        );
        overlay_parse(&mut self.guards.soft_limit_mb, "MEMORY_SOFT_LIMIT_MB");
        overlay_parse(&mut self.sessions.ttl_secs, "SESSION_TTL_SECONDS");
        overlay_parse(&mut self.sessions.artifact_max_count, "ARTIFACT_MAX_COUNT");
        overlay_parse(&mut self.sessions.artifact_max_chars, "ARTIFACT_MAX_CHARS");
        overlay_parse(&mut self.research.max_sub, "MAX_SUB_QUESTIONS");
        overlay_parse(&mut self.research.max_iterations, "MAX_RESEARCH_ITERATIONS");
        overlay_parse(&mut self.research.max_parallel, "MAX_PARALLEL_SUBQUESTIONS");
    }

    /// At least one provider key env var must be populated.
    pub fn any_provider_key_present(&self) -> bool {
        self.llm
            .aliases
            .values()
            .any(|a| std::env::var(&a.key_env).map_or(false, |v| !v.is_empty()))
    }
}

fn overlay_parse<T: std::str::FromStr>(slot: &mut T, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(var, raw = %raw, "ignoring unparseable env override"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |field: &str, message: String| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty".into());
        }
        if let Err(e) = parse_rate_limit(&self.server.rate_limit) {
            error("server.rate_limit", e);
        }
        if !self.llm.aliases.contains_key(&self.llm.default_alias) {
            error(
                "llm.default_alias",
                format!("alias {:?} is not in the alias table", self.llm.default_alias),
            );
        }
        if !self.llm.aliases.contains_key(&self.llm.analysis_alias) {
            error(
                "llm.analysis_alias",
                format!("alias {:?} is not in the alias table", self.llm.analysis_alias),
            );
        }
        if self.research.max_sub == 0 {
            error("research.max_sub", "must be at least 1".into());
        }
        if self.research.max_iterations == 0 {
            error("research.max_iterations", "must be at least 1".into());
        }
        if self.research.max_parallel == 0 {
            error("research.max_parallel", "must be at least 1".into());
        }
        if self.sessions.artifact_max_count == 0 {
            error("sessions.artifact_max_count", "must be at least 1".into());
        }
        if self.guards.leak_check_interval > self.guards.leak_window_size {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "guards.leak_check_interval".into(),
                message: "check interval exceeds window size; slope will never be computed"
                    .into(),
            });
        }

        issues
    }
}
