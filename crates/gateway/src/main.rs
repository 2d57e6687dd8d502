use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use fin_domain::config::{parse_rate_limit, Config, ConfigSeverity, CorsConfig};
use fin_gateway::api;
use fin_gateway::bootstrap::build_state;
use fin_providers::ProviderRegistry;

#[derive(Parser)]
#[command(name = "finagent", about = "Financial research agent backend")]
struct Cli {
    /// Path to the config file (defaults to ./finagent.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Validate the configuration and exit.
    ConfigValidate,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(cli.config.as_deref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::ConfigValidate) => {
            let config = load_config(cli.config.as_deref())?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            println!("configuration ok");
            Ok(())
        }
        Some(Command::Version) => {
            println!("finagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON logs; `RUST_LOG` overrides the default filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fin_gateway=debug")),
        )
        .json()
        .init();
}

/// Load the config file (when present) and overlay the environment.
fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(explicit) => {
            let raw = std::fs::read_to_string(explicit)
                .with_context(|| format!("reading {}", explicit.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing {}", explicit.display()))?
        }
        None => {
            let default_path = std::path::Path::new("finagent.toml");
            if default_path.exists() {
                let raw = std::fs::read_to_string(default_path).context("reading finagent.toml")?;
                toml::from_str(&raw).context("parsing finagent.toml")?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env();
    Ok(config)
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("finagent starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    if !config.any_provider_key_present() {
        tracing::warn!(
            "no provider API key is set (OPENAI_API_KEY / ANTHROPIC_API_KEY / \
             GOOGLE_API_KEY / DEEPSEEK_API_KEY) — model calls will fail"
        );
    }

    // ── Providers ────────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm));

    // ── Application state ────────────────────────────────────────────
    let (state, mcp) = build_state(config.clone(), llm).await?;

    // ── Periodic session sweep ───────────────────────────────────────
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let removed = sessions.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "expired sessions swept");
                }
            }
        });
    }

    // ── Middleware: CORS, rate limit, concurrency limit ──────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    let rate_limit = parse_rate_limit(&config.server.rate_limit)
        .map_err(|e| anyhow::anyhow!("server.rate_limit: {e}"))?;
    let governor_config = tower_governor::governor::GovernorConfigBuilder::default()
        .period(rate_limit.period())
        .burst_size(rate_limit.requests.min(60) as u32)
        .finish()
        .context("building rate limiter")?;
    tracing::info!(
        limit = %config.server.rate_limit,
        "per-IP rate limiting enabled"
    );

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .layer(tower_governor::GovernorLayer {
            config: Arc::new(governor_config),
        })
        .with_state(state.clone());

    // ── Bind + serve with graceful shutdown ──────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "finagent listening");

    let restart = state.restart_signal.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, draining in-flight requests");
                }
                _ = restart.notified() => {
                    tracing::warn!(
                        "soft memory limit reached, draining in-flight requests for restart"
                    );
                }
            }
        })
        .await
        .context("server error")?;

    mcp.shutdown().await;
    tracing::info!("finagent stopped");
    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Entries ending in `:*` wildcard the port (`http://localhost:*`);
/// entries ending in `://*` wildcard everything after the scheme
/// (`chrome-extension://*`); a lone `*` allows all origins.
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut port_prefixes: Vec<String> = Vec::new();
    let mut scheme_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if let Some(prefix) = origin.strip_suffix("://*") {
            scheme_prefixes.push(format!("{prefix}://"));
        } else if origin.ends_with(":*") {
            port_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(value) = origin.parse::<HeaderValue>() {
            exact.push(value);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = AllowOrigin::predicate(move |origin, _| {
        let origin_str = origin.to_str().unwrap_or("");
        if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
            return true;
        }
        // Port wildcards accept digits only after the prefix, so
        // "http://localhost:3000.evil.com" cannot slip through.
        if port_prefixes.iter().any(|prefix| {
            origin_str
                .strip_prefix(prefix.as_str())
                .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        }) {
            return true;
        }
        scheme_prefixes
            .iter()
            .any(|prefix| origin_str.starts_with(prefix.as_str()))
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
