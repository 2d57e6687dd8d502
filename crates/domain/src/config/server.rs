use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Env var holding the bearer token for `/v1/...` routes.
    /// Unset/empty env var = auth disabled on those routes.
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Per-IP rate limit, `N/unit` with unit in {s, m, h, d}.
    /// Overridable via the `API_RATE_LIMIT` env var.
    #[serde(default = "d_rate_limit")]
    pub rate_limit: String,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
            api_token_env: d_api_token_env(),
            rate_limit: d_rate_limit(),
            max_concurrent_requests: d_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. The browser extension connects from
    /// extension origins and localhost during development.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rate-limit parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A parsed rate limit: `requests` per `per_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u64,
    pub per_secs: u64,
}

impl RateLimit {
    /// Replenish interval for a token-bucket limiter.
    pub fn period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.per_secs as f64 / self.requests as f64)
    }
}

/// Parse `N/unit` (e.g. `600/h`, `10/s`) into a [`RateLimit`].
pub fn parse_rate_limit(raw: &str) -> Result<RateLimit, String> {
    let (count, unit) = raw
        .split_once('/')
        .ok_or_else(|| format!("rate limit must look like N/unit, got {raw:?}"))?;
    let requests: u64 = count
        .trim()
        .parse()
        .map_err(|_| format!("rate limit count is not a number: {count:?}"))?;
    if requests == 0 {
        return Err("rate limit count must be > 0".into());
    }
    let per_secs = match unit.trim() {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        other => return Err(format!("rate limit unit must be s|m|h|d, got {other:?}")),
    };
    Ok(RateLimit { requests, per_secs })
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8864
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_api_token_env() -> String {
    "FINGPT_API_KEY".into()
}
fn d_rate_limit() -> String {
    "600/h".into()
}
fn d_max_concurrent() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
        "chrome-extension://*".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_rate_limit() {
        let rl = parse_rate_limit("600/h").unwrap();
        assert_eq!(rl.requests, 600);
        assert_eq!(rl.per_secs, 3_600);
        assert_eq!(rl.period(), std::time::Duration::from_secs(6));
    }

    #[test]
    fn parses_per_second() {
        let rl = parse_rate_limit("10/s").unwrap();
        assert_eq!(rl.per_secs, 1);
    }

    #[test]
    fn rejects_malformed_limits() {
        assert!(parse_rate_limit("600").is_err());
        assert!(parse_rate_limit("x/h").is_err());
        assert!(parse_rate_limit("0/h").is_err());
        assert!(parse_rate_limit("5/w").is_err());
    }
}
