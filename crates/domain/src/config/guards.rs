use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime guards (leak detector, soft limit, tool cache, debug endpoint)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardsConfig {
    /// Ring-buffer size for resident-set samples (one per completed request).
    #[serde(default = "d_window_size")]
    pub leak_window_size: usize,
    /// Recompute the slope every this many samples.
    #[serde(default = "d_check_interval")]
    pub leak_check_interval: usize,
    /// MB-per-request slope above which a leak trend is reported.
    #[serde(default = "d_slope_threshold")]
    pub leak_slope_threshold_mb: f64,
    /// Resident-set soft limit in MB; crossing it signals a graceful
    /// restart exactly once per worker lifetime.
    #[serde(default = "d_soft_limit_mb")]
    pub soft_limit_mb: u64,
    /// Env var holding the debug-endpoint token. Unset = endpoint disabled.
    #[serde(default = "d_debug_token_env")]
    pub debug_token_env: String,
    /// Tool-data cache entry cap.
    #[serde(default = "d_cache_max_entries")]
    pub tool_cache_max_entries: usize,
    /// Tool-data cache TTL.
    #[serde(default = "d_cache_ttl_secs")]
    pub tool_cache_ttl_secs: u64,
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            leak_window_size: d_window_size(),
            leak_check_interval: d_check_interval(),
            leak_slope_threshold_mb: d_slope_threshold(),
            soft_limit_mb: d_soft_limit_mb(),
            debug_token_env: d_debug_token_env(),
            tool_cache_max_entries: d_cache_max_entries(),
            tool_cache_ttl_secs: d_cache_ttl_secs(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_window_size() -> usize {
    200
}
fn d_check_interval() -> usize {
    50
}
fn d_slope_threshold() -> f64 {
    0.1
}
fn d_soft_limit_mb() -> u64 {
    450
}
fn d_debug_token_env() -> String {
    "DEBUG_MEMORY_TOKEN".into()
}
fn d_cache_max_entries() -> usize {
    50
}
fn d_cache_ttl_secs() -> u64 {
    300
}
