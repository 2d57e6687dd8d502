use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Idle TTL: a session untouched for this long is expired by the sweep.
    #[serde(default = "d_ttl_secs")]
    pub ttl_secs: u64,
    /// Per-kind artifact count bound. Oldest drops first.
    #[serde(default = "d_artifact_max_count")]
    pub artifact_max_count: usize,
    /// Per-kind artifact total-character bound.
    #[serde(default = "d_artifact_max_chars")]
    pub artifact_max_chars: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_ttl_secs(),
            artifact_max_count: d_artifact_max_count(),
            artifact_max_chars: d_artifact_max_chars(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ttl_secs() -> u64 {
    3_600
}
fn d_artifact_max_count() -> usize {
    32
}
fn d_artifact_max_chars() -> usize {
    200_000
}
