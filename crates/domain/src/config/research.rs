use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Research engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Sub-question cap per analyzer call.
    #[serde(default = "d_max_sub")]
    pub max_sub: usize,
    /// Iteration cap for the decompose/execute/gap loop.
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    /// Parallelism bound for sub-question execution within one iteration.
    #[serde(default = "d_max_parallel")]
    pub max_parallel: usize,
    /// Per sub-question timeout.
    #[serde(default = "d_sub_timeout_secs")]
    pub sub_timeout_secs: u64,
    /// JSON search endpoint (SearxNG-compatible `format=json` API).
    #[serde(default = "d_search_endpoint")]
    pub search_endpoint: String,
    /// Results requested per web search.
    #[serde(default = "d_search_max_results")]
    pub search_max_results: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sub: d_max_sub(),
            max_iterations: d_max_iterations(),
            max_parallel: d_max_parallel(),
            sub_timeout_secs: d_sub_timeout_secs(),
            search_endpoint: d_search_endpoint(),
            search_max_results: d_search_max_results(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_sub() -> usize {
    5
}
fn d_max_iterations() -> u32 {
    3
}
fn d_max_parallel() -> usize {
    5
}
fn d_sub_timeout_secs() -> u64 {
    60
}
fn d_search_endpoint() -> String {
    "https://searx.be/search".into()
}
fn d_search_max_results() -> usize {
    5
}
