use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Hard timeout for any single tool invocation.
    #[serde(default = "d_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "d_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "d_fetch_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "d_fetch_max_text_chars")]
    pub max_text_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_fetch_timeout_secs(),
            max_bytes: d_fetch_max_bytes(),
            max_text_chars: d_fetch_max_text_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// When false, the browser navigator tool is not registered.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Restrict navigation to the origin of the first navigated URL.
    #[serde(default = "d_true")]
    pub same_origin: bool,
    /// Extra chromium launch args (e.g. `--no-sandbox` in containers).
    #[serde(default)]
    pub launch_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            same_origin: true,
            launch_args: Vec::new(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_tool_timeout_secs() -> u64 {
    30
}
fn d_fetch_timeout_secs() -> u64 {
    20
}
fn d_fetch_max_bytes() -> usize {
    5 * 1024 * 1024
}
fn d_fetch_max_text_chars() -> usize {
    250_000
}
fn d_true() -> bool {
    true
}
