use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool servers (MCP)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-server connections. Each server is a child process speaking
/// JSON-RPC over stdio; its tools (get_stock_info, get_options_chain, ...)
/// are discovered at startup and registered by name.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Label used in logs and tool provenance (e.g. `yahoo-finance`).
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Seconds to wait for `initialize` before giving up on the server.
    #[serde(default = "d_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

fn d_startup_timeout_secs() -> u64 {
    15
}
