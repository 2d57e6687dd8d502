//! Tool-server manager: connects each configured server, runs the
//! initialize handshake, discovers tools, and exposes every discovered
//! tool as a registry entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fin_domain::config::{McpConfig, McpServerConfig};
use fin_domain::tool::ToolDefinition;
use fin_domain::{Error, Result};
use fin_tools::{Tool, ToolRegistry};

use crate::protocol::{self, ServerToolDef, ToolCallResult, ToolsListResult};
use crate::transport::StdioTransport;

struct Server {
    name: String,
    transport: Arc<StdioTransport>,
    tools: Vec<ServerToolDef>,
}

/// Holds every connected tool server and its discovered tools.
pub struct McpManager {
    servers: Vec<Server>,
    call_timeout: Duration,
}

impl McpManager {
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Connect every configured server. Servers that fail the handshake are
    /// skipped with a warning; the gateway still starts.
    pub async fn from_config(config: &McpConfig, call_timeout: Duration) -> Self {
        let mut servers = Vec::new();
        for server_config in &config.servers {
            match Self::connect(server_config).await {
                Ok(server) => {
                    tracing::info!(
                        server = %server.name,
                        tools = server.tools.len(),
                        "tool server connected"
                    );
                    servers.push(server);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server_config.name,
                        error = %e,
                        "tool server failed to start, skipping"
                    );
                }
            }
        }
        Self {
            servers,
            call_timeout,
        }
    }

    async fn connect(config: &McpServerConfig) -> Result<Server> {
        let transport = Arc::new(
            StdioTransport::spawn(config).map_err(|e| Error::Other(e.to_string()))?,
        );
        let startup = Duration::from_secs(config.startup_timeout_secs);

        transport
            .send_request("initialize", Some(protocol::initialize_params()), startup)
            .await
            .map_err(|e| Error::Other(format!("initialize failed: {e}")))?
            .into_result()
            .map_err(|e| Error::Other(format!("initialize rejected: {e}")))?;
        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(|e| Error::Other(e.to_string()))?;

        let listed = transport
            .send_request("tools/list", None, startup)
            .await
            .map_err(|e| Error::Other(format!("tools/list failed: {e}")))?
            .into_result()
            .map_err(|e| Error::Other(format!("tools/list rejected: {e}")))?;
        let listed: ToolsListResult = serde_json::from_value(listed)?;

        Ok(Server {
            name: config.name.clone(),
            transport,
            tools: listed.tools,
        })
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.servers.iter().map(|s| s.tools.len()).sum()
    }

    /// Register every discovered tool into the registry.
    pub fn register_into(&self, registry: &mut ToolRegistry) {
        for server in &self.servers {
            for def in &server.tools {
                registry.register(Arc::new(ServerTool {
                    server_name: server.name.clone(),
                    def: def.clone(),
                    transport: server.transport.clone(),
                    call_timeout: self.call_timeout,
                }));
            }
        }
    }

    /// Shut down all server processes.
    pub async fn shutdown(&self) {
        for server in &self.servers {
            server.transport.shutdown().await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Discovered tool → registry entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ServerTool {
    server_name: String,
    def: ServerToolDef,
    transport: Arc<StdioTransport>,
    call_timeout: Duration,
}

#[async_trait]
impl Tool for ServerTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.def.name.clone(),
            description: self.def.description.clone(),
            parameters: self.def.input_schema.clone(),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String> {
        let params = serde_json::json!({
            "name": self.def.name,
            "arguments": args,
        });
        let response = self
            .transport
            .send_request("tools/call", Some(params), self.call_timeout)
            .await
            .map_err(|e| Error::ToolFailed {
                tool: self.def.name.clone(),
                message: format!("{} server: {e}", self.server_name),
            })?
            .into_result()
            .map_err(|e| Error::ToolFailed {
                tool: self.def.name.clone(),
                message: e.to_string(),
            })?;

        let result: ToolCallResult = serde_json::from_value(response)?;
        if result.is_error {
            return Err(Error::ToolFailed {
                tool: self.def.name.clone(),
                message: result.joined_text(),
            });
        }
        Ok(result.joined_text())
    }
}
