//! Callable tools: the declarative registry, the in-process tools
//! (calculator, URL fetcher, browser navigator), and the web-search client.

pub mod browser;
pub mod calc;
pub mod registry;
pub mod web;

use async_trait::async_trait;

use fin_domain::tool::ToolDefinition;
use fin_domain::Result;

/// A callable tool. Invokers are side-effecting and may be slow; they are
/// called from the agent runner only, under the per-tool timeout.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    fn name(&self) -> String {
        self.definition().name
    }

    /// Run the tool. The returned string goes back to the model verbatim
    /// as a tool result.
    async fn invoke(&self, args: serde_json::Value) -> Result<String>;
}

pub use registry::ToolRegistry;
pub use web::WebSearchClient;

/// Pull a required string argument out of a tool-call argument object.
pub(crate) fn require_str_arg<'a>(
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| fin_domain::Error::InputInvalid(format!("missing argument {key:?}")))
}
