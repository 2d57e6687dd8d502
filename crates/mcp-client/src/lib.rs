//! Client side of the tool-server contract: stdio JSON-RPC transport,
//! startup tool discovery, and per-call invocation.

pub mod manager;
pub mod protocol;
pub mod transport;

pub use manager::McpManager;
