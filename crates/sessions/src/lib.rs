//! Unified session context: per-session conversation turns and fetched
//! artifacts, bounded and TTL'd, safe for concurrent requests.

pub mod store;
pub mod types;

pub use store::SessionStore;
pub use types::{
    Artifact, Session, SessionMetadata, SessionStats, SourceKind, Turn, TurnMeta, TurnRole,
};
