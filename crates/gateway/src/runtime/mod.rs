//! Request runtime: the agent runner, cancellation bookkeeping, and the
//! research-mode wiring.

pub mod agent;
pub mod cancel;
pub mod research;

pub use agent::{run_skill, AgentDeps, AgentRunOutcome};
pub use cancel::{CancelMap, DisconnectGuard};
