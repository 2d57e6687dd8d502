//! Leak-aware runtime guards: bounded caches with eviction, sliding-window
//! memory-growth detection, and the soft restart limit.

pub mod cache;
pub mod leak;

pub use cache::BoundedTtlCache;
pub use leak::{DetectorState, LeakDetector, RecordOutcome, RssSampler};
