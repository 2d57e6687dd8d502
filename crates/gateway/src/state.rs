use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use fin_domain::config::Config;
use fin_guards::{BoundedTtlCache, LeakDetector, RssSampler};
use fin_providers::ProviderRegistry;
use fin_sessions::SessionStore;
use fin_skills::{Planner, PromptFragmentStore};
use fin_tools::{ToolRegistry, WebSearchClient};

use crate::runtime::cancel::CancelMap;

/// Shared application state passed to all API handlers.
///
/// This is the process's entire shared mutable surface: everything else is
/// per-request. Fields are grouped by concern.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub sessions: Arc<SessionStore>,
    pub tools: Arc<ToolRegistry>,
    pub prompts: Arc<PromptFragmentStore>,
    pub planner: Arc<Planner>,
    pub web_search: Arc<WebSearchClient>,

    // ── Request runtime ───────────────────────────────────────────────
    pub cancel_map: Arc<CancelMap>,

    // ── Runtime guards ────────────────────────────────────────────────
    /// Bounded cache for repeated structured-data lookups.
    pub tool_cache: Arc<BoundedTtlCache<String, String>>,
    /// Per-worker memory-growth detector, fed once per completed request.
    pub leak_detector: Arc<Mutex<LeakDetector>>,
    /// Resident-set sampler. `None` when the process table is unreadable.
    pub rss_sampler: Arc<Mutex<Option<RssSampler>>>,
    /// Fired once when the soft memory limit is crossed; main drains
    /// in-flight requests and exits for the supervisor to restart.
    pub restart_signal: Arc<Notify>,
    /// Baseline for the debug endpoint's snapshot/diff actions.
    pub memory_baseline: Arc<Mutex<Option<crate::api::debug_memory::MemoryAccounting>>>,

    // ── Preferred sources ─────────────────────────────────────────────
    /// Host suffixes the user pinned; merged into web-search domain
    /// filters.
    pub preferred_urls: Arc<RwLock<BTreeSet<String>>>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 of the `/v1` bearer token; `None` = auth disabled.
    pub api_token_hash: Option<Vec<u8>>,
    /// SHA-256 of the debug-endpoint token; `None` = endpoint disabled.
    pub debug_token_hash: Option<Vec<u8>>,
}

impl AppState {
    /// Record one completed request against the runtime guards: sample the
    /// resident set, feed the detector, and fire the restart signal the
    /// one time the soft limit is crossed.
    pub fn record_request_completed(&self) {
        let rss_mb = {
            let mut sampler = self.rss_sampler.lock();
            sampler.as_mut().and_then(|s| s.rss_mb())
        };
        let Some(rss_mb) = rss_mb else { return };

        let outcome = self.leak_detector.lock().record(rss_mb);
        if outcome.soft_limit_signal {
            self.restart_signal.notify_one();
        }
    }
}
