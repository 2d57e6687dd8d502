//! Component wiring: build the shared [`AppState`] from configuration.
//!
//! The provider registry is injected rather than built here so tests can
//! wire scripted providers through the full request path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use fin_domain::config::Config;
use fin_guards::{BoundedTtlCache, LeakDetector, RssSampler};
use fin_mcp::McpManager;
use fin_providers::ProviderRegistry;
use fin_sessions::SessionStore;
use fin_skills::{Planner, PromptFragmentStore, SkillRegistry};
use fin_tools::browser::BrowsePageTool;
use fin_tools::calc::CalculateTool;
use fin_tools::web::{FetchUrlTool, WebSearchTool};
use fin_tools::{ToolRegistry, WebSearchClient};

use crate::api::auth::token_hash_from_env;
use crate::runtime::cancel::CancelMap;
use crate::state::AppState;

/// Build the application state. Returns the state and the tool-server
/// manager (kept for shutdown).
pub async fn build_state(
    config: Arc<Config>,
    llm: Arc<ProviderRegistry>,
) -> anyhow::Result<(AppState, Arc<McpManager>)> {
    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(&config.sessions));
    tracing::info!(ttl_secs = config.sessions.ttl_secs, "session store ready");

    // ── Prompts + planner ────────────────────────────────────────────
    let prompts = Arc::new(PromptFragmentStore::load(config.prompts_dir.as_deref()));
    let planner = Arc::new(Planner::new(SkillRegistry::builtin()));
    tracing::info!("prompt fragments and planner ready");

    // ── Web search ───────────────────────────────────────────────────
    let web_search = Arc::new(
        WebSearchClient::new(&config.research).context("initializing web search client")?,
    );

    // ── Tool registry ────────────────────────────────────────────────
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CalculateTool));
    tools.register(Arc::new(
        FetchUrlTool::new(config.tools.fetch.clone()).context("initializing URL fetcher")?,
    ));
    tools.register(Arc::new(WebSearchTool::new((*web_search).clone())));
    if config.tools.browser.enabled {
        tools.register(Arc::new(BrowsePageTool::new(
            config.tools.browser.clone(),
            config.tools.fetch.max_text_chars,
        )));
    }

    // ── Tool servers ─────────────────────────────────────────────────
    let mcp = if config.mcp.servers.is_empty() {
        tracing::info!("no tool servers configured");
        Arc::new(McpManager::empty())
    } else {
        let manager = McpManager::from_config(
            &config.mcp,
            Duration::from_secs(config.tools.tool_timeout_secs),
        )
        .await;
        tracing::info!(
            servers = manager.server_count(),
            tools = manager.tool_count(),
            "tool servers connected"
        );
        Arc::new(manager)
    };
    mcp.register_into(&mut tools);
    tracing::info!(tools = tools.len(), "tool registry ready");

    // ── Runtime guards ───────────────────────────────────────────────
    let tool_cache = Arc::new(BoundedTtlCache::new(
        Duration::from_secs(config.guards.tool_cache_ttl_secs),
        config.guards.tool_cache_max_entries,
    ));
    let leak_detector = Arc::new(Mutex::new(LeakDetector::new(&config.guards)));
    let rss_sampler = Arc::new(Mutex::new(RssSampler::new()));
    if rss_sampler.lock().is_none() {
        tracing::warn!("resident-set sampling unavailable; leak detection disabled");
    }

    // ── Tokens (read once, hashed) ───────────────────────────────────
    let api_token_hash = token_hash_from_env(&config.server.api_token_env);
    let debug_token_hash = token_hash_from_env(&config.guards.debug_token_env);

    let state = AppState {
        config,
        llm,
        sessions,
        tools: Arc::new(tools),
        prompts,
        planner,
        web_search,
        cancel_map: Arc::new(CancelMap::new()),
        tool_cache,
        leak_detector,
        rss_sampler,
        restart_signal: Arc::new(Notify::new()),
        memory_baseline: Arc::new(Mutex::new(None)),
        preferred_urls: Arc::new(RwLock::new(Default::default())),
        api_token_hash,
        debug_token_hash,
    };

    Ok((state, mcp))
}
