//! The extension's chat endpoints — thinking and research, blocking and
//! streaming.
//!
//! Handler flow: parse inputs → resolve model → touch session + record the
//! user turn → assemble the system prompt → plan → dispatch to the agent
//! runner (thinking) or research engine (research; analyzer bail-out falls
//! through to thinking) → record the assistant turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use fin_domain::cancel::CancelToken;
use fin_domain::plan::{ExecutionPlan, SourceRef};
use fin_domain::stream::PipelineEvent;
use fin_domain::tool::Message;
use fin_domain::{Error, Result};
use fin_providers::LlmProvider;
use fin_sessions::{SourceKind, Turn, TurnMeta};
use fin_skills::{assemble_system_prompt, host_of, SkillContext};

use crate::api::error_response;
use crate::runtime::agent::{run_skill, AgentDeps, AgentRunOutcome};
use crate::runtime::cancel::DisconnectGuard;
use crate::runtime::research::run_research;
use crate::sse::pipeline_sse;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub question: String,
    /// Model alias; the configured default when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// URL of the page the user is viewing.
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub user_timezone: Option<String>,
    /// The user's wall clock, ISO-8601.
    #[serde(default)]
    pub user_time: Option<String>,
    /// Comma-separated host suffixes to restrict web search to.
    #[serde(default)]
    pub search_domains: Option<String>,
    /// Comma-separated extra preferred hosts for this request.
    #[serde(default)]
    pub preferred_links: Option<String>,
}

fn default_session() -> String {
    "default".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared preparation (steps 1–5 of every handler)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) struct PreparedRequest {
    pub request_id: Uuid,
    pub session_id: String,
    pub query: String,
    pub model_alias: String,
    pub provider: Arc<dyn LlmProvider>,
    pub plan: ExecutionPlan,
    pub messages: Vec<Message>,
    pub time_ctx: String,
    pub search_domains: Vec<String>,
    pub cancel: CancelToken,
    pub started: Instant,
}

pub(crate) fn prepare(state: &AppState, params: &ChatParams, mode: &str) -> Result<PreparedRequest> {
    let request_id = Uuid::new_v4();
    let query = params.question.trim().to_string();
    if query.is_empty() {
        return Err(Error::InputInvalid("question is required".into()));
    }

    let provider = state.llm.resolve(params.model.as_deref())?;
    let model_alias = params
        .model
        .clone()
        .unwrap_or_else(|| state.config.llm.default_alias.clone());

    tracing::info!(
        %request_id,
        session_id = %params.session_id,
        mode,
        model = %model_alias,
        "request accepted"
    );

    // Session bookkeeping. The injected-page freshness check runs before
    // the user turn is appended: the page counts as "current" when it
    // arrived after the last recorded turn.
    let session_id = params.session_id.clone();
    state.sessions.touch_or_create(&session_id);
    let snapshot = state.sessions.snapshot(&session_id);
    let injected = snapshot
        .fetched_context
        .get(&SourceKind::PageInjected)
        .and_then(|seq| seq.last());
    let has_fresh_page = match (injected, snapshot.conversation.last()) {
        (Some(artifact), Some(last_turn)) => artifact.created_at >= last_turn.created_at,
        (Some(_), None) => true,
        (None, _) => false,
    };
    let injected_page = injected.map(|a| a.content.clone());

    state.sessions.append_turn(&session_id, Turn::user(&query));
    state.sessions.update_metadata(&session_id, |meta| {
        meta.mode = Some(mode.to_string());
        meta.current_url = params.current_url.clone();
        meta.user_timezone = params.user_timezone.clone();
        meta.user_clock_iso = params.user_time.clone();
    });

    // Assemble and cache the system prompt.
    let system_prompt = assemble_system_prompt(
        &state.prompts,
        params.current_url.as_deref(),
        params.user_timezone.as_deref(),
        params.user_time.as_deref(),
        None,
    );
    state
        .sessions
        .set_system_prompt(&session_id, system_prompt);
    let time_ctx =
        fin_skills::prompts::time_context(params.user_timezone.as_deref(), params.user_time.as_deref());

    // Plan. Plan-time failures fall back to the fallback skill inside the
    // planner; only an empty registry errors, and that cannot happen with
    // the built-in set.
    let host = params.current_url.as_deref().and_then(host_of);
    let ctx = SkillContext {
        query: &query,
        has_injected_page: has_fresh_page,
        host: host.as_deref(),
        injected_page: injected_page.as_deref(),
    };
    let plan = state.planner.plan(&ctx, &state.prompts)?;

    let messages = state.sessions.render_for_llm(&session_id);

    // Search-domain filter: explicit request domains + pinned preferences.
    let mut search_domains = split_hosts(params.search_domains.as_deref());
    search_domains.extend(split_hosts(params.preferred_links.as_deref()));
    for host in state.preferred_urls.read().iter() {
        if !search_domains.contains(host) {
            search_domains.push(host.clone());
        }
    }

    let cancel = state.cancel_map.register(&session_id);

    Ok(PreparedRequest {
        request_id,
        session_id,
        query,
        model_alias,
        provider,
        plan,
        messages,
        time_ctx,
        search_domains,
        cancel,
        started: Instant::now(),
    })
}

fn split_hosts(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase())
            .collect()
    })
    .unwrap_or_default()
}

/// Record the assistant turn with its metadata and run the request-end
/// guard sampling.
fn finish_request(
    state: &AppState,
    prep: &PreparedRequest,
    text: &str,
    tools_used: Vec<String>,
    sources: &[SourceRef],
) {
    let mut turn = Turn::assistant(text);
    turn.meta = TurnMeta {
        model: Some(prep.model_alias.clone()),
        tools_used,
        sources: sources.iter().filter_map(|s| s.url.clone()).collect(),
        duration_ms: Some(prep.started.elapsed().as_millis() as u64),
    };
    state.sessions.append_turn(&prep.session_id, turn);
    state.cancel_map.remove(&prep.session_id);
    state.record_request_completed();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocking: thinking mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_chat_response(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Response {
    let prep = match prepare(&state, &params, "thinking") {
        Ok(p) => p,
        Err(e) => return error_response(Uuid::new_v4(), &e),
    };

    let outcome = run_thinking(&state, &prep).await;
    respond_blocking(&state, prep, outcome, Vec::new())
}

async fn run_thinking(state: &AppState, prep: &PreparedRequest) -> Result<AgentRunOutcome> {
    let deps = AgentDeps {
        provider: prep.provider.as_ref(),
        tools: &state.tools,
        tool_cache: Some(&state.tool_cache),
        tool_timeout: Duration::from_secs(state.config.tools.tool_timeout_secs),
    };
    run_skill(&deps, &prep.plan, prep.messages.clone(), &prep.cancel, None).await
}

fn respond_blocking(
    state: &AppState,
    prep: PreparedRequest,
    outcome: Result<AgentRunOutcome>,
    sources: Vec<SourceRef>,
) -> Response {
    match outcome {
        Ok(outcome) => {
            finish_request(state, &prep, &outcome.text, outcome.tools_used.clone(), &sources);
            let stats = state.sessions.stats(&prep.session_id);
            Json(serde_json::json!({
                "response": outcome.text,
                "sources": sources,
                "context_stats": stats,
            }))
            .into_response()
        }
        Err(e) => {
            state.cancel_map.remove(&prep.session_id);
            error_response(prep.request_id, &e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocking: research mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_adv_response(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Response {
    let prep = match prepare(&state, &params, "research") {
        Ok(p) => p,
        Err(e) => return error_response(Uuid::new_v4(), &e),
    };

    let research = run_research(
        &state,
        prep.provider.clone(),
        &prep.query,
        &prep.time_ctx,
        prep.search_domains.clone(),
        prep.cancel.clone(),
        None,
    )
    .await;

    match research {
        Ok(Some(outcome)) => {
            finish_request(&state, &prep, &outcome.text, Vec::new(), &outcome.sources);
            let stats = state.sessions.stats(&prep.session_id);
            Json(serde_json::json!({
                "response": outcome.text,
                "sources": outcome.sources,
                "context_stats": stats,
                "research_meta": outcome.meta,
            }))
            .into_response()
        }
        // The analyzer declined to decompose: single-pass path.
        Ok(None) => {
            let outcome = run_thinking(&state, &prep).await;
            respond_blocking(&state, prep, outcome, Vec::new())
        }
        Err(e) => {
            state.cancel_map.remove(&prep.session_id);
            error_response(prep.request_id, &e)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_chat_response_stream(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Response {
    stream_endpoint(state, params, "thinking").await
}

pub async fn get_adv_response_stream(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Response {
    stream_endpoint(state, params, "research").await
}

async fn stream_endpoint(state: AppState, params: ChatParams, mode: &'static str) -> Response {
    let prep = match prepare(&state, &params, mode) {
        Ok(p) => p,
        Err(e) => return error_response(Uuid::new_v4(), &e),
    };

    let (tx, rx) = mpsc::channel::<PipelineEvent>(64);
    let guard = DisconnectGuard::new(prep.cancel.clone());

    tokio::spawn(async move {
        let request_id = prep.request_id;
        let result = match mode {
            "research" => drive_research_stream(&state, &prep, &tx).await,
            _ => drive_thinking_stream(&state, &prep, &tx).await,
        };
        match result {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                // Client is gone: no complete frame, no assistant turn.
                tracing::info!(%request_id, "stream cancelled by client");
                state.cancel_map.remove(&prep.session_id);
            }
            Err(e) => {
                tracing::error!(%request_id, error = %e, "stream failed");
                state.cancel_map.remove(&prep.session_id);
                // Closing without `complete` tells the client the stream
                // failed; detail stays in the log.
            }
        }
    });

    pipeline_sse(rx, guard).into_response()
}

async fn drive_thinking_stream(
    state: &AppState,
    prep: &PreparedRequest,
    tx: &mpsc::Sender<PipelineEvent>,
) -> Result<()> {
    let _ = tx
        .send(PipelineEvent::status_detail("thinking", prep.plan.skill_name.clone()))
        .await;

    let deps = AgentDeps {
        provider: prep.provider.as_ref(),
        tools: &state.tools,
        tool_cache: Some(&state.tool_cache),
        tool_timeout: Duration::from_secs(state.config.tools.tool_timeout_secs),
    };
    let outcome = run_skill(&deps, &prep.plan, prep.messages.clone(), &prep.cancel, Some(tx)).await?;

    finish_request(state, prep, &outcome.text, outcome.tools_used.clone(), &[]);
    let _ = tx
        .send(PipelineEvent::Complete {
            meta: serde_json::json!({
                "mode": "thinking",
                "skill": prep.plan.skill_name,
                "model": prep.model_alias,
                "duration_ms": prep.started.elapsed().as_millis() as u64,
                "budget_exhausted": outcome.budget_exhausted,
            }),
        })
        .await;
    Ok(())
}

async fn drive_research_stream(
    state: &AppState,
    prep: &PreparedRequest,
    tx: &mpsc::Sender<PipelineEvent>,
) -> Result<()> {
    let research = run_research(
        state,
        prep.provider.clone(),
        &prep.query,
        &prep.time_ctx,
        prep.search_domains.clone(),
        prep.cancel.clone(),
        Some(tx.clone()),
    )
    .await?;

    match research {
        Some(outcome) => {
            finish_request(state, prep, &outcome.text, Vec::new(), &outcome.sources);
            let _ = tx
                .send(PipelineEvent::Sources {
                    sources: outcome.sources.clone(),
                })
                .await;
            let _ = tx
                .send(PipelineEvent::Complete {
                    meta: serde_json::json!({
                        "mode": "research",
                        "model": prep.model_alias,
                        "iterations": outcome.meta.iterations,
                        "subq_count": outcome.meta.subq_count,
                        "tool_hits": outcome.meta.tool_hits,
                        "web_hits": outcome.meta.web_hits,
                        "duration_ms": prep.started.elapsed().as_millis() as u64,
                    }),
                })
                .await;
            Ok(())
        }
        None => {
            let _ = tx
                .send(PipelineEvent::status("answering directly"))
                .await;
            drive_thinking_stream(state, prep, tx).await
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compat bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a completion for the `/v1/chat/completions` handler, returning the
/// raw pieces it needs for the OpenAI envelope.
pub(crate) async fn completion_for_openai(
    state: &AppState,
    params: ChatParams,
    mode: &str,
) -> Result<(String, Vec<SourceRef>, fin_domain::stream::Usage)> {
    let prep = prepare(state, &params, mode)?;

    if mode == "research" {
        match run_research(
            state,
            prep.provider.clone(),
            &prep.query,
            &prep.time_ctx,
            prep.search_domains.clone(),
            prep.cancel.clone(),
            None,
        )
        .await
        {
            Ok(Some(outcome)) => {
                finish_request(state, &prep, &outcome.text, Vec::new(), &outcome.sources);
                // Research-mode token usage stays internal; the envelope
                // reports zeros rather than a fabricated count.
                return Ok((outcome.text, outcome.sources, Default::default()));
            }
            Ok(None) => {}
            Err(e) => {
                state.cancel_map.remove(&prep.session_id);
                return Err(e);
            }
        }
    }

    match run_thinking(state, &prep).await {
        Ok(outcome) => {
            finish_request(state, &prep, &outcome.text, outcome.tools_used.clone(), &[]);
            Ok((outcome.text, Vec::new(), outcome.usage))
        }
        Err(e) => {
            state.cancel_map.remove(&prep.session_id);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_hosts_trims_and_lowercases() {
        assert_eq!(
            split_hosts(Some("Finance.Yahoo.com, sec.gov ,")),
            vec!["finance.yahoo.com", "sec.gov"]
        );
        assert!(split_hosts(None).is_empty());
    }
}
