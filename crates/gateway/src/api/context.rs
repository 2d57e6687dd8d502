//! Session-context endpoints used by the browser extension: page
//! injection, clearing, source listing, stats, models, and preferred URLs.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use fin_sessions::{Artifact, SourceKind};
use fin_skills::host_of;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(default = "default_session")]
    pub session_id: String,
}

fn default_session() -> String {
    "default".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /input_webtext/ — record a page_injected artifact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputWebtextBody {
    pub text_content: String,
    pub current_url: String,
    #[serde(default = "default_session", alias = "session_id")]
    pub session_id: String,
}

pub async fn input_webtext(
    State(state): State<AppState>,
    Json(body): Json<InputWebtextBody>,
) -> Response {
    if body.text_content.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "textContent is required" })),
        )
            .into_response();
    }

    state.sessions.touch_or_create(&body.session_id);
    state.sessions.add_artifact(
        &body.session_id,
        SourceKind::PageInjected,
        Artifact::with_url(body.text_content, body.current_url.clone()),
    );
    state.sessions.update_metadata(&body.session_id, |meta| {
        meta.current_url = Some(body.current_url.clone());
    });

    tracing::debug!(session_id = %body.session_id, url = %body.current_url, "page injected");
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /clear_messages/?preserve_web=bool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    #[serde(default)]
    pub preserve_web: bool,
    #[serde(default = "default_session")]
    pub session_id: String,
}

pub async fn clear_messages(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Response {
    // Abort any in-flight request on this session before wiping it.
    state.cancel_map.cancel(&query.session_id);
    state.sessions.clear(&query.session_id, query.preserve_web);
    Json(serde_json::json!({
        "status": "ok",
        "preserved_fetched_context": query.preserve_web,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /get_source_urls/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_source_urls(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let urls = state.sessions.source_urls(&query.session_id);
    Json(serde_json::json!({ "sources": urls })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/get_memory_stats/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_memory_stats(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let stats = state.sessions.stats(&query.session_id);
    Json(serde_json::json!({
        "session": stats,
        "live_sessions": state.sessions.session_count(),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/get_available_models/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_available_models(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "models": state.llm.available_aliases(),
        "default": state.config.llm.default_alias,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preferred URLs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AddPreferredBody {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncPreferredBody {
    #[serde(default)]
    pub urls: Vec<String>,
}

pub async fn get_preferred_urls(State(state): State<AppState>) -> Response {
    let urls: Vec<String> = state.preferred_urls.read().iter().cloned().collect();
    Json(serde_json::json!({ "preferred_urls": urls })).into_response()
}

/// Store the host of the submitted URL; search filtering is host-based.
pub async fn add_preferred_urls(
    State(state): State<AppState>,
    Json(body): Json<AddPreferredBody>,
) -> Response {
    let Some(host) = host_of(&body.url) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "url has no host" })),
        )
            .into_response();
    };
    state.preferred_urls.write().insert(host);
    let urls: Vec<String> = state.preferred_urls.read().iter().cloned().collect();
    Json(serde_json::json!({ "preferred_urls": urls })).into_response()
}

/// Replace the preferred set wholesale (extension settings sync).
pub async fn sync_preferred_urls(
    State(state): State<AppState>,
    Json(body): Json<SyncPreferredBody>,
) -> Response {
    let hosts: std::collections::BTreeSet<String> =
        body.urls.iter().filter_map(|u| host_of(u)).collect();
    let count = hosts.len();
    *state.preferred_urls.write() = hosts;
    Json(serde_json::json!({ "status": "ok", "count": count })).into_response()
}
