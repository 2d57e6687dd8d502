//! Token-protected memory debug endpoint.
//!
//! Actions: `status` (current snapshot + detector state), `snapshot`
//! (capture a byte-accounting baseline and return the top components),
//! `diff` (deltas against the baseline), `stop` (drop the baseline).
//! Rust exposes no ambient heap tracer, so "top allocators" is reported as
//! per-component byte accounting: session text, tool-cache entries, and
//! the resident set.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DebugQuery {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Per-component byte accounting at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryAccounting {
    pub rss_mb: Option<f64>,
    /// component name → approximate bytes held.
    pub components: BTreeMap<String, u64>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

fn collect_accounting(state: &AppState) -> MemoryAccounting {
    let rss_mb = state
        .rss_sampler
        .lock()
        .as_mut()
        .and_then(|sampler| sampler.rss_mb());

    let mut components = BTreeMap::new();
    components.insert(
        "session_store_text".into(),
        state.sessions.total_chars() as u64,
    );
    components.insert(
        "session_store_sessions".into(),
        state.sessions.session_count() as u64,
    );
    components.insert("tool_cache_entries".into(), state.tool_cache.len() as u64);

    MemoryAccounting {
        rss_mb,
        components,
        captured_at: chrono::Utc::now(),
    }
}

pub async fn debug_memory(
    State(state): State<AppState>,
    Query(query): Query<DebugQuery>,
) -> Response {
    // Token check first; unauthorized callers learn nothing, not even
    // which actions exist.
    if !authorized(&state, query.token.as_deref()) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "detail": "forbidden" })),
        )
            .into_response();
    }

    match query.action.as_str() {
        "status" => {
            let accounting = collect_accounting(&state);
            let detector = state.leak_detector.lock().state();
            Json(serde_json::json!({
                "accounting": accounting,
                "detector": detector,
                "tracing_active": state.memory_baseline.lock().is_some(),
            }))
            .into_response()
        }
        "snapshot" => {
            let accounting = collect_accounting(&state);
            let top = top_components(&accounting);
            *state.memory_baseline.lock() = Some(accounting);
            Json(serde_json::json!({ "status": "tracing", "top": top })).into_response()
        }
        "diff" => {
            let baseline = state.memory_baseline.lock().clone();
            let Some(baseline) = baseline else {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "no snapshot taken" })),
                )
                    .into_response();
            };
            let current = collect_accounting(&state);
            let mut deltas = BTreeMap::new();
            for (name, bytes) in &current.components {
                let before = baseline.components.get(name).copied().unwrap_or(0);
                deltas.insert(name.clone(), *bytes as i64 - before as i64);
            }
            Json(serde_json::json!({
                "since": baseline.captured_at,
                "rss_mb_delta": match (current.rss_mb, baseline.rss_mb) {
                    (Some(now), Some(then)) => Some(now - then),
                    _ => None,
                },
                "deltas": deltas,
            }))
            .into_response()
        }
        "stop" => {
            *state.memory_baseline.lock() = None;
            Json(serde_json::json!({ "status": "stopped" })).into_response()
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("unknown action {other:?}")
            })),
        )
            .into_response(),
    }
}

fn authorized(state: &AppState, token: Option<&str>) -> bool {
    let Some(expected) = &state.debug_token_hash else {
        // No token configured: the endpoint is disabled outright.
        return false;
    };
    let provided = Sha256::digest(token.unwrap_or("").as_bytes());
    bool::from(provided.ct_eq(expected.as_slice()))
}

fn top_components(accounting: &MemoryAccounting) -> Vec<serde_json::Value> {
    let mut entries: Vec<_> = accounting.components.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1));
    entries
        .into_iter()
        .map(|(name, bytes)| serde_json::json!({ "component": name, "bytes": bytes }))
        .collect()
}
