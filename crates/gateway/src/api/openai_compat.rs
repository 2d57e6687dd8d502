//! OpenAI-compatible surface: `GET /v1/models` and
//! `POST /v1/chat/completions`.
//!
//! Lets any client speaking the OpenAI API drive the agent. The `mode`
//! extension field selects thinking vs research; `normal` behaves as
//! thinking.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use fin_domain::Error;

use crate::api::chat::{self, ChatParams};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/models
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_models(State(state): State<AppState>) -> Response {
    let created = chrono::Utc::now().timestamp();
    let data: Vec<serde_json::Value> = state
        .llm
        .available_aliases()
        .into_iter()
        .map(|id| {
            serde_json::json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": "finsearch",
            })
        })
        .collect();
    Json(serde_json::json!({ "object": "list", "data": data })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/completions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "d_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub search_domains: Option<Vec<String>>,
    #[serde(default)]
    pub preferred_links: Option<Vec<String>>,
    #[serde(default)]
    pub user_timezone: Option<String>,
    #[serde(default)]
    pub user_time: Option<String>,
    /// Stable client identifier; doubles as the session key.
    #[serde(default)]
    pub user: Option<String>,
}

fn d_mode() -> String {
    "normal".into()
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<CompletionRequest>,
) -> Response {
    let Some(question) = body
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
    else {
        return openai_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "no user message found in messages array",
        );
    };

    let session_id = body
        .user
        .clone()
        .map(|u| format!("openai:{u}"))
        .unwrap_or_else(|| format!("openai:{}", uuid::Uuid::new_v4()));

    let params = ChatParams {
        question,
        model: body.model.clone(),
        current_url: body.url,
        session_id,
        user_timezone: body.user_timezone,
        user_time: body.user_time,
        search_domains: body.search_domains.map(|v| v.join(",")),
        preferred_links: body.preferred_links.map(|v| v.join(",")),
    };

    let started = Instant::now();
    let mode = if body.mode == "research" { "research" } else { "thinking" };
    let result = chat::completion_for_openai(&state, params, mode).await;

    match result {
        Ok((text, sources, usage)) => {
            let model = body
                .model
                .unwrap_or_else(|| state.config.llm.default_alias.clone());
            tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "completion served");
            Json(serde_json::json!({
                "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
                "object": "chat.completion",
                "created": chrono::Utc::now().timestamp(),
                "model": model,
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": text },
                    "finish_reason": "stop",
                }],
                "usage": CompletionUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                },
                "sources": sources,
            }))
            .into_response()
        }
        Err(e) => {
            let (status, kind, message): (StatusCode, &str, String) = match &e {
                Error::InputInvalid(m) => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error", m.clone())
                }
                Error::ModelUnknown(alias) => (
                    StatusCode::NOT_FOUND,
                    "invalid_request_error",
                    format!("model {alias:?} does not exist"),
                ),
                other => {
                    tracing::error!(error = %other, "completion failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "server_error",
                        "the server encountered an error processing the request".into(),
                    )
                }
            };
            openai_error(status, kind, &message)
        }
    }
}

fn openai_error(status: StatusCode, error_type: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "message": message, "type": error_type }
        })),
    )
        .into_response()
}
