//! HTTP surface: the extension endpoints, the OpenAI-compatible API, the
//! health probe, and the token-protected memory debug endpoint.

pub mod auth;
pub mod chat;
pub mod context;
pub mod debug_memory;
pub mod health;
pub mod openai_compat;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use fin_domain::Error;

use crate::state::AppState;

/// Build the full router. `/v1/...` routes sit behind bearer auth; the
/// extension endpoints rely on CORS + localhost binding as the original
/// deployment did; `/health/` is open.
pub fn router(state: AppState) -> Router<AppState> {
    let v1 = Router::new()
        .route("/v1/models", get(openai_compat::list_models))
        .route("/v1/chat/completions", post(openai_compat::chat_completions))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    Router::new()
        .route("/health/", get(health::health))
        .route("/get_chat_response/", get(chat::get_chat_response))
        .route("/get_adv_response/", get(chat::get_adv_response))
        .route(
            "/get_chat_response_stream/",
            get(chat::get_chat_response_stream),
        )
        .route(
            "/get_adv_response_stream/",
            get(chat::get_adv_response_stream),
        )
        .route("/input_webtext/", post(context::input_webtext))
        .route("/clear_messages/", post(context::clear_messages))
        .route("/get_source_urls/", get(context::get_source_urls))
        .route("/api/get_memory_stats/", get(context::get_memory_stats))
        .route(
            "/api/get_available_models/",
            get(context::get_available_models),
        )
        .route("/api/get_preferred_urls/", get(context::get_preferred_urls))
        .route("/api/add_preferred_urls/", post(context::add_preferred_urls))
        .route(
            "/api/sync_preferred_urls/",
            post(context::sync_preferred_urls),
        )
        .route("/api/debug_memory/", get(debug_memory::debug_memory))
        .merge(v1)
}

/// Map a domain error onto the extension-endpoint error envelope.
///
/// User-actionable errors carry their message; everything else logs the
/// full detail under the request's correlation id and returns a generic
/// 500 — stack traces and internal paths never reach the client.
pub fn error_response(request_id: uuid::Uuid, err: &Error) -> Response {
    let (status, message) = match err {
        Error::InputInvalid(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        Error::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
        Error::ModelUnknown(alias) => (
            StatusCode::NOT_FOUND,
            format!("unknown model: {alias}"),
        ),
        Error::Cancelled => {
            // The client is already gone; the status is for the log line.
            (StatusCode::INTERNAL_SERVER_ERROR, "request cancelled".into())
        }
        other => {
            tracing::error!(%request_id, error = %other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
            )
        }
    };
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
