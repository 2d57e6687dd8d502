//! Bearer-token authentication for the OpenAI-compatible routes.
//!
//! The token comes from the env var named by `server.api_token_env`
//! (default `FINGPT_API_KEY`), read **once at startup** and cached as a
//! SHA-256 digest in `AppState`. Unset token = auth disabled.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Axum middleware enforcing `Authorization: Bearer <token>` on `/v1/...`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Compare fixed-length digests in constant time so neither token
    // length nor prefix leaks.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": {
                    "message": "invalid or missing API key",
                    "type": "authentication_error",
                }
            })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Hash a configured token env var at startup. `None` disables the check.
pub fn token_hash_from_env(env_var: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var, "bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(env_var, "bearer-token auth disabled ({env_var} unset)");
            None
        }
    }
}
