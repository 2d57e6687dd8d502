//! Per-session cancellation bookkeeping and the disconnect guard that ties
//! an SSE writer's closure to the request's root token.

use std::collections::HashMap;

use parking_lot::Mutex;

use fin_domain::cancel::CancelToken;

/// Tracks the active cancel token per session so `clear`/disconnect paths
/// can abort a running request.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a session's request.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens
            .lock()
            .insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running request for a session, if any.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.tokens.lock().get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when the request completes.
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }
}

/// Cancels the wrapped token on drop unless disarmed.
///
/// The streaming handlers move this guard into the SSE generator: when the
/// client disconnects, axum drops the stream, the guard drops, and the root
/// token fires — every child task observes it at its next suspension point.
/// A stream that runs to completion disarms the guard first.
pub struct DisconnectGuard {
    token: CancelToken,
    armed: bool,
}

impl DisconnectGuard {
    pub fn new(token: CancelToken) -> Self {
        Self { token, armed: true }
    }

    /// The stream finished normally; dropping the guard is now a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("stream dropped before completion, cancelling request");
            self.token.cancel();
        }
    }
}
