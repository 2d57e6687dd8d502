//! Streaming response pipeline: turns a channel of pipeline events into an
//! SSE byte stream with heartbeats, ordering enforcement, and disconnect
//! cancellation.
//!
//! Wire format: one `data: <json>` line per event, blank-line terminated;
//! `: keepalive` comments every 15 s of silence. A successful stream's
//! event sequence always satisfies `status* content* sources? complete`.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio::sync::mpsc;

use fin_domain::stream::PipelineEvent;

use crate::runtime::cancel::DisconnectGuard;

const HEARTBEAT: Duration = Duration::from_secs(15);

/// Enforces the event-ordering invariant, dropping frames that would
/// violate it. Producers already emit in order; this keeps the wire
/// contract honest even when they misbehave under races.
#[derive(Default)]
pub struct OrderingFilter {
    content_seen: bool,
    sources_seen: bool,
    complete_seen: bool,
}

impl OrderingFilter {
    /// Whether the event may go out, updating state when it may.
    pub fn admit(&mut self, event: &PipelineEvent) -> bool {
        if self.complete_seen {
            return false;
        }
        match event {
            PipelineEvent::Status { .. } => !self.content_seen && !self.sources_seen,
            PipelineEvent::Content { .. } => {
                if self.sources_seen {
                    return false;
                }
                self.content_seen = true;
                true
            }
            PipelineEvent::Sources { .. } => {
                if self.sources_seen {
                    return false;
                }
                self.sources_seen = true;
                true
            }
            PipelineEvent::Complete { .. } => {
                self.complete_seen = true;
                true
            }
        }
    }
}

/// Wrap an event channel as an SSE response.
///
/// The disconnect guard rides inside the generator: a client that goes
/// away drops the stream, the guard fires the root cancel token, and no
/// `complete` frame is ever emitted. When the producer sends `Complete`
/// the guard is disarmed and the stream closes cleanly.
pub fn pipeline_sse(
    mut rx: mpsc::Receiver<PipelineEvent>,
    mut guard: DisconnectGuard,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut order = OrderingFilter::default();
        while let Some(event) = rx.recv().await {
            if !order.admit(&event) {
                tracing::debug!(?event, "dropping out-of-order pipeline event");
                continue;
            }
            let is_complete = matches!(event, PipelineEvent::Complete { .. });
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok(Event::default().data(json)),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize pipeline event");
                    continue;
                }
            }
            if is_complete {
                guard.disarm();
                break;
            }
        }
        // Producer hung up without `complete` (error path): the guard
        // drops armed and cancels the request's descendants.
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT).text("keepalive"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fin_domain::plan::SourceRef;

    fn status() -> PipelineEvent {
        PipelineEvent::status("working")
    }
    fn content() -> PipelineEvent {
        PipelineEvent::Content { chunk: "x".into() }
    }
    fn sources() -> PipelineEvent {
        PipelineEvent::Sources {
            sources: vec![SourceRef::url("https://example.com")],
        }
    }
    fn complete() -> PipelineEvent {
        PipelineEvent::Complete {
            meta: serde_json::json!({}),
        }
    }

    /// Apply the filter over a sequence, returning a compact signature
    /// (s = status, c = content, r = sources, x = complete).
    fn admitted(events: Vec<PipelineEvent>) -> String {
        let mut filter = OrderingFilter::default();
        events
            .into_iter()
            .filter(|e| filter.admit(e))
            .map(|e| match e {
                PipelineEvent::Status { .. } => 's',
                PipelineEvent::Content { .. } => 'c',
                PipelineEvent::Sources { .. } => 'r',
                PipelineEvent::Complete { .. } => 'x',
            })
            .collect()
    }

    #[test]
    fn well_ordered_sequence_passes_untouched() {
        let seq = vec![status(), status(), content(), content(), sources(), complete()];
        assert_eq!(admitted(seq), "ssccrx");
    }

    #[test]
    fn status_after_content_is_dropped() {
        let seq = vec![status(), content(), status(), complete()];
        assert_eq!(admitted(seq), "scx");
    }

    #[test]
    fn second_sources_is_dropped() {
        let seq = vec![content(), sources(), sources(), complete()];
        assert_eq!(admitted(seq), "crx");
    }

    #[test]
    fn nothing_passes_after_complete() {
        let seq = vec![complete(), content(), status(), complete()];
        assert_eq!(admitted(seq), "x");
    }

    #[test]
    fn content_after_sources_is_dropped() {
        let seq = vec![sources(), content(), complete()];
        assert_eq!(admitted(seq), "rx");
    }

    #[test]
    fn all_admitted_sequences_match_the_contract() {
        // Brute-force: every sequence of length ≤ 4 over the event kinds,
        // filtered, must match `status* content* sources? complete?`.
        let kinds: Vec<fn() -> PipelineEvent> = vec![status, content, sources, complete];
        let re = regex_lite_check;
        for a in 0..4 {
            for b in 0..4 {
                for c in 0..4 {
                    for d in 0..4 {
                        let seq = vec![kinds[a](), kinds[b](), kinds[c](), kinds[d]()];
                        let sig = admitted(seq);
                        assert!(re(&sig), "filtered sequence {sig:?} violates contract");
                    }
                }
            }
        }
    }

    /// `status* content* sources? complete?` without a regex dependency.
    fn regex_lite_check(sig: &str) -> bool {
        let mut rest = sig.trim_start_matches('s');
        rest = rest.trim_start_matches('c');
        let rest = rest.strip_prefix('r').unwrap_or(rest);
        let rest = rest.strip_prefix('x').unwrap_or(rest);
        rest.is_empty()
    }
}
