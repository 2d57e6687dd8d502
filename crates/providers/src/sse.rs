//! Shared SSE plumbing for the provider adapters.
//!
//! Every adapter receives a `reqwest::Response`, buffers body chunks, cuts
//! complete SSE events on `\n\n`, and feeds each `data:` payload to a
//! provider-specific parser producing stream events.

use crate::util::from_reqwest;
use fin_domain::stream::{BoxStream, StreamEvent};
use fin_domain::Result;

/// Incremental SSE event buffer.
///
/// `push` appends raw body bytes; `drain` returns the `data:` payloads of
/// every complete event currently buffered, leaving any trailing partial
/// event in place for the next push.
#[derive(Default)]
pub(crate) struct SseBuffer {
    buf: String,
}

impl SseBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
    }

    pub fn drain(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let event: String = self.buf.drain(..pos + 2).collect();
            for line in event.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_string());
                    }
                }
            }
        }
        payloads
    }

    /// Force out whatever remains (used when the body closes mid-event).
    pub fn flush(&mut self) -> Vec<String> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        self.buf.push_str("\n\n");
        self.drain()
    }
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a
/// provider-specific parser closure.
///
/// The closure is `FnMut` because some adapters carry assembly state across
/// events (tool-call argument fragments in particular). A trailing `Done`
/// event is synthesized if the parser never produced one.
pub(crate) fn sse_event_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = SseBuffer::default();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push(&bytes);
                    for payload in buffer.drain() {
                        for event in parse_data(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    for payload in buffer.flush() {
                        for event in parse_data(&payload) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}
