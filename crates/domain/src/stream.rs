use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::plan::SourceRef;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text token chunk.
    #[serde(rename = "token")]
    Token { text: String },

    /// A tool call has started.
    #[serde(rename = "tool_call_started")]
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    #[serde(rename = "tool_call_finished")]
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client-facing SSE frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One frame of the client-facing SSE stream.
///
/// Wire format: each frame is a single `data: <json>` line followed by a
/// blank line. A successful stream satisfies `status* content* sources?
/// complete`; a cancelled stream simply stops without `complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Phase-by-phase progress during research.
    #[serde(rename = "status")]
    Status {
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    /// A chunk of answer text, in generation order.
    #[serde(rename = "content")]
    Content { chunk: String },

    /// Source attributions, at most once, before `complete`.
    #[serde(rename = "sources")]
    Sources { sources: Vec<SourceRef> },

    /// Terminates a successful stream; exactly one per stream.
    #[serde(rename = "complete")]
    Complete { meta: serde_json::Value },
}

impl PipelineEvent {
    pub fn status(label: impl Into<String>) -> Self {
        PipelineEvent::Status {
            label: label.into(),
            detail: None,
            url: None,
        }
    }

    pub fn status_detail(label: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineEvent::Status {
            label: label.into(),
            detail: Some(detail.into()),
            url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_event_wire_shape() {
        let frame = serde_json::to_value(PipelineEvent::status_detail(
            "researching",
            "3 sub-questions",
        ))
        .unwrap();
        assert_eq!(frame["type"], "status");
        assert_eq!(frame["label"], "researching");
        assert_eq!(frame["detail"], "3 sub-questions");
        assert!(frame.get("url").is_none());
    }

    #[test]
    fn content_frame_round_trips() {
        let frame = PipelineEvent::Content { chunk: "AAPL is ".into() };
        let json = serde_json::to_string(&frame).unwrap();
        let back: PipelineEvent = serde_json::from_str(&json).unwrap();
        match back {
            PipelineEvent::Content { chunk } => assert_eq!(chunk, "AAPL is "),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
