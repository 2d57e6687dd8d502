//! Scripted provider for tests: returns canned responses in order and
//! records every request it receives. Lets the agent loop, research engine,
//! and entry handlers run hermetically.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use fin_domain::stream::{BoxStream, StreamEvent, Usage};
use fin_domain::tool::ToolCall;
use fin_domain::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Plain text answer.
    Text(String),
    /// Tool calls, optionally preceded by text.
    ToolCalls {
        text: String,
        calls: Vec<ToolCall>,
    },
    /// Provider failure.
    Fail(String),
}

pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedTurn>>,
    /// Every request received, for assertions.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    /// Returned when the script runs dry.
    fallback: String,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into()),
            requests: Arc::new(Mutex::new(Vec::new())),
            fallback: "(script exhausted)".into(),
        }
    }

    /// A provider that answers every request with the same text.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            fallback: text,
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_turn(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        let turn = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::Text(self.fallback.clone()));

        let usage = Some(Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        });

        match turn {
            ScriptedTurn::Text(content) => Ok(ChatResponse {
                content,
                tool_calls: Vec::new(),
                usage,
                finish_reason: Some("stop".into()),
            }),
            ScriptedTurn::ToolCalls { text, calls } => Ok(ChatResponse {
                content: text,
                tool_calls: calls,
                usage,
                finish_reason: Some("tool_calls".into()),
            }),
            ScriptedTurn::Fail(message) => Err(Error::Upstream {
                provider: "scripted".into(),
                message,
            }),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.next_turn(req)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let response = self.next_turn(req)?;
        let stream = async_stream::stream! {
            // Emit the text word by word to exercise incremental consumers.
            for word in response.content.split_inclusive(' ') {
                yield Ok(StreamEvent::Token { text: word.to_string() });
            }
            for call in response.tool_calls {
                yield Ok(StreamEvent::ToolCallStarted {
                    call_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                });
                yield Ok(StreamEvent::ToolCallFinished {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    arguments: call.arguments,
                });
            }
            yield Ok(StreamEvent::Done {
                usage: response.usage,
                finish_reason: response.finish_reason,
            });
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripted_turns_play_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptedTurn::Text("first".into()),
            ScriptedTurn::Text("second".into()),
        ]);
        let req = ChatRequest::default();
        assert_eq!(provider.chat(&req).await.unwrap().content, "first");
        assert_eq!(provider.chat(&req).await.unwrap().content, "second");
        assert_eq!(provider.chat(&req).await.unwrap().content, "(script exhausted)");
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn stream_ends_with_done_carrying_usage() {
        let provider = ScriptedProvider::always("AAPL closed higher today");
        let mut stream = provider.chat_stream(&ChatRequest::default()).await.unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                StreamEvent::Token { text: t } => text.push_str(&t),
                StreamEvent::Done { usage, .. } => {
                    saw_done = true;
                    assert!(usage.is_some());
                }
                _ => {}
            }
        }
        assert_eq!(text, "AAPL closed higher today");
        assert!(saw_done);
    }
}
