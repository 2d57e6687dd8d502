//! OpenAI-compatible adapter.
//!
//! Works with OpenAI itself, DeepSeek, and any other endpoint following the
//! OpenAI chat-completions contract.

use std::collections::BTreeMap;

use serde_json::Value;

use fin_domain::config::ModelAlias;
use fin_domain::stream::{BoxStream, StreamEvent, Usage};
use fin_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use fin_domain::{Error, Result};

use crate::sse::sse_event_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, upstream};

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Build the adapter from a model-alias entry, reading the API key from
    /// the alias's env var.
    pub fn from_alias(alias_name: &str, alias: &ModelAlias) -> Result<Self> {
        let api_key = std::env::var(&alias.key_env)
            .map_err(|_| Error::Config(format!("{} is not set", alias.key_env)))?;
        if api_key.is_empty() {
            return Err(Error::Config(format!("{} is empty", alias.key_env)));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            id: alias_name.to_string(),
            base_url: alias.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: alias.model.clone(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(upstream(&self.id, format!("HTTP {status}: {detail}")));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(req, false);
        let response = self.post(&body).await?;
        let parsed: Value = response.json().await.map_err(from_reqwest)?;

        let choice = parsed["choices"]
            .get(0)
            .ok_or_else(|| upstream(&self.id, "response has no choices"))?;
        let message = &choice["message"];

        let content = message["content"].as_str().unwrap_or_default().to_string();
        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let arguments = call["function"]["arguments"]
                    .as_str()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_else(|| Value::Object(Default::default()));
                tool_calls.push(ToolCall {
                    call_id: call["id"].as_str().unwrap_or_default().to_string(),
                    tool_name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments,
                });
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            usage: parse_usage(&parsed["usage"]),
            finish_reason: choice["finish_reason"].as_str().map(String::from),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req, true);
        let response = self.post(&body).await?;

        // index → (call_id, tool_name, argument fragments)
        let mut pending: BTreeMap<u64, (String, String, String)> = BTreeMap::new();
        let mut usage: Option<Usage> = None;

        Ok(sse_event_stream(response, move |payload| {
            if payload == "[DONE]" {
                let mut events: Vec<Result<StreamEvent>> = Vec::new();
                for (_, (call_id, tool_name, args)) in std::mem::take(&mut pending) {
                    events.push(Ok(finish_tool_call(call_id, tool_name, &args)));
                }
                events.push(Ok(StreamEvent::Done {
                    usage: usage.take(),
                    finish_reason: Some("stop".into()),
                }));
                return events;
            }

            let chunk: Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(e) => {
                    return vec![Ok(StreamEvent::Error {
                        message: format!("unparseable stream chunk: {e}"),
                    })];
                }
            };

            if let Some(u) = parse_usage(&chunk["usage"]) {
                usage = Some(u);
            }

            let mut events = Vec::new();
            let Some(delta) = chunk["choices"].get(0).map(|c| &c["delta"]) else {
                return events;
            };

            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::Token { text: text.to_string() }));
                }
            }

            if let Some(calls) = delta["tool_calls"].as_array() {
                for call in calls {
                    let index = call["index"].as_u64().unwrap_or(0);
                    let entry = pending.entry(index).or_default();
                    if let Some(id) = call["id"].as_str() {
                        entry.0 = id.to_string();
                    }
                    if let Some(name) = call["function"]["name"].as_str() {
                        entry.1.push_str(name);
                        events.push(Ok(StreamEvent::ToolCallStarted {
                            call_id: entry.0.clone(),
                            tool_name: entry.1.clone(),
                        }));
                    }
                    if let Some(fragment) = call["function"]["arguments"].as_str() {
                        entry.2.push_str(fragment);
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            call_id: entry.0.clone(),
                            delta: fragment.to_string(),
                        }));
                    }
                }
            }

            // Some endpoints close tool calls via finish_reason without [DONE].
            let finish = chunk["choices"][0]["finish_reason"].as_str();
            if matches!(finish, Some("tool_calls")) {
                for (_, (call_id, tool_name, args)) in std::mem::take(&mut pending) {
                    events.push(Ok(finish_tool_call(call_id, tool_name, &args)));
                }
            }

            events
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

fn finish_tool_call(call_id: String, tool_name: String, args: &str) -> StreamEvent {
    let arguments = if args.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(args).unwrap_or_else(|_| Value::Object(Default::default()))
    };
    StreamEvent::ToolCallFinished {
        call_id,
        tool_name,
        arguments,
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let prompt = value["prompt_tokens"].as_u64()?;
    Some(Usage {
        prompt_tokens: prompt as u32,
        completion_tokens: value["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: value["total_tokens"].as_u64().unwrap_or(prompt) as u32,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_wire(msg),
        Role::Assistant => assistant_to_wire(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.clone()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text.clone()),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": input.to_string() }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_wire(msg: &Message) -> Value {
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                return serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                });
            }
        }
    }
    serde_json::json!({
        "role": "tool",
        "tool_call_id": "",
        "content": msg.content.extract_all_text(),
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_call_serializes_arguments_as_string() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![ContentPart::ToolUse {
                id: "call_1".into(),
                name: "get_stock_info".into(),
                input: serde_json::json!({"ticker": "AAPL"}),
            }]),
        };
        let wire = assistant_to_wire(&msg);
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "get_stock_info");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            "{\"ticker\":\"AAPL\"}"
        );
    }

    #[test]
    fn tool_result_maps_to_tool_role() {
        let wire = msg_to_wire(&Message::tool_result("call_1", "227.50"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
        assert_eq!(wire["content"], "227.50");
    }

    #[test]
    fn usage_parses_from_wire() {
        let usage = parse_usage(&serde_json::json!({
            "prompt_tokens": 120, "completion_tokens": 40, "total_tokens": 160
        }))
        .unwrap();
        assert_eq!(usage.total_tokens, 160);
        assert!(parse_usage(&Value::Null).is_none());
    }
}
