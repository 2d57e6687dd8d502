//! Anthropic Messages API adapter.

use std::collections::BTreeMap;

use serde_json::Value;

use fin_domain::config::ModelAlias;
use fin_domain::stream::{BoxStream, StreamEvent, Usage};
use fin_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use fin_domain::{Error, Result};

use crate::sse::sse_event_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, upstream};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
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
        // The system prompt travels in its own field; everything else in
        // alternating user/assistant messages.
        let mut system = String::new();
        let mut messages: Vec<Value> = Vec::new();
        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&msg.content.extract_all_text());
                }
                Role::User => messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content.extract_all_text(),
                })),
                Role::Assistant => messages.push(assistant_to_wire(msg)),
                Role::Tool => messages.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(req, false);
        let response = self.post(&body).await?;
        let parsed: Value = response.json().await.map_err(from_reqwest)?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = parsed["content"].as_array() {
            for block in blocks {
                match block["type"].as_str() {
                    Some("text") => content.push_str(block["text"].as_str().unwrap_or_default()),
                    Some("tool_use") => tool_calls.push(ToolCall {
                        call_id: block["id"].as_str().unwrap_or_default().to_string(),
                        tool_name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].clone(),
                    }),
                    _ => {}
                }
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            usage: parse_usage(&parsed["usage"]),
            finish_reason: parsed["stop_reason"].as_str().map(String::from),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req, true);
        let response = self.post(&body).await?;

        // block index → (call_id, tool_name, partial json)
        let mut blocks: BTreeMap<u64, (String, String, String)> = BTreeMap::new();
        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;
        let mut stop_reason: Option<String> = None;

        Ok(sse_event_stream(response, move |payload| {
            let event: Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(e) => {
                    return vec![Ok(StreamEvent::Error {
                        message: format!("unparseable stream event: {e}"),
                    })];
                }
            };

            match event["type"].as_str() {
                Some("message_start") => {
                    prompt_tokens = event["message"]["usage"]["input_tokens"]
                        .as_u64()
                        .unwrap_or(0) as u32;
                    Vec::new()
                }
                Some("content_block_start") => {
                    let index = event["index"].as_u64().unwrap_or(0);
                    let block = &event["content_block"];
                    if block["type"] == "tool_use" {
                        let call_id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        blocks.insert(index, (call_id.clone(), name.clone(), String::new()));
                        vec![Ok(StreamEvent::ToolCallStarted {
                            call_id,
                            tool_name: name,
                        })]
                    } else {
                        Vec::new()
                    }
                }
                Some("content_block_delta") => {
                    let index = event["index"].as_u64().unwrap_or(0);
                    let delta = &event["delta"];
                    match delta["type"].as_str() {
                        Some("text_delta") => {
                            let text = delta["text"].as_str().unwrap_or_default();
                            vec![Ok(StreamEvent::Token { text: text.to_string() })]
                        }
                        Some("input_json_delta") => {
                            let fragment = delta["partial_json"].as_str().unwrap_or_default();
                            if let Some((call_id, _, args)) = blocks.get_mut(&index) {
                                args.push_str(fragment);
                                vec![Ok(StreamEvent::ToolCallDelta {
                                    call_id: call_id.clone(),
                                    delta: fragment.to_string(),
                                })]
                            } else {
                                Vec::new()
                            }
                        }
                        _ => Vec::new(),
                    }
                }
                Some("content_block_stop") => {
                    let index = event["index"].as_u64().unwrap_or(0);
                    if let Some((call_id, tool_name, args)) = blocks.remove(&index) {
                        let arguments = serde_json::from_str(&args)
                            .unwrap_or_else(|_| Value::Object(Default::default()));
                        vec![Ok(StreamEvent::ToolCallFinished {
                            call_id,
                            tool_name,
                            arguments,
                        })]
                    } else {
                        Vec::new()
                    }
                }
                Some("message_delta") => {
                    if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                        completion_tokens = out as u32;
                    }
                    if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                        stop_reason = Some(reason.to_string());
                    }
                    Vec::new()
                }
                Some("message_stop") => {
                    vec![Ok(StreamEvent::Done {
                        usage: Some(Usage {
                            prompt_tokens,
                            completion_tokens,
                            total_tokens: prompt_tokens + completion_tokens,
                        }),
                        finish_reason: stop_reason.take(),
                    })]
                }
                _ => Vec::new(),
            }
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let prompt = value["input_tokens"].as_u64()? as u32;
    let completion = value["output_tokens"].as_u64().unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut content: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => {
            content.push(serde_json::json!({"type": "text", "text": t}));
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        content.push(serde_json::json!({"type": "text", "text": text}));
                    }
                    ContentPart::ToolUse { id, name, input } => {
                        content.push(serde_json::json!({
                            "type": "tool_use", "id": id, "name": name, "input": input,
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }
    serde_json::json!({"role": "assistant", "content": content})
}

/// Tool results ride in a user message as `tool_result` blocks.
fn tool_result_to_wire(msg: &Message) -> Value {
    let mut content: Vec<Value> = Vec::new();
    if let MessageContent::Parts(parts) = &msg.content {
        for part in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content: text,
                is_error,
            } = part
            {
                content.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": text,
                    "is_error": is_error,
                }));
            }
        }
    }
    serde_json::json!({"role": "user", "content": content})
}
