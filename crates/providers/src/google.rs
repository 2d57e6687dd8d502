//! Google Gemini adapter (generateContent / streamGenerateContent).
//!
//! Gemini has no tool-call ids; the function name doubles as the call id,
//! which works because the runner round-trips the id back into the
//! function-response part.

use serde_json::Value;

use fin_domain::config::ModelAlias;
use fin_domain::stream::{BoxStream, StreamEvent, Usage};
use fin_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use fin_domain::{Error, Result};

use crate::sse::sse_event_stream;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, upstream};

pub struct GoogleProvider {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GoogleProvider {
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

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut system = String::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&msg.content.extract_all_text());
                }
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content.extract_all_text()}],
                })),
                Role::Assistant => contents.push(assistant_to_wire(msg)),
                Role::Tool => contents.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
        }
        let mut generation: serde_json::Map<String, Value> = Default::default();
        if let Some(temp) = req.temperature {
            generation.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.max_tokens {
            generation.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if req.json_mode {
            generation.insert(
                "responseMimeType".into(),
                Value::String("application/json".into()),
            );
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/models/{}:{path}", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
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
impl LlmProvider for GoogleProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(req);
        let response = self.post("generateContent", &body).await?;
        let parsed: Value = response.json().await.map_err(from_reqwest)?;

        let candidate = parsed["candidates"]
            .get(0)
            .ok_or_else(|| upstream(&self.id, "response has no candidates"))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    content.push_str(text);
                } else if part["functionCall"].is_object() {
                    let name = part["functionCall"]["name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    tool_calls.push(ToolCall {
                        call_id: name.clone(),
                        tool_name: name,
                        arguments: part["functionCall"]["args"].clone(),
                    });
                }
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            usage: parse_usage(&parsed["usageMetadata"]),
            finish_reason: candidate["finishReason"].as_str().map(str::to_lowercase),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_body(req);
        let url_path = "streamGenerateContent";
        let url = format!("{}/models/{}:{url_path}", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str()), ("alt", "sse")])
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(upstream(&self.id, format!("HTTP {status}: {detail}")));
        }

        let mut usage: Option<Usage> = None;

        Ok(sse_event_stream(response, move |payload| {
            let chunk: Value = match serde_json::from_str(payload) {
                Ok(v) => v,
                Err(e) => {
                    return vec![Ok(StreamEvent::Error {
                        message: format!("unparseable stream chunk: {e}"),
                    })];
                }
            };

            if let Some(u) = parse_usage(&chunk["usageMetadata"]) {
                usage = Some(u);
            }

            let mut events: Vec<Result<StreamEvent>> = Vec::new();
            let candidate = &chunk["candidates"][0];
            if let Some(parts) = candidate["content"]["parts"].as_array() {
                for part in parts {
                    if let Some(text) = part["text"].as_str() {
                        if !text.is_empty() {
                            events.push(Ok(StreamEvent::Token { text: text.to_string() }));
                        }
                    } else if part["functionCall"].is_object() {
                        // Gemini delivers function calls whole.
                        let name = part["functionCall"]["name"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        events.push(Ok(StreamEvent::ToolCallStarted {
                            call_id: name.clone(),
                            tool_name: name.clone(),
                        }));
                        events.push(Ok(StreamEvent::ToolCallFinished {
                            call_id: name.clone(),
                            tool_name: name,
                            arguments: part["functionCall"]["args"].clone(),
                        }));
                    }
                }
            }

            if candidate["finishReason"].as_str().is_some() {
                events.push(Ok(StreamEvent::Done {
                    usage: usage.take(),
                    finish_reason: candidate["finishReason"].as_str().map(str::to_lowercase),
                }));
            }

            events
        }))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let prompt = value["promptTokenCount"].as_u64()? as u32;
    let completion = value["candidatesTokenCount"].as_u64().unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: value["totalTokenCount"].as_u64().unwrap_or((prompt + completion) as u64)
            as u32,
    })
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => parts.push(serde_json::json!({"text": t})),
        MessageContent::Parts(content_parts) => {
            for part in content_parts {
                match part {
                    ContentPart::Text { text } => {
                        parts.push(serde_json::json!({"text": text}));
                    }
                    ContentPart::ToolUse { name, input, .. } => {
                        parts.push(serde_json::json!({
                            "functionCall": { "name": name, "args": input }
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }
    serde_json::json!({"role": "model", "parts": parts})
}

fn tool_result_to_wire(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    if let MessageContent::Parts(content_parts) = &msg.content {
        for part in content_parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                ..
            } = part
            {
                parts.push(serde_json::json!({
                    "functionResponse": {
                        "name": tool_use_id,
                        "response": { "result": content },
                    }
                }));
            }
        }
    }
    serde_json::json!({"role": "user", "parts": parts})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_results_become_function_responses() {
        let wire = tool_result_to_wire(&Message::tool_result("get_stock_info", "price 227.50"));
        assert_eq!(wire["role"], "user");
        assert_eq!(
            wire["parts"][0]["functionResponse"]["name"],
            "get_stock_info"
        );
    }

    #[test]
    fn usage_prefers_total_token_count() {
        let usage = parse_usage(&serde_json::json!({
            "promptTokenCount": 10,
            "candidatesTokenCount": 5,
            "totalTokenCount": 17
        }))
        .unwrap();
        assert_eq!(usage.total_tokens, 17);
    }
}
