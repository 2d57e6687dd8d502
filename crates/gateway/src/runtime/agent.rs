//! Agent runner — executes one skill against one model with one message
//! list, driving the tool-use loop under the plan's constraints.
//!
//! Loop shape: send messages → collect streamed text and tool calls →
//! dispatch permitted tools concurrently → append results → repeat, up to
//! the plan's turn cap. Cancellation is checked before every model call
//! and at the tool boundary.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use fin_domain::cancel::CancelToken;
use fin_domain::plan::{ExecutionPlan, ToolSelection};
use fin_domain::stream::{PipelineEvent, StreamEvent, Usage};
use fin_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use fin_domain::{Error, Result};
use fin_guards::BoundedTtlCache;
use fin_providers::{ChatRequest, LlmProvider};
use fin_tools::ToolRegistry;

/// What one skill run produced.
#[derive(Debug, Clone, Default)]
pub struct AgentRunOutcome {
    pub text: String,
    /// Distinct tool names invoked, in first-use order.
    pub tools_used: Vec<String>,
    pub usage: Usage,
    /// True when the turn cap hit while the model still wanted a tool.
    /// `text` then carries the best-effort answer plus a notice.
    pub budget_exhausted: bool,
}

/// Everything the runner needs besides the plan and messages.
pub struct AgentDeps<'a> {
    pub provider: &'a dyn LlmProvider,
    pub tools: &'a ToolRegistry,
    /// Cache for repeated data lookups within the TTL (quote fetches in
    /// particular repeat across turns and sub-questions).
    pub tool_cache: Option<&'a BoundedTtlCache<String, String>>,
    pub tool_timeout: Duration,
}

/// Run one skill to completion.
///
/// `events`, when present, receives content chunks and tool status frames
/// for streaming responses.
pub async fn run_skill(
    deps: &AgentDeps<'_>,
    plan: &ExecutionPlan,
    mut messages: Vec<Message>,
    cancel: &CancelToken,
    events: Option<&mpsc::Sender<PipelineEvent>>,
) -> Result<AgentRunOutcome> {
    // The override replaces the assembled system prompt for this run.
    if let Some(instructions) = &plan.instruction_override {
        match messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = MessageContent::Text(instructions.clone());
            }
            _ => messages.insert(0, Message::system(instructions.clone())),
        }
    }

    // Empty allow-list: no tool setup at all, single model shot.
    let tool_defs = if plan.allowed_tools.is_empty() {
        Vec::new()
    } else {
        deps.tools.definitions_for(&plan.allowed_tools)
    };

    let mut outcome = AgentRunOutcome::default();

    for turn in 0..plan.max_turns {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let request = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(0.2),
            ..Default::default()
        };

        let (text, tool_calls, usage) =
            stream_one_model_turn(deps.provider, &request, cancel, events).await?;
        if let Some(u) = &usage {
            outcome.usage.accumulate(u);
        }
        if !text.is_empty() {
            outcome.text = text.clone();
        }

        if tool_calls.is_empty() {
            return Ok(outcome);
        }

        // The model wants tools but the budget allows no further model
        // call to consume their results.
        if turn + 1 == plan.max_turns {
            tracing::warn!(
                skill = %plan.skill_name,
                turns = plan.max_turns,
                "turn budget exhausted with tool calls pending"
            );
            outcome.budget_exhausted = true;
            if !outcome.text.is_empty() {
                outcome.text.push_str("\n\n");
            }
            outcome
                .text
                .push_str("[Answer incomplete: the tool-use budget ran out before all lookups finished.]");
            return Ok(outcome);
        }

        // ── Tool dispatch ─────────────────────────────────────────
        messages.push(assistant_tool_message(&text, &tool_calls));

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for call in &tool_calls {
            if !outcome.tools_used.iter().any(|n| n == &call.tool_name) {
                outcome.tools_used.push(call.tool_name.clone());
            }
            if let Some(tx) = events {
                let _ = tx
                    .send(PipelineEvent::status_detail("using tool", call.tool_name.clone()))
                    .await;
            }
        }

        // All calls of one turn run concurrently; results return to the
        // model in call order.
        let dispatches = tool_calls.iter().map(|call| dispatch_tool(deps, plan, call));
        let results = futures_util::future::join_all(dispatches).await;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        for (call, (content, is_error)) in tool_calls.iter().zip(results) {
            messages.push(if is_error {
                Message::tool_error(&call.call_id, &content)
            } else {
                Message::tool_result(&call.call_id, &content)
            });
        }
    }

    // max_turns streak of tool-call turns; the loop above always returns
    // from inside, but keep a defensive tail.
    Ok(outcome)
}

/// Drive one streaming model call to completion, forwarding text chunks.
async fn stream_one_model_turn(
    provider: &dyn LlmProvider,
    request: &ChatRequest,
    cancel: &CancelToken,
    events: Option<&mpsc::Sender<PipelineEvent>>,
) -> Result<(String, Vec<ToolCall>, Option<Usage>)> {
    let mut stream = provider.chat_stream(request).await?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage: Option<Usage> = None;

    while let Some(event) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match event? {
            StreamEvent::Token { text: chunk } => {
                if let Some(tx) = events {
                    let _ = tx.send(PipelineEvent::Content { chunk: chunk.clone() }).await;
                }
                text.push_str(&chunk);
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done {
                usage: turn_usage, ..
            } => {
                usage = turn_usage;
            }
            StreamEvent::Error { message } => {
                return Err(Error::Upstream {
                    provider: provider.provider_id().to_string(),
                    message,
                });
            }
            // Partial tool-call assembly happens provider-side; only the
            // finished calls matter here.
            StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolCallDelta { .. } => {}
        }
    }

    Ok((text, tool_calls, usage))
}

/// Invoke one tool under the plan's allow-list and the per-call timeout.
/// Failures of every kind become assistant-visible text; the loop goes on.
async fn dispatch_tool(
    deps: &AgentDeps<'_>,
    plan: &ExecutionPlan,
    call: &ToolCall,
) -> (String, bool) {
    if !plan.allowed_tools.permits(&call.tool_name) {
        return (
            format!(
                "tool {:?} is not available to this skill; available: {}",
                call.tool_name,
                describe_selection(&plan.allowed_tools)
            ),
            true,
        );
    }
    let Some(tool) = deps.tools.get(&call.tool_name) else {
        return (format!("tool {:?} is not registered", call.tool_name), true);
    };

    // Data lookups repeat across turns and sub-questions; serve them from
    // the bounded cache when fresh.
    let cache_key = cacheable_key(&call.tool_name, &call.arguments);
    if let (Some(cache), Some(key)) = (deps.tool_cache, &cache_key) {
        if let Some(hit) = cache.get(key) {
            tracing::debug!(tool = %call.tool_name, "tool cache hit");
            return (hit, false);
        }
    }

    let started = std::time::Instant::now();
    let invoked = tokio::time::timeout(deps.tool_timeout, tool.invoke(call.arguments.clone())).await;
    let elapsed_ms = started.elapsed().as_millis();

    match invoked {
        Ok(Ok(content)) => {
            tracing::debug!(tool = %call.tool_name, elapsed_ms, "tool ok");
            if let (Some(cache), Some(key)) = (deps.tool_cache, cache_key) {
                cache.insert(key, content.clone());
            }
            (content, false)
        }
        Ok(Err(e)) => {
            tracing::warn!(tool = %call.tool_name, error = %e, "tool failed");
            (format!("tool error: {e}"), true)
        }
        Err(_) => {
            tracing::warn!(tool = %call.tool_name, elapsed_ms, "tool timed out");
            (
                format!(
                    "tool error: {} timed out after {}s",
                    call.tool_name,
                    deps.tool_timeout.as_secs()
                ),
                true,
            )
        }
    }
}

/// Only idempotent data lookups are cacheable; anything side-effecting
/// (browser actions) or query-shaped goes straight through.
fn cacheable_key(tool_name: &str, arguments: &Value) -> Option<String> {
    if tool_name.starts_with("get_") {
        Some(format!("{tool_name}:{arguments}"))
    } else {
        None
    }
}

fn describe_selection(selection: &ToolSelection) -> String {
    match selection {
        ToolSelection::All => "all tools".into(),
        ToolSelection::Named(names) => names.iter().cloned().collect::<Vec<_>>().join(", "),
    }
}

/// The assistant message carrying this turn's text and tool-use parts.
fn assistant_tool_message(text: &str, calls: &[ToolCall]) -> Message {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text: text.to_string() });
    }
    for call in calls {
        parts.push(ContentPart::ToolUse {
            id: call.call_id.clone(),
            name: call.tool_name.clone(),
            input: call.arguments.clone(),
        });
    }
    Message {
        role: Role::Assistant,
        content: MessageContent::Parts(parts),
    }
}
