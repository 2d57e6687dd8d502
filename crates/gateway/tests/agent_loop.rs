//! Agent-runner behavior against scripted providers and a real tool
//! registry: allow-list enforcement, calculator rejection surfacing, turn
//! budgets, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use fin_domain::cancel::CancelToken;
use fin_domain::plan::{ExecutionPlan, ToolSelection};
use fin_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use fin_domain::Error;
use fin_gateway::runtime::{run_skill, AgentDeps};
use fin_providers::mock::{ScriptedProvider, ScriptedTurn};
use fin_tools::calc::CalculateTool;
use fin_tools::ToolRegistry;

fn registry_with_calculator() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculateTool));
    registry
}

fn call(id: &str, tool: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        call_id: id.into(),
        tool_name: tool.into(),
        arguments: args,
    }
}

fn deps<'a>(provider: &'a ScriptedProvider, tools: &'a ToolRegistry) -> AgentDeps<'a> {
    AgentDeps {
        provider,
        tools,
        tool_cache: None,
        tool_timeout: Duration::from_secs(5),
    }
}

fn plan(tools: ToolSelection, max_turns: u32) -> ExecutionPlan {
    ExecutionPlan {
        skill_name: "test".into(),
        allowed_tools: tools,
        max_turns,
        instruction_override: None,
    }
}

fn messages() -> Vec<Message> {
    vec![
        Message::system("you are a financial research assistant"),
        Message::user("[USER MESSAGE]: What is 94.9 * 1.08?"),
    ]
}

/// Find the tool-result content the model saw in a recorded request.
fn tool_results_of(request: &fin_providers::ChatRequest) -> Vec<(String, bool)> {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| match &m.content {
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::ToolResult {
                    content, is_error, ..
                } => Some((content.clone(), *is_error)),
                _ => None,
            }),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn tool_call_round_trip_produces_final_text() {
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::ToolCalls {
            text: String::new(),
            calls: vec![call("c1", "calculate", serde_json::json!({"expression": "94.9 * 1.08"}))],
        },
        ScriptedTurn::Text("94.9 * 1.08 is 102.492.".into()),
    ]);
    let tools = registry_with_calculator();

    let outcome = run_skill(
        &deps(&provider, &tools),
        &plan(ToolSelection::named(["calculate"]), 3),
        messages(),
        &CancelToken::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.text, "94.9 * 1.08 is 102.492.");
    assert_eq!(outcome.tools_used, vec!["calculate"]);
    assert!(!outcome.budget_exhausted);

    // The second model call saw the tool result.
    let requests = provider.requests.lock();
    assert_eq!(requests.len(), 2);
    let results = tool_results_of(&requests[1]);
    assert_eq!(results.len(), 1);
    assert!(results[0].0.starts_with("102.49"));
    assert!(!results[0].1);
}

#[tokio::test]
async fn rejected_calculator_input_is_visible_to_the_model_and_loop_continues() {
    // The canonical injection attempt: rejected, surfaced as an error tool
    // result, and the model goes on to answer.
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::ToolCalls {
            text: String::new(),
            calls: vec![call(
                "c1",
                "calculate",
                serde_json::json!({"expression": "__import__('os').system('ls')"}),
            )],
        },
        ScriptedTurn::Text("That expression is not valid arithmetic.".into()),
    ]);
    let tools = registry_with_calculator();

    let outcome = run_skill(
        &deps(&provider, &tools),
        &plan(ToolSelection::named(["calculate"]), 3),
        messages(),
        &CancelToken::new(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.text, "That expression is not valid arithmetic.");

    let requests = provider.requests.lock();
    let results = tool_results_of(&requests[1]);
    assert_eq!(results.len(), 1);
    let (content, is_error) = &results[0];
    assert!(*is_error);
    assert!(content.contains("rejected expression"), "got {content:?}");
}

#[tokio::test]
async fn disallowed_tool_is_refused_without_failing_the_run() {
    let provider = ScriptedProvider::new(vec![
        ScriptedTurn::ToolCalls {
            text: String::new(),
            calls: vec![call("c1", "get_options_chain", serde_json::json!({"ticker": "AAPL"}))],
        },
        ScriptedTurn::Text("I don't have options data available.".into()),
    ]);
    let tools = registry_with_calculator();

    let outcome = run_skill(
        &deps(&provider, &tools),
        &plan(ToolSelection::named(["calculate"]), 3),
        messages(),
        &CancelToken::new(),
        None,
    )
    .await
    .unwrap();

    assert!(outcome.text.contains("options data"));
    let requests = provider.requests.lock();
    let results = tool_results_of(&requests[1]);
    assert!(results[0].1);
    assert!(results[0].0.contains("not available"));
}

#[tokio::test]
async fn empty_allow_list_is_a_single_shot_without_tools() {
    let provider = ScriptedProvider::new(vec![ScriptedTurn::Text(
        "Apple reported $94.9B revenue, up 8% YoY.".into(),
    )]);
    let tools = registry_with_calculator();

    let mut no_tools_plan = plan(ToolSelection::none(), 1);
    no_tools_plan.instruction_override =
        Some("Summarize: Apple reported Q4 2024 revenue of $94.9B, up 8% YoY.".into());

    let outcome = run_skill(
        &deps(&provider, &tools),
        &no_tools_plan,
        messages(),
        &CancelToken::new(),
        None,
    )
    .await
    .unwrap();

    assert!(outcome.text.contains("94.9"));

    let requests = provider.requests.lock();
    assert_eq!(requests.len(), 1, "exactly one model call");
    assert!(requests[0].tools.is_empty(), "no tools registered");
    // The override replaced the system message.
    let system = requests[0].messages[0].content.extract_all_text();
    assert!(system.contains("Summarize:"));
}

#[tokio::test]
async fn turn_budget_exhaustion_returns_best_effort_text_with_notice() {
    // The model asks for a tool on every turn; the cap must cut it off.
    let tool_turn = || ScriptedTurn::ToolCalls {
        text: "checking one more figure".into(),
        calls: vec![call("c", "calculate", serde_json::json!({"expression": "1 + 1"}))],
    };
    let provider = ScriptedProvider::new(vec![tool_turn(), tool_turn(), tool_turn()]);
    let tools = registry_with_calculator();

    let outcome = run_skill(
        &deps(&provider, &tools),
        &plan(ToolSelection::named(["calculate"]), 3),
        messages(),
        &CancelToken::new(),
        None,
    )
    .await
    .unwrap();

    assert!(outcome.budget_exhausted);
    assert!(outcome.text.contains("checking one more figure"));
    assert!(outcome.text.contains("budget ran out"));
    // Turns 1 and 2 dispatched tools; turn 3 hit the cap with calls
    // still pending.
    assert_eq!(provider.request_count(), 3);
}

#[tokio::test]
async fn pre_cancelled_run_returns_cancelled_without_model_calls() {
    let provider = ScriptedProvider::always("unused");
    let tools = registry_with_calculator();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = run_skill(
        &deps(&provider, &tools),
        &plan(ToolSelection::named(["calculate"]), 3),
        messages(),
        &cancel,
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(provider.request_count(), 0);
}
