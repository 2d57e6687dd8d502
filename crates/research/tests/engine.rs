//! Research engine behavior against a scripted provider and a stub
//! executor: decomposition, gap-driven iteration, bounds, failure
//! isolation, and cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use fin_domain::cancel::CancelToken;
use fin_domain::config::ResearchConfig;
use fin_domain::plan::SourceRef;
use fin_domain::{Error, Result};
use fin_providers::mock::{ScriptedProvider, ScriptedTurn};
use fin_providers::LlmProvider;
use fin_research::{run_iterative_research, SubQuestionExecutor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test doubles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct StubExecutor {
    /// Questions the numerical path should fail for.
    numerical_failures: Vec<&'static str>,
    /// When true, the web path hangs until cancelled.
    web_hangs: bool,
    numerical_calls: Mutex<Vec<String>>,
    web_calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SubQuestionExecutor for StubExecutor {
    async fn numerical(&self, question: &str) -> Result<(String, Vec<SourceRef>)> {
        self.numerical_calls.lock().push(question.to_string());
        if self.numerical_failures.iter().any(|f| question.contains(f)) {
            return Err(Error::ToolFailed {
                tool: "get_stock_financials".into(),
                message: "upstream 503".into(),
            });
        }
        Ok((
            format!("tool answer for: {question}"),
            vec![SourceRef::url("https://finance.yahoo.com/quote")],
        ))
    }

    async fn web(&self, question: &str) -> Result<(String, Vec<SourceRef>)> {
        self.web_calls.lock().push(question.to_string());
        if self.web_hangs {
            std::future::pending::<()>().await;
        }
        Ok((
            format!("web answer for: {question}"),
            vec![SourceRef::url("https://example.com/article")],
        ))
    }
}

fn analyzer_json(questions: &[(&str, &str)]) -> String {
    let subs: Vec<String> = questions
        .iter()
        .map(|(q, kind)| format!(r#"{{"question": "{q}", "kind": "{kind}"}}"#))
        .collect();
    format!(
        r#"{{"needs_decomposition": true, "sub_questions": [{}]}}"#,
        subs.join(",")
    )
}

fn config() -> ResearchConfig {
    ResearchConfig {
        sub_timeout_secs: 5,
        ..ResearchConfig::default()
    }
}

async fn run(
    provider: Arc<ScriptedProvider>,
    executor: Arc<StubExecutor>,
    query: &str,
    config: &ResearchConfig,
    cancel: CancelToken,
) -> Result<Option<fin_research::ResearchOutcome>> {
    let provider: Arc<dyn LlmProvider> = provider;
    run_iterative_research(
        provider.clone(),
        provider,
        executor,
        query,
        "It is 2025-03-07.",
        config,
        cancel,
        None,
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn simple_query_bypasses_research() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Text(
        r#"{"needs_decomposition": false, "sub_questions": []}"#.into(),
    )]));
    let outcome = run(
        provider.clone(),
        Arc::new(StubExecutor::default()),
        "What is AAPL's current price?",
        &config(),
        CancelToken::new(),
    )
    .await
    .unwrap();
    assert!(outcome.is_none());
    // Only the analyzer was consulted.
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn decomposed_comparison_runs_one_iteration() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::Text(analyzer_json(&[
            ("AAPL quarterly revenue, last three quarters", "numerical"),
            ("MSFT quarterly revenue, last three quarters", "numerical"),
            ("Which company grew revenue faster?", "analytical"),
        ])),
        ScriptedTurn::Text(r#"{"complete": true, "gaps": [], "follow_ups": []}"#.into()),
        ScriptedTurn::Text(
            "AAPL revenue outpaced MSFT across the last three quarters.".into(),
        ),
    ]));
    let executor = Arc::new(StubExecutor::default());

    let outcome = run(
        provider,
        executor.clone(),
        "Compare AAPL and MSFT quarterly revenue for the last three quarters.",
        &config(),
        CancelToken::new(),
    )
    .await
    .unwrap()
    .expect("research should run");

    assert!(outcome.text.contains("AAPL"));
    assert!(outcome.text.contains("MSFT"));
    assert_eq!(outcome.meta.iterations, 1);
    assert_eq!(outcome.meta.subq_count, 3);
    assert_eq!(outcome.meta.tool_hits, 2);
    assert_eq!(outcome.meta.web_hits, 0);
    // Both numerical sub-questions hit the structured path; the analytical
    // one performed no I/O.
    assert_eq!(executor.numerical_calls.lock().len(), 2);
    assert!(executor.web_calls.lock().is_empty());
    // Identical source URLs deduplicate.
    assert_eq!(outcome.sources.len(), 1);
}

#[tokio::test]
async fn gap_report_triggers_exactly_one_follow_up_iteration() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::Text(analyzer_json(&[
            ("AAPL revenue Q1 FY2025", "numerical"),
            ("AAPL revenue Q2 FY2025", "numerical"),
            ("AAPL revenue Q3 FY2025", "numerical"),
        ])),
        ScriptedTurn::Text(
            r#"{"complete": false, "gaps": ["Q3 figure missing"],
                "follow_ups": [{"question": "AAPL revenue for fiscal Q3 2025 from the 10-Q", "kind": "numerical"}]}"#
                .into(),
        ),
        ScriptedTurn::Text(r#"{"complete": true, "gaps": [], "follow_ups": []}"#.into()),
        ScriptedTurn::Text("All three quarters: $119.6B, $90.8B, $94.9B.".into()),
    ]));
    let executor = Arc::new(StubExecutor {
        numerical_failures: vec!["Q3 FY2025"],
        ..Default::default()
    });

    let outcome = run(
        provider,
        executor,
        "AAPL revenue for the last three quarters",
        &config(),
        CancelToken::new(),
    )
    .await
    .unwrap()
    .expect("research should run");

    assert_eq!(outcome.meta.iterations, 2);
    assert_eq!(outcome.meta.subq_count, 4);
}

#[tokio::test]
async fn iteration_count_is_capped_even_when_gaps_persist() {
    let incomplete = r#"{"complete": false, "gaps": ["still missing"],
        "follow_ups": [{"question": "one more look", "kind": "qualitative"}]}"#;
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::Text(analyzer_json(&[("seed question", "qualitative")])),
        // The detector never reports completion; only max_iterations stops us.
        ScriptedTurn::Text(incomplete.into()),
        ScriptedTurn::Text(incomplete.into()),
        ScriptedTurn::Text("best-effort answer".into()),
    ]));

    let outcome = run(
        provider.clone(),
        Arc::new(StubExecutor::default()),
        "an inexhaustible question",
        &config(),
        CancelToken::new(),
    )
    .await
    .unwrap()
    .expect("research should run");

    assert_eq!(outcome.meta.iterations, 3);
    // analyzer + 2 gap checks + synthesis; no gap check after the last
    // iteration.
    assert_eq!(provider.request_count(), 4);
}

#[tokio::test]
async fn numerical_failure_falls_back_to_web() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::Text(analyzer_json(&[("NVDA data-center revenue", "numerical")])),
        ScriptedTurn::Text(r#"{"complete": true, "gaps": [], "follow_ups": []}"#.into()),
        ScriptedTurn::Text("answer".into()),
    ]));
    let executor = Arc::new(StubExecutor {
        numerical_failures: vec!["NVDA"],
        ..Default::default()
    });

    let outcome = run(provider, executor.clone(), "NVDA revenue", &config(), CancelToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.meta.tool_hits, 0);
    assert_eq!(outcome.meta.web_hits, 1);
    assert_eq!(executor.web_calls.lock().len(), 1);
}

#[tokio::test]
async fn sub_question_timeout_becomes_error_result_without_failing_run() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ScriptedTurn::Text(analyzer_json(&[
            ("hanging qualitative lookup", "qualitative"),
        ])),
        ScriptedTurn::Text(r#"{"complete": true, "gaps": [], "follow_ups": []}"#.into()),
        ScriptedTurn::Text("partial answer noting the failure".into()),
    ]));
    let executor = Arc::new(StubExecutor {
        web_hangs: true,
        ..Default::default()
    });
    let config = ResearchConfig {
        sub_timeout_secs: 1,
        ..ResearchConfig::default()
    };

    let outcome = run(provider, executor, "slow question", &config, CancelToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.meta.subq_count, 1);
    assert_eq!(outcome.meta.web_hits, 0);
    assert!(outcome.text.contains("failure"));
}

#[tokio::test]
async fn pre_cancelled_run_returns_cancelled() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = run(
        Arc::new(ScriptedProvider::always("unused")),
        Arc::new(StubExecutor::default()),
        "anything",
        &config(),
        cancel,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
}

#[tokio::test]
async fn disconnect_mid_execution_cancels_outstanding_sub_questions() {
    let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Text(
        analyzer_json(&[
            ("hang one", "qualitative"),
            ("hang two", "qualitative"),
        ]),
    )]));
    let executor = Arc::new(StubExecutor {
        web_hangs: true,
        ..Default::default()
    });
    let cancel = CancelToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = run(provider, executor, "hang forever", &config(), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    // Cancellation observed promptly, far inside the 5s sub timeout.
    assert!(started.elapsed() < std::time::Duration::from_secs(2));
}
