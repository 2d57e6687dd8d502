//! End-to-end handler tests over the real router with scripted providers:
//! page summarization, session clearing, auth, and the debug endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use fin_domain::config::Config;
use fin_gateway::api;
use fin_gateway::state::AppState;
use fin_providers::mock::{ScriptedProvider, ScriptedTurn};
use fin_providers::{LlmProvider, ProviderRegistry};

async fn build_test_state(
    script: Vec<ScriptedTurn>,
    mutate_config: impl FnOnce(&mut Config),
) -> (AppState, Arc<ScriptedProvider>) {
    let mut config = Config::default();
    // No chromium in the test environment.
    config.tools.browser.enabled = false;
    mutate_config(&mut config);

    let provider = Arc::new(ScriptedProvider::new(script));
    let mut handles: BTreeMap<String, Arc<dyn LlmProvider>> = BTreeMap::new();
    handles.insert("gpt-4o".into(), provider.clone());
    let llm = Arc::new(ProviderRegistry::from_handles(handles, "gpt-4o"));

    let (state, _mcp) = fin_gateway::bootstrap::build_state(Arc::new(config), llm)
        .await
        .expect("state builds");
    (state, provider)
}

fn router_for(state: AppState) -> axum::Router {
    api::router(state.clone()).with_state(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health + input validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn health_is_open_and_names_the_service() {
    let (state, _) = build_test_state(vec![], |_| {}).await;
    let response = router_for(state).oneshot(get("/health/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "finagent");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn missing_question_is_a_400() {
    let (state, _) = build_test_state(vec![], |_| {}).await;
    let response = router_for(state)
        .oneshot(get("/get_chat_response/?session_id=s1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("question"));
}

#[tokio::test]
async fn unknown_model_alias_is_a_404() {
    let (state, _) = build_test_state(vec![], |_| {}).await;
    let response = router_for(state)
        .oneshot(get("/get_chat_response/?question=hello&model=gpt-99"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Page summarization, zero tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn injected_page_summary_uses_one_model_call_without_tools() {
    let (state, provider) = build_test_state(
        vec![ScriptedTurn::Text(
            "Apple reported revenue of $94.9B for Q4 2024, up 8% YoY.".into(),
        )],
        |_| {},
    )
    .await;
    let router = router_for(state);

    // The extension pushes the page, then the user asks.
    let inject = router
        .clone()
        .oneshot(post_json(
            "/input_webtext/",
            serde_json::json!({
                "textContent": "Apple reported Q4 2024 revenue of $94.9B, up 8% YoY.",
                "currentUrl": "https://finance.yahoo.com/news/apple-q4",
                "session_id": "s-page",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(inject.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(get(
            "/get_chat_response/?question=Summarize+this+page&session_id=s-page",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let text = json["response"].as_str().unwrap();
    assert!(text.contains("94.9"));
    assert!(text.contains("Apple") || text.contains("revenue"));

    // Exactly one model call, with tool registration skipped entirely.
    assert_eq!(provider.request_count(), 1);
    let requests = provider.requests.lock();
    assert!(requests[0].tools.is_empty());

    // The assistant turn was recorded.
    let stats = router
        .oneshot(get("/api/get_memory_stats/?session_id=s-page"))
        .await
        .unwrap();
    let stats = body_json(stats).await;
    assert_eq!(stats["session"]["turn_count"], 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clearing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn clear_preserving_web_keeps_artifacts_and_drops_turns() {
    let (state, _) = build_test_state(
        vec![ScriptedTurn::Text("summary".into())],
        |_| {},
    )
    .await;
    let router = router_for(state);

    router
        .clone()
        .oneshot(post_json(
            "/input_webtext/",
            serde_json::json!({
                "textContent": "page body",
                "currentUrl": "https://example.com",
                "session_id": "s-clear",
            }),
        ))
        .await
        .unwrap();
    router
        .clone()
        .oneshot(get("/get_chat_response/?question=summarize+this&session_id=s-clear"))
        .await
        .unwrap();

    let cleared = router
        .clone()
        .oneshot(post_json(
            "/clear_messages/?preserve_web=true&session_id=s-clear",
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::OK);

    let stats = body_json(
        router
            .oneshot(get("/api/get_memory_stats/?session_id=s-clear"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(stats["session"]["turn_count"], 0);
    assert_eq!(
        stats["session"]["artifact_counts_by_kind"]["page_injected"],
        1
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OpenAI-compatible surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn v1_requires_bearer_when_token_configured() {
    std::env::set_var("TEST_V1_TOKEN_A", "sekrit");
    let (state, _) = build_test_state(vec![], |config| {
        config.server.api_token_env = "TEST_V1_TOKEN_A".into();
    })
    .await;
    let router = router_for(state);

    let denied = router.clone().oneshot(get("/v1/models")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(denied).await;
    assert_eq!(json["error"]["type"], "authentication_error");

    let allowed = router
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("authorization", "Bearer sekrit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let json = body_json(allowed).await;
    assert_eq!(json["object"], "list");
    assert_eq!(json["data"][0]["id"], "gpt-4o");
}

#[tokio::test]
async fn chat_completions_returns_openai_envelope() {
    let (state, _) = build_test_state(
        vec![ScriptedTurn::Text("AAPL closed at 227.50 today.".into())],
        |_| {},
    )
    .await;
    let router = router_for(state);

    let response = router
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({
                "messages": [{"role": "user", "content": "What is AAPL's current price?"}],
                "mode": "normal",
                "model": "gpt-4o",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert!(json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .contains("227.50"));
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert!(json["usage"]["total_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn chat_completions_without_user_message_is_invalid_request() {
    let (state, _) = build_test_state(vec![], |_| {}).await;
    let response = router_for(state)
        .oneshot(post_json(
            "/v1/chat/completions",
            serde_json::json!({ "messages": [{"role": "system", "content": "x"}] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], "invalid_request_error");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Debug memory endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn debug_memory_rejects_bad_tokens_generically() {
    std::env::set_var("TEST_DEBUG_TOKEN_B", "debug-secret");
    let (state, _) = build_test_state(vec![], |config| {
        config.guards.debug_token_env = "TEST_DEBUG_TOKEN_B".into();
    })
    .await;
    let router = router_for(state);

    for uri in [
        "/api/debug_memory/?action=status",
        "/api/debug_memory/?action=status&token=wrong",
    ] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["detail"], "forbidden");
    }
}

#[tokio::test]
async fn debug_memory_snapshot_then_diff() {
    std::env::set_var("TEST_DEBUG_TOKEN_C", "debug-secret");
    let (state, _) = build_test_state(vec![], |config| {
        config.guards.debug_token_env = "TEST_DEBUG_TOKEN_C".into();
    })
    .await;
    let router = router_for(state);

    let snap = router
        .clone()
        .oneshot(get("/api/debug_memory/?action=snapshot&token=debug-secret"))
        .await
        .unwrap();
    assert_eq!(snap.status(), StatusCode::OK);
    let snap = body_json(snap).await;
    assert_eq!(snap["status"], "tracing");
    assert!(snap["top"].is_array());

    let diff = router
        .clone()
        .oneshot(get("/api/debug_memory/?action=diff&token=debug-secret"))
        .await
        .unwrap();
    assert_eq!(diff.status(), StatusCode::OK);
    let diff = body_json(diff).await;
    assert!(diff["deltas"].is_object());

    let stop = router
        .oneshot(get("/api/debug_memory/?action=stop&token=debug-secret"))
        .await
        .unwrap();
    assert_eq!(body_json(stop).await["status"], "stopped");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preferred URLs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn preferred_urls_store_hosts_and_sync_replaces() {
    let (state, _) = build_test_state(vec![], |_| {}).await;
    let router = router_for(state);

    let added = body_json(
        router
            .clone()
            .oneshot(post_json(
                "/api/add_preferred_urls/",
                serde_json::json!({"url": "https://www.sec.gov/edgar/search/"}),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(added["preferred_urls"][0], "www.sec.gov");

    let synced = body_json(
        router
            .clone()
            .oneshot(post_json(
                "/api/sync_preferred_urls/",
                serde_json::json!({"urls": ["https://finance.yahoo.com/quote/AAPL"]}),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(synced["count"], 1);

    let listed = body_json(
        router
            .oneshot(get("/api/get_preferred_urls/"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(listed["preferred_urls"], serde_json::json!(["finance.yahoo.com"]));
}
