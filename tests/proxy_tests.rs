//! End-to-end tests over a mocked provider fleet.
//!
//! Every test drives the real axum router with `tower::ServiceExt::oneshot`
//! and points all provider base URLs at a wiremock server, so the full
//! pipeline runs: admission, classification, routing, execution, streaming.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use clawroute::core::catalog::Provider;
use clawroute::core::route_log::RouteLog;
use clawroute::{app_router, AppConfig, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A valid upstream completion body, long enough to pass validation at any tier.
fn completion_body(model: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Here is a complete and useful answer to the question."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 9, "total_tokens": 21}
    })
}

fn ping_request(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "ping"}]
    })
}

/// Build a test app with all provider base URLs pointed at the mock server.
fn test_app(mock: &MockServer, keyed: &[Provider], mutate: impl FnOnce(&mut AppConfig)) -> (Router, Arc<AppState>) {
    let mut config = AppConfig::default();
    for provider in keyed {
        config.api_keys.insert(*provider, "sk-test".to_string());
    }
    for provider in Provider::ALL {
        config.base_urls.insert(provider, mock.uri());
    }
    config.retry_delay_ms = 1;
    mutate(&mut config);

    let log_path = std::env::temp_dir().join(format!(
        "clawroute-test-{}.jsonl",
        uuid::Uuid::new_v4()
    ));
    let route_log = RouteLog::new(log_path, false);
    let state = Arc::new(AppState::new(config, reqwest::Client::new(), route_log));
    (app_router(state.clone()), state)
}

async fn post_json(app: Router, uri: &str, body: Value) -> axum::response::Response {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn header<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// ---------------------------------------------------------------------------
// Routing scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_routes_to_cheapest_tier() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gemini-2.5-flash-lite"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gemini-2.5-flash-lite")))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("google/gemini-2.5-flash-lite"));
    assert_eq!(header(&response, "x-clawroute-tier"), Some("heartbeat"));
    assert_eq!(header(&response, "x-clawroute-escalated"), Some("false"));
}

#[tokio::test]
async fn fallback_model_used_when_primary_provider_has_no_key() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gpt-4o")))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &[Provider::OpenAi], |_| {});
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("openai/gpt-4o"));
}

#[tokio::test]
async fn no_keys_passes_through_to_original_model() {
    let mock = MockServer::start().await;
    // The anthropic provider is addressed on its /messages path
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"model": "claude-sonnet-4-5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("claude-sonnet-4-5")))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &[], |_| {});
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("anthropic/claude-sonnet-4-5"));
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn global_override_forces_model() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gpt-4o")))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, state) = test_app(&mock, &Provider::ALL, |_| {});
    state.overrides.write().unwrap().global_force_model = Some("openai/gpt-4o".to_string());

    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("openai/gpt-4o"));
}

#[tokio::test]
async fn dry_run_dispatches_original_provider() {
    let mock = MockServer::start().await;
    // Dry-run must call the provider of the original model, on its own path
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"model": "claude-sonnet-4-5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("claude-sonnet-4-5")))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |config| {
        config.dry_run = true;
    });
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("anthropic/claude-sonnet-4-5"));
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn disabled_proxy_makes_exactly_one_passthrough_call() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("claude-sonnet-4-5")))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |config| {
        config.enabled = false;
    });
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Retry and escalation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn escalates_once_on_upstream_500() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gemini-2.5-flash-lite"})))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .with_priority(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gemini-2.5-flash"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gemini-2.5-flash")))
        .expect(1)
        .with_priority(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("google/gemini-2.5-flash"));
    assert_eq!(header(&response, "x-clawroute-escalated"), Some("true"));
    assert_eq!(mock.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn tool_call_response_is_never_retried() {
    let mock = MockServer::start().await;
    let tool_response = json!({
        "id": "chatcmpl-tool",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call-1",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 30, "completion_tokens": 12, "total_tokens": 42}
    });
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_response.clone()))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &[Provider::OpenAi], |_| {});
    let request = json!({
        "model": "openai/gpt-4o",
        "messages": [{"role": "user", "content": "what's the weather in Oslo tomorrow afternoon?"}],
        "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {}}}]
    });
    let response = post_json(app, "/v1/chat/completions", request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);

    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body, tool_response);
}

#[tokio::test]
async fn falls_back_to_original_after_exhaustion() {
    let mock = MockServer::start().await;
    // Original model succeeds; everything else burns
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"model": "claude-sonnet-4-5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("claude-sonnet-4-5")))
        .expect(1)
        .with_priority(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(5)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |config| {
        config.max_retries = 1;
        config.always_fallback_to_original = true;
    });
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("anthropic/claude-sonnet-4-5"));
    // Two failed attempts plus the original-model fallback
    assert_eq!(mock.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unsafe_requests_get_no_retry() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |config| {
        config.always_fallback_to_original = false;
    });
    // A moderate-tier request is not safe to retry
    let request = json!({
        "model": "deepseek/deepseek-chat",
        "messages": [{"role": "user", "content": "walk me through configuring replication on the staging database"}]
    });
    let response = post_json(app, "/v1/chat/completions", request).await;

    // The single failed upstream response is surfaced verbatim
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);
}

/// Stand-in for an executor whose logic has a defect: it panics instead of
/// producing a response.
async fn panicking_executor() -> clawroute::Result<axum::response::Response> {
    panic!("executor blew up")
}

#[tokio::test]
async fn executor_panic_fails_open_to_original_model() {
    let mock = MockServer::start().await;
    // The fail-open path must make exactly one dispatch, to the original
    // model's own provider (anthropic, on its /messages path)
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({"model": "claude-sonnet-4-5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("claude-sonnet-4-5")))
        .expect(1)
        .mount(&mock)
        .await;

    let (_, state) = test_app(&mock, &Provider::ALL, |_| {});
    let request: clawroute::ChatRequest =
        serde_json::from_value(ping_request("anthropic/claude-sonnet-4-5")).unwrap();

    let response = clawroute::api::handlers::execute_fail_open(
        panicking_executor(),
        state,
        request,
        "req-panic".to_string(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Response fidelity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_streaming_body_is_byte_exact() {
    let mock = MockServer::start().await;
    let raw = r#"{"id":"chatcmpl-x","model":"gemini-2.5-flash-lite","choices":[{"index":0,"message":{"role":"assistant","content":"A perfectly ordinary answer, passed through untouched."},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":9,"total_tokens":12},"provider_extra":{"cached":false}}"#;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(raw, "application/json"))
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});
    let response = post_json(app, "/v1/chat/completions", ping_request("anthropic/claude-sonnet-4-5")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-clawroute-model"));
    assert_eq!(body_bytes(response).await, raw.as_bytes());
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_passes_bytes_through_verbatim() {
    let mock = MockServer::start().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"po\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ng\"}}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2}}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});
    let mut request = ping_request("anthropic/claude-sonnet-4-5");
    request["stream"] = json!(true);
    let response = post_json(app, "/v1/chat/completions", request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("text/event-stream"));
    assert_eq!(header(&response, "cache-control"), Some("no-cache"));
    assert_eq!(header(&response, "x-accel-buffering"), Some("no"));
    assert_eq!(header(&response, "x-clawroute-tier"), Some("heartbeat"));

    assert_eq!(body_bytes(response).await, sse.as_bytes());
    assert_eq!(mock.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn streaming_escalates_only_before_first_byte() {
    let mock = MockServer::start().await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"hello\"}}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gemini-2.5-flash-lite"})))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .with_priority(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gemini-2.5-flash"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .with_priority(1)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});
    let mut request = ping_request("anthropic/claude-sonnet-4-5");
    request["stream"] = json!(true);
    let response = post_json(app, "/v1/chat/completions", request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-escalated"), Some("true"));
    assert_eq!(body_bytes(response).await, sse.as_bytes());
    assert_eq!(mock.received_requests().await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Admission, auth, and the admin surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_body_is_a_normalized_400() {
    let mock = MockServer::start().await;
    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});

    let response = app
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn messages_endpoint_is_unsupported() {
    let mock = MockServer::start().await;
    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});

    let response = post_json(app, "/v1/messages", json!({"model": "claude", "messages": []})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");
}

#[tokio::test]
async fn auth_guards_proxy_and_admin_routes() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gemini-2.5-flash-lite")))
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |config| {
        config.auth_token = Some("secret".to_string());
    });

    // Missing token: 401 with the normalized code
    let response = post_json(app.clone(), "/v1/chat/completions", ping_request("openai/gpt-4o")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");

    // Bearer with odd casing passes
    let response = app
        .clone()
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("authorization", "BEARER secret")
                .body(Body::from(ping_request("anthropic/claude-sonnet-4-5").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Query token passes
    let response = app
        .clone()
        .oneshot(
            Request::post("/v1/chat/completions?token=secret")
                .header("content-type", "application/json")
                .body(Body::from(ping_request("anthropic/claude-sonnet-4-5").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays open
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_toggles_change_routing_behavior() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("any")))
        .mount(&mock)
        .await;

    let (app, state) = test_app(&mock, &Provider::ALL, |_| {});

    let response = post_json(app.clone(), "/api/disable", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.is_enabled());

    let response = post_json(app.clone(), "/api/dry-run/enable", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.is_dry_run());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["enabled"], false);
    assert_eq!(body["dryRun"], true);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn session_override_applies_via_header() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gpt-4o-mini")))
        .expect(1)
        .with_priority(1)
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("other")))
        .with_priority(5)
        .mount(&mock)
        .await;

    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});

    let response = post_json(
        app.clone(),
        "/api/override/session",
        json!({"sessionId": "sess-42", "model": "openai/gpt-4o-mini", "turns": 1}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("content-type", "application/json")
                .header("x-session-id", "sess-42")
                .body(Body::from(ping_request("anthropic/claude-sonnet-4-5").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-clawroute-model"), Some("openai/gpt-4o-mini"));
}

#[tokio::test]
async fn unknown_routes_get_normalized_404() {
    let mock = MockServer::start().await;
    let (app, _) = test_app(&mock, &Provider::ALL, |_| {});

    let response = app
        .oneshot(Request::get("/definitely/not/a/route").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}
