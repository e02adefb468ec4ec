//! End-to-end routing tests against mock HTTP backends.
//!
//! These exercise the full stack — config or registry construction, the
//! tiered router, the OpenAI-compatible provider, SSE decoding, and usage
//! recording — with wiremock standing in for the upstream endpoints.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

use crate::{
    api_types::{ChatRequest, Message, Usage},
    providers::{
        OpenAiCompatibleProvider, Provider, ProviderRegistry, Tier,
        test_utils::{RecordedEvent, RecordingRecorder},
    },
    routing::{RouterError, TieredRouter},
};

const COMPLETION_BODY: &str = r#"{
    "id": "cmpl-1",
    "choices": [{
        "message": {"role": "assistant", "content": "mocked reply"},
        "finish_reason": "stop"
    }],
    "usage": {"prompt_tokens": 8, "completion_tokens": 4, "total_tokens": 12}
}"#;

const SSE_BODY: &str = "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"mocked\"}}]}\n\n\
data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\" stream\"}}]}\n\n\
data: {\"id\":\"c1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":8,\"completion_tokens\":2,\"total_tokens\":10}}\n\n\
data: [DONE]\n\n";

fn http_provider(id: &str, tier: Tier, server: &MockServer, model: &str) -> Arc<dyn Provider> {
    Arc::new(OpenAiCompatibleProvider::new(
        id,
        tier,
        0,
        vec![model.to_string()],
        format!("{}/v1", server.uri()),
        Some("sk-test".to_string()),
    ))
}

fn router_over(
    providers: Vec<Arc<dyn Provider>>,
) -> (TieredRouter, Arc<RecordingRecorder>) {
    let mut builder = ProviderRegistry::builder();
    for p in providers {
        builder = builder.register(p);
    }
    let recorder = Arc::new(RecordingRecorder::default());
    let router = TieredRouter::with_seed(Arc::new(builder.build()), recorder.clone(), 0);
    (router, recorder)
}

fn request(model: &str) -> ChatRequest {
    ChatRequest::new(model, vec![Message::user("hello")])
}

async fn mount_completion(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(status).set_body_raw(body, "application/json"))
        .mount(server)
        .await;
}

async fn mount_sse(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_http_completion_end_to_end() {
    let server = MockServer::start().await;
    mount_completion(&server, 200, COMPLETION_BODY).await;

    let (router, recorder) = router_over(vec![http_provider("up", Tier(1), &server, "m1")]);

    let result = router
        .complete(&request("m1"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content, "mocked reply");
    assert_eq!(result.usage, Usage::new(8, 4));

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        RecordedEvent::Success(s) => {
            assert_eq!(s.provider, "up");
            assert_eq!(s.usage.total_tokens, 12);
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_fallback_on_server_error() {
    let broken = MockServer::start().await;
    mount_completion(&broken, 503, r#"{"error": "overloaded"}"#).await;

    let healthy = MockServer::start().await;
    mount_completion(&healthy, 200, COMPLETION_BODY).await;

    let (router, recorder) = router_over(vec![
        http_provider("primary", Tier(1), &broken, "m1"),
        http_provider("backup", Tier(2), &healthy, "m1"),
    ]);

    let result = router
        .complete(&request("m1"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content, "mocked reply");

    let events = recorder.events();
    assert_eq!(events.len(), 2);
    match &events[0] {
        RecordedEvent::Failure(f) => {
            assert_eq!(f.provider, "primary");
            assert!(f.error.contains("503"));
        }
        other => panic!("expected failure first, got {:?}", other),
    }
    match &events[1] {
        RecordedEvent::Success(s) => assert_eq!(s.provider, "backup"),
        other => panic!("expected success second, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_exhaustion_aggregates_statuses() {
    let a = MockServer::start().await;
    mount_completion(&a, 500, "internal").await;
    let b = MockServer::start().await;
    mount_completion(&b, 429, "rate limited").await;

    let (router, recorder) = router_over(vec![
        http_provider("a", Tier(1), &a, "m1"),
        http_provider("b", Tier(2), &b, "m1"),
    ]);

    let err = router
        .complete(&request("m1"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RouterError::ProvidersExhausted {
            model,
            attempts,
            errors,
        } => {
            assert_eq!(model, "m1");
            assert_eq!(attempts, 2);
            assert!(errors[0].error.to_string().contains("500"));
            assert!(errors[1].error.to_string().contains("429"));
        }
        other => panic!("expected ProvidersExhausted, got {:?}", other),
    }
    assert_eq!(recorder.failure_count(), 2);
}

#[tokio::test]
async fn test_unknown_model_fails_fast_without_http() {
    let server = MockServer::start().await;
    // Any request reaching the server would 200; the router must not send one
    mount_completion(&server, 200, COMPLETION_BODY).await;

    let (router, recorder) = router_over(vec![http_provider("up", Tier(1), &server, "m1")]);

    let err = router
        .complete(&request("totally-unknown"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RouterError::NoProvidersAvailable { .. }));
    assert!(recorder.events().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_streaming_end_to_end() {
    let server = MockServer::start().await;
    mount_sse(&server).await;

    let (router, recorder) = router_over(vec![http_provider("up", Tier(1), &server, "m1")]);

    let stream = router
        .stream(&request("m1").streaming(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.provider(), "up");

    let items: Vec<_> = stream.collect().await;
    let text: String = items
        .iter()
        .map(|r| r.as_ref().unwrap().delta.clone())
        .collect();
    assert_eq!(text, "mocked stream");

    let events = recorder.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        RecordedEvent::Success(s) => assert_eq!(s.usage, Usage::new(8, 2)),
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_streaming_falls_back_before_commit() {
    let broken = MockServer::start().await;
    mount_completion(&broken, 500, "down").await;

    let healthy = MockServer::start().await;
    mount_sse(&healthy).await;

    let (router, recorder) = router_over(vec![
        http_provider("primary", Tier(1), &broken, "m1"),
        http_provider("backup", Tier(2), &healthy, "m1"),
    ]);

    let stream = router
        .stream(&request("m1").streaming(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.provider(), "backup");

    let items: Vec<_> = stream.collect().await;
    assert!(items.iter().all(|r| r.is_ok()));

    assert_eq!(recorder.failure_count(), 1);
    assert_eq!(recorder.success_count(), 1);
}

#[tokio::test]
async fn test_http_streaming_empty_body_falls_back() {
    // Opens fine but produces no events: pre-commit failure
    let empty = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("data: [DONE]\n\n", "text/event-stream"),
        )
        .mount(&empty)
        .await;

    let healthy = MockServer::start().await;
    mount_sse(&healthy).await;

    let (router, recorder) = router_over(vec![
        http_provider("empty", Tier(1), &empty, "m1"),
        http_provider("backup", Tier(2), &healthy, "m1"),
    ]);

    let stream = router
        .stream(&request("m1").streaming(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stream.provider(), "backup");
    assert_eq!(recorder.failure_count(), 1);
}

#[tokio::test]
async fn test_config_to_completion() {
    let server = MockServer::start().await;
    mount_completion(&server, 200, COMPLETION_BODY).await;

    let raw = format!(
        r#"
        [providers.mock]
        type = "open_ai"
        base_url = "{}/v1"
        api_key = "sk-test"
        tier = 1
        models = ["m1"]
        "#,
        server.uri()
    );
    let config = crate::config::RoutingConfig::from_toml(&raw).unwrap();
    let registry = Arc::new(config.build_registry().unwrap());

    let recorder = Arc::new(RecordingRecorder::default());
    let router = TieredRouter::new(registry, recorder.clone());

    let result = router
        .complete(&request("m1"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.content, "mocked reply");
    assert_eq!(recorder.success_count(), 1);
}
