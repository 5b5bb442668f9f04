//! End-to-end scheduler tests against mock upstream providers.

use aog_api::FlavorRegistry;
use aog_client::ReqwestTransport;
use aog_core::GatewayContext;
use aog_core::Scheduler;
use aog_protocol::EntityStore;
use aog_protocol::HttpContent;
use aog_protocol::MemStore;
use aog_protocol::Model;
use aog_protocol::Service;
use aog_protocol::ServiceProvider;
use aog_protocol::ServiceRequest;
use aog_protocol::TaskResult;
use aog_protocol::entity::HybridPolicy;
use aog_protocol::entity::Location;
use aog_protocol::entity::ModelStatus;
use aog_protocol::result::TaskResultKind;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::method;
use wiremock::matchers::path;

async fn seeded_ctx(local_chat_url: &str, remote_chat_url: &str) -> Arc<GatewayContext> {
    let store = Arc::new(MemStore::new());
    store
        .add_service(Service {
            name: "chat".to_string(),
            local_provider: "local_ollama_chat".to_string(),
            remote_provider: "remote_aliyun_chat".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_provider(ServiceProvider {
            provider_name: "local_ollama_chat".to_string(),
            flavor: "ollama".to_string(),
            service_name: "chat".to_string(),
            method: "POST".to_string(),
            url: local_chat_url.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_provider(ServiceProvider {
            provider_name: "remote_aliyun_chat".to_string(),
            flavor: "aliyun".to_string(),
            service_name: "chat".to_string(),
            service_source: Location::Remote,
            method: "POST".to_string(),
            url: remote_chat_url.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_model(Model {
            model_name: "m1".to_string(),
            provider_name: "local_ollama_chat".to_string(),
            service_name: "chat".to_string(),
            service_source: Location::Local,
            status: ModelStatus::Downloaded,
            is_default: true,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    Arc::new(GatewayContext::new(
        store,
        Arc::new(FlavorRegistry::from_embedded().unwrap()),
        Arc::new(ReqwestTransport::new().unwrap()),
    ))
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<TaskResult>) -> Vec<TaskResult> {
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

#[tokio::test]
async fn canonical_chat_local_non_stream() {
    let server = MockServer::start().await;
    // The local provider speaks the engine dialect; the gateway must have
    // converted the canonical request before it arrives here.
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_json(json!({
            "model": "m1",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "m1",
            "message": {"role": "assistant", "content": "hello!"},
            "done": true,
            "prompt_eval_count": 3,
            "eval_count": 5,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = seeded_ctx(&format!("{}/api/chat", server.uri()), "http://unused").await;
    let scheduler = Scheduler::start(Arc::clone(&ctx));

    let request = ServiceRequest::new("aog", "chat")
        .with_model("m1")
        .with_http(HttpContent::from_json(&json!({
            "model": "m1",
            "messages": [{"role": "user", "content": "hi"}],
        })));
    let (task_id, rx) = scheduler.enqueue(request).await;
    assert_eq!(task_id, 1);

    let results = collect(rx).await;
    assert_eq!(results.len(), 1);
    let done = &results[0];
    assert_eq!(done.kind, TaskResultKind::Done);
    assert_eq!(done.status, 200);

    let body: serde_json::Value = serde_json::from_slice(&done.content.body).unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "hello!");
    assert_eq!(body["usage"]["completion_tokens"], 5);

    // The model token was released on completion.
    assert_eq!(ctx.model_gates.in_use("m1"), 0);
}

#[tokio::test]
async fn remote_streaming_chat_with_epilogue() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"request_id\":\"r1\",\"output\":{\"choices\":[{\"message\":",
        "{\"role\":\"assistant\",\"content\":\"Hello\"},\"finish_reason\":null}]}}\n\n",
        "data: {\"request_id\":\"r1\",\"output\":{\"choices\":[{\"message\":",
        "{\"content\":\" world\"},\"finish_reason\":\"stop\"}]}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let ctx = seeded_ctx("http://unused", &format!("{}/chat", server.uri())).await;
    let scheduler = Scheduler::start(Arc::clone(&ctx));

    let mut request = ServiceRequest::new("aog", "chat").with_http(HttpContent::from_json(&json!({
        "model": "qwen-plus",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    })));
    request.hybrid_policy = HybridPolicy::AlwaysRemote;
    request.ask_stream_mode = true;

    let (task_id, rx) = scheduler.enqueue(request).await;
    let results = collect(rx).await;

    // Two converted chunks, the aog epilogue record, then the terminal.
    assert_eq!(results.len(), 4);
    for chunk in &results[..3] {
        assert_eq!(chunk.kind, TaskResultKind::Chunk);
        assert_eq!(chunk.task_id, task_id);
        assert_eq!(
            chunk.content.header.get(http::header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
    }
    assert_eq!(results[3].kind, TaskResultKind::Done);

    let first = String::from_utf8(results[0].content.body.to_vec()).unwrap();
    assert!(first.starts_with("data: "), "chunk framing restored: {first}");
    let payload: serde_json::Value =
        serde_json::from_str(first.trim_start_matches("data: ").trim()).unwrap();
    assert_eq!(payload["object"], "chat.completion.chunk");
    assert_eq!(payload["choices"][0]["delta"]["content"], "Hello");

    let epilogue = String::from_utf8(results[2].content.body.to_vec()).unwrap();
    assert_eq!(epilogue, "data: [DONE]\n\n");
}

#[tokio::test]
async fn retryable_upstream_is_retried_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "m1",
            "message": {"role": "assistant", "content": "eventually"},
            "done": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = seeded_ctx(&format!("{}/api/chat", server.uri()), "http://unused").await;
    let scheduler = Scheduler::start(Arc::clone(&ctx));

    let request = ServiceRequest::new("aog", "chat")
        .with_model("m1")
        .with_http(HttpContent::from_json(&json!({
            "model": "m1",
            "messages": [{"role": "user", "content": "hi"}],
        })));

    let started = Instant::now();
    let (_, rx) = scheduler.enqueue(request).await;
    let results = collect(rx).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind, TaskResultKind::Done);
    let body: serde_json::Value = serde_json::from_slice(&results[0].content.body).unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "eventually");
    // Two backoff sleeps: 1s + 2s.
    assert!(
        started.elapsed().as_secs_f64() >= 3.0,
        "expected exponential backoff, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn task_ids_are_unique_and_monotonic() {
    let ctx = seeded_ctx("http://unused", "http://unused").await;
    let scheduler = Scheduler::start(ctx);

    let mut last = 0;
    for _ in 0..5 {
        let request = ServiceRequest::new("aog", "embed")
            .with_http(HttpContent::from_json(&json!({"input": "x"})));
        let (id, _rx) = scheduler.enqueue(request).await;
        assert!(id > last);
        last = id;
    }
}

#[tokio::test]
async fn dispatch_failure_yields_single_failed_result_and_closes() {
    let ctx = seeded_ctx("http://unused", "http://unused").await;
    let scheduler = Scheduler::start(ctx);

    // No such service configured.
    let request = ServiceRequest::new("aog", "embed")
        .with_http(HttpContent::from_json(&json!({"input": "x"})));
    let (task_id, rx) = scheduler.enqueue(request).await;

    let results = collect(rx).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind, TaskResultKind::Failed);
    assert_eq!(results[0].task_id, task_id);
    assert_eq!(results[0].status, 404);
}

#[tokio::test]
async fn model_not_downloaded_is_refused() {
    let ctx = seeded_ctx("http://unused", "http://unused").await;
    ctx.store
        .add_model(Model {
            model_name: "pending".to_string(),
            provider_name: "local_ollama_chat".to_string(),
            service_name: "chat".to_string(),
            service_source: Location::Local,
            status: ModelStatus::Downloading,
            is_default: false,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
    let scheduler = Scheduler::start(ctx);

    let request = ServiceRequest::new("aog", "chat")
        .with_model("pending")
        .with_http(HttpContent::from_json(&json!({"messages": []})));
    let (_, rx) = scheduler.enqueue(request).await;
    let results = collect(rx).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind, TaskResultKind::Failed);
    assert_eq!(results[0].status, 503);
}
