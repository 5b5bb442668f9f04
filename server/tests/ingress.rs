//! HTTP ingress tests: route shapes, result streaming with framing, and
//! the prologue/epilogue wire contract.

use aog_api::FlavorRegistry;
use aog_api::flavor::FlavorConfig;
use aog_client::ReqwestTransport;
use aog_core::GatewayContext;
use aog_protocol::EntityStore;
use aog_protocol::MemStore;
use aog_protocol::Model;
use aog_protocol::Service;
use aog_protocol::ServiceProvider;
use aog_protocol::entity::Location;
use aog_protocol::entity::ModelStatus;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

async fn seed_chat(store: &MemStore, local_url: &str, local_flavor: &str) {
    store
        .add_service(Service {
            name: "chat".to_string(),
            local_provider: "local_chat".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_provider(ServiceProvider {
            provider_name: "local_chat".to_string(),
            flavor: local_flavor.to_string(),
            service_name: "chat".to_string(),
            method: "POST".to_string(),
            url: local_url.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_model(Model {
            model_name: "m1".to_string(),
            provider_name: "local_chat".to_string(),
            service_name: "chat".to_string(),
            service_source: Location::Local,
            status: ModelStatus::Downloaded,
            is_default: true,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn spawn_gateway(ctx: Arc<GatewayContext>) -> SocketAddr {
    let (router, _state) = aog_server::build_gateway(ctx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn canonical_chat_over_services_prefix() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "m1",
            "message": {"role": "assistant", "content": "hi there"},
            "done": true,
        })))
        .mount(&upstream)
        .await;

    let store = Arc::new(MemStore::new());
    seed_chat(&store, &format!("{}/api/chat", upstream.uri()), "ollama").await;
    let ctx = Arc::new(GatewayContext::new(
        store,
        Arc::new(FlavorRegistry::from_embedded().unwrap()),
        Arc::new(ReqwestTransport::new().unwrap()),
    ));
    let addr = spawn_gateway(ctx).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/aog/v0.2/services/chat/completions"))
        .json(&json!({"model": "m1", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "hi there");
}

#[tokio::test]
async fn openai_raw_route_is_installed() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "m1",
            "message": {"role": "assistant", "content": "raw route works"},
            "done": true,
        })))
        .mount(&upstream)
        .await;

    let store = Arc::new(MemStore::new());
    seed_chat(&store, &format!("{}/api/chat", upstream.uri()), "ollama").await;
    let ctx = Arc::new(GatewayContext::new(
        store,
        Arc::new(FlavorRegistry::from_embedded().unwrap()),
        Arc::new(ReqwestTransport::new().unwrap()),
    ));
    let addr = spawn_gateway(ctx).await;

    let client = reqwest::Client::new();
    // Raw (unprefixed) path for the openai flavor.
    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "m1", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // The flavor-prefixed variant serves the same handler.
    let resp = client
        .post(format!(
            "http://{addr}/aog/v0.2/api_flavors/openai/v1/chat/completions"
        ))
        .json(&json!({"model": "m1", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unknown_service_maps_to_not_found() {
    let store = Arc::new(MemStore::new());
    let ctx = Arc::new(GatewayContext::new(
        store,
        Arc::new(FlavorRegistry::from_embedded().unwrap()),
        Arc::new(ReqwestTransport::new().unwrap()),
    ));
    let addr = spawn_gateway(ctx).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/aog/v0.2/services/chat/completions"))
        .json(&json!({"messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().is_some());
}

#[tokio::test]
async fn health_route_reports_up() {
    let ctx = Arc::new(GatewayContext::new(
        Arc::new(MemStore::new()),
        Arc::new(FlavorRegistry::from_embedded().unwrap()),
        Arc::new(ReqwestTransport::new().unwrap()),
    ));
    let addr = spawn_gateway(ctx).await;

    let resp = reqwest::get(format!("http://{addr}/aog/v0.2/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "UP");
}

/// Every streamed response must have the shape
/// `p1 … pk chunk₁ … chunk_n e1 … em`.
#[tokio::test]
async fn stream_framing_emits_prologue_chunks_epilogue() {
    let upstream = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"text\":\"one\"}\n\n",
        "data: \n\n",
        "data: {\"text\":\"two\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&upstream)
        .await;

    let defs = r#"
- name: aog
  services:
    chat:
      endpoints:
        - POST /chat/completions
      stream:
        prologue:
          - ": stream-start"
        epilogue:
          - "data: [DONE]"
- name: vendor
  services:
    chat:
      endpoints:
        - POST /chat/completions
"#;
    let configs: Vec<FlavorConfig> = serde_yaml::from_str(defs).unwrap();
    let registry = FlavorRegistry::from_configs(configs).unwrap();

    let store = Arc::new(MemStore::new());
    seed_chat(&store, &format!("{}/chat", upstream.uri()), "vendor").await;
    let ctx = Arc::new(GatewayContext::new(
        store,
        Arc::new(registry),
        Arc::new(ReqwestTransport::new().unwrap()),
    ));
    let addr = spawn_gateway(ctx).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/aog/v0.2/services/chat/completions"))
        .json(&json!({"model": "m1", "messages": [], "stream": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let body = resp.text().await.unwrap();
    // Prologue first, then the two non-empty chunks (the whitespace-only
    // record was dropped and does not shift the epilogue), epilogue last.
    assert_eq!(
        body,
        ": stream-start\n\n\
         data: {\"text\":\"one\"}\n\n\
         data: {\"text\":\"two\"}\n\n\
         data: [DONE]\n\n"
    );
}
