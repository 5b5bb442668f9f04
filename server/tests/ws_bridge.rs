//! WebSocket ↔ gRPC bridge tests against an in-process mock inference
//! engine.

use aog_api::FlavorRegistry;
use aog_client::ReqwestTransport;
use aog_core::GatewayContext;
use aog_grpc::pb::inference::ModelInferRequest;
use aog_grpc::pb::inference::ModelInferResponse;
use aog_grpc::pb::inference::ModelStreamInferResponse;
use aog_grpc::pb::inference::grpc_inference_service_server::GrpcInferenceService;
use aog_grpc::pb::inference::grpc_inference_service_server::GrpcInferenceServiceServer;
use aog_protocol::EntityStore;
use aog_protocol::MemStore;
use aog_protocol::Model;
use aog_protocol::Service;
use aog_protocol::ServiceProvider;
use aog_protocol::entity::Location;
use aog_protocol::entity::ModelStatus;
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_tungstenite::tungstenite::Message;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tonic::Streaming;

/// Echo-style recognizer: every non-empty audio frame produces one
/// timestamped segment; an empty frame ends the stream. The initial
/// run-task frame (a JSON control payload) produces nothing.
struct MockEngine {
    segments: Arc<AtomicU64>,
}

#[tonic::async_trait]
impl GrpcInferenceService for MockEngine {
    async fn model_infer(
        &self,
        _request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        Err(Status::unimplemented("unary inference not mocked"))
    }

    type ModelStreamInferStream = ReceiverStream<Result<ModelStreamInferResponse, Status>>;

    async fn model_stream_infer(
        &self,
        request: Request<Streaming<ModelInferRequest>>,
    ) -> Result<Response<Self::ModelStreamInferStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let segments = Arc::clone(&self.segments);
        tokio::spawn(async move {
            while let Ok(Some(req)) = inbound.message().await {
                let payload = req.raw_input_contents.first().cloned().unwrap_or_default();
                if payload.is_empty() {
                    break;
                }
                let is_control = serde_json::from_slice::<serde_json::Value>(&payload)
                    .ok()
                    .and_then(|v| v.get("action").cloned())
                    .is_some();
                if is_control {
                    continue;
                }
                let n = segments.fetch_add(1, Ordering::SeqCst);
                let content = format!("00:00:0{n},000 --> 00:00:0{n},500\nsegment {n}");
                let body = json!({
                    "status": "ok",
                    "is_final": false,
                    "content": content,
                    "message": "",
                })
                .to_string();
                let chunk = ModelStreamInferResponse {
                    error_message: String::new(),
                    infer_response: Some(ModelInferResponse {
                        raw_output_contents: vec![body.into_bytes()],
                        ..Default::default()
                    }),
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

async fn spawn_mock_engine() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = MockEngine {
        segments: Arc::new(AtomicU64::new(0)),
    };
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(GrpcInferenceServiceServer::new(engine))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

async fn gateway_with_stt(engine_addr: SocketAddr) -> (SocketAddr, Arc<GatewayContext>) {
    let store = Arc::new(MemStore::new());
    store
        .add_service(Service {
            name: "speech-to-text-ws".to_string(),
            local_provider: "local_stt".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_provider(ServiceProvider {
            provider_name: "local_stt".to_string(),
            flavor: "aog".to_string(),
            service_name: "speech-to-text-ws".to_string(),
            method: "POST".to_string(),
            url: format!("http://{engine_addr}"),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .add_model(Model {
            model_name: "paraformer".to_string(),
            provider_name: "local_stt".to_string(),
            service_name: "speech-to-text-ws".to_string(),
            service_source: Location::Local,
            status: ModelStatus::Downloaded,
            is_default: true,
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let ctx = Arc::new(GatewayContext::new(
        store,
        Arc::new(FlavorRegistry::from_embedded().unwrap()),
        Arc::new(ReqwestTransport::new().unwrap()),
    ));
    let (router, _state) = aog_server::build_gateway(Arc::clone(&ctx));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, ctx)
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn next_event(ws: &mut WsClient) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("event is JSON");
        }
    }
}

#[tokio::test]
async fn stt_happy_path_run_audio_finish() {
    let engine_addr = spawn_mock_engine().await;
    let (addr, ctx) = gateway_with_stt(engine_addr).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/aog/v0.2/services/speech-to-text-ws"
    ))
    .await
    .expect("ws connect");

    ws.send(Message::Text(
        json!({
            "task": "speech-to-text-ws",
            "action": "run-task",
            "model": "paraformer",
            "parameters": {"format": "pcm", "sample_rate": 16000, "language": "zh"},
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    let started = next_event(&mut ws).await;
    assert_eq!(started["header"]["event"], "task-started");
    let task_id = started["header"]["task_id"].as_str().unwrap().to_string();

    // Stream some audio; each frame yields one recognized segment.
    for _ in 0..3 {
        ws.send(Message::Binary(vec![1u8; 1024].into())).await.unwrap();
    }
    for _ in 0..3 {
        let event = next_event(&mut ws).await;
        assert_eq!(event["header"]["event"], "result-generated");
        assert_eq!(event["header"]["task_id"], task_id.as_str());
        let begin = event["payload"]["begin_time"].as_u64().unwrap();
        let end = event["payload"]["end_time"].as_u64().unwrap();
        assert!(begin < end, "begin {begin} must precede end {end}");
        assert!(
            event["payload"]["text"]
                .as_str()
                .is_some_and(|t| !t.is_empty())
        );
    }

    ws.send(Message::Text(
        json!({"task": "speech-to-text-ws", "action": "finish-task", "task_id": task_id})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let finished = next_event(&mut ws).await;
    assert_eq!(finished["header"]["event"], "task-finished");

    ws.close(None).await.unwrap();
    // The upstream session is gone once the finish flush ended the stream
    // and the socket closed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(ctx.grpc_sessions.is_empty().await);
}

#[tokio::test]
async fn oversized_audio_frame_fails_but_session_survives() {
    let engine_addr = spawn_mock_engine().await;
    let (addr, ctx) = gateway_with_stt(engine_addr).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/aog/v0.2/services/speech-to-text-ws"
    ))
    .await
    .expect("ws connect");

    ws.send(Message::Text(
        json!({"action": "run-task", "model": "paraformer", "parameters": {"format": "pcm"}})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    let started = next_event(&mut ws).await;
    assert_eq!(started["header"]["event"], "task-started");

    // One byte over the limit.
    ws.send(Message::Binary(vec![0u8; 10 * 1024 * 1024 + 1].into()))
        .await
        .unwrap();
    let failed = next_event(&mut ws).await;
    assert_eq!(failed["header"]["event"], "task-failed");
    assert_eq!(failed["header"]["error_code"], "CLIENT_ERROR");
    assert_eq!(failed["header"]["error_message"], "audio data too large");

    // The rejected frame never counted, and the session still works.
    let conn_id: u64 = started["header"]["task_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let session = ctx.ws_sessions.get(conn_id).expect("session alive");
    assert_eq!(session.total_audio_bytes(), 0);

    ws.send(Message::Binary(vec![1u8; 2048].into())).await.unwrap();
    let event = next_event(&mut ws).await;
    assert_eq!(event["header"]["event"], "result-generated");
    assert_eq!(session.total_audio_bytes(), 2048);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn ws_close_tears_down_grpc_session() {
    let engine_addr = spawn_mock_engine().await;
    let (addr, ctx) = gateway_with_stt(engine_addr).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/aog/v0.2/services/speech-to-text-ws"
    ))
    .await
    .expect("ws connect");

    ws.send(Message::Text(
        json!({"action": "run-task", "model": "paraformer"}).to_string().into(),
    ))
    .await
    .unwrap();
    let started = next_event(&mut ws).await;
    assert_eq!(started["header"]["event"], "task-started");
    assert_eq!(ctx.grpc_sessions.len().await, 1);

    // Closing the socket (not finish-task) must still close the bound
    // upstream session exactly once.
    ws.close(None).await.unwrap();
    drop(ws);

    let mut attempts = 0;
    while !ctx.grpc_sessions.is_empty().await && attempts < 50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        attempts += 1;
    }
    assert!(ctx.grpc_sessions.is_empty().await);
}
