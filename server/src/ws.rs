//! The WebSocket side of the duplex bridge. The socket is split on
//! upgrade: the connection handler reads frames inline, classifying each
//! one and dispatching it to the scheduler in receive order, while all
//! outbound frames funnel through one writer task per connection so
//! events from the bridge, the stream monitor and the Pong replies never
//! interleave. Once an upstream stream exists, a monitor forwards
//! inference chunks back out as typed events.

use crate::AppState;
use aog_core::GatewayContext;
use aog_core::StreamBridge;
use aog_core::TaskError;
use aog_core::WsSessionState;
use aog_grpc::GrpcSession;
use aog_grpc::InferenceClient;
use aog_grpc::SESSION_TIMEOUT;
use aog_grpc::http_body_from_response;
use aog_grpc::infer_request_from_body;
use aog_grpc::pb::inference::ModelStreamInferResponse;
use aog_protocol::HttpContent;
use aog_protocol::ServiceRequest;
use aog_protocol::ServiceTarget;
use aog_protocol::result::TaskResultKind;
use aog_protocol::ws::ClientAction;
use aog_protocol::ws::ClientFrame;
use aog_protocol::ws::ResultGenerated;
use aog_protocol::ws::WS_ERROR_CODE_CLIENT;
use aog_protocol::ws::WS_ERROR_CODE_SERVER;
use aog_protocol::ws::WsEventKind;
use aog_protocol::ws::WsServerEvent;
use aog_protocol::ws::WsTaskKind;
use async_trait::async_trait;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::codec::Streaming;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// How long a finish-task waits for the connection's other active tasks
/// before emitting `task-finished` anyway.
const FINISH_WAIT: Duration = Duration::from_secs(5);

/// Outbound frames queued ahead of the socket; senders block when full.
const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum WsSendError {
    #[error("websocket is closed")]
    Closed,
    #[error("failed to encode event: {0}")]
    Encode(String),
}

/// Cloneable handle for pushing frames to one connection. Everything the
/// gateway emits (bridge acks, monitor results, Pong replies, the close
/// frame) goes through the same bounded queue, drained by a single writer
/// task, so frames are never interleaved on the wire. Queued sends are
/// fire-and-forget: a dead socket shows up as `Closed` on the next send
/// once the writer task has exited.
#[derive(Clone)]
pub struct WsWriter {
    queue: mpsc::Sender<Message>,
    closing: Arc<AtomicBool>,
}

impl WsWriter {
    /// Take the write half of a freshly upgraded socket and start its
    /// writer task. The task ends when the queue closes (all handles
    /// dropped), a close frame goes out, or the peer stops accepting.
    fn start(mut sink: SplitSink<WebSocket, Message>) -> Self {
        let (queue, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let done = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() || done {
                    break;
                }
            }
            // Dropping rx wakes queued senders with a send error.
        });
        Self {
            queue,
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn send_event(&self, event: &WsServerEvent) -> Result<(), WsSendError> {
        let payload =
            serde_json::to_string(event).map_err(|err| WsSendError::Encode(err.to_string()))?;
        self.send_frame(Message::Text(payload.into())).await
    }

    async fn send_frame(&self, frame: Message) -> Result<(), WsSendError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(WsSendError::Closed);
        }
        self.queue
            .send(frame)
            .await
            .map_err(|_| WsSendError::Closed)
    }

    /// Queue a close frame at most once; the writer task exits after
    /// flushing it.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.queue.send(Message::Close(None)).await;
    }
}

/// Live writers keyed by conn id; the bridge and monitors look theirs up
/// here.
#[derive(Default)]
pub struct WsWriterRegistry {
    writers: Mutex<HashMap<u64, WsWriter>>,
}

impl WsWriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, conn_id: u64, writer: WsWriter) {
        self.writers.lock().await.insert(conn_id, writer);
    }

    pub async fn get(&self, conn_id: u64) -> Option<WsWriter> {
        self.writers.lock().await.get(&conn_id).cloned()
    }

    pub async fn remove(&self, conn_id: u64) -> Option<WsWriter> {
        self.writers.lock().await.remove(&conn_id)
    }
}

/// Per-connection handler. The read half stays here: each frame is
/// classified and dispatched to the scheduler in receive order, and the
/// socket teardown closes any bound upstream session exactly once.
pub(crate) async fn handle_socket(
    state: AppState,
    flavor: String,
    service: String,
    socket: WebSocket,
) {
    let ctx = Arc::clone(state.ctx());
    let session = ctx.ws_sessions.register(&flavor, &service);
    let conn_id = session.conn_id;

    let (sink, mut inbound) = socket.split();
    let writer = WsWriter::start(sink);
    state.writers.insert(conn_id, writer.clone()).await;
    info!(conn_id, %flavor, %service, "websocket connected");

    while let Some(message) = inbound.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Ping(payload) => {
                if writer.send_frame(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Message::Pong(_) => {}
            Message::Text(text) => {
                let frame = serde_json::from_str::<ClientFrame>(&text).ok();
                match frame.as_ref().and_then(|f| f.action) {
                    Some(ClientAction::RunTask) => {
                        let mut frame = frame.unwrap_or_default();
                        // The connection id doubles as the task id on the
                        // wire for the whole session.
                        frame.task_id = Some(conn_id.to_string());
                        let body = match serde_json::to_vec(&frame) {
                            Ok(body) => Bytes::from(body),
                            Err(_) => Bytes::copy_from_slice(text.as_bytes()),
                        };
                        submit_frame(
                            &state,
                            &session,
                            WsTaskKind::RunTask,
                            frame.model,
                            json_content(body),
                            &writer,
                        )
                        .await;
                    }
                    Some(ClientAction::FinishTask) => {
                        submit_frame(
                            &state,
                            &session,
                            WsTaskKind::FinishTask,
                            None,
                            json_content(Bytes::copy_from_slice(text.as_bytes())),
                            &writer,
                        )
                        .await;
                    }
                    None => {
                        submit_frame(
                            &state,
                            &session,
                            WsTaskKind::Audio,
                            None,
                            audio_content(Bytes::copy_from_slice(text.as_bytes())),
                            &writer,
                        )
                        .await;
                    }
                }
            }
            Message::Binary(data) => {
                submit_frame(
                    &state,
                    &session,
                    WsTaskKind::Audio,
                    None,
                    audio_content(data),
                    &writer,
                )
                .await;
            }
            Message::Close(_) => break,
        }
    }

    // Closing the socket closes the bound upstream session; the reverse
    // is not true, so a client may run another session on a new task.
    writer.close().await;
    state.writers.remove(conn_id).await;
    ctx.ws_sessions.remove(conn_id);
    ctx.grpc_sessions.close(conn_id).await;
    info!(conn_id, "websocket disconnected");
}

fn json_content(body: Bytes) -> HttpContent {
    let mut content = HttpContent::new(http::HeaderMap::new(), body);
    content.header.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    content
}

fn audio_content(body: Bytes) -> HttpContent {
    let mut content = HttpContent::new(http::HeaderMap::new(), body);
    content.header.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/octet-stream"),
    );
    content
}

/// Queue one frame as a scheduler task and drain its result channel. The
/// task kind is recorded under the allocated id before submission so
/// middleware sees it; failures surface as `task-failed` events. Draining
/// inline keeps per-connection frames strictly ordered through the
/// scheduler and onto the upstream stream.
async fn submit_frame(
    state: &AppState,
    session: &Arc<WsSessionState>,
    kind: WsTaskKind,
    model: Option<String>,
    content: HttpContent,
    writer: &WsWriter,
) {
    let mut request = ServiceRequest::new(session.flavor.clone(), session.service.clone())
        .with_http(content);
    request.model = model;
    request.ws_conn_id = Some(session.conn_id);

    let prepared = state.scheduler.prepare(request);
    session.track_task(prepared.id(), kind);
    let (task_id, mut rx) = prepared.submit().await;
    debug!(conn_id = session.conn_id, task_id, %kind, "ws frame dispatched");

    while let Some(result) = rx.recv().await {
        if result.kind == TaskResultKind::Failed {
            let code = if result.status.is_client_error() {
                WS_ERROR_CODE_CLIENT
            } else {
                WS_ERROR_CODE_SERVER
            };
            let message = result.error.unwrap_or_else(|| "task failed".to_string());
            let event = WsServerEvent::failed(session.conn_id.to_string(), code, message);
            let _ = writer.send_event(&event).await;
        }
    }
    session.complete_task(task_id);
}

/// Scheduler-facing half of the bridge: creates the upstream stream on
/// first need, pushes frames into it, and emits the lifecycle events.
pub struct WsBridge {
    ctx: Arc<GatewayContext>,
    writers: Arc<WsWriterRegistry>,
}

impl WsBridge {
    pub fn new(ctx: Arc<GatewayContext>, writers: Arc<WsWriterRegistry>) -> Self {
        Self { ctx, writers }
    }

    async fn ensure_session(
        &self,
        conn_id: u64,
        request: &ServiceRequest,
        target: &ServiceTarget,
    ) -> Result<(), TaskError> {
        if self.ctx.grpc_sessions.get(conn_id).await.is_some() {
            return Ok(());
        }
        let mut client = InferenceClient::connect(&target.provider.url).await?;
        let (tx, stream) = client.open_stream().await?;
        let session = self
            .ctx
            .grpc_sessions
            .register(GrpcSession::new(
                conn_id,
                request.service.clone(),
                target.model.clone(),
                tx,
            ))
            .await?;
        spawn_monitor(
            Arc::clone(&self.ctx),
            Arc::clone(&self.writers),
            conn_id,
            stream,
            session.cancel_token(),
        );
        Ok(())
    }
}

#[async_trait]
impl StreamBridge for WsBridge {
    async fn dispatch_ws(
        &self,
        _task_id: u64,
        request: &ServiceRequest,
        target: &ServiceTarget,
        kind: WsTaskKind,
    ) -> Result<(), TaskError> {
        let conn_id = request.ws_conn_id.ok_or_else(|| {
            TaskError::Validation("streaming task without a websocket connection".to_string())
        })?;
        let session_state = self.ctx.ws_sessions.get(conn_id).ok_or_else(|| {
            TaskError::Validation(format!("no websocket session {conn_id}"))
        })?;
        let writer = self.writers.get(conn_id).await.ok_or_else(|| {
            TaskError::Internal(format!("no writer for websocket connection {conn_id}"))
        })?;

        match kind {
            WsTaskKind::RunTask => {
                self.ensure_session(conn_id, request, target).await?;
                let grpc = self
                    .ctx
                    .grpc_sessions
                    .get(conn_id)
                    .await
                    .ok_or(TaskError::Grpc(aog_grpc::GrpcError::SessionClosed))?;
                grpc.send(infer_request_from_body(
                    &target.model,
                    &conn_id.to_string(),
                    &request.http.body,
                ))
                .await?;
                // Ack immediately; recognition results follow from the
                // monitor as they arrive.
                let _ = writer
                    .send_event(&WsServerEvent::new(
                        conn_id.to_string(),
                        WsEventKind::TaskStarted,
                    ))
                    .await;
            }
            WsTaskKind::Audio => {
                let grpc = self.ctx.grpc_sessions.get(conn_id).await.ok_or_else(|| {
                    TaskError::Validation("no running task for audio frame".to_string())
                })?;
                grpc.send(infer_request_from_body(
                    &target.model,
                    &conn_id.to_string(),
                    &request.http.body,
                ))
                .await?;
            }
            WsTaskKind::FinishTask => {
                if let Some(grpc) = self.ctx.grpc_sessions.get(conn_id).await {
                    // An empty audio frame flushes end-of-stream upstream.
                    let _ = grpc
                        .send(infer_request_from_body(
                            &target.model,
                            &conn_id.to_string(),
                            b"",
                        ))
                        .await;
                }
                tokio::spawn(async move {
                    // The finish task itself is still tracked while this
                    // waits, so "everything else done" means one left.
                    let all_done = session_state.wait_until_remaining(1);
                    if tokio::time::timeout(FINISH_WAIT, all_done).await.is_err() {
                        warn!(
                            conn_id,
                            "task-finished emitted with tasks still active after bounded wait"
                        );
                    }
                    let _ = writer
                        .send_event(&WsServerEvent::new(
                            conn_id.to_string(),
                            WsEventKind::TaskFinished,
                        ))
                        .await;
                });
            }
        }
        Ok(())
    }
}

/// Forward upstream inference chunks to the client until EOF, error,
/// cancellation or the session timeout. The session is closed exactly
/// once on the way out.
fn spawn_monitor(
    ctx: Arc<GatewayContext>,
    writers: Arc<WsWriterRegistry>,
    conn_id: u64,
    mut stream: Streaming<ModelStreamInferResponse>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + SESSION_TIMEOUT;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(conn_id, "stream session hit its timeout");
                    break;
                }
                next = stream.message() => next,
            };

            match next {
                Ok(Some(chunk)) => {
                    if !chunk.error_message.is_empty() {
                        send_failed(&writers, conn_id, &chunk.error_message).await;
                        break;
                    }
                    let Some(infer) = chunk.infer_response else {
                        continue;
                    };
                    let Ok(body) = http_body_from_response(&infer) else {
                        continue;
                    };
                    forward_result(&writers, conn_id, &body).await;
                }
                Ok(None) => {
                    debug!(conn_id, "upstream stream reached EOF");
                    break;
                }
                Err(status) => {
                    send_failed(&writers, conn_id, &status.to_string()).await;
                    break;
                }
            }
        }
        ctx.grpc_sessions.close(conn_id).await;
    });
}

async fn send_failed(writers: &WsWriterRegistry, conn_id: u64, message: &str) {
    if let Some(writer) = writers.get(conn_id).await {
        let event = WsServerEvent::failed(conn_id.to_string(), WS_ERROR_CODE_SERVER, message);
        let _ = writer.send_event(&event).await;
    }
}

/// Raw recognizer output is JSON `{status, is_final, content, message}`;
/// non-empty content may carry SRT-style timestamps.
async fn forward_result(writers: &WsWriterRegistry, conn_id: u64, body: &[u8]) {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) else {
        debug!(conn_id, "dropping non-JSON recognizer output");
        return;
    };
    let content = json.get("content").and_then(|v| v.as_str()).unwrap_or("");
    if content.is_empty() {
        return;
    }
    let segment = crate::srt::parse_srt(content);
    let payload = ResultGenerated {
        begin_time: segment.begin_time,
        end_time: segment.end_time,
        text: segment.text,
    };
    if let Some(writer) = writers.get(conn_id).await {
        let event = WsServerEvent::new(conn_id.to_string(), WsEventKind::ResultGenerated)
            .with_payload(serde_json::to_value(&payload).unwrap_or_default());
        let _ = writer.send_event(&event).await;
    }
}
