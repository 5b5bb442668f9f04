//! Stream-session bookkeeping. Each WebSocket connection may own at most
//! one live upstream stream; the manager enforces that and tears the
//! stream down when the socket goes away.

use crate::error::GrpcError;
use crate::pb::inference::ModelInferRequest;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Upper bound on how long one upstream stream may stay open.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The send side of one bound upstream stream, keyed by the owning
/// WebSocket connection. The receive side is consumed by the connection's
/// monitor task.
pub struct GrpcSession {
    pub ws_conn_id: u64,
    pub service: String,
    pub model: String,
    sender: mpsc::Sender<ModelInferRequest>,
    cancel: CancellationToken,
}

impl GrpcSession {
    pub fn new(
        ws_conn_id: u64,
        service: impl Into<String>,
        model: impl Into<String>,
        sender: mpsc::Sender<ModelInferRequest>,
    ) -> Self {
        Self {
            ws_conn_id,
            service: service.into(),
            model: model.into(),
            sender,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn send(&self, request: ModelInferRequest) -> Result<(), GrpcError> {
        self.sender
            .send(request)
            .await
            .map_err(|_| GrpcError::SessionClosed)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the session. Dropping the sender half-closes the upstream
    /// stream; the token stops the monitor task.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Process-wide map of live stream sessions, one per WebSocket conn id.
#[derive(Default)]
pub struct GrpcSessionManager {
    sessions: Mutex<HashMap<u64, Arc<GrpcSession>>>,
}

impl GrpcSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session. Fails if the connection already has one;
    /// the old session must be closed and removed first.
    pub async fn register(&self, session: GrpcSession) -> Result<Arc<GrpcSession>, GrpcError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.ws_conn_id) {
            return Err(GrpcError::SessionExists(session.ws_conn_id));
        }
        let conn_id = session.ws_conn_id;
        let session = Arc::new(session);
        sessions.insert(conn_id, Arc::clone(&session));
        info!(conn_id, service = %session.service, "grpc stream session registered");
        Ok(session)
    }

    pub async fn get(&self, ws_conn_id: u64) -> Option<Arc<GrpcSession>> {
        self.sessions.lock().await.get(&ws_conn_id).cloned()
    }

    /// Remove and cancel the session for a connection, if any. Idempotent:
    /// closing an already-closed connection is a no-op.
    pub async fn close(&self, ws_conn_id: u64) {
        let session = self.sessions.lock().await.remove(&ws_conn_id);
        if let Some(session) = session {
            session.close();
            info!(conn_id = ws_conn_id, "grpc stream session closed");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
