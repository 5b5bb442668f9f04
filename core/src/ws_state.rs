//! Shared state for WebSocket speech-to-text sessions. The server's
//! connection handler owns the socket; middleware and the bridge read and
//! update the session record through this store.

use aog_protocol::ws::SttParams;
use aog_protocol::ws::WsTaskKind;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::Notify;

pub struct WsSessionState {
    pub conn_id: u64,
    pub flavor: String,
    pub service: String,
    params: Mutex<SttParams>,
    total_audio_bytes: AtomicU64,
    last_audio_time: Mutex<Option<Instant>>,
    active_tasks: Mutex<HashSet<u64>>,
    task_kinds: Mutex<HashMap<u64, WsTaskKind>>,
    finished_at: Mutex<Option<Instant>>,
    closed: AtomicBool,
    /// Signalled on every task completion; see `wait_until_remaining`.
    drained: Notify,
}

impl WsSessionState {
    fn new(conn_id: u64, flavor: String, service: String) -> Self {
        Self {
            conn_id,
            flavor,
            service,
            params: Mutex::new(SttParams::default()),
            total_audio_bytes: AtomicU64::new(0),
            last_audio_time: Mutex::new(None),
            active_tasks: Mutex::new(HashSet::new()),
            task_kinds: Mutex::new(HashMap::new()),
            finished_at: Mutex::new(None),
            closed: AtomicBool::new(false),
            drained: Notify::new(),
        }
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_params(&self, params: SttParams) {
        *Self::lock(&self.params) = params;
    }

    pub fn params(&self) -> SttParams {
        Self::lock(&self.params).clone()
    }

    pub fn add_audio_bytes(&self, len: u64) {
        self.total_audio_bytes.fetch_add(len, Ordering::SeqCst);
        *Self::lock(&self.last_audio_time) = Some(Instant::now());
    }

    pub fn total_audio_bytes(&self) -> u64 {
        self.total_audio_bytes.load(Ordering::SeqCst)
    }

    pub fn track_task(&self, task_id: u64, kind: WsTaskKind) {
        Self::lock(&self.active_tasks).insert(task_id);
        Self::lock(&self.task_kinds).insert(task_id, kind);
    }

    pub fn task_kind(&self, task_id: u64) -> Option<WsTaskKind> {
        Self::lock(&self.task_kinds).get(&task_id).copied()
    }

    /// Drop a finished task. Every removal pokes the drain waiters so
    /// they re-evaluate whatever threshold they are waiting on.
    pub fn complete_task(&self, task_id: u64) {
        {
            let mut active = Self::lock(&self.active_tasks);
            active.remove(&task_id);
            Self::lock(&self.task_kinds).remove(&task_id);
        }
        self.drained.notify_waiters();
    }

    pub fn active_task_count(&self) -> usize {
        Self::lock(&self.active_tasks).len()
    }

    /// Wait until at most `remaining` tasks stay active. The notification
    /// is registered before each count check, so a completion landing
    /// between the check and the await cannot be lost.
    pub async fn wait_until_remaining(&self, remaining: usize) {
        let notified = self.drained.notified();
        tokio::pin!(notified);
        loop {
            notified.as_mut().enable();
            if self.active_task_count() <= remaining {
                return;
            }
            notified.as_mut().await;
            notified.set(self.drained.notified());
        }
    }

    /// Stamp the finish-task time.
    pub fn mark_finished(&self) {
        *Self::lock(&self.finished_at) = Some(Instant::now());
    }

    pub fn finished_at(&self) -> Option<Instant> {
        *Self::lock(&self.finished_at)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Process-wide registry of live WebSocket sessions, keyed by conn id.
#[derive(Default)]
pub struct WsSessionStore {
    sessions: Mutex<HashMap<u64, Arc<WsSessionState>>>,
    next_conn_id: AtomicU64,
}

impl WsSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, flavor: &str, service: &str) -> Arc<WsSessionState> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(WsSessionState::new(
            conn_id,
            flavor.to_string(),
            service.to_string(),
        ));
        WsSessionState::lock(&self.sessions).insert(conn_id, Arc::clone(&session));
        session
    }

    pub fn get(&self, conn_id: u64) -> Option<Arc<WsSessionState>> {
        WsSessionState::lock(&self.sessions).get(&conn_id).cloned()
    }

    /// Remove a session on socket close. The record is marked closed so
    /// late lookups fail fast.
    pub fn remove(&self, conn_id: u64) -> Option<Arc<WsSessionState>> {
        let session = WsSessionState::lock(&self.sessions).remove(&conn_id);
        if let Some(session) = &session {
            session.mark_closed();
        }
        session
    }
}
