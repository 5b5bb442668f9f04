//! The scheduler: one task per accepted request, a monotonic id counter,
//! and a single loop that owns the waiting/running bookkeeping. Tasks live
//! in an arena; the queues hold ids so removal from either side is O(1)
//! without aliasing task storage.

use crate::context::GatewayContext;
use crate::dispatch::dispatch;
use crate::runner;
use aog_protocol::ServiceRequest;
use aog_protocol::ServiceTarget;
use aog_protocol::TaskResult;
use slab::Slab;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

pub const EVENT_CHANNEL_CAPACITY: usize = 600;
pub const RESULT_CHANNEL_CAPACITY: usize = 600;

#[derive(Debug)]
pub struct ScheduleState {
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub is_running: bool,
}

impl ScheduleState {
    fn new() -> Self {
        Self {
            enqueued_at: Instant::now(),
            started_at: None,
            completed_at: None,
            is_running: false,
        }
    }
}

pub struct Task {
    pub id: u64,
    pub request: ServiceRequest,
    pub target: Option<ServiceTarget>,
    pub schedule: ScheduleState,
    tx_result: mpsc::Sender<TaskResult>,
}

pub(crate) enum SchedulerEvent {
    Enqueue(Task),
    Done { id: u64 },
    Failed { id: u64, error: String },
}

/// Cloneable handle to the scheduler. `start` spawns the owning loop; all
/// mutation of the task lists happens inside that one task.
#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<GatewayContext>,
    tx_event: mpsc::Sender<SchedulerEvent>,
    next_task_id: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn start(ctx: Arc<GatewayContext>) -> Self {
        let (tx_event, rx_event) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let scheduler = Self {
            ctx,
            tx_event,
            next_task_id: Arc::new(AtomicU64::new(0)),
        };
        tokio::spawn(scheduler_loop(scheduler.clone(), rx_event));
        scheduler
    }

    pub fn ctx(&self) -> &Arc<GatewayContext> {
        &self.ctx
    }

    /// Accept a request: allocate the task id, hand back the result
    /// channel, and queue the task. Ids are unique and strictly
    /// monotonic for the scheduler's lifetime.
    pub async fn enqueue(&self, request: ServiceRequest) -> (u64, mpsc::Receiver<TaskResult>) {
        self.prepare(request).submit().await
    }

    /// Allocate the task id without queueing yet. Callers that must index
    /// side state by task id (the WebSocket reader records each frame's
    /// kind) do so between `prepare` and `submit`.
    pub fn prepare(&self, request: ServiceRequest) -> PreparedTask {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1;
        PreparedTask {
            scheduler: self.clone(),
            id,
            request,
        }
    }

    async fn queue(&self, task: Task, tx_result: mpsc::Sender<TaskResult>) {
        let id = task.id;
        if self.tx_event.send(SchedulerEvent::Enqueue(task)).await.is_err() {
            // Scheduler loop is gone; fail the task on its own channel.
            let _ = tx_result
                .send(TaskResult::failed(
                    id,
                    http::StatusCode::SERVICE_UNAVAILABLE,
                    "scheduler is shut down",
                ))
                .await;
        }
    }

    pub(crate) async fn notify_done(&self, id: u64) {
        let _ = self.tx_event.send(SchedulerEvent::Done { id }).await;
    }

    pub(crate) async fn notify_failed(&self, id: u64, error: String) {
        let _ = self
            .tx_event
            .send(SchedulerEvent::Failed { id, error })
            .await;
    }
}

pub struct PreparedTask {
    scheduler: Scheduler,
    id: u64,
    request: ServiceRequest,
}

impl PreparedTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn submit(self) -> (u64, mpsc::Receiver<TaskResult>) {
        let (tx_result, rx_result) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let task = Task {
            id: self.id,
            request: self.request,
            target: None,
            schedule: ScheduleState::new(),
            tx_result: tx_result.clone(),
        };
        self.scheduler.queue(task, tx_result).await;
        (self.id, rx_result)
    }
}

#[derive(Default)]
struct SchedulerState {
    tasks: Slab<Task>,
    /// task id -> arena key; the side indexes below hold ids only.
    index: HashMap<u64, usize>,
    waiting: VecDeque<u64>,
    running: HashSet<u64>,
}

impl SchedulerState {
    fn insert(&mut self, task: Task) {
        let id = task.id;
        let key = self.tasks.insert(task);
        self.index.insert(id, key);
        self.waiting.push_back(id);
    }

    fn get(&self, id: u64) -> Option<&Task> {
        let key = *self.index.get(&id)?;
        self.tasks.get(key)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut Task> {
        let key = *self.index.get(&id)?;
        self.tasks.get_mut(key)
    }

    fn remove(&mut self, id: u64) -> Option<Task> {
        let key = self.index.remove(&id)?;
        self.running.remove(&id);
        Some(self.tasks.remove(key))
    }
}

async fn scheduler_loop(sched: Scheduler, mut rx_event: mpsc::Receiver<SchedulerEvent>) {
    let mut state = SchedulerState::default();
    while let Some(event) = rx_event.recv().await {
        match event {
            SchedulerEvent::Enqueue(task) => {
                state.insert(task);
                schedule(&sched, &mut state).await;
            }
            SchedulerEvent::Done { id } => finish(&mut state, id, None),
            SchedulerEvent::Failed { id, error } => finish(&mut state, id, Some(error)),
        }
    }
}

/// Walk the waiting list front to back and dispatch each task. Dispatch
/// failures terminate the task immediately; successes move it to the
/// running set and spawn its runner.
async fn schedule(sched: &Scheduler, state: &mut SchedulerState) {
    while let Some(id) = state.waiting.pop_front() {
        let Some(request) = state.get(id).map(|task| task.request.clone()) else {
            continue;
        };
        match dispatch(&sched.ctx, &request).await {
            Ok(target) => {
                let Some(task) = state.get_mut(id) else {
                    continue;
                };
                task.target = Some(target.clone());
                task.schedule.started_at = Some(Instant::now());
                task.schedule.is_running = true;
                let tx_result = task.tx_result.clone();
                state.running.insert(id);
                tokio::spawn(runner::run_task(
                    sched.clone(),
                    id,
                    request,
                    target,
                    tx_result,
                ));
            }
            Err(err) => {
                let Some(task) = state.remove(id) else {
                    continue;
                };
                warn!(
                    task_id = id,
                    error = %err,
                    waited_ms = task.schedule.enqueued_at.elapsed().as_millis() as u64,
                    "dispatch failed"
                );
                let _ = task
                    .tx_result
                    .send(TaskResult::failed(id, err.status_code(), err.to_string()))
                    .await;
                // Dropping the task here closes its result channel.
            }
        }
    }
}

fn finish(state: &mut SchedulerState, id: u64, error: Option<String>) {
    let Some(mut task) = state.remove(id) else {
        return;
    };
    task.schedule.completed_at = Some(Instant::now());
    task.schedule.is_running = false;
    let waited = task.schedule.enqueued_at.elapsed().as_millis() as u64;
    let ran = task
        .schedule
        .started_at
        .map(|t| t.elapsed().as_millis() as u64)
        .unwrap_or(0);
    match error {
        None => info!(task_id = id, since_enqueue_ms = waited, since_run_ms = ran, "task completed"),
        Some(error) => warn!(
            task_id = id,
            since_enqueue_ms = waited,
            since_run_ms = ran,
            %error,
            "task failed"
        ),
    }
    // The arena entry drops here, closing the result channel after the
    // runner has already delivered the terminal result.
}
