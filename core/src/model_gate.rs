//! Model in-use accounting. Every dispatched task marks its model in-use
//! for its lifetime; services that cannot share a loaded model also take
//! an exclusive per-model token, serializing their runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;

/// Services whose local execution must hold the model exclusively.
const EXCLUSIVE_SERVICES: &[&str] = &["text-to-image", "image-to-image", "image-to-video"];

pub fn requires_exclusive(service: &str) -> bool {
    EXCLUSIVE_SERVICES.contains(&service)
}

struct GateEntry {
    in_use: AtomicI64,
    semaphore: Arc<Semaphore>,
}

/// One token per running task. Dropping the token marks the model idle
/// exactly once, on every exit path.
pub struct ModelToken {
    entry: Arc<GateEntry>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for ModelToken {
    fn drop(&mut self) {
        self.entry.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ModelGates {
    gates: Mutex<HashMap<String, Arc<GateEntry>>>,
}

impl ModelGates {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, model: &str) -> Arc<GateEntry> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(gates.entry(model.to_string()).or_insert_with(|| {
            Arc::new(GateEntry {
                in_use: AtomicI64::new(0),
                semaphore: Arc::new(Semaphore::new(1)),
            })
        }))
    }

    /// Mark the model in-use, waiting for the exclusive token when asked.
    pub async fn acquire(&self, model: &str, exclusive: bool) -> ModelToken {
        let entry = self.entry(model);
        let permit = if exclusive {
            // Semaphore is never closed, so acquire only fails on close.
            Arc::clone(&entry.semaphore).acquire_owned().await.ok()
        } else {
            None
        };
        entry.in_use.fetch_add(1, Ordering::SeqCst);
        ModelToken {
            entry,
            _permit: permit,
        }
    }

    /// Current in-use count, for diagnostics and tests.
    pub fn in_use(&self, model: &str) -> i64 {
        let gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates
            .get(model)
            .map(|entry| entry.in_use.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}
