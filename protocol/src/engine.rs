use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullModelRequest {
    pub model_name: String,
}

/// One progress tick while an engine downloads model weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullProgress {
    pub model_name: String,
    pub completed: u64,
    pub total: u64,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Daemon,
    Foreground,
}

/// Contract for a local model engine (weights I/O and process management
/// live behind it; only `list_models` and `health_check` sit on the
/// gateway's hot path).
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn pull_model(
        &self,
        req: PullModelRequest,
    ) -> Result<mpsc::Receiver<PullProgress>, EngineError>;
    async fn delete_model(&self, model_name: &str) -> Result<(), EngineError>;
    async fn list_models(&self) -> Result<Vec<EngineModel>, EngineError>;
    async fn get_version(&self) -> Result<String, EngineError>;
    async fn start_engine(&self, mode: EngineMode) -> Result<(), EngineError>;
    async fn stop_engine(&self) -> Result<(), EngineError>;
    async fn health_check(&self) -> Result<(), EngineError>;
}
