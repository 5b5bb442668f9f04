use crate::http_content::HttpContent;
use http::StatusCode;
use strum_macros::Display;

/// What a single result-channel message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TaskResultKind {
    /// One converted chunk of a streamed response.
    Chunk,
    /// Terminal success. For non-stream responses this carries the whole
    /// body; for streams it follows the last chunk and carries nothing.
    Done,
    /// Terminal failure.
    Failed,
}

/// A message delivered on a task's result channel.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: u64,
    pub kind: TaskResultKind,
    pub status: StatusCode,
    pub content: HttpContent,
    pub error: Option<String>,
}

impl TaskResult {
    pub fn chunk(task_id: u64, content: HttpContent) -> Self {
        Self {
            task_id,
            kind: TaskResultKind::Chunk,
            status: StatusCode::OK,
            content,
            error: None,
        }
    }

    pub fn done(task_id: u64, status: StatusCode, content: HttpContent) -> Self {
        Self {
            task_id,
            kind: TaskResultKind::Done,
            status,
            content,
            error: None,
        }
    }

    pub fn failed(task_id: u64, status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            task_id,
            kind: TaskResultKind::Failed,
            status,
            content: HttpContent::default(),
            error: Some(error.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TaskResultKind::Done | TaskResultKind::Failed)
    }
}
