use thiserror::Error;

#[derive(Debug, Error)]
pub enum GrpcError {
    #[error("failed to connect to engine at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("inference call failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("a stream session already exists for connection {0}")]
    SessionExists(u64),
    #[error("stream session is closed")]
    SessionClosed,
    #[error("engine returned no output")]
    EmptyResponse,
}

impl GrpcError {
    /// Unavailable and deadline failures may be retried; everything else
    /// is fatal for the task.
    pub fn is_retryable(&self) -> bool {
        match self {
            GrpcError::Connect { .. } => true,
            GrpcError::Rpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ),
            _ => false,
        }
    }
}
