use bytes::Bytes;
use http::HeaderMap;
use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build request: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// Upstream answered with a non-success status. The body is preserved
    /// verbatim so fatal responses can be relayed to the client untouched.
    #[error("unexpected status {status}")]
    Http {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
}

impl TransportError {
    /// Transient network failures and 5xx responses may be retried; 4xx
    /// responses and build errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Http { status, .. } => status.is_server_error(),
            TransportError::Build(_) => false,
        }
    }
}
