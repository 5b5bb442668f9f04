use aog_api::AuthError;
use aog_api::ConvertError;
use aog_api::FlavorError;
use aog_client::TransportError;
use aog_grpc::GrpcError;
use aog_protocol::StoreError;
use aog_protocol::entity::Location;
use bytes::Bytes;
use http::HeaderMap;
use http::StatusCode;
use thiserror::Error;

/// Everything that can go wrong while driving a task. Each variant maps to
/// one error kind surfaced to the client; `is_retryable` decides whether
/// the invoker re-issues the upstream call.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Middleware rejected the request shape. The message is surfaced to
    /// the client as-is.
    #[error("{0}")]
    Validation(String),
    #[error("no provider configured for service {service} ({location})")]
    ProviderNotFound { service: String, location: Location },
    #[error("no usable model for service {0}")]
    ModelNotFound(String),
    #[error("model {0} is not downloaded")]
    ModelNotDownloaded(String),
    /// Upstream answered with a final non-success status; relayed to the
    /// client verbatim.
    #[error("upstream returned {status}")]
    Upstream {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    /// Transient upstream failure (timeout, connection reset, 5xx). The
    /// invoker retries these; if retries run out the last one propagates.
    #[error("upstream transient failure: {0}")]
    Transient(String),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Flavor(#[from] FlavorError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Grpc(#[from] GrpcError),
    #[error("task cancelled: {0}")]
    Cancelled(String),
    #[error("{0}")]
    Internal(String),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Transient(_) => true,
            TaskError::Upstream { status, .. } => status.is_server_error(),
            TaskError::Grpc(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Status code used when this error becomes a `failed` result.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TaskError::Validation(_) => StatusCode::BAD_REQUEST,
            TaskError::ProviderNotFound { .. } | TaskError::ModelNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            TaskError::ModelNotDownloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::Upstream { status, .. } => *status,
            TaskError::Transient(_) => StatusCode::BAD_GATEWAY,
            TaskError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            TaskError::Cancelled(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn from_transport(err: TransportError) -> Self {
        match err {
            TransportError::Http {
                status,
                headers,
                body,
            } => {
                if status.is_server_error() {
                    TaskError::Transient(format!("upstream returned {status}"))
                } else {
                    TaskError::Upstream {
                        status,
                        headers,
                        body,
                    }
                }
            }
            TransportError::Timeout => TaskError::Transient("request timed out".to_string()),
            TransportError::Network(msg) => TaskError::Transient(msg),
            TransportError::Build(msg) => TaskError::Internal(msg),
        }
    }
}
