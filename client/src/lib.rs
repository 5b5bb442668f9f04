//! HTTP transport layer for the gateway.
//!
//! Everything upstream-facing goes through [`HttpTransport`], which keeps
//! the rest of the workspace independent of the concrete HTTP client and
//! lets tests substitute a mock transport.

mod error;
mod request;
mod retry;
mod transport;

pub use error::TransportError;
pub use request::Request;
pub use request::Response;
pub use retry::RetryPolicy;
pub use retry::backoff_delay;
pub use transport::ByteStream;
pub use transport::HttpTransport;
pub use transport::ReqwestTransport;
pub use transport::StreamResponse;
