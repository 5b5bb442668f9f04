//! gRPC plumbing for local inference engines: committed bindings for the
//! inference protocol (unary `ModelInfer`, bidirectional
//! `ModelStreamInfer`), a thin client, payload codecs, and the session
//! manager that binds one WebSocket connection to one upstream stream.

pub mod client;
pub mod codec;
pub mod pb;
pub mod session;

mod error;

pub use client::InferenceClient;
pub use codec::http_body_from_response;
pub use codec::infer_request_from_body;
pub use error::GrpcError;
pub use session::GrpcSession;
pub use session::GrpcSessionManager;
pub use session::SESSION_TIMEOUT;
