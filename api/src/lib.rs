//! Flavor handling for the gateway: the converter pipeline, the per-flavor
//! registry with its six conversion chains per service, stream-mode
//! detection and chunk framing, and the provider authenticators.

pub mod auth;
pub mod convert;
pub mod flavor;
pub mod stream;

pub use auth::AuthError;
pub use auth::apply_auth;
pub use convert::ConvertContext;
pub use convert::ConvertError;
pub use convert::ConvertOutcome;
pub use convert::Pipeline;
pub use convert::StepConfig;
pub use flavor::Direction;
pub use flavor::Endpoint;
pub use flavor::FlavorConfig;
pub use flavor::FlavorError;
pub use flavor::FlavorRegistry;
pub use flavor::RegistrySnapshot;
pub use flavor::ServiceEntry;
pub use stream::StreamMode;
pub use stream::chunk_stream;
pub use stream::detect_stream_mode;
pub use stream::wrap_chunk;
pub use stream::wrap_line;
