//! Shared data model for the AOG gateway.
//!
//! Everything that crosses a crate boundary lives here: the HTTP content
//! wrapper, service requests and dispatch targets, task results, entity
//! records with their store contract, the model-engine adapter contract,
//! and the WebSocket event envelopes.

pub mod engine;
pub mod entity;
pub mod http_content;
pub mod request;
pub mod result;
pub mod store;
pub mod ws;

pub use engine::EngineAdapter;
pub use entity::Model;
pub use entity::Service;
pub use entity::ServiceProvider;
pub use http_content::HttpContent;
pub use request::ServiceRequest;
pub use request::ServiceTarget;
pub use result::TaskResult;
pub use store::EntityStore;
pub use store::MemStore;
pub use store::StoreError;

/// The gateway's route namespace, fixed at build time.
pub const APP_NAME: &str = "aog";
pub const API_VERSION: &str = "v0.2";

/// Name of the canonical intermediate dialect all conversions pass through.
pub const CANONICAL_FLAVOR: &str = "aog";
