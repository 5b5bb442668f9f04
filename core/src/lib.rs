//! The scheduler and task runtime: request dispatch, per-service
//! middleware, the provider invoker, and the runner pipeline that drives
//! every accepted request to exactly one terminal result.

pub mod context;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod invoke;
pub mod middleware;
pub mod model_gate;
pub mod runner;
pub mod schedule;
pub mod ws_state;

pub use context::GatewayContext;
pub use context::StreamBridge;
pub use error::TaskError;
pub use model_gate::ModelGates;
pub use schedule::Scheduler;
pub use ws_state::WsSessionState;
pub use ws_state::WsSessionStore;
