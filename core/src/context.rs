//! The process-wide gateway context. One instance is built at boot and
//! passed explicitly to the scheduler, handlers and bridge; nothing here
//! is ambient.

use crate::error::TaskError;
use crate::model_gate::ModelGates;
use crate::ws_state::WsSessionStore;
use aog_api::FlavorRegistry;
use aog_client::HttpTransport;
use aog_client::RetryPolicy;
use aog_grpc::GrpcSessionManager;
use aog_protocol::EngineAdapter;
use aog_protocol::EntityStore;
use aog_protocol::Service;
use aog_protocol::ServiceRequest;
use aog_protocol::ServiceTarget;
use aog_protocol::entity::Location;
use aog_protocol::ws::WsTaskKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Hook deciding where a `hybrid_policy = default` request runs. The
/// default picker always answers local; a pressure-aware picker can be
/// installed without touching dispatch.
pub type LocationPicker = Arc<dyn Fn(&ServiceRequest, &Service) -> Location + Send + Sync>;

/// Server-side half of the WebSocket bridge, called by the runner when a
/// streaming-gRPC task reaches its invocation stage.
#[async_trait]
pub trait StreamBridge: Send + Sync {
    async fn dispatch_ws(
        &self,
        task_id: u64,
        request: &ServiceRequest,
        target: &ServiceTarget,
        kind: WsTaskKind,
    ) -> Result<(), TaskError>;
}

pub struct GatewayContext {
    pub store: Arc<dyn EntityStore>,
    pub registry: Arc<FlavorRegistry>,
    pub transport: Arc<dyn HttpTransport>,
    pub grpc_sessions: Arc<GrpcSessionManager>,
    pub ws_sessions: Arc<WsSessionStore>,
    pub model_gates: ModelGates,
    pub engine: Option<Arc<dyn EngineAdapter>>,
    bridge: std::sync::OnceLock<Arc<dyn StreamBridge>>,
    pub location_picker: LocationPicker,
    pub retry: RetryPolicy,
    /// Root for gateway-owned persistent files.
    pub data_dir: std::path::PathBuf,
    /// Directory used for media downloaded on behalf of local providers.
    pub cache_dir: std::path::PathBuf,
}

impl GatewayContext {
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: Arc<FlavorRegistry>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let data_dir = std::env::var_os("AOG_DATA_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let cache_dir = std::env::var_os("AOG_CACHE_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            store,
            registry,
            transport,
            grpc_sessions: Arc::new(GrpcSessionManager::new()),
            ws_sessions: Arc::new(WsSessionStore::new()),
            model_gates: ModelGates::new(),
            engine: None,
            bridge: std::sync::OnceLock::new(),
            location_picker: Arc::new(|_request, _service| Location::Local),
            retry: RetryPolicy::default(),
            data_dir,
            cache_dir,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn EngineAdapter>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_location_picker(mut self, picker: LocationPicker) -> Self {
        self.location_picker = picker;
        self
    }

    /// Install the WebSocket bridge once the server layer exists. Done
    /// late because the bridge needs the scheduler, which needs this
    /// context. Set-once; later calls are ignored.
    pub fn set_bridge(&self, bridge: Arc<dyn StreamBridge>) {
        let _ = self.bridge.set(bridge);
    }

    pub fn bridge(&self) -> Option<Arc<dyn StreamBridge>> {
        self.bridge.get().cloned()
    }
}
