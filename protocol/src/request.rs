use crate::entity::AuthType;
use crate::entity::HybridPolicy;
use crate::entity::Location;
use crate::entity::ServiceProtocol;
use crate::entity::ServiceProvider;
use crate::http_content::HttpContent;

pub const DEFAULT_PRIORITY: u8 = 10;

/// An accepted client request, immutable once the scheduler takes it.
///
/// Middleware is the single sanctioned exception: it may normalize
/// `http.body` in place before conversion runs.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Dialect the client spoke.
    pub flavor: String,
    pub service: String,
    /// Explicit model name, if the client chose one.
    pub model: Option<String>,
    pub hybrid_policy: HybridPolicy,
    /// Whether the client asked for a streamed response.
    pub ask_stream_mode: bool,
    pub http: HttpContent,
    /// Present only for requests arriving over a WebSocket connection.
    pub ws_conn_id: Option<u64>,
    pub priority: u8,
}

impl ServiceRequest {
    pub fn new(flavor: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            flavor: flavor.into(),
            service: service.into(),
            model: None,
            hybrid_policy: HybridPolicy::Default,
            ask_stream_mode: false,
            http: HttpContent::default(),
            ws_conn_id: None,
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_http(mut self, http: HttpContent) -> Self {
        self.http = http;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Where a task was dispatched. Written once by the scheduler's dispatch
/// step, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    pub location: Location,
    pub model: String,
    /// Dialect the chosen provider speaks.
    pub to_flavor: String,
    pub protocol: ServiceProtocol,
    /// Streaming after capability downgrade was applied.
    pub stream: bool,
    pub provider: ServiceProvider,
}

impl ServiceTarget {
    pub fn auth_type(&self) -> AuthType {
        self.provider.auth_type
    }
}
