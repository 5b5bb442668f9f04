use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use strum_macros::Display;

/// Where a request ends up running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Location {
    Local,
    Remote,
}

impl Default for Location {
    fn default() -> Self {
        Location::Local
    }
}

/// Client preference for where a service request should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HybridPolicy {
    /// Resolved by the gateway; currently always local. The scheduler
    /// exposes a hook for pressure-based switching.
    #[default]
    Default,
    AlwaysLocal,
    AlwaysRemote,
}

/// Upstream protocol a service definition declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ServiceProtocol {
    #[default]
    #[serde(rename = "HTTP")]
    #[strum(serialize = "HTTP")]
    Http,
    #[serde(rename = "GRPC")]
    #[strum(serialize = "GRPC")]
    Grpc,
    #[serde(rename = "GRPC_STREAM")]
    #[strum(serialize = "GRPC_STREAM")]
    GrpcStream,
    #[serde(rename = "WEBSOCKET")]
    #[strum(serialize = "WEBSOCKET")]
    Websocket,
}

/// How the invoker authenticates against a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Apikey,
    Token,
    Sign,
}

impl AuthType {
    pub fn requires_credentials(self) -> bool {
        !matches!(self, AuthType::None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Ready,
    /// At least one health check succeeded since the last configuration
    /// change.
    Available,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Downloading,
    Downloaded,
    Failed,
}

/// Free-form provider capabilities, stored alongside the provider row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderProperties {
    #[serde(default)]
    pub max_input_tokens: Option<i64>,
    /// Response modes the provider supports; an empty list means
    /// "unknown, assume everything".
    #[serde(default)]
    pub supported_response_mode: Vec<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderProperties {
    /// Whether a streaming response may be requested from this provider.
    /// An explicit mode list that omits `stream` forces a downgrade.
    pub fn supports_stream(&self) -> bool {
        self.supported_response_mode.is_empty()
            || self.supported_response_mode.iter().any(|m| m == "stream")
    }
}

/// A backend instance (local engine or remote endpoint) implementing a
/// service under one flavor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceProvider {
    pub provider_name: String,
    pub flavor: String,
    pub service_name: String,
    pub service_source: Location,
    pub method: String,
    pub url: String,
    pub auth_type: AuthType,
    /// Raw credential blob; shape depends on `auth_type`.
    #[serde(default)]
    pub auth_key: String,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// JSON object merged into upstream request bodies.
    #[serde(default)]
    pub extra_json_body: serde_json::Value,
    #[serde(default)]
    pub properties: ProviderProperties,
    #[serde(default)]
    pub status: ProviderStatus,
}

/// A named AI capability and its configured providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub hybrid_policy: HybridPolicy,
    #[serde(default)]
    pub local_provider: String,
    #[serde(default)]
    pub remote_provider: String,
    #[serde(default)]
    pub status: ProviderStatus,
}

impl Service {
    pub fn provider_for(&self, location: Location) -> Option<&str> {
        let name = match location {
            Location::Local => self.local_provider.as_str(),
            Location::Remote => self.remote_provider.as_str(),
        };
        if name.is_empty() { None } else { Some(name) }
    }
}

/// A model known to the gateway. Dispatch refuses anything that is not
/// `Downloaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub model_name: String,
    pub provider_name: String,
    pub service_name: String,
    pub service_source: Location,
    #[serde(default)]
    pub status: ModelStatus,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Downloaded
    }
}
