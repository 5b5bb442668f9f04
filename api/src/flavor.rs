//! The flavor registry: per-flavor service definitions, endpoint bindings,
//! and the six conversion chains that translate any dialect to any other
//! through the canonical intermediate.

use crate::convert::ConvertContext;
use crate::convert::ConvertError;
use crate::convert::ConvertOutcome;
use crate::convert::Pipeline;
use crate::convert::StepConfig;
use aog_protocol::CANONICAL_FLAVOR;
use aog_protocol::HttpContent;
use aog_protocol::entity::AuthType;
use aog_protocol::entity::ServiceProtocol;
use arc_swap::ArcSwap;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlavorError {
    #[error("unknown flavor: {0}")]
    UnknownFlavor(String),
    #[error("unknown service {service} for flavor {flavor}")]
    UnknownService { flavor: String, service: String },
    #[error("invalid endpoint {0:?}: expected \"METHOD /path\"")]
    InvalidEndpoint(String),
    #[error("invalid extra header {0:?}")]
    InvalidHeader(String),
    #[error("failed to parse flavor definition: {0}")]
    Parse(String),
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Direction of a conversion through the canonical dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    StreamResponse,
}

/// On-disk shape of one flavor definition document.
#[derive(Debug, Clone, Deserialize)]
pub struct FlavorConfig {
    pub name: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamFramingConfig {
    #[serde(default)]
    pub prologue: Vec<String>,
    #[serde(default)]
    pub epilogue: Vec<String>,
}

fn default_request_segments() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub protocol: ServiceProtocol,
    pub endpoints: Vec<String>,
    /// Install `METHOD path` directly, in addition to the prefixed routes.
    #[serde(default)]
    pub install_raw_routes: bool,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    /// Number of round trips a request takes: `> 1` means the provider
    /// answers with a task id that must be polled.
    #[serde(default = "default_request_segments")]
    pub request_segments: u32,
    /// Base URL polled as `{extra_url}/{task_id}` for async-task services.
    #[serde(default)]
    pub extra_url: Option<String>,
    #[serde(default)]
    pub stream: StreamFramingConfig,
    #[serde(default)]
    pub request_to_aog: Vec<StepConfig>,
    #[serde(default)]
    pub request_from_aog: Vec<StepConfig>,
    #[serde(default)]
    pub response_to_aog: Vec<StepConfig>,
    #[serde(default)]
    pub response_from_aog: Vec<StepConfig>,
    #[serde(default)]
    pub stream_response_to_aog: Vec<StepConfig>,
    #[serde(default)]
    pub stream_response_from_aog: Vec<StepConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
}

impl Endpoint {
    fn parse(spec: &str) -> Result<Self, FlavorError> {
        let mut parts = spec.split_whitespace();
        let (Some(method), Some(path), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(FlavorError::InvalidEndpoint(spec.to_string()));
        };
        if !path.starts_with('/') {
            return Err(FlavorError::InvalidEndpoint(spec.to_string()));
        }
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| FlavorError::InvalidEndpoint(spec.to_string()))?;
        Ok(Self {
            method,
            path: path.to_string(),
        })
    }
}

struct Chains {
    request_to: Pipeline,
    request_from: Pipeline,
    response_to: Pipeline,
    response_from: Pipeline,
    stream_to: Pipeline,
    stream_from: Pipeline,
}

impl Chains {
    fn to_canonical(&self, direction: Direction) -> &Pipeline {
        match direction {
            Direction::Request => &self.request_to,
            Direction::Response => &self.response_to,
            Direction::StreamResponse => &self.stream_to,
        }
    }

    fn from_canonical(&self, direction: Direction) -> &Pipeline {
        match direction {
            Direction::Request => &self.request_from,
            Direction::Response => &self.response_from,
            Direction::StreamResponse => &self.stream_from,
        }
    }
}

/// Built form of one `(flavor, service)` definition.
pub struct ServiceEntry {
    pub protocol: ServiceProtocol,
    pub endpoints: Vec<Endpoint>,
    pub install_raw_routes: bool,
    pub default_model: Option<String>,
    pub auth_type: AuthType,
    pub extra_headers: HeaderMap,
    pub request_segments: u32,
    pub extra_url: Option<String>,
    pub prologue: Vec<String>,
    pub epilogue: Vec<String>,
    chains: Chains,
}

impl ServiceEntry {
    fn build(config: &ServiceConfig) -> Result<Self, FlavorError> {
        let mut endpoints = Vec::with_capacity(config.endpoints.len());
        for spec in &config.endpoints {
            endpoints.push(Endpoint::parse(spec)?);
        }
        let mut extra_headers = HeaderMap::new();
        for (name, value) in &config.extra_headers {
            let name: HeaderName = name
                .parse()
                .map_err(|_| FlavorError::InvalidHeader(name.clone()))?;
            let value: HeaderValue = value
                .parse()
                .map_err(|_| FlavorError::InvalidHeader(value.clone()))?;
            extra_headers.insert(name, value);
        }
        Ok(Self {
            protocol: config.protocol,
            endpoints,
            install_raw_routes: config.install_raw_routes,
            default_model: config.default_model.clone(),
            auth_type: config.auth_type,
            extra_headers,
            request_segments: config.request_segments,
            extra_url: config.extra_url.clone(),
            prologue: config.stream.prologue.clone(),
            epilogue: config.stream.epilogue.clone(),
            chains: Chains {
                request_to: Pipeline::from_config(&config.request_to_aog)?,
                request_from: Pipeline::from_config(&config.request_from_aog)?,
                response_to: Pipeline::from_config(&config.response_to_aog)?,
                response_from: Pipeline::from_config(&config.response_from_aog)?,
                stream_to: Pipeline::from_config(&config.stream_response_to_aog)?,
                stream_from: Pipeline::from_config(&config.stream_response_from_aog)?,
            },
        })
    }
}

impl ServiceEntry {
    /// Build a single entry straight from its config, outside a registry.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, FlavorError> {
        Self::build(config)
    }
}

pub struct FlavorEntry {
    pub name: String,
    services: HashMap<String, ServiceEntry>,
}

impl FlavorEntry {
    pub fn service(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = (&String, &ServiceEntry)> {
        self.services.iter()
    }
}

pub struct RegistrySnapshot {
    flavors: HashMap<String, FlavorEntry>,
}

impl RegistrySnapshot {
    fn build(configs: Vec<FlavorConfig>) -> Result<Self, FlavorError> {
        let mut flavors = HashMap::new();
        for config in configs {
            let mut services = HashMap::new();
            for (service_name, service_config) in &config.services {
                services.insert(service_name.clone(), ServiceEntry::build(service_config)?);
            }
            flavors.insert(
                config.name.clone(),
                FlavorEntry {
                    name: config.name,
                    services,
                },
            );
        }
        Ok(Self { flavors })
    }

    pub fn flavor(&self, name: &str) -> Result<&FlavorEntry, FlavorError> {
        self.flavors
            .get(name)
            .ok_or_else(|| FlavorError::UnknownFlavor(name.to_string()))
    }

    pub fn flavors(&self) -> impl Iterator<Item = &FlavorEntry> {
        self.flavors.values()
    }

    pub fn service(&self, flavor: &str, service: &str) -> Result<&ServiceEntry, FlavorError> {
        self.flavor(flavor)?
            .service(service)
            .ok_or_else(|| FlavorError::UnknownService {
                flavor: flavor.to_string(),
                service: service.to_string(),
            })
    }

    /// Translate content between two dialects through the canonical one.
    ///
    /// Binary payloads bypass conversion entirely; identical dialects skip
    /// it. Whenever a chain runs, `Content-Length` is removed because the
    /// body size changes.
    pub fn convert(
        &self,
        from_flavor: &str,
        to_flavor: &str,
        service: &str,
        direction: Direction,
        content: HttpContent,
        ctx: &ConvertContext,
    ) -> Result<ConvertOutcome, FlavorError> {
        if content.is_binary() || from_flavor == to_flavor {
            return Ok(ConvertOutcome::Content(content));
        }

        let mut current = content;
        current.remove_content_length();

        if from_flavor != CANONICAL_FLAVOR {
            let chains = &self.service(from_flavor, service)?.chains;
            match chains.to_canonical(direction).apply(current, ctx)? {
                ConvertOutcome::Content(next) => current = next,
                ConvertOutcome::Drop => return Ok(ConvertOutcome::Drop),
            }
        }
        if to_flavor != CANONICAL_FLAVOR {
            let chains = &self.service(to_flavor, service)?.chains;
            match chains.from_canonical(direction).apply(current, ctx)? {
                ConvertOutcome::Content(next) => current = next,
                ConvertOutcome::Drop => return Ok(ConvertOutcome::Drop),
            }
        }
        Ok(ConvertOutcome::Content(current))
    }
}

/// Embedded flavor definitions, one YAML document per flavor.
const EMBEDDED_FLAVORS: &[&str] = &[
    include_str!("defs/aog.yaml"),
    include_str!("defs/openai.yaml"),
    include_str!("defs/ollama.yaml"),
    include_str!("defs/aliyun.yaml"),
    include_str!("defs/tencent.yaml"),
];

/// Registry handle. Reloads replace the inner snapshot atomically, so
/// routes and schedulers holding the outer handle keep working across a
/// reload.
pub struct FlavorRegistry {
    inner: ArcSwap<RegistrySnapshot>,
}

impl FlavorRegistry {
    pub fn from_configs(configs: Vec<FlavorConfig>) -> Result<Self, FlavorError> {
        Ok(Self {
            inner: ArcSwap::from_pointee(RegistrySnapshot::build(configs)?),
        })
    }

    /// Build from the definitions embedded at compile time.
    pub fn from_embedded() -> Result<Self, FlavorError> {
        Self::from_configs(parse_embedded()?)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.load_full()
    }

    /// Replace all pipelines atomically. In-flight conversions finish on
    /// the snapshot they started with.
    pub fn reload(&self, configs: Vec<FlavorConfig>) -> Result<(), FlavorError> {
        self.inner.store(Arc::new(RegistrySnapshot::build(configs)?));
        Ok(())
    }
}

fn parse_embedded() -> Result<Vec<FlavorConfig>, FlavorError> {
    EMBEDDED_FLAVORS
        .iter()
        .map(|doc| serde_yaml::from_str(doc).map_err(|err| FlavorError::Parse(err.to_string())))
        .collect()
}
