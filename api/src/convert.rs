//! The converter pipeline: an ordered chain of content transforms applied
//! to an HTTP payload. Pipelines are pure over their inputs and perform no
//! I/O; streaming, authentication and transport live elsewhere.

use aog_protocol::HttpContent;
use bytes::Bytes;
use http::HeaderName;
use http::HeaderValue;
use minijinja::Environment;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("body is not valid JSON: {0}")]
    Json(String),
    #[error("expression failed: {0}")]
    Expr(String),
    #[error("invalid header in converter config: {0}")]
    Header(String),
}

/// Result of running a pipeline: either the rewritten content, or the
/// drop sentinel raised by a `drop_if` step. Drops are silently skipped in
/// streams and treated as an empty result otherwise.
#[derive(Debug)]
pub enum ConvertOutcome {
    Content(HttpContent),
    Drop,
}

impl ConvertOutcome {
    pub fn into_content(self) -> Option<HttpContent> {
        match self {
            ConvertOutcome::Content(content) => Some(content),
            ConvertOutcome::Drop => None,
        }
    }
}

/// Well-known values the caller exposes to expression steps under `ctx`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConvertContext {
    values: HashMap<String, serde_json::Value>,
}

impl ConvertContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    fn as_minijinja(&self) -> minijinja::Value {
        minijinja::Value::from_serialize(&self.values)
    }
}

/// One step as it appears in a flavor definition file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConfig {
    /// Evaluate an expression against `{body, ctx}` and replace the body
    /// with the JSON serialization of the result.
    Expr(String),
    /// Set and/or remove named headers.
    Header {
        #[serde(default)]
        set: BTreeMap<String, String>,
        #[serde(default)]
        remove: Vec<String>,
    },
    /// Signal the drop sentinel when the (optionally trimmed) body equals
    /// the given literal.
    DropIf {
        body: String,
        #[serde(default)]
        trim: bool,
    },
}

#[derive(Deserialize)]
struct HeaderStepConfig {
    #[serde(default)]
    set: BTreeMap<String, String>,
    #[serde(default)]
    remove: Vec<String>,
}

#[derive(Deserialize)]
struct DropIfStepConfig {
    body: String,
    #[serde(default)]
    trim: bool,
}

// serde_yaml's externally-tagged enum support breaks on struct variants
// nested inside a sequence (it asks for a `!Tag` node instead of accepting
// the `{tag: {..}}` mapping form), so `StepConfig` is deserialized by hand
// rather than via derive.
impl<'de> Deserialize<'de> for StepConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct StepConfigVisitor;

        impl<'de> serde::de::Visitor<'de> for StepConfigVisitor {
            type Value = StepConfig;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "a step config map with one of: expr, header, drop_if")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let key: String = map
                    .next_key()?
                    .ok_or_else(|| serde::de::Error::custom("expected a step tag"))?;
                match key.as_str() {
                    "expr" => Ok(StepConfig::Expr(map.next_value()?)),
                    "header" => {
                        let config: HeaderStepConfig = map.next_value()?;
                        Ok(StepConfig::Header {
                            set: config.set,
                            remove: config.remove,
                        })
                    }
                    "drop_if" => {
                        let config: DropIfStepConfig = map.next_value()?;
                        Ok(StepConfig::DropIf {
                            body: config.body,
                            trim: config.trim,
                        })
                    }
                    other => Err(serde::de::Error::unknown_variant(
                        other,
                        &["expr", "header", "drop_if"],
                    )),
                }
            }
        }

        deserializer.deserialize_map(StepConfigVisitor)
    }
}

#[derive(Debug)]
enum Step {
    Expr {
        source: String,
    },
    Header {
        set: Vec<(HeaderName, HeaderValue)>,
        remove: Vec<HeaderName>,
    },
    DropIf {
        body: String,
        trim: bool,
    },
}

static EXPR_ENV: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.add_filter("pascal_keys", pascal_keys);
    env.add_filter("snake_keys", snake_keys);
    env
});

fn map_keys(value: minijinja::Value, recase: fn(&str) -> String) -> minijinja::Value {
    let json: serde_json::Value = match serde_json::to_value(&value) {
        Ok(json) => json,
        Err(_) => return value,
    };
    minijinja::Value::from_serialize(map_json_keys(json, recase))
}

fn map_json_keys(value: serde_json::Value, recase: fn(&str) -> String) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (recase(&k), map_json_keys(v, recase)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|v| map_json_keys(v, recase))
                .collect(),
        ),
        other => other,
    }
}

fn to_pascal(key: &str) -> String {
    key.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => format!("{}{}", first.to_ascii_uppercase(), chars.as_str()),
                None => String::new(),
            }
        })
        .collect()
}

fn to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Recursively rewrite every object key to PascalCase. Used by flavors
/// whose wire format title-cases field names.
fn pascal_keys(value: minijinja::Value) -> minijinja::Value {
    map_keys(value, to_pascal)
}

fn snake_keys(value: minijinja::Value) -> minijinja::Value {
    map_keys(value, to_snake)
}

/// An ordered chain of converter steps, applied left to right.
#[derive(Debug)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn from_config(configs: &[StepConfig]) -> Result<Self, ConvertError> {
        let mut steps = Vec::with_capacity(configs.len());
        for config in configs {
            steps.push(Step::compile(config)?);
        }
        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn apply(
        &self,
        mut content: HttpContent,
        ctx: &ConvertContext,
    ) -> Result<ConvertOutcome, ConvertError> {
        for step in &self.steps {
            match step.apply(&mut content, ctx)? {
                StepOutcome::Continue => {}
                StepOutcome::Drop => return Ok(ConvertOutcome::Drop),
            }
        }
        Ok(ConvertOutcome::Content(content))
    }
}

enum StepOutcome {
    Continue,
    Drop,
}

impl Step {
    fn compile(config: &StepConfig) -> Result<Self, ConvertError> {
        match config {
            StepConfig::Expr(source) => {
                // Compile once up front so malformed definitions fail at
                // registry build time, not per request.
                EXPR_ENV
                    .compile_expression(source)
                    .map_err(|err| ConvertError::Expr(err.to_string()))?;
                Ok(Step::Expr {
                    source: source.clone(),
                })
            }
            StepConfig::Header { set, remove } => {
                let mut compiled_set = Vec::with_capacity(set.len());
                for (name, value) in set {
                    let name: HeaderName = name
                        .parse()
                        .map_err(|_| ConvertError::Header(name.clone()))?;
                    let value: HeaderValue = value
                        .parse()
                        .map_err(|_| ConvertError::Header(value.clone()))?;
                    compiled_set.push((name, value));
                }
                let mut compiled_remove = Vec::with_capacity(remove.len());
                for name in remove {
                    compiled_remove.push(
                        name.parse()
                            .map_err(|_| ConvertError::Header(name.clone()))?,
                    );
                }
                Ok(Step::Header {
                    set: compiled_set,
                    remove: compiled_remove,
                })
            }
            StepConfig::DropIf { body, trim } => Ok(Step::DropIf {
                body: body.clone(),
                trim: *trim,
            }),
        }
    }

    fn apply(
        &self,
        content: &mut HttpContent,
        ctx: &ConvertContext,
    ) -> Result<StepOutcome, ConvertError> {
        match self {
            Step::Expr { source } => {
                let body: serde_json::Value = serde_json::from_slice(&content.body)
                    .map_err(|err| ConvertError::Json(err.to_string()))?;
                let expr = EXPR_ENV
                    .compile_expression(source)
                    .map_err(|err| ConvertError::Expr(err.to_string()))?;
                let scope = minijinja::context! {
                    body => minijinja::Value::from_serialize(&body),
                    ctx => ctx.as_minijinja(),
                };
                let result = expr
                    .eval(scope)
                    .map_err(|err| ConvertError::Expr(err.to_string()))?;
                let json: serde_json::Value = serde_json::to_value(&result)
                    .map_err(|err| ConvertError::Expr(err.to_string()))?;
                content.replace_body(Bytes::from(json.to_string()));
                Ok(StepOutcome::Continue)
            }
            Step::Header { set, remove } => {
                for (name, value) in set {
                    content.header.insert(name.clone(), value.clone());
                }
                for name in remove {
                    content.header.remove(name);
                }
                Ok(StepOutcome::Continue)
            }
            Step::DropIf { body, trim } => {
                let actual = if *trim {
                    String::from_utf8_lossy(&content.body).trim().to_string()
                } else {
                    String::from_utf8_lossy(&content.body).to_string()
                };
                if actual == *body {
                    Ok(StepOutcome::Drop)
                } else {
                    Ok(StepOutcome::Continue)
                }
            }
        }
    }
}
