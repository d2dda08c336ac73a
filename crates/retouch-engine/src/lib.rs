use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use retouch_contracts::codec::{normalize, CanonicalImage, ImageResource};
use retouch_contracts::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod config;
mod controller;
mod dryrun;
mod gemini;
mod openai;
mod progress;
mod remote;

pub use config::EngineConfig;
pub use controller::{Accepted, ControllerOptions, Outcome, SessionController, SessionEvent};
pub use dryrun::DryrunEngine;
pub use gemini::GeminiEngine;
pub use openai::OpenAiEngine;
pub use progress::ProgressTicker;
pub use remote::RemoteEngine;

const ERROR_MESSAGE_MAX_CHARS: usize = 512;

/// Input for one engine call: a canonical image and the instruction to apply.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub image: CanonicalImage,
    pub instruction: String,
}

impl TransformRequest {
    pub fn wire(&self) -> WireRequest<'_> {
        WireRequest {
            image_data_uri: self.image.data_uri(),
            instruction: &self.instruction,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformResponse {
    pub image: CanonicalImage,
    pub warnings: Vec<String>,
}

/// `{imageDataUri, instruction}` as sent to a generic remote engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest<'a> {
    pub image_data_uri: &'a str,
    pub instruction: &'a str,
}

/// `{imageDataUri}` on success, `{error}` or `{message}` on failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    #[serde(default)]
    pub image_data_uri: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Opaque image-to-image capability. Calls block the calling thread; the
/// session controller runs them on worker threads. Implementations never
/// retry.
pub trait TransformEngine: Send + Sync {
    fn name(&self) -> &str;
    fn transform(&self, request: &TransformRequest) -> Result<TransformResponse>;
}

#[derive(Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn TransformEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: TransformEngine + 'static>(&mut self, engine: E) {
        self.engines
            .insert(engine.name().to_string(), Arc::new(engine));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TransformEngine>> {
        self.engines.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }
}

pub fn default_engine_registry(config: &EngineConfig) -> EngineRegistry {
    let mut engines = EngineRegistry::new();
    engines.register(DryrunEngine::new(config.dryrun_delay));
    engines.register(GeminiEngine::new(config));
    engines.register(OpenAiEngine::new(config));
    if let Some(remote) = RemoteEngine::from_config(config) {
        engines.register(remote);
    }
    engines
}

/// Resolves the configured engine, listing the known names on a miss.
pub fn resolve_engine(config: &EngineConfig) -> Result<Arc<dyn TransformEngine>> {
    let registry = default_engine_registry(config);
    match registry.get(&config.engine) {
        Some(engine) => Ok(engine),
        None => bail!(
            "unknown engine '{}' (available: {})",
            config.engine,
            registry.names().join(", ")
        ),
    }
}

/// Runs one engine call and flattens any failure into the single message
/// that crosses the engine boundary.
pub fn run_engine(
    engine: &dyn TransformEngine,
    request: &TransformRequest,
) -> Result<TransformResponse, EngineError> {
    engine
        .transform(request)
        .map_err(|err| EngineError::new(error_chain_text(&err, ERROR_MESSAGE_MAX_CHARS)))
}

pub(crate) fn canonical_from_bytes(
    provider: &str,
    bytes: Vec<u8>,
    mime: Option<&str>,
) -> Result<CanonicalImage> {
    let declared = mime.filter(|value| retouch_contracts::codec::is_supported_mime(value));
    normalize(&ImageResource::from_bytes(bytes, declared))
        .with_context(|| format!("{provider} returned an unreadable image"))
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&provider_error_text(&body), 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Pulls `error.message` out of a JSON error body, else returns the body.
fn provider_error_text(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|parsed| {
            parsed
                .get("error")
                .and_then(|error| error.get("message").or(Some(error)))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
