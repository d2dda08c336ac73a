use std::fmt;
use std::time::Duration;

use retouch_contracts::progress::ProgressCurve;

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Engine and timing settings, resolved from the environment. CLI flags
/// override individual fields afterwards.
#[derive(Clone)]
pub struct EngineConfig {
    pub engine: String,
    pub model: Option<String>,
    pub gemini_api_base: String,
    pub gemini_api_key: Option<String>,
    pub openai_api_base: String,
    pub openai_api_key: Option<String>,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub request_timeout: Duration,
    pub dryrun_delay: Duration,
    pub progress_tick: Duration,
    pub progress_curve: ProgressCurve,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let api_base = |key: &str, default: &str| {
            non_empty(key)
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let gemini_api_key = non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY"));
        let openai_api_key =
            non_empty("OPENAI_API_KEY").or_else(|| non_empty("OPENAI_API_KEY_BACKUP"));
        let engine = non_empty("RETOUCH_ENGINE")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| {
                if gemini_api_key.is_some() {
                    "gemini".to_string()
                } else {
                    "dryrun".to_string()
                }
            });

        let defaults = ProgressCurve::default();
        Self {
            engine,
            model: non_empty("RETOUCH_MODEL"),
            gemini_api_base: api_base("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
            gemini_api_key,
            openai_api_base: api_base("OPENAI_API_BASE", DEFAULT_OPENAI_API_BASE),
            openai_api_key,
            remote_url: non_empty("RETOUCH_ENGINE_URL"),
            remote_token: non_empty("RETOUCH_ENGINE_TOKEN"),
            request_timeout: Duration::from_secs_f64(value_as_f64(
                non_empty("RETOUCH_REQUEST_TIMEOUT").as_deref(),
                90.0,
                15.0,
                300.0,
            )),
            dryrun_delay: Duration::from_millis(
                value_as_f64(non_empty("RETOUCH_DRYRUN_DELAY_MS").as_deref(), 0.0, 0.0, 60_000.0)
                    as u64,
            ),
            progress_tick: Duration::from_millis(
                value_as_f64(non_empty("RETOUCH_PROGRESS_TICK_MS").as_deref(), 100.0, 10.0, 5_000.0)
                    as u64,
            ),
            progress_curve: ProgressCurve::new(
                value_as_f64(
                    non_empty("RETOUCH_PROGRESS_DECAY").as_deref(),
                    defaults.decay,
                    0.001,
                    1.0,
                ),
                defaults.ceiling,
                defaults.epsilon,
            ),
        }
    }

    pub fn with_engine(mut self, engine: Option<String>) -> Self {
        if let Some(engine) = engine.map(|value| value.trim().to_ascii_lowercase()) {
            if !engine.is_empty() {
                self.engine = engine;
            }
        }
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model.map(|value| value.trim().to_string()) {
            if !model.is_empty() {
                self.model = Some(model);
            }
        }
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("EngineConfig")
            .field("engine", &self.engine)
            .field("model", &self.model)
            .field("gemini_api_base", &self.gemini_api_base)
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("openai_api_base", &self.openai_api_base)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("remote_url", &self.remote_url)
            .field("remote_token", &redact(&self.remote_token))
            .field("request_timeout", &self.request_timeout)
            .field("dryrun_delay", &self.dryrun_delay)
            .field("progress_tick", &self.progress_tick)
            .field("progress_curve", &self.progress_curve)
            .finish()
    }
}

fn value_as_f64(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
