use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::EngineConfig;
use crate::{
    canonical_from_bytes, response_json_or_error, truncate_text, TransformEngine,
    TransformRequest, TransformResponse,
};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image";

/// Google Generative Language `generateContent` with the image inline.
pub struct GeminiEngine {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

struct InlineImage {
    bytes: Vec<u8>,
    mime_type: Option<String>,
}

impl GeminiEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            api_key: config.gemini_api_key.clone(),
            model: config
                .model
                .clone()
                .filter(|_| config.engine == "gemini")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &TransformRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.image.mime(),
                            "data": request.image.payload(),
                        }
                    },
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }

    /// First inline image in the response, or an error explaining why there
    /// is none (block reason, finish reason, or the model's text reply).
    fn extract_image(response_payload: &Value) -> Result<InlineImage> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut text_parts = Vec::new();
        let mut finish_reason = None;

        for candidate in &candidates {
            if finish_reason.is_none() {
                finish_reason = candidate
                    .get("finishReason")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !text.trim().is_empty() {
                        text_parts.push(text.trim().to_string());
                    }
                    continue;
                }
                let inline = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(InlineImage { bytes, mime_type });
            }
        }

        if let Some(reason) = response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            bail!("Gemini blocked the request ({reason})");
        }
        if !text_parts.is_empty() {
            bail!(
                "Gemini returned no image: {}",
                truncate_text(&text_parts.join(" "), 400)
            );
        }
        match finish_reason {
            Some(reason) => bail!("Gemini returned no image (finish reason {reason})"),
            None => bail!("Gemini returned no image"),
        }
    }
}

impl TransformEngine for GeminiEngine {
    fn name(&self) -> &str {
        "gemini"
    }

    fn transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint();
        debug!(model = %self.model, "calling Gemini generateContent");
        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(&Self::build_payload(request))
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini", response)?;
        let inline = Self::extract_image(&payload)?;
        Ok(TransformResponse {
            image: canonical_from_bytes("Gemini", inline.bytes, inline.mime_type.as_deref())?,
            warnings: Vec::new(),
        })
    }
}
