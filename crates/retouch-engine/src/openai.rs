use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::debug;

use crate::config::EngineConfig;
use crate::{
    canonical_from_bytes, response_json_or_error, TransformEngine, TransformRequest,
    TransformResponse,
};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-image-1";

/// OpenAI `images/edits` with the source image as a multipart upload.
pub struct OpenAiEngine {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

enum EditedImage {
    Inline(Vec<u8>),
    Url(String),
}

impl OpenAiEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.openai_api_base.clone(),
            api_key: config.openai_api_key.clone(),
            model: config
                .model
                .clone()
                .filter(|_| config.engine == "openai")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn build_form(&self, request: &TransformRequest) -> Result<MultipartForm> {
        let bytes = request.image.bytes()?;
        let mime = request.image.mime();
        let part = MultipartPart::bytes(bytes)
            .file_name(format!("source.{}", request.image.extension()))
            .mime_str(mime)
            .with_context(|| format!("invalid mime '{mime}' for source image"))?;
        Ok(MultipartForm::new()
            .text("model", self.model.clone())
            .text("prompt", request.instruction.clone())
            .text("n", "1")
            .part("image", part))
    }

    fn extract_image(response_payload: &Value) -> Result<EditedImage> {
        let Some(item) = response_payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
        else {
            bail!("OpenAI response returned no images");
        };
        if let Some(b64) = item.get("b64_json").and_then(Value::as_str) {
            let bytes = BASE64
                .decode(b64.as_bytes())
                .context("OpenAI image base64 decode failed")?;
            return Ok(EditedImage::Inline(bytes));
        }
        if let Some(url) = item.get("url").and_then(Value::as_str) {
            return Ok(EditedImage::Url(url.to_string()));
        }
        bail!("OpenAI response item carried neither b64_json nor url")
    }

    fn download_image(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .with_context(|| format!("failed downloading edited image ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("edited image download failed ({})", status.as_u16());
        }
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());
        let bytes = response
            .bytes()
            .context("edited image body read failed")?
            .to_vec();
        Ok((bytes, mime_type))
    }
}

impl TransformEngine for OpenAiEngine {
    fn name(&self) -> &str {
        "openai"
    }

    fn transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("OPENAI_API_KEY (or OPENAI_API_KEY_BACKUP) not set");
        };
        let endpoint = format!("{}/images/edits", self.api_base);
        debug!(model = %self.model, "calling OpenAI images/edits");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .multipart(self.build_form(request)?)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let payload = response_json_or_error("OpenAI", response)?;
        let image = match Self::extract_image(&payload)? {
            EditedImage::Inline(bytes) => canonical_from_bytes("OpenAI", bytes, None)?,
            EditedImage::Url(url) => {
                let (bytes, mime) = self.download_image(&url)?;
                canonical_from_bytes("OpenAI", bytes, mime.as_deref())?
            }
        };
        Ok(TransformResponse {
            image,
            warnings: Vec::new(),
        })
    }
}
