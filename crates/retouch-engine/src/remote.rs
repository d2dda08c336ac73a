use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use retouch_contracts::codec::CanonicalImage;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::{
    response_json_or_error, TransformEngine, TransformRequest, TransformResponse, WireResponse,
};

/// Any service speaking the plain `{imageDataUri, instruction}` contract.
pub struct RemoteEngine {
    url: String,
    token: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl RemoteEngine {
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        let url = config.remote_url.clone()?;
        Some(Self {
            url,
            token: config.remote_token.clone(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        })
    }

    fn parse_response(payload: Value) -> Result<CanonicalImage> {
        let response: WireResponse =
            serde_json::from_value(payload).context("remote engine response has wrong shape")?;
        if let Some(uri) = response.image_data_uri.filter(|uri| !uri.trim().is_empty()) {
            return CanonicalImage::from_data_uri(&uri)
                .context("remote engine returned an unreadable image");
        }
        let message = response
            .error
            .and_then(|error| match error {
                Value::String(text) => Some(text),
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .or(response.message);
        match message {
            Some(message) => bail!("remote engine failed: {message}"),
            None => bail!("remote engine returned no image"),
        }
    }
}

impl TransformEngine for RemoteEngine {
    fn name(&self) -> &str {
        "remote"
    }

    fn transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        let mut builder = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&request.wire());
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .with_context(|| format!("remote engine request failed ({})", self.url))?;
        let payload = response_json_or_error("remote engine", response)?;
        Ok(TransformResponse {
            image: Self::parse_response(payload)?,
            warnings: Vec::new(),
        })
    }
}
