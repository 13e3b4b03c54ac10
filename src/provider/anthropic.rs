//! Anthropic Claude VLM provider (messages API, vision content blocks).

use std::time::Duration;

use serde_json::json;

use crate::error::VlmError;
use crate::provider::{parse_output, ModelProvider, VideoIngestorOutput};

const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: model_id.into(),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("reqwest client builds"),
        }
    }
}

impl ModelProvider for AnthropicProvider {
    fn generate(&self, image_jpeg_b64: &str, prompt: &str) -> Result<VideoIngestorOutput, VlmError> {
        if self.api_key.is_empty() {
            return Err(VlmError::Config("ANTHROPIC_API_KEY not set".into()));
        }

        let body = json!({
            "model": self.model_id,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": image_jpeg_b64}},
                    {"type": "text", "text": prompt},
                ]
            }],
        });

        let resp = self
            .client
            .post(ENDPOINT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(VlmError::RateLimit("Anthropic returned 429".into()));
        }
        if !resp.status().is_success() {
            return Err(VlmError::Transport(format!("Anthropic HTTP {}", resp.status())));
        }

        let value: serde_json::Value = resp.json().map_err(|e| VlmError::Parse(e.to_string()))?;
        let text = value["content"][0]["text"].as_str().ok_or(VlmError::Empty)?;

        parse_output(text)
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}
