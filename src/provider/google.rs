//! Google Gemini VLM providers.
//!
//! Of the two divergent Google provider implementations observed in the
//! original source, this crate follows the one that returns a validated
//! structured object rather than a loosely-typed dict (see DESIGN.md).

use std::time::Duration;

use serde_json::json;

use crate::error::VlmError;
use crate::provider::{parse_output, ModelProvider, VideoIngestorOutput};

const ENDPOINT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GeminiProvider {
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

    pub fn flash(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "gemini-2.5-flash")
    }

    pub fn flash_lite(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "gemini-2.5-flash-lite")
    }
}

impl ModelProvider for GeminiProvider {
    fn generate(&self, image_jpeg_b64: &str, prompt: &str) -> Result<VideoIngestorOutput, VlmError> {
        if self.api_key.is_empty() {
            return Err(VlmError::Config("GOOGLE_API_KEY not set".into()));
        }

        let url = format!(
            "{ENDPOINT_BASE}/{model}:generateContent?key={key}",
            model = self.model_id,
            key = self.api_key
        );

        let body = json!({
            "contents": [{
                "parts": [
                    {"inline_data": {"mime_type": "image/jpeg", "data": image_jpeg_b64}},
                    {"text": prompt},
                ]
            }],
            "generationConfig": {"responseMimeType": "application/json"}
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(VlmError::RateLimit("Gemini returned 429".into()));
        }
        if !resp.status().is_success() {
            return Err(VlmError::Transport(format!("Gemini HTTP {}", resp.status())));
        }

        let value: serde_json::Value = resp.json().map_err(|e| VlmError::Parse(e.to_string()))?;
        let text = value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or(VlmError::Empty)?;

        parse_output(text)
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}
