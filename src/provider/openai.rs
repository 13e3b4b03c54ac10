//! OpenAI-compatible chat-completions VLM providers.

use std::time::Duration;

use serde_json::json;

use crate::error::VlmError;
use crate::provider::{parse_output, ModelProvider, VideoIngestorOutput};

const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAiProvider {
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

    pub fn gpt_4_1_nano(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "gpt-4.1-nano")
    }

    pub fn gpt_4o_mini(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "gpt-4o-mini")
    }
}

impl ModelProvider for OpenAiProvider {
    fn generate(&self, image_jpeg_b64: &str, prompt: &str) -> Result<VideoIngestorOutput, VlmError> {
        if self.api_key.is_empty() {
            return Err(VlmError::Config("OPENAI_API_KEY not set".into()));
        }

        let body = json!({
            "model": self.model_id,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": format!("data:image/jpeg;base64,{image_jpeg_b64}")}},
                    {"type": "text", "text": prompt},
                ]
            }],
            "response_format": {"type": "json_object"},
        });

        let resp = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(VlmError::RateLimit("OpenAI returned 429".into()));
        }
        if !resp.status().is_success() {
            return Err(VlmError::Transport(format!("OpenAI HTTP {}", resp.status())));
        }

        let value: serde_json::Value = resp.json().map_err(|e| VlmError::Parse(e.to_string()))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(VlmError::Empty)?;

        parse_output(content)
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}
