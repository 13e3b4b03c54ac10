//! OpenRouter VLM providers, sharing a rate limiter across all instances
//! of the provider class (§4.1, §5, §9: dependency-injected by
//! `provider::factory::ProviderFactory` rather than a process-wide
//! singleton).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::error::VlmError;
use crate::provider::{parse_output, ModelProvider, VideoIngestorOutput};

const ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Simple requests-per-minute limiter. Blocks the calling (worker) thread
/// until enough time has passed since the previous request.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(60.0 / requests_per_minute),
            last_request: Mutex::new(None),
        }
    }

    pub fn wait_if_needed(&self) {
        let mut guard = self.last_request.lock().unwrap();
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        *guard = Some(Instant::now());
    }
}

/// OpenRouter enforces a single shared budget across every model it serves
/// through this crate (§4.1: "≤ 18 req/min global across all callers of
/// that provider class"). The requests-per-minute ceiling a
/// `ProviderFactory` builds its limiter with.
pub const OPENROUTER_REQUESTS_PER_MINUTE: f64 = 18.0;

pub struct OpenRouterProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
    rate_limiter: Arc<RateLimiter>,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, model_id: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: model_id.into(),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .expect("reqwest client builds"),
            rate_limiter,
        }
    }

    pub fn molmo_2_8b(api_key: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self::new(api_key, "molmo/molmo-2-8b-free", rate_limiter)
    }

    pub fn qwen_2_vl_7b(api_key: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self::new(api_key, "qwen/qwen-2-vl-7b-instruct", rate_limiter)
    }

    pub fn phi_4_multimodal(api_key: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self::new(api_key, "microsoft/phi-4-multimodal-instruct", rate_limiter)
    }
}

impl ModelProvider for OpenRouterProvider {
    fn generate(&self, image_jpeg_b64: &str, prompt: &str) -> Result<VideoIngestorOutput, VlmError> {
        if self.api_key.is_empty() {
            return Err(VlmError::Config("OPENROUTER_API_KEY not set".into()));
        }

        self.rate_limiter.wait_if_needed();

        let body = json!({
            "model": self.model_id,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": format!("data:image/jpeg;base64,{image_jpeg_b64}")}},
                    {"type": "text", "text": prompt},
                ]
            }],
        });

        let resp = self
            .client
            .post(ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VlmError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(VlmError::RateLimit("OpenRouter returned 429".into()));
        }
        if !resp.status().is_success() {
            return Err(VlmError::Transport(format!("OpenRouter HTTP {}", resp.status())));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(6000.0); // 100ms interval would be too slow for a unit test
        let start = Instant::now();
        limiter.wait_if_needed();
        limiter.wait_if_needed();
        assert!(start.elapsed() >= Duration::from_millis(9));
    }
}
