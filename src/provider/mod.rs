//! `ModelProvider` — the uniform contract a vision-language model backend
//! must implement: `(image, prompt, schema) -> validated structured object`.
//!
//! Each concrete provider is synchronous by contract (§4.1): callers wrap
//! `generate` in `tokio::task::spawn_blocking` rather than the provider
//! doing its own async dance internally.

pub mod anthropic;
pub mod factory;
pub mod google;
pub mod openai;
pub mod openrouter;

use serde::{Deserialize, Serialize};

use crate::error::VlmError;

/// One requested change to a task, as produced by a single VLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUpdate {
    pub task_number: usize,
    pub task_note: String,
    #[serde(default)]
    pub task_done: bool,
}

/// One action the ingestor should enqueue for the `ActionDispatcher`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemAction {
    pub take_action: String,
}

/// The structured output schema every VLM call against this crate returns.
/// Both lists may be empty; unknown fields are rejected at deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoIngestorOutput {
    #[serde(default)]
    pub task_updates: Vec<TaskUpdate>,
    #[serde(default)]
    pub system_actions: Vec<SystemAction>,
}

/// A recognized `VIDEO_INGESTOR_MODEL` value and the provider class it maps
/// to (§6's settings table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelName {
    Gemini25Flash,
    Gemini25FlashLite,
    Gpt41Nano,
    Gpt4oMini,
    Molmo28B,
    Qwen2Vl7B,
    Phi4Multimodal,
}

impl ModelName {
    pub const DEFAULT: ModelName = ModelName::Gemini25Flash;

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "gemini-2.5-flash" => Some(ModelName::Gemini25Flash),
            "gemini-2.5-flash-lite" => Some(ModelName::Gemini25FlashLite),
            "gpt-4.1-nano" => Some(ModelName::Gpt41Nano),
            "gpt-4o-mini" => Some(ModelName::Gpt4oMini),
            "molmo-2-8b" => Some(ModelName::Molmo28B),
            "qwen-2-vl-7b" => Some(ModelName::Qwen2Vl7B),
            "phi-4-multimodal" => Some(ModelName::Phi4Multimodal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::Gemini25Flash => "gemini-2.5-flash",
            ModelName::Gemini25FlashLite => "gemini-2.5-flash-lite",
            ModelName::Gpt41Nano => "gpt-4.1-nano",
            ModelName::Gpt4oMini => "gpt-4o-mini",
            ModelName::Molmo28B => "molmo-2-8b",
            ModelName::Qwen2Vl7B => "qwen-2-vl-7b",
            ModelName::Phi4Multimodal => "phi-4-multimodal",
        }
    }
}

/// Uniform contract for a vision-language model backend.
///
/// `generate` is a *blocking* call; the ingestor offloads it to a worker
/// thread via `spawn_blocking` so the capture loop never stalls on it.
pub trait ModelProvider: Send + Sync {
    /// `image_jpeg_b64`: base64-encoded JPEG bytes. `prompt`: the assembled
    /// task-ledger prompt. Returns a validated [`VideoIngestorOutput`] or a
    /// [`VlmError`] describing why the call could not be fulfilled.
    fn generate(&self, image_jpeg_b64: &str, prompt: &str) -> Result<VideoIngestorOutput, VlmError>;

    /// Human-readable provider class name, used in `reload_model_provider`'s
    /// result and in logs.
    fn name(&self) -> &str;
}

/// Strip a ```json ... ``` (or bare ```` ``` ````) fence around a JSON
/// payload, tolerating the common VLM habit of wrapping structured output
/// in markdown even when told not to.
pub fn strip_json_fence(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        return rest.trim().trim_end_matches("```").trim();
    }
    if let Some(rest) = s.strip_prefix("```") {
        return rest.trim().trim_end_matches("```").trim();
    }
    s
}

/// Parse and validate a VLM's raw text content against [`VideoIngestorOutput`].
pub fn parse_output(raw: &str) -> Result<VideoIngestorOutput, VlmError> {
    let stripped = strip_json_fence(raw);
    if stripped.is_empty() {
        return Err(VlmError::Empty);
    }
    serde_json::from_str(stripped).map_err(|e| VlmError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let input = "```json\n{\"task_updates\": [], \"system_actions\": []}\n```";
        let out = parse_output(input).unwrap();
        assert!(out.task_updates.is_empty());
        assert!(out.system_actions.is_empty());
    }

    #[test]
    fn strips_bare_code_fence() {
        let input = "```\n{\"task_updates\": [], \"system_actions\": []}\n```";
        assert!(parse_output(input).is_ok());
    }

    #[test]
    fn empty_response_is_empty_error() {
        assert!(matches!(parse_output(""), Err(VlmError::Empty)));
        assert!(matches!(parse_output("   "), Err(VlmError::Empty)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let input = r#"{"task_updates": [], "system_actions": [], "extra": 1}"#;
        assert!(matches!(parse_output(input), Err(VlmError::Parse(_))));
    }

    #[test]
    fn model_name_unknown_returns_none() {
        assert!(ModelName::parse("not-a-model").is_none());
        assert_eq!(ModelName::parse("gpt-4o-mini"), Some(ModelName::Gpt4oMini));
    }
}
