//! Chat-completion client interface for intent verification.
//!
//! Keeps the security layer vendor-neutral: any provider that can answer a
//! chat request can back the verifier. Implementations must not error on
//! transient failures; they return a response whose content carries the
//! error so the caller decides how to degrade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// "system", "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub latency_ms: f64,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_s: f64,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 2048,
            timeout_s: 30.0,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[LlmMessage], options: &ChatOptions) -> LlmResponse;
}

/// No-op client used when verification is disabled: always approves so the
/// pipeline continues.
pub struct NullLlmClient;

#[async_trait]
impl LlmClient for NullLlmClient {
    async fn chat(&self, _messages: &[LlmMessage], _options: &ChatOptions) -> LlmResponse {
        LlmResponse {
            content: r#"{"verdict": "approve", "risk_level": "low", "reasoning": "Verification disabled.", "threats": []}"#.to_string(),
            model: "null".to_string(),
            ..LlmResponse::default()
        }
    }
}
