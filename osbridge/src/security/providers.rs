//! HTTP-backed chat-completion clients for the intent verifier.
//!
//! Transient transport errors never panic or propagate; they come back as a
//! response whose content is a reject-shaped JSON so strict profiles fail
//! closed and permissive ones log and continue.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

use super::llm_client::{ChatOptions, LlmClient, LlmMessage, LlmResponse};

fn error_response(provider: &str, error: &str) -> LlmResponse {
    tracing::warn!(provider, error, "intent verifier LLM call failed");
    LlmResponse {
        content: json!({
            "verdict": "reject",
            "risk_level": "high",
            "reasoning": format!("verifier backend unavailable: {error}"),
            "threats": [],
        })
        .to_string(),
        model: provider.to_string(),
        ..LlmResponse::default()
    }
}

/// OpenAI-compatible `/v1/chat/completions` endpoint (also covers Azure and
/// local gateways speaking the same dialect).
pub struct OpenAiLlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn chat(&self, messages: &[LlmMessage], options: &ChatOptions) -> LlmResponse {
        let body = json!({
            "model": self.model,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "messages": messages,
        });
        let started = Instant::now();
        let result = self
            .http
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs_f64(options.timeout_s))
            .json(&body)
            .send()
            .await;
        let response = match result {
            Ok(r) => r,
            Err(e) => return error_response("openai", &e.to_string()),
        };
        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return error_response("openai", &e.to_string()),
        };
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return error_response("openai", "empty completion");
        }
        LlmResponse {
            content,
            model: self.model.clone(),
            prompt_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Anthropic `/v1/messages` endpoint. The system message travels in the
/// dedicated `system` field.
pub struct AnthropicLlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl AnthropicLlmClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicLlmClient {
    async fn chat(&self, messages: &[LlmMessage], options: &ChatOptions) -> LlmResponse {
        let system: String = messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let chat: Vec<&LlmMessage> = messages.iter().filter(|m| m.role != "system").collect();
        let body = json!({
            "model": self.model,
            "system": system,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": chat,
        });
        let started = Instant::now();
        let result = self
            .http
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(Duration::from_secs_f64(options.timeout_s))
            .json(&body)
            .send()
            .await;
        let response = match result {
            Ok(r) => r,
            Err(e) => return error_response("anthropic", &e.to_string()),
        };
        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return error_response("anthropic", &e.to_string()),
        };
        let content = payload["content"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return error_response("anthropic", "empty completion");
        }
        LlmResponse {
            content,
            model: self.model.clone(),
            prompt_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Local Ollama `/api/chat` endpoint; no API key.
pub struct OllamaLlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaLlmClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn chat(&self, messages: &[LlmMessage], options: &ChatOptions) -> LlmResponse {
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": options.temperature},
            "messages": messages,
        });
        let started = Instant::now();
        let result = self
            .http
            .post(format!("{}/api/chat", self.endpoint))
            .timeout(Duration::from_secs_f64(options.timeout_s))
            .json(&body)
            .send()
            .await;
        let response = match result {
            Ok(r) => r,
            Err(e) => return error_response("ollama", &e.to_string()),
        };
        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return error_response("ollama", &e.to_string()),
        };
        let content = payload["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            return error_response("ollama", "empty completion");
        }
        LlmResponse {
            content,
            model: self.model.clone(),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            ..LlmResponse::default()
        }
    }
}
