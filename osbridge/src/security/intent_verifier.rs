//! LLM-backed intent verification for sensitive actions.
//!
//! The composed prompt goes to a chat-completion client; the response is
//! parsed as a JSON verdict. Strict mode turns `reject` into
//! `suspicious_intent`; permissive mode logs and allows. Verdicts are
//! cached by `(action signature, params hash)` with a TTL so repeated
//! identical actions don't pay the round-trip twice.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use super::llm_client::{ChatOptions, LlmClient};
use super::prompt_composer::PromptComposer;
use crate::errors::{BridgeError, BridgeResult};
use crate::protocol::models::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationVerdict {
    Approve,
    Warn,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verdict: VerificationVerdict,
    #[serde(default)]
    pub risk_level: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub threats: Vec<String>,
}

pub struct IntentVerifier {
    client: Box<dyn LlmClient>,
    composer: PromptComposer,
    options: ChatOptions,
    strict: bool,
    cache: DashMap<String, (Instant, VerificationResult)>,
    cache_ttl: Duration,
}

impl IntentVerifier {
    pub fn new(
        client: Box<dyn LlmClient>,
        composer: PromptComposer,
        strict: bool,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            client,
            composer,
            options: ChatOptions::default(),
            strict,
            cache: DashMap::new(),
            cache_ttl,
        }
    }

    /// Judge one sensitive action. Returns the verdict for audit; fails
    /// with `suspicious_intent` when a strict profile meets a rejection.
    pub async fn verify(
        &self,
        plan_description: &str,
        action: &Action,
    ) -> BridgeResult<VerificationResult> {
        let key = cache_key(action);
        if let Some(entry) = self.cache.get(&key) {
            let (at, result) = entry.value();
            if at.elapsed() < self.cache_ttl {
                tracing::debug!(action = %action.action_key(), "intent verdict from cache");
                return self.apply(result.clone(), action);
            }
        }

        let messages = self.composer.compose(plan_description, action);
        let response = self.client.chat(&messages, &self.options).await;
        let result = parse_verdict(&response.content).unwrap_or_else(|| VerificationResult {
            verdict: VerificationVerdict::Reject,
            risk_level: "high".to_string(),
            reasoning: format!("unparseable verifier response: {}", clip(&response.content, 200)),
            threats: Vec::new(),
        });

        self.cache.insert(key, (Instant::now(), result.clone()));
        self.apply(result, action)
    }

    fn apply(&self, result: VerificationResult, action: &Action) -> BridgeResult<VerificationResult> {
        if result.verdict == VerificationVerdict::Reject {
            if self.strict {
                return Err(BridgeError::SuspiciousIntent(format!(
                    "{}: {}",
                    action.action_key(),
                    result.reasoning
                )));
            }
            tracing::warn!(
                action = %action.action_key(),
                reasoning = %result.reasoning,
                "intent verifier rejected action; permissive profile allows it"
            );
        }
        Ok(result)
    }
}

fn cache_key(action: &Action) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action.action_key().as_bytes());
    hasher.update(
        serde_json::to_vec(&action.params).unwrap_or_default(),
    );
    format!("{:x}", hasher.finalize())
}

/// Extract the verdict JSON, tolerating code fences and prose around it.
fn parse_verdict(content: &str) -> Option<VerificationResult> {
    if let Ok(result) = serde_json::from_str::<VerificationResult>(content) {
        return Some(result);
    }
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::llm_client::{LlmMessage, LlmResponse, NullLlmClient};
    use crate::security::threat_categories::ThreatCategoryRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn action() -> Action {
        serde_json::from_value(serde_json::json!({
            "id": "a1", "module": "os_exec", "action": "run_command",
            "params": {"command": "rm -rf /tmp/cache"}
        }))
        .unwrap()
    }

    struct CountingRejector(Arc<AtomicU32>);

    #[async_trait]
    impl LlmClient for CountingRejector {
        async fn chat(&self, _m: &[LlmMessage], _o: &ChatOptions) -> LlmResponse {
            self.0.fetch_add(1, Ordering::SeqCst);
            LlmResponse {
                content: "```json\n{\"verdict\": \"reject\", \"risk_level\": \"high\", \"reasoning\": \"destructive\"}\n```".to_string(),
                ..LlmResponse::default()
            }
        }
    }

    fn verifier(client: Box<dyn LlmClient>, strict: bool) -> IntentVerifier {
        IntentVerifier::new(
            client,
            PromptComposer::new(ThreatCategoryRegistry::default()),
            strict,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn null_client_approves() {
        let v = verifier(Box::new(NullLlmClient), true);
        let result = v.verify("clean cache", &action()).await.unwrap();
        assert_eq!(result.verdict, VerificationVerdict::Approve);
    }

    #[tokio::test]
    async fn strict_reject_fails_and_caches() {
        let calls = Arc::new(AtomicU32::new(0));
        let v = verifier(Box::new(CountingRejector(calls.clone())), true);
        let err = v.verify("clean cache", &action()).await.unwrap_err();
        assert_eq!(err.code(), "suspicious_intent");
        // Second call served from cache: still rejected, no extra round-trip.
        let err = v.verify("clean cache", &action()).await.unwrap_err();
        assert_eq!(err.code(), "suspicious_intent");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permissive_reject_is_allowed() {
        let calls = Arc::new(AtomicU32::new(0));
        let v = verifier(Box::new(CountingRejector(calls)), false);
        let result = v.verify("clean cache", &action()).await.unwrap();
        assert_eq!(result.verdict, VerificationVerdict::Reject);
    }

    #[test]
    fn fenced_json_is_parsed() {
        let result =
            parse_verdict("Sure!\n```json\n{\"verdict\": \"warn\", \"risk_level\": \"medium\", \"reasoning\": \"ok\"}\n```")
                .unwrap();
        assert_eq!(result.verdict, VerificationVerdict::Warn);
    }
}
