//! Composes the verification prompt for the intent verifier.

use serde_json::Value;

use super::llm_client::LlmMessage;
use super::threat_categories::ThreatCategoryRegistry;
use crate::protocol::models::Action;

const RESPONSE_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "verdict": {"enum": ["approve", "warn", "reject"]},
    "risk_level": {"enum": ["low", "medium", "high", "critical"]},
    "reasoning": {"type": "string"},
    "threats": {"type": "array", "items": {"type": "string"}}
  },
  "required": ["verdict", "risk_level", "reasoning"]
}"#;

pub struct PromptComposer {
    categories: ThreatCategoryRegistry,
}

impl PromptComposer {
    pub fn new(categories: ThreatCategoryRegistry) -> Self {
        Self { categories }
    }

    pub fn compose(&self, plan_description: &str, action: &Action) -> Vec<LlmMessage> {
        let mut taxonomy = String::new();
        for category in self.categories.all() {
            taxonomy.push_str(&format!(
                "- {} ({}): {}\n",
                category.id, category.name, category.description
            ));
        }

        let system = format!(
            "You are a security reviewer for an OS automation daemon. An LLM agent \
             proposed an action; judge whether executing it matches the stated goal \
             and is safe. Threat taxonomy:\n{taxonomy}\n\
             Respond with JSON only, conforming to this schema:\n{RESPONSE_SCHEMA}"
        );

        let user = format!(
            "Plan goal: {goal}\n\nProposed action:\n  module: {module}\n  action: {name}\n  params: {params}\n\n\
             Does this action serve the stated goal without undue risk?",
            goal = if plan_description.is_empty() {
                "(none given)"
            } else {
                plan_description
            },
            module = action.module,
            name = action.action,
            params = summarize_params(&Value::Object(action.params.clone()), 800),
        );

        vec![LlmMessage::system(system), LlmMessage::user(user)]
    }
}

/// Compact single-line JSON, clipped so huge params cannot blow the prompt.
fn summarize_params(params: &Value, max_len: usize) -> String {
    let mut s = params.to_string();
    if s.chars().count() > max_len {
        s = s.chars().take(max_len).collect::<String>() + "...";
    }
    s
}
