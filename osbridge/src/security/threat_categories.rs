//! Named threat categories shared by the heuristic scanner and the intent
//! verifier's prompt composer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatCategory {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Example phrasings and patterns that indicate the category.
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ThreatCategoryRegistry {
    categories: HashMap<String, ThreatCategory>,
}

impl ThreatCategoryRegistry {
    pub fn empty() -> Self {
        Self {
            categories: HashMap::new(),
        }
    }

    pub fn register(&mut self, category: ThreatCategory) {
        self.categories.insert(category.id.clone(), category);
    }

    pub fn get(&self, id: &str) -> Option<&ThreatCategory> {
        self.categories.get(id)
    }

    pub fn all(&self) -> Vec<&ThreatCategory> {
        let mut all: Vec<&ThreatCategory> = self.categories.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for ThreatCategoryRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (id, name, description, indicators) in [
            (
                "data_exfiltration",
                "Data exfiltration",
                "Reading local data and sending it to an external destination",
                vec!["read then upload", "curl to unknown host", "copy to remote"],
            ),
            (
                "destructive_operation",
                "Destructive operation",
                "Irreversible deletion or overwrite of user data or system state",
                vec!["rm -rf", "format", "drop table", "truncate", "overwrite config"],
            ),
            (
                "privilege_escalation",
                "Privilege escalation",
                "Gaining permissions beyond what the task needs",
                vec!["sudo", "setuid", "modify sudoers", "disable security"],
            ),
            (
                "prompt_injection",
                "Prompt injection",
                "Content crafted to subvert LLM instructions",
                vec!["ignore previous instructions", "you are now", "system override"],
            ),
            (
                "resource_abuse",
                "Resource abuse",
                "Consuming compute, network or storage far beyond the task's needs",
                vec!["fork bomb", "infinite loop", "crypto mining"],
            ),
        ] {
            registry.register(ThreatCategory {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                indicators: indicators.into_iter().map(str::to_string).collect(),
            });
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_populated_and_sorted() {
        let registry = ThreatCategoryRegistry::default();
        assert!(registry.get("prompt_injection").is_some());
        let ids: Vec<&str> = registry.all().iter().map(|c| c.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
