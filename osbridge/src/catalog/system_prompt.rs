//! System-prompt generation.
//!
//! Renders the capability manifest set, the active permission profile and
//! per-module context snippets into a deterministic prompt, as text or as
//! a machine-readable JSON document.

use serde_json::{json, Value};
use std::sync::Arc;

use super::schema_registry::SchemaRegistry;
use crate::modules::ModuleRegistry;
use crate::security::{PermissionProfile, Policy};

#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    pub include_schemas: bool,
    pub include_examples: bool,
}

const PROTOCOL_RULES: &[&str] = &[
    "Submit exactly one JSON plan object per request (protocol_version \"2.0\").",
    "Every action needs a unique id; reference earlier results with ${actions.<id>.result...}.",
    "depends_on must form a DAG; actions without dependencies may run in parallel.",
    "Declare on_error (fail | continue | retry | rollback) for actions that may fail.",
    "Actions touching protected resources need a granted permission; on permission_not_granted, call security.request_permission as hinted.",
    "Sensitive actions may require human approval; plans suspend until a decision arrives.",
];

pub struct SystemPromptGenerator {
    registry: Arc<ModuleRegistry>,
    schemas: Arc<SchemaRegistry>,
}

impl SystemPromptGenerator {
    pub fn new(registry: Arc<ModuleRegistry>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { registry, schemas }
    }

    pub fn generate_text(&self, profile: &PermissionProfile, options: &PromptOptions) -> String {
        let mut out = String::new();
        out.push_str("# OSBridge capability manifest\n\n");
        out.push_str("## Protocol rules\n");
        for rule in PROTOCOL_RULES {
            out.push_str(&format!("- {rule}\n"));
        }

        out.push_str(&format!(
            "\n## Active permission profile: {} (default: {})\n",
            profile.name,
            policy_str(profile.default_policy)
        ));
        for ov in &profile.overrides {
            out.push_str(&format!(
                "- {}.{} -> {}{}\n",
                ov.module,
                ov.action.as_deref().unwrap_or("*"),
                policy_str(ov.policy),
                if ov.reason.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", ov.reason)
                }
            ));
        }

        out.push_str("\n## Available modules\n");
        for manifest in self.registry.manifests() {
            out.push_str(&format!(
                "\n### {} v{} — {}\n",
                manifest.module_id, manifest.version, manifest.description
            ));
            for action in &manifest.actions {
                out.push_str(&format!("- {}: {}", action.name, action.description));
                if let Some(permission) = &action.permission_required {
                    out.push_str(&format!(" [requires {permission}]"));
                }
                if let Some(limit) = action.rate_limit_per_minute {
                    out.push_str(&format!(" [max {limit}/min]"));
                }
                out.push('\n');
                if options.include_schemas {
                    let schema = self
                        .schemas
                        .action_params_schema(&manifest.module_id, &action.name);
                    out.push_str(&format!("  params schema: {schema}\n"));
                }
                if options.include_examples {
                    for example in &action.examples {
                        out.push_str(&format!("  example: {example}\n"));
                    }
                }
            }
        }

        let snippets = self.registry.context_snippets();
        if !snippets.is_empty() {
            out.push_str("\n## Module context\n");
            for (module_id, snippet) in snippets {
                out.push_str(&format!("\n[{module_id}]\n{snippet}\n"));
            }
        }
        out
    }

    pub fn generate_json(&self, profile: &PermissionProfile, options: &PromptOptions) -> Value {
        let mut modules = Vec::new();
        for manifest in self.registry.manifests() {
            let mut actions = Vec::new();
            for action in &manifest.actions {
                let mut entry = json!({
                    "name": action.name,
                    "description": action.description,
                    "permission_required": action.permission_required,
                    "risk_level": action.risk_level,
                    "rate_limit_per_minute": action.rate_limit_per_minute,
                });
                if options.include_schemas {
                    entry["params_schema"] = self
                        .schemas
                        .action_params_schema(&manifest.module_id, &action.name);
                }
                if options.include_examples {
                    entry["examples"] = Value::Array(action.examples.clone());
                }
                actions.push(entry);
            }
            modules.push(json!({
                "module_id": manifest.module_id,
                "version": manifest.version,
                "description": manifest.description,
                "actions": actions,
            }));
        }
        json!({
            "protocol_rules": PROTOCOL_RULES,
            "profile": {
                "name": profile.name,
                "default_policy": policy_str(profile.default_policy),
                "strict_mode": profile.strict_mode,
            },
            "modules": modules,
        })
    }
}

fn policy_str(policy: Policy) -> &'static str {
    match policy {
        Policy::Allow => "allow",
        Policy::Deny => "deny",
        Policy::Prompt => "prompt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ActionSpec, BridgeModule, ExecutionContext, ModuleManifest};
    use async_trait::async_trait;
    use serde_json::Map;

    struct Demo(&'static str);

    #[async_trait]
    impl BridgeModule for Demo {
        async fn execute(
            &self,
            _action: &str,
            _params: &Map<String, Value>,
            _ctx: &ExecutionContext,
        ) -> crate::errors::BridgeResult<Value> {
            Ok(Value::Null)
        }

        fn manifest(&self) -> ModuleManifest {
            ModuleManifest {
                module_id: self.0.to_string(),
                version: "1.0".to_string(),
                description: format!("{} module", self.0),
                platforms: vec![],
                actions: vec![ActionSpec::new("do", "do the thing")],
            }
        }

        fn context_snippet(&self) -> Option<String> {
            Some(format!("{} is ready", self.0))
        }
    }

    fn generator() -> SystemPromptGenerator {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register(Arc::new(Demo("zeta")));
        registry.register(Arc::new(Demo("alpha")));
        let schemas = Arc::new(SchemaRegistry::new(registry.clone()));
        SystemPromptGenerator::new(registry, schemas)
    }

    #[test]
    fn text_output_is_deterministic_and_sorted() {
        let generator = generator();
        let profile = PermissionProfile::standard();
        let options = PromptOptions::default();
        let one = generator.generate_text(&profile, &options);
        let two = generator.generate_text(&profile, &options);
        assert_eq!(one, two);
        // Modules are listed alphabetically.
        let alpha = one.find("### alpha").unwrap();
        let zeta = one.find("### zeta").unwrap();
        assert!(alpha < zeta);
        assert!(one.contains("Protocol rules"));
        assert!(one.contains("alpha is ready"));
    }

    #[test]
    fn json_output_carries_profile_and_modules() {
        let generator = generator();
        let doc = generator.generate_json(
            &PermissionProfile::readonly(),
            &PromptOptions {
                include_schemas: true,
                include_examples: false,
            },
        );
        assert_eq!(doc["profile"]["name"], "readonly");
        assert_eq!(doc["modules"].as_array().unwrap().len(), 2);
        assert!(doc["modules"][0]["actions"][0]["params_schema"].is_object());
    }
}
