//! JSON-schema registry for the plan model and per-action params.
//!
//! Schemas are cached; the cache is invalidated whenever the module
//! registry's registration generation moves.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::modules::ModuleRegistry;
use crate::protocol::models::Plan;

pub struct SchemaRegistry {
    registry: Arc<ModuleRegistry>,
    cache: Mutex<(u64, HashMap<String, Value>)>,
}

impl SchemaRegistry {
    pub fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new((0, HashMap::new())),
        }
    }

    /// Full JSON schema of the plan wire format.
    pub fn plan_schema(&self) -> Value {
        self.cached("plan", |_| {
            serde_json::to_value(schemars::schema_for!(Plan)).unwrap_or_else(|_| json!({}))
        })
    }

    /// Schema for one action's params; an open object schema when none is
    /// registered.
    pub fn action_params_schema(&self, module_id: &str, action: &str) -> Value {
        let key = format!("{module_id}.{action}");
        let registry = self.registry.clone();
        self.cached(&key, move |_| {
            registry
                .manifest(module_id)
                .and_then(|m| m.action(action).and_then(|a| a.params_schema.clone()))
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
        })
    }

    /// Schemas for every action of one module.
    pub fn module_schema(&self, module_id: &str) -> Value {
        let Some(manifest) = self.registry.manifest(module_id) else {
            return json!({});
        };
        let mut out = serde_json::Map::new();
        for action in &manifest.actions {
            out.insert(
                action.name.clone(),
                self.action_params_schema(module_id, &action.name),
            );
        }
        Value::Object(out)
    }

    /// The complete registry as one serialisable document.
    pub fn all_schemas(&self) -> Value {
        let mut modules = serde_json::Map::new();
        for module_id in self.registry.module_ids() {
            modules.insert(module_id.clone(), self.module_schema(&module_id));
        }
        json!({
            "plan_schema": self.plan_schema(),
            "modules": modules,
        })
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.1.clear();
        }
    }

    fn cached(&self, key: &str, build: impl FnOnce(&str) -> Value) -> Value {
        let generation = self.registry.generation();
        if let Ok(mut cache) = self.cache.lock() {
            if cache.0 != generation {
                // Module set changed; drop everything.
                cache.0 = generation;
                cache.1.clear();
            }
            if let Some(found) = cache.1.get(key) {
                return found.clone();
            }
            let value = build(key);
            cache.1.insert(key.to_string(), value.clone());
            value
        } else {
            build(key)
        }
    }
}
