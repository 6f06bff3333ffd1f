//! Protocol version migration.
//!
//! Legacy plans are promoted to the current protocol version through a
//! registry of one-step migrations keyed by source version, composed into a
//! linear chain. A plan already at the current version passes through
//! untouched.

use serde_json::Value;
use std::collections::HashMap;

use super::models::PROTOCOL_VERSION;
use crate::errors::{BridgeError, BridgeResult};

type MigrationFn = fn(Value) -> BridgeResult<Value>;

pub struct MigrationRegistry {
    /// from_version -> (to_version, migration)
    steps: HashMap<String, (String, MigrationFn)>,
}

impl MigrationRegistry {
    pub fn empty() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    pub fn register(&mut self, from: &str, to: &str, f: MigrationFn) {
        self.steps.insert(from.to_string(), (to.to_string(), f));
    }

    /// Promote `raw` to the current protocol version by applying one-step
    /// migrations in a chain. Fails if no path exists.
    pub fn migrate(&self, mut raw: Value) -> BridgeResult<Value> {
        let mut version = raw
            .get("protocol_version")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION)
            .to_string();

        let mut hops = 0usize;
        while version != PROTOCOL_VERSION {
            let (to, f) = self.steps.get(&version).ok_or_else(|| {
                BridgeError::Parse(format!(
                    "no migration path from protocol version '{version}' to '{PROTOCOL_VERSION}'"
                ))
            })?;
            tracing::debug!(from = %version, to = %to, "migrating plan");
            raw = f(raw)?;
            if let Some(obj) = raw.as_object_mut() {
                obj.insert("protocol_version".to_string(), Value::String(to.clone()));
            }
            version = to.clone();

            hops += 1;
            if hops > self.steps.len() {
                return Err(BridgeError::Internal(
                    "migration chain does not terminate".to_string(),
                ));
            }
        }
        Ok(raw)
    }
}

impl Default for MigrationRegistry {
    /// The default pipeline knows how to promote v1.0 plans.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("1.0", "2.0", migrate_v1_to_v2);
        registry
    }
}

/// v1.0 -> v2.0: `on_failure` was renamed `on_error`, and `retry` was a bare
/// attempt count rather than a config object.
fn migrate_v1_to_v2(mut raw: Value) -> BridgeResult<Value> {
    let actions = raw
        .get_mut("actions")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| BridgeError::Parse("v1 plan has no 'actions' array".to_string()))?;

    for action in actions.iter_mut() {
        let Some(obj) = action.as_object_mut() else {
            continue;
        };
        if let Some(v) = obj.remove("on_failure") {
            obj.entry("on_error".to_string()).or_insert(v);
        }
        if let Some(n) = obj.get("retry").and_then(Value::as_u64) {
            obj.insert(
                "retry".to_string(),
                serde_json::json!({ "max_attempts": n }),
            );
        }
    }
    Ok(raw)
}
