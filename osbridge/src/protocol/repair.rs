//! Best-effort plan repair.
//!
//! Given a raw plan that failed to parse or validate, produce a corrected
//! candidate plus a machine-readable list of every change made. Repair never
//! silently changes semantics: it only drops unknown top-level fields, fixes
//! obvious typing (numeric literals sent as strings), and inserts missing
//! defaults. The caller decides whether to resubmit; the executor never
//! invokes repair on its own.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::models::PROTOCOL_VERSION;

/// Top-level keys the plan model understands; anything else is dropped.
const KNOWN_PLAN_KEYS: &[&str] = &[
    "plan_id",
    "protocol_version",
    "description",
    "metadata",
    "execution_mode",
    "mode",
    "actions",
    "retry_defaults",
    "timeout_seconds",
];

/// Per-action numeric fields commonly sent as strings by weaker models.
const NUMERIC_ACTION_KEYS: &[&str] = &["timeout_s"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum RepairChange {
    DroppedUnknownField { field: String },
    CoercedNumeric { path: String, from: String },
    InsertedDefault { path: String, value: Value },
    WrappedSingleDependency { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairResult {
    pub plan: Value,
    pub changes: Vec<RepairChange>,
    /// Diagnostics that motivated the repair, echoed for the caller.
    pub diagnostics: Vec<String>,
}

impl RepairResult {
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}

pub fn repair(raw: &Value, diagnostics: &[String]) -> RepairResult {
    let mut changes = Vec::new();
    let mut plan = raw.clone();

    if let Some(obj) = plan.as_object_mut() {
        drop_unknown_fields(obj, &mut changes);
        insert_defaults(obj, &mut changes);
        if let Some(actions) = obj.get_mut("actions").and_then(Value::as_array_mut) {
            for (i, action) in actions.iter_mut().enumerate() {
                if let Some(act) = action.as_object_mut() {
                    repair_action(act, i, &mut changes);
                }
            }
        }
    }

    RepairResult {
        plan,
        changes,
        diagnostics: diagnostics.to_vec(),
    }
}

fn drop_unknown_fields(obj: &mut Map<String, Value>, changes: &mut Vec<RepairChange>) {
    let unknown: Vec<String> = obj
        .keys()
        .filter(|k| !KNOWN_PLAN_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    for key in unknown {
        obj.remove(&key);
        changes.push(RepairChange::DroppedUnknownField { field: key });
    }
}

fn insert_defaults(obj: &mut Map<String, Value>, changes: &mut Vec<RepairChange>) {
    if !obj.contains_key("protocol_version") {
        obj.insert(
            "protocol_version".to_string(),
            Value::String(PROTOCOL_VERSION.to_string()),
        );
        changes.push(RepairChange::InsertedDefault {
            path: "protocol_version".to_string(),
            value: Value::String(PROTOCOL_VERSION.to_string()),
        });
    }
    if !obj.contains_key("actions") {
        obj.insert("actions".to_string(), Value::Array(Vec::new()));
        changes.push(RepairChange::InsertedDefault {
            path: "actions".to_string(),
            value: Value::Array(Vec::new()),
        });
    }
}

fn repair_action(act: &mut Map<String, Value>, index: usize, changes: &mut Vec<RepairChange>) {
    for key in NUMERIC_ACTION_KEYS {
        let path = format!("actions[{index}].{key}");
        if let Some(Value::String(s)) = act.get(*key) {
            if let Ok(n) = s.trim().parse::<f64>() {
                if let Some(num) = serde_json::Number::from_f64(n) {
                    let from = s.clone();
                    act.insert((*key).to_string(), Value::Number(num));
                    changes.push(RepairChange::CoercedNumeric { path, from });
                }
            }
        }
    }
    // `depends_on: "a1"` instead of `["a1"]`
    if let Some(Value::String(dep)) = act.get("depends_on") {
        let dep = dep.clone();
        act.insert(
            "depends_on".to_string(),
            Value::Array(vec![Value::String(dep)]),
        );
        changes.push(RepairChange::WrappedSingleDependency {
            path: format!("actions[{index}].depends_on"),
        });
    }
}

/// Renders repair diagnostics and changes into a correction prompt the
/// caller can hand back to the LLM that produced the broken plan.
pub struct CorrectionPromptFormatter;

impl CorrectionPromptFormatter {
    pub fn format(result: &RepairResult) -> String {
        let mut out = String::from("The submitted plan was rejected. Problems found:\n");
        for diag in &result.diagnostics {
            out.push_str(&format!("- {diag}\n"));
        }
        if result.changed() {
            out.push_str("\nAutomatic corrections applied to the candidate below:\n");
            for change in &result.changes {
                match change {
                    RepairChange::DroppedUnknownField { field } => {
                        out.push_str(&format!("- dropped unknown field '{field}'\n"));
                    }
                    RepairChange::CoercedNumeric { path, from } => {
                        out.push_str(&format!("- coerced '{path}' from string \"{from}\" to a number\n"));
                    }
                    RepairChange::InsertedDefault { path, value } => {
                        out.push_str(&format!("- inserted default '{path}' = {value}\n"));
                    }
                    RepairChange::WrappedSingleDependency { path } => {
                        out.push_str(&format!("- wrapped '{path}' into a list\n"));
                    }
                }
            }
        }
        out.push_str("\nResubmit a corrected plan that satisfies the protocol schema.\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_unknown_top_level_fields() {
        let raw = serde_json::json!({
            "plan_id": "p", "actions": [], "thoughts": "let me think..."
        });
        let result = repair(&raw, &[]);
        assert!(result.plan.get("thoughts").is_none());
        assert!(result
            .changes
            .iter()
            .any(|c| matches!(c, RepairChange::DroppedUnknownField { field } if field == "thoughts")));
    }

    #[test]
    fn coerces_string_numerics_and_wraps_deps() {
        let raw = serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x", "timeout_s": "30", "depends_on": "b"},
                {"id": "b", "module": "m", "action": "x"}
            ]
        });
        let result = repair(&raw, &["actions[0].timeout_s: expected number".to_string()]);
        assert_eq!(result.plan["actions"][0]["timeout_s"], 30.0);
        assert_eq!(result.plan["actions"][0]["depends_on"], serde_json::json!(["b"]));
        assert!(result.changed());
    }

    #[test]
    fn inserts_missing_protocol_version() {
        let raw = serde_json::json!({"plan_id": "p", "actions": []});
        let result = repair(&raw, &[]);
        assert_eq!(result.plan["protocol_version"], PROTOCOL_VERSION);
    }

    #[test]
    fn correction_prompt_lists_changes() {
        let raw = serde_json::json!({"plan_id": "p", "actions": [], "extra": 1});
        let result = repair(&raw, &["unknown field 'extra'".to_string()]);
        let prompt = CorrectionPromptFormatter::format(&result);
        assert!(prompt.contains("unknown field 'extra'"));
        assert!(prompt.contains("dropped unknown field"));
    }
}
