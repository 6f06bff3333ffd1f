//! Plan parser: JSON value -> typed [`Plan`].

use serde_json::Value;

use super::models::Plan;
use crate::errors::{BridgeError, BridgeResult};

/// Parse an already-JSON-decoded mapping into a [`Plan`].
///
/// Shape and type violations surface as `parse_error`; structural invariants
/// (unique ids, acyclic dependencies, schema conformance) are the
/// validator's job.
pub fn parse(raw: &Value) -> BridgeResult<Plan> {
    let obj = raw
        .as_object()
        .ok_or_else(|| BridgeError::Parse("plan must be a JSON object".to_string()))?;

    if !obj.contains_key("plan_id") {
        return Err(BridgeError::Parse("missing required field 'plan_id'".to_string()));
    }
    if !obj.contains_key("actions") {
        return Err(BridgeError::Parse("missing required field 'actions'".to_string()));
    }

    let plan: Plan = serde_json::from_value(raw.clone())
        .map_err(|e| BridgeError::Parse(format!("malformed plan: {e}")))?;

    if plan.plan_id.trim().is_empty() {
        return Err(BridgeError::Parse("'plan_id' must not be empty".to_string()));
    }
    for action in &plan.actions {
        if action.id.trim().is_empty() {
            return Err(BridgeError::Parse("action 'id' must not be empty".to_string()));
        }
        if action.module.trim().is_empty() || action.action.trim().is_empty() {
            return Err(BridgeError::Parse(format!(
                "action '{}' must name a module and an action",
                action.id
            )));
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_plan() {
        let raw = serde_json::json!({
            "plan_id": "p1",
            "actions": [{"id": "a1", "module": "m", "action": "act"}]
        });
        let plan = parse(&raw).expect("parse");
        assert_eq!(plan.plan_id, "p1");
        assert_eq!(plan.actions.len(), 1);
    }

    #[test]
    fn rejects_non_object() {
        let err = parse(&serde_json::json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn rejects_missing_plan_id() {
        let err = parse(&serde_json::json!({"actions": []})).unwrap_err();
        assert!(err.to_string().contains("plan_id"));
    }

    #[test]
    fn rejects_type_violation() {
        let raw = serde_json::json!({
            "plan_id": "p1",
            "actions": [{"id": "a1", "module": "m", "action": "act", "timeout_s": "soon"}]
        });
        assert_eq!(parse(&raw).unwrap_err().code(), "parse_error");
    }

    #[test]
    fn rejects_empty_action_id() {
        let raw = serde_json::json!({
            "plan_id": "p1",
            "actions": [{"id": "  ", "module": "m", "action": "act"}]
        });
        assert_eq!(parse(&raw).unwrap_err().code(), "parse_error");
    }
}
