//! Structural plan validation.
//!
//! Enforces the plan invariants: unique action ids, an acyclic dependency
//! graph (reported with the offending cycle), resolvable `depends_on` and
//! rollback targets, and param conformance against registered action schemas.

use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::models::Plan;
use crate::errors::{BridgeError, BridgeResult};

/// Where the validator looks up modules and per-action param schemas.
/// Implemented by `modules::ModuleRegistry`; tests supply their own.
pub trait SchemaSource {
    fn has_module(&self, module_id: &str) -> bool;
    fn has_action(&self, module_id: &str, action: &str) -> bool;
    /// JSON schema for `(module, action)` params, if one is registered.
    fn params_schema(&self, module_id: &str, action: &str) -> Option<Value>;
}

/// A schema source that knows nothing; with `strict=false` every plan whose
/// graph is sound passes.
pub struct OpenWorld;

impl SchemaSource for OpenWorld {
    fn has_module(&self, _: &str) -> bool {
        false
    }
    fn has_action(&self, _: &str, _: &str) -> bool {
        false
    }
    fn params_schema(&self, _: &str, _: &str) -> Option<Value> {
        None
    }
}

pub fn validate(plan: &Plan, source: &dyn SchemaSource, strict: bool) -> BridgeResult<()> {
    validate_unique_ids(plan)?;
    validate_dependencies(plan)?;
    validate_acyclic(plan)?;
    validate_rollback_targets(plan)?;
    validate_timeouts(plan)?;
    validate_modules_and_params(plan, source, strict)?;
    Ok(())
}

fn validate_unique_ids(plan: &Plan) -> BridgeResult<()> {
    let mut seen = HashSet::new();
    for action in &plan.actions {
        if !seen.insert(action.id.as_str()) {
            return Err(BridgeError::Validation(format!(
                "duplicate action id '{}'",
                action.id
            )));
        }
    }
    Ok(())
}

fn validate_dependencies(plan: &Plan) -> BridgeResult<()> {
    let ids: HashSet<&str> = plan.actions.iter().map(|a| a.id.as_str()).collect();
    for action in &plan.actions {
        for dep in &action.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(BridgeError::Validation(format!(
                    "action '{}' depends on unknown action '{}'",
                    action.id, dep
                )));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// DFS with grey/black colouring; a grey->grey edge is a cycle, reported as
/// the path along the current DFS stack.
fn validate_acyclic(plan: &Plan) -> BridgeResult<()> {
    let index = plan.action_index();
    let mut colors: HashMap<&str, Color> =
        plan.actions.iter().map(|a| (a.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        plan: &'a Plan,
        index: &HashMap<&'a str, usize>,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> BridgeResult<()> {
        colors.insert(id, Color::Grey);
        stack.push(id);
        let action = &plan.actions[index[id]];
        for dep in &action.depends_on {
            match colors[dep.as_str()] {
                Color::Grey => {
                    let start = stack.iter().position(|s| *s == dep.as_str()).unwrap_or(0);
                    let mut cycle: Vec<&str> = stack[start..].to_vec();
                    cycle.push(dep.as_str());
                    return Err(BridgeError::Validation(format!(
                        "dependency cycle: {}",
                        cycle.join(" -> ")
                    )));
                }
                Color::White => visit(dep.as_str(), plan, index, colors, stack)?,
                Color::Black => {}
            }
        }
        stack.pop();
        colors.insert(id, Color::Black);
        Ok(())
    }

    let mut stack = Vec::new();
    for action in &plan.actions {
        if colors[action.id.as_str()] == Color::White {
            visit(action.id.as_str(), plan, &index, &mut colors, &mut stack)?;
        }
    }
    Ok(())
}

fn validate_rollback_targets(plan: &Plan) -> BridgeResult<()> {
    for action in &plan.actions {
        if let Some(rollback) = &action.rollback {
            if plan.get_action(&rollback.action).is_none() {
                return Err(BridgeError::Validation(format!(
                    "action '{}' names rollback target '{}' which is not in the plan",
                    action.id, rollback.action
                )));
            }
        }
    }
    Ok(())
}

fn validate_timeouts(plan: &Plan) -> BridgeResult<()> {
    for action in &plan.actions {
        if action.timeout_s <= 0.0 {
            return Err(BridgeError::Validation(format!(
                "action '{}' has non-positive timeout_s",
                action.id
            )));
        }
    }
    if let Some(t) = plan.timeout_seconds {
        if t <= 0.0 {
            return Err(BridgeError::Validation(
                "plan timeout_seconds must be positive".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_modules_and_params(
    plan: &Plan,
    source: &dyn SchemaSource,
    strict: bool,
) -> BridgeResult<()> {
    for action in &plan.actions {
        if !source.has_module(&action.module) {
            if strict {
                return Err(BridgeError::UnknownModule(action.module.clone()));
            }
            continue;
        }
        if !source.has_action(&action.module, &action.action) {
            if strict {
                return Err(BridgeError::UnknownAction {
                    module: action.module.clone(),
                    action: action.action.clone(),
                });
            }
            continue;
        }
        // Open world: no registered schema means params pass through unless
        // strict mode demands one.
        let Some(schema) = source.params_schema(&action.module, &action.action) else {
            continue;
        };
        let compiled = JSONSchema::compile(&schema).map_err(|e| {
            BridgeError::Internal(format!(
                "invalid registered schema for {}: {e}",
                action.action_key()
            ))
        })?;
        let params = Value::Object(action.params.clone());
        let validation_result = compiled.validate(&params);
        if let Err(errors) = validation_result {
            let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(BridgeError::Validation(format!(
                "params for action '{}' do not match the {} schema: {}",
                action.id,
                action.action_key(),
                detail.join("; ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::parse;

    fn plan_from(raw: serde_json::Value) -> Plan {
        parse(&raw).expect("parse")
    }

    struct OneSchema;

    impl SchemaSource for OneSchema {
        fn has_module(&self, m: &str) -> bool {
            m == "fs"
        }
        fn has_action(&self, m: &str, a: &str) -> bool {
            m == "fs" && a == "write"
        }
        fn params_schema(&self, _: &str, _: &str) -> Option<Value> {
            Some(serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }))
        }
    }

    #[test]
    fn accepts_valid_dag() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x"},
                {"id": "b", "module": "m", "action": "x", "depends_on": ["a"]},
                {"id": "c", "module": "m", "action": "x", "depends_on": ["a", "b"]}
            ]
        }));
        validate(&plan, &OpenWorld, false).expect("valid");
    }

    #[test]
    fn rejects_duplicate_ids() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x"},
                {"id": "a", "module": "m", "action": "y"}
            ]
        }));
        let err = validate(&plan, &OpenWorld, false).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn reports_cycle_path() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x", "depends_on": ["c"]},
                {"id": "b", "module": "m", "action": "x", "depends_on": ["a"]},
                {"id": "c", "module": "m", "action": "x", "depends_on": ["b"]}
            ]
        }));
        let err = validate(&plan, &OpenWorld, false).unwrap_err();
        assert!(err.to_string().contains("cycle"));
        assert!(err.to_string().contains("a"));
    }

    #[test]
    fn self_cycle_is_named() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [{"id": "a", "module": "m", "action": "x", "depends_on": ["a"]}]
        }));
        let err = validate(&plan, &OpenWorld, false).unwrap_err();
        assert!(err.to_string().contains("a -> a"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [{"id": "a", "module": "m", "action": "x", "depends_on": ["ghost"]}]
        }));
        assert!(validate(&plan, &OpenWorld, false).is_err());
    }

    #[test]
    fn rejects_unresolvable_rollback_target() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x",
                 "rollback": {"action": "undo", "params": {}}}
            ]
        }));
        assert!(validate(&plan, &OpenWorld, false).is_err());
    }

    #[test]
    fn strict_mode_requires_registered_module() {
        let plan = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [{"id": "a", "module": "nope", "action": "x"}]
        }));
        assert!(validate(&plan, &OneSchema, false).is_ok());
        assert_eq!(
            validate(&plan, &OneSchema, true).unwrap_err().code(),
            "unknown_module"
        );
    }

    #[test]
    fn params_validated_against_schema() {
        let good = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [{"id": "a", "module": "fs", "action": "write",
                         "params": {"path": "/tmp/x"}}]
        }));
        validate(&good, &OneSchema, true).expect("conforming params");

        let bad = plan_from(serde_json::json!({
            "plan_id": "p",
            "actions": [{"id": "a", "module": "fs", "action": "write",
                         "params": {"path": 42}}]
        }));
        let err = validate(&bad, &OneSchema, true).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
