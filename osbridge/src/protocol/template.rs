//! Inter-action template resolution.
//!
//! Action params may reference earlier results with `${...}` markers:
//!
//! - `${actions.<id>.result[.path...]}` — a completed action's result
//! - `${actions.<id>.status}`           — a completed action's status
//! - `${env.<NAME>}`                    — a process environment variable
//! - `${plan.<field>}`                  — a top-level plan field
//!
//! Resolution happens once per action, immediately before dispatch, against
//! a snapshot of results-so-far. The executor only resolves against already
//! completed actions, so cyclic references cannot occur. When a template
//! string is exactly one reference and the resolved value is not a string,
//! the value is substituted inline so JSON types survive.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::models::Plan;
use crate::errors::{BridgeError, BridgeResult};

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z0-9_.\-\[\]]+)\}").unwrap());

/// Snapshot of everything a template may reference.
pub struct TemplateContext<'a> {
    pub plan: &'a Plan,
    /// action_id -> recorded result (completed actions only)
    pub results: &'a HashMap<String, Value>,
    /// action_id -> status string (completed actions only)
    pub statuses: &'a HashMap<String, String>,
    pub strict: bool,
}

impl<'a> TemplateContext<'a> {
    /// Resolve every `${...}` marker in a params tree.
    pub fn resolve_params(&self, params: &Map<String, Value>) -> BridgeResult<Map<String, Value>> {
        let mut out = Map::with_capacity(params.len());
        for (key, value) in params {
            out.insert(key.clone(), self.resolve_value(value)?);
        }
        Ok(out)
    }

    fn resolve_value(&self, value: &Value) -> BridgeResult<Value> {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => {
                let resolved: BridgeResult<Vec<Value>> =
                    items.iter().map(|v| self.resolve_value(v)).collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(map) => Ok(Value::Object(self.resolve_params(map)?)),
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, s: &str) -> BridgeResult<Value> {
        // Whole-string single reference keeps the resolved JSON type.
        if let Some(caps) = TEMPLATE_RE.captures(s) {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            if whole == s {
                return match self.lookup(&caps[1]) {
                    Some(v) => Ok(v),
                    None => self.unresolved(s),
                };
            }
        } else {
            return Ok(Value::String(s.to_string()));
        }

        // Embedded references stringify in place.
        let mut failed: Option<String> = None;
        let replaced = TEMPLATE_RE.replace_all(s, |caps: &regex::Captures<'_>| {
            match self.lookup(&caps[1]) {
                Some(Value::String(inner)) => inner,
                Some(v) => v.to_string(),
                None => {
                    let marker = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                    failed.get_or_insert_with(|| marker.to_string());
                    format!("<unresolved:{marker}>")
                }
            }
        });
        if let Some(marker) = failed {
            if self.strict {
                return Err(BridgeError::Template(format!(
                    "unresolvable reference '{marker}'"
                )));
            }
        }
        Ok(Value::String(replaced.into_owned()))
    }

    fn unresolved(&self, marker: &str) -> BridgeResult<Value> {
        if self.strict {
            Err(BridgeError::Template(format!(
                "unresolvable reference '{marker}'"
            )))
        } else {
            Ok(Value::String(format!("<unresolved:{marker}>")))
        }
    }

    fn lookup(&self, reference: &str) -> Option<Value> {
        let mut parts = reference.split('.');
        match parts.next()? {
            "actions" => {
                let id = parts.next()?;
                match parts.next()? {
                    "result" => {
                        let root = self.results.get(id)?;
                        walk_path(root, parts)
                    }
                    "status" => self
                        .statuses
                        .get(id)
                        .map(|s| Value::String(s.clone())),
                    _ => None,
                }
            }
            "env" => {
                let name = parts.next()?;
                std::env::var(name).ok().map(Value::String)
            }
            "plan" => {
                let field = parts.next()?;
                let plan_value = serde_json::to_value(self.plan).ok()?;
                plan_value.get(field).cloned()
            }
            _ => None,
        }
    }
}

/// Walk dotted path segments into a JSON value; bare numerals index arrays.
fn walk_path<'p, I: Iterator<Item = &'p str>>(root: &Value, parts: I) -> Option<Value> {
    let mut current = root;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => {
                let idx: usize = part.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::parse;

    fn fixture() -> (Plan, HashMap<String, Value>, HashMap<String, String>) {
        let plan = parse(&serde_json::json!({
            "plan_id": "p1",
            "description": "demo",
            "actions": [{"id": "a1", "module": "m", "action": "x"}]
        }))
        .unwrap();
        let mut results = HashMap::new();
        results.insert(
            "a1".to_string(),
            serde_json::json!({"value": 41, "rows": [{"name": "first"}]}),
        );
        let mut statuses = HashMap::new();
        statuses.insert("a1".to_string(), "succeeded".to_string());
        (plan, results, statuses)
    }

    fn ctx<'a>(
        plan: &'a Plan,
        results: &'a HashMap<String, Value>,
        statuses: &'a HashMap<String, String>,
        strict: bool,
    ) -> TemplateContext<'a> {
        TemplateContext {
            plan,
            results,
            statuses,
            strict,
        }
    }

    #[test]
    fn whole_string_reference_preserves_type() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({"input": "${actions.a1.result.value}"});
        let resolved = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(resolved["input"], Value::from(41));
    }

    #[test]
    fn embedded_reference_stringifies() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({"msg": "value is ${actions.a1.result.value}!"});
        let resolved = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(resolved["msg"], Value::from("value is 41!"));
    }

    #[test]
    fn array_index_path() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({"name": "${actions.a1.result.rows.0.name}"});
        let resolved = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(resolved["name"], Value::from("first"));
    }

    #[test]
    fn status_and_plan_references() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({
            "st": "${actions.a1.status}",
            "pid": "${plan.plan_id}"
        });
        let resolved = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(resolved["st"], Value::from("succeeded"));
        assert_eq!(resolved["pid"], Value::from("p1"));
    }

    #[test]
    fn strict_unresolved_fails() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({"x": "${actions.ghost.result}"});
        let err = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap_err();
        assert_eq!(err.code(), "template_error");
    }

    #[test]
    fn permissive_unresolved_substitutes_marker() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({"x": "${actions.ghost.result}"});
        let resolved = ctx(&plan, &results, &statuses, false)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(
            resolved["x"],
            Value::from("<unresolved:${actions.ghost.result}>")
        );
    }

    #[test]
    fn marker_free_tree_is_idempotent() {
        let (plan, results, statuses) = fixture();
        let params = serde_json::json!({
            "a": 1, "b": [true, null, "plain"], "c": {"nested": "strings"}
        });
        let resolved = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(Value::Object(resolved), params);
    }

    #[test]
    fn env_reference_resolves() {
        let (plan, results, statuses) = fixture();
        std::env::set_var("OSBRIDGE_TEST_TEMPLATE_VAR", "hello");
        let params = serde_json::json!({"x": "${env.OSBRIDGE_TEST_TEMPLATE_VAR}"});
        let resolved = ctx(&plan, &results, &statuses, true)
            .resolve_params(params.as_object().unwrap())
            .unwrap();
        assert_eq!(resolved["x"], Value::from("hello"));
    }
}
