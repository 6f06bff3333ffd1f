//! Wave scheduling: topological layering of the plan DAG.
//!
//! Wave k contains exactly the actions whose dependencies all live in waves
//! < k. The executor runs waves in order and everything within a wave
//! concurrently (subject to concurrency caps).

use std::collections::HashMap;

use crate::errors::{BridgeError, BridgeResult};
use crate::protocol::models::{ExecutionMode, Plan};

/// Compute the topological layering of a validated plan.
///
/// `execution_mode: sequential` degenerates to one action per wave, in
/// declaration order.
pub fn compute_waves(plan: &Plan) -> BridgeResult<Vec<Vec<String>>> {
    if plan.actions.is_empty() {
        return Ok(Vec::new());
    }
    if plan.execution_mode == ExecutionMode::Sequential {
        return Ok(plan
            .actions
            .iter()
            .map(|a| vec![a.id.clone()])
            .collect());
    }

    // Kahn-style layering over in-degrees.
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for action in &plan.actions {
        indegree.entry(action.id.as_str()).or_insert(0);
        for dep in &action.depends_on {
            *indegree.entry(action.id.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(action.id.as_str());
        }
    }

    let mut waves: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<&str> = plan
        .actions
        .iter()
        .filter(|a| indegree[a.id.as_str()] == 0)
        .map(|a| a.id.as_str())
        .collect();
    let mut placed = 0usize;

    while !current.is_empty() {
        placed += current.len();
        let mut next: Vec<&str> = Vec::new();
        for id in &current {
            for dependent in dependents.get(id).into_iter().flatten() {
                let degree = indegree
                    .get_mut(dependent)
                    .ok_or_else(|| BridgeError::Internal("scheduler indegree desync".into()))?;
                *degree -= 1;
                if *degree == 0 {
                    next.push(dependent);
                }
            }
        }
        waves.push(current.iter().map(|s| s.to_string()).collect());
        current = next;
    }

    if placed != plan.actions.len() {
        // The validator rejects cycles before we get here.
        return Err(BridgeError::Validation(
            "plan contains a dependency cycle".to_string(),
        ));
    }
    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::parse;

    fn plan(raw: serde_json::Value) -> Plan {
        parse(&raw).expect("parse")
    }

    #[test]
    fn diamond_layers_correctly() {
        let p = plan(serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x"},
                {"id": "b", "module": "m", "action": "x"},
                {"id": "c", "module": "m", "action": "x", "depends_on": ["a", "b"]},
                {"id": "d", "module": "m", "action": "x", "depends_on": ["c"]}
            ]
        }));
        let waves = compute_waves(&p).unwrap();
        assert_eq!(waves.len(), 3);
        let mut first = waves[0].clone();
        first.sort();
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(waves[1], vec!["c"]);
        assert_eq!(waves[2], vec!["d"]);
    }

    #[test]
    fn empty_plan_has_no_waves() {
        let p = plan(serde_json::json!({"plan_id": "p", "actions": []}));
        assert!(compute_waves(&p).unwrap().is_empty());
    }

    #[test]
    fn sequential_mode_is_one_per_wave() {
        let p = plan(serde_json::json!({
            "plan_id": "p",
            "execution_mode": "sequential",
            "actions": [
                {"id": "a", "module": "m", "action": "x"},
                {"id": "b", "module": "m", "action": "x"},
                {"id": "c", "module": "m", "action": "x"}
            ]
        }));
        let waves = compute_waves(&p).unwrap();
        assert_eq!(waves, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn independent_actions_share_one_wave() {
        let p = plan(serde_json::json!({
            "plan_id": "p",
            "actions": [
                {"id": "a", "module": "m", "action": "x"},
                {"id": "b", "module": "m", "action": "x"},
                {"id": "c", "module": "m", "action": "x"}
            ]
        }));
        let waves = compute_waves(&p).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 3);
    }
}
