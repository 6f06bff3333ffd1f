//! Workflow replayer.
//!
//! Merges a recording into one sequential replay plan: action ids get a
//! `pN_` prefix (N = plan sequence), `depends_on` is remapped through the
//! same prefix map, and every action that had no original dependencies is
//! chained onto the last action of the preceding recorded plan.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::models::WorkflowRecording;

pub struct WorkflowReplayer;

impl WorkflowReplayer {
    /// Build the single merged replay plan.
    pub fn generate(recording: &WorkflowRecording) -> Value {
        let mut all_actions: Vec<Value> = Vec::new();
        let mut prev_last_action_id: Option<String> = None;

        for recorded in &recording.plans {
            let actions = recorded
                .plan_data
                .get("actions")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if actions.is_empty() {
                continue;
            }

            let prefix = format!("p{}", recorded.sequence);
            let id_map: HashMap<String, String> = actions
                .iter()
                .enumerate()
                .map(|(i, act)| {
                    let original = act
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("act{i}"));
                    (original.clone(), format!("{prefix}_{original}"))
                })
                .collect();

            for act in &actions {
                let mut new_act: Map<String, Value> =
                    act.as_object().cloned().unwrap_or_default();
                let original_id = new_act
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let new_id = id_map
                    .get(&original_id)
                    .cloned()
                    .unwrap_or_else(|| format!("{prefix}_{original_id}"));
                new_act.insert("id".to_string(), Value::String(new_id));

                let original_deps: Vec<String> = new_act
                    .get("depends_on")
                    .and_then(Value::as_array)
                    .map(|deps| {
                        deps.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                if original_deps.is_empty() {
                    // Chain onto the previous plan's last action.
                    if let Some(prev) = &prev_last_action_id {
                        new_act.insert(
                            "depends_on".to_string(),
                            json!([prev]),
                        );
                    }
                } else {
                    let remapped: Vec<Value> = original_deps
                        .iter()
                        .map(|dep| {
                            Value::String(
                                id_map
                                    .get(dep)
                                    .cloned()
                                    .unwrap_or_else(|| format!("{prefix}_{dep}")),
                            )
                        })
                        .collect();
                    new_act.insert("depends_on".to_string(), Value::Array(remapped));
                }

                all_actions.push(Value::Object(new_act));
            }

            if let Some(last) = actions.last().and_then(|a| a.get("id")).and_then(Value::as_str) {
                prev_last_action_id = id_map.get(last).cloned();
            }
        }

        json!({
            "plan_id": format!("replay-{}", recording.recording_id),
            "protocol_version": "2.0",
            "description": format!("Replay of '{}'", recording.title),
            "execution_mode": "sequential",
            "metadata": {
                "source": "shadow_recorder",
                "recording_id": recording.recording_id,
                "original_plan_count": recording.plans.len(),
            },
            "actions": all_actions,
        })
    }

    /// Human-readable summary for handing the recording back to an LLM.
    pub fn generate_llm_context(recording: &WorkflowRecording) -> String {
        let mut lines = vec![
            format!("# Workflow Recording: {}", recording.title),
            format!("Description: {}", recording.description),
            format!("Plans captured: {}", recording.plans.len()),
            String::new(),
        ];
        for rp in &recording.plans {
            lines.push(format!(
                "## Step {}: Plan '{}' ({} actions, status={})",
                rp.sequence, rp.plan_id, rp.action_count, rp.final_status
            ));
            for act in rp
                .plan_data
                .get("actions")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                lines.push(format!(
                    "  - [{}.{}] {}: {}",
                    act.get("module").and_then(Value::as_str).unwrap_or("?"),
                    act.get("action").and_then(Value::as_str).unwrap_or("?"),
                    act.get("id").and_then(Value::as_str).unwrap_or(""),
                    act.get("params").cloned().unwrap_or(Value::Null),
                ));
            }
        }
        lines.join("\n")
    }
}
