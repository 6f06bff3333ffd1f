//! Execution state: the mutable record of one plan in flight.
//!
//! Created by the executor on entry, mutated only by the executor (and the
//! approval gate on resume), persisted on every terminal per-action status
//! change.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::ErrorRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
    Partial,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled | PlanStatus::Partial
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::AwaitingApproval => "awaiting_approval",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
            PlanStatus::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    AwaitingApproval,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded
                | ActionStatus::Failed
                | ActionStatus::Skipped
                | ActionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Succeeded => "succeeded",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
            ActionStatus::AwaitingApproval => "awaiting_approval",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionState {
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// On-disk/state-store version tag; bump on breaking layout changes.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default = "default_state_version")]
    pub state_version: u32,
    pub plan_id: String,
    pub plan_status: PlanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Keyed by action id, in plan declaration order.
    #[serde(default)]
    pub actions: IndexMap<String, ActionState>,
    #[serde(default)]
    pub results: HashMap<String, Value>,
    #[serde(default)]
    pub errors: HashMap<String, ErrorRecord>,
    /// Compact audit trail: `(ts, kind, action_id)` triples.
    #[serde(default)]
    pub audit_trail: Vec<Value>,
}

fn default_state_version() -> u32 {
    STATE_VERSION
}

impl ExecutionState {
    pub fn new(plan_id: &str, action_ids: impl IntoIterator<Item = String>) -> Self {
        let actions = action_ids
            .into_iter()
            .map(|id| (id, ActionState::default()))
            .collect();
        Self {
            state_version: STATE_VERSION,
            plan_id: plan_id.to_string(),
            plan_status: PlanStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            actions,
            results: HashMap::new(),
            errors: HashMap::new(),
            audit_trail: Vec::new(),
        }
    }

    pub fn action(&self, action_id: &str) -> Option<&ActionState> {
        self.actions.get(action_id)
    }

    pub fn action_mut(&mut self, action_id: &str) -> &mut ActionState {
        self.actions.entry(action_id.to_string()).or_default()
    }

    pub fn record_trail(&mut self, kind: &str, action_id: Option<&str>) {
        self.audit_trail.push(serde_json::json!({
            "ts": Utc::now().timestamp_millis(),
            "kind": kind,
            "action_id": action_id,
        }));
    }

    /// True when every action has reached a terminal status.
    pub fn all_terminal(&self) -> bool {
        self.actions.values().all(|a| a.status.is_terminal())
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut cancelled = 0;
        for action in self.actions.values() {
            match action.status {
                ActionStatus::Succeeded => succeeded += 1,
                ActionStatus::Failed => failed += 1,
                ActionStatus::Skipped => skipped += 1,
                ActionStatus::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        (succeeded, failed, skipped, cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_pending() {
        let state = ExecutionState::new("p1", ["a".to_string(), "b".to_string()]);
        assert_eq!(state.plan_status, PlanStatus::Pending);
        assert_eq!(state.actions.len(), 2);
        assert!(!state.all_terminal());
    }

    #[test]
    fn serde_roundtrip_keeps_version() {
        let state = ExecutionState::new("p1", ["a".to_string()]);
        let json = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state_version, STATE_VERSION);
        assert_eq!(back.plan_id, "p1");
    }

    #[test]
    fn counts_by_status() {
        let mut state = ExecutionState::new(
            "p1",
            ["a".to_string(), "b".to_string(), "c".to_string()],
        );
        state.action_mut("a").status = ActionStatus::Succeeded;
        state.action_mut("b").status = ActionStatus::Failed;
        state.action_mut("c").status = ActionStatus::Skipped;
        assert_eq!(state.counts(), (1, 1, 1, 0));
        assert!(state.all_terminal());
    }
}
