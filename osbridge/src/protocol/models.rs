//! Plan protocol data model.
//!
//! A [`Plan`] is the unit the LLM submits: a DAG of typed [`Action`]s with
//! parameters, dependencies, retry/rollback policies and inter-action
//! templating. Plans are immutable once submitted; all mutable execution
//! bookkeeping lives in `orchestration::state`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Protocol version emitted by current clients.
pub const PROTOCOL_VERSION: &str = "2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Parallel,
}

/// How the plan is run: `standard` dispatches actions for real; `dry_run`
/// walks the DAG marking every action skipped, without dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    #[default]
    Standard,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorBehavior {
    #[default]
    Fail,
    Continue,
    Retry,
    Rollback,
}

/// Exponential-backoff retry policy for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_backoff_initial")]
    pub backoff_initial_s: f64,
    #[serde(default = "RetryConfig::default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "RetryConfig::default_max_backoff")]
    pub max_backoff_s: f64,
}

impl RetryConfig {
    fn default_backoff_initial() -> f64 {
        1.0
    }
    fn default_backoff_factor() -> f64 {
        2.0
    }
    fn default_max_backoff() -> f64 {
        60.0
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_initial_s: Self::default_backoff_initial(),
            backoff_factor: Self::default_backoff_factor(),
            max_backoff_s: Self::default_max_backoff(),
        }
    }
}

/// Compensating action reference for `on_error: rollback`.
///
/// `action` must name another action id in the same plan; `params` are merged
/// over the target's own params before template resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RollbackConfig {
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// One node of the plan DAG: a typed call to a capability module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    pub id: String,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub on_error: OnErrorBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackConfig>,
    #[serde(default = "Action::default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_required: Option<String>,
    #[serde(default)]
    pub requires_approval: bool,
}

impl Action {
    fn default_timeout_s() -> f64 {
        60.0
    }

    /// The `module.action` key used by rate limiting and schema lookup.
    pub fn action_key(&self) -> String {
        format!("{}.{}", self.module, self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    pub plan_id: String,
    #[serde(default = "Plan::default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub mode: PlanMode,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_defaults: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

impl Plan {
    fn default_protocol_version() -> String {
        PROTOCOL_VERSION.to_string()
    }

    pub fn get_action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// The effective retry config for an action: its own, else the plan
    /// defaults, else a single attempt.
    pub fn retry_for(&self, action: &Action) -> RetryConfig {
        action
            .retry
            .clone()
            .or_else(|| self.retry_defaults.clone())
            .unwrap_or_default()
    }

    /// Index of action id -> position, for O(1) lookups during scheduling.
    pub fn action_index(&self) -> HashMap<&str, usize> {
        self.actions
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id.as_str(), i))
            .collect()
    }
}
