//! Trigger data model: definitions, conditions, fire events, health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Maximum nesting depth for composite conditions.
pub const MAX_CONDITION_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsEventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessTransition {
    Start,
    Stop,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMetric {
    Cpu,
    Memory,
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeOp {
    /// All children fired (since the composite armed).
    All,
    /// Any child fired.
    Any,
    /// The (single) child did not fire within the window.
    Not,
    /// Children fired in order, each within `within_s` of the previous.
    Seq,
    /// Any child fired within the trailing window.
    Window,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    Cron {
        schedule: String,
    },
    Interval {
        seconds: f64,
    },
    Once {
        at: DateTime<Utc>,
    },
    Filesystem {
        path: String,
        #[serde(default)]
        events: Vec<FsEventKind>,
        /// Storm coalescing window; multiple raw events inside it produce
        /// one fire.
        #[serde(default = "default_coalesce_ms")]
        coalesce_ms: u64,
    },
    Process {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        #[serde(default = "default_transition")]
        on: ProcessTransition,
        #[serde(default = "default_poll_s")]
        poll_interval_s: f64,
    },
    Resource {
        metric: ResourceMetric,
        threshold_pct: f64,
        /// The metric must drop below `threshold - hysteresis` before the
        /// watcher re-arms.
        #[serde(default = "default_hysteresis")]
        hysteresis_pct: f64,
        #[serde(default = "default_poll_s")]
        poll_interval_s: f64,
    },
    Composite {
        op: CompositeOp,
        children: Vec<TriggerCondition>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within_s: Option<f64>,
    },
}

fn default_coalesce_ms() -> u64 {
    500
}
fn default_transition() -> ProcessTransition {
    ProcessTransition::Both
}
fn default_poll_s() -> f64 {
    5.0
}
fn default_hysteresis() -> f64 {
    5.0
}

impl TriggerCondition {
    pub fn depth(&self) -> usize {
        match self {
            TriggerCondition::Composite { children, .. } => {
                1 + children.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
            _ => 1,
        }
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), String> {
        if self.depth() > MAX_CONDITION_DEPTH {
            return Err(format!(
                "composite condition nests deeper than {MAX_CONDITION_DEPTH}"
            ));
        }
        self.validate_inner()
    }

    fn validate_inner(&self) -> Result<(), String> {
        match self {
            TriggerCondition::Interval { seconds } if *seconds <= 0.0 => {
                Err("interval seconds must be positive".to_string())
            }
            TriggerCondition::Process { name: None, pid: None, .. } => {
                Err("process condition needs a name or a pid".to_string())
            }
            TriggerCondition::Resource { threshold_pct, .. }
                if !(0.0..=100.0).contains(threshold_pct) =>
            {
                Err("resource threshold must be within 0-100%".to_string())
            }
            TriggerCondition::Composite { op, children, within_s } => {
                match op {
                    CompositeOp::Not if children.len() != 1 => {
                        return Err("NOT takes exactly one child".to_string())
                    }
                    CompositeOp::Seq if children.len() < 2 => {
                        return Err("SEQ needs at least two children".to_string())
                    }
                    CompositeOp::Seq | CompositeOp::Window | CompositeOp::Not
                        if within_s.is_none() =>
                    {
                        return Err(format!("{op:?} requires within_s"))
                    }
                    _ if children.is_empty() => {
                        return Err("composite condition has no children".to_string())
                    }
                    _ => {}
                }
                for child in children {
                    child.validate_inner()?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Queue,
    Preempt,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    #[default]
    Inactive,
    Active,
    Firing,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerHealth {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl Default for TriggerHealth {
    fn default() -> Self {
        Self {
            ok: true,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub trigger_id: String,
    pub name: String,
    pub condition: TriggerCondition,
    #[serde(default)]
    pub priority: i32,
    /// Untyped plan body instantiated on each fire.
    pub plan_template: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_lock: Option<String>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub state: TriggerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fire_count: u64,
    #[serde(default)]
    pub health: TriggerHealth,
}

impl TriggerDefinition {
    pub fn new(name: &str, condition: TriggerCondition, plan_template: Value) -> Self {
        Self {
            trigger_id: format!("trg-{}", &Uuid::new_v4().simple().to_string()[..12]),
            name: name.to_string(),
            condition,
            priority: 0,
            plan_template,
            resource_lock: None,
            conflict_policy: ConflictPolicy::default(),
            state: TriggerState::default(),
            enabled_at: None,
            last_fired_at: None,
            fire_count: 0,
            health: TriggerHealth::default(),
        }
    }
}

/// What a watcher hands the daemon when its condition is met.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerFireEvent {
    pub trigger_id: String,
    pub trigger_name: String,
    /// e.g. "cron.tick", "fs.modified", "process.start", "resource.cpu".
    pub event_type: String,
    pub fired_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl TriggerFireEvent {
    pub fn new(trigger: &TriggerDefinition, event_type: &str, payload: Value) -> Self {
        Self {
            trigger_id: trigger.trigger_id.clone(),
            trigger_name: trigger.name.clone(),
            event_type: event_type.to_string(),
            fired_at: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_serde_is_tagged() {
        let condition: TriggerCondition = serde_json::from_value(serde_json::json!({
            "type": "cron", "schedule": "*/5 * * * *"
        }))
        .unwrap();
        assert!(matches!(condition, TriggerCondition::Cron { .. }));
    }

    #[test]
    fn composite_depth_is_bounded() {
        let mut condition = TriggerCondition::Interval { seconds: 1.0 };
        for _ in 0..MAX_CONDITION_DEPTH {
            condition = TriggerCondition::Composite {
                op: CompositeOp::Any,
                children: vec![condition],
                within_s: None,
            };
        }
        assert!(condition.validate().is_err());
    }

    #[test]
    fn process_condition_needs_target() {
        let condition: TriggerCondition = serde_json::from_value(serde_json::json!({
            "type": "process", "on": "start"
        }))
        .unwrap();
        assert!(condition.validate().is_err());
    }

    #[test]
    fn seq_requires_window_and_children() {
        let bad = TriggerCondition::Composite {
            op: CompositeOp::Seq,
            children: vec![TriggerCondition::Interval { seconds: 1.0 }],
            within_s: Some(5.0),
        };
        assert!(bad.validate().is_err());

        let good = TriggerCondition::Composite {
            op: CompositeOp::Seq,
            children: vec![
                TriggerCondition::Interval { seconds: 1.0 },
                TriggerCondition::Interval { seconds: 2.0 },
            ],
            within_s: Some(5.0),
        };
        assert!(good.validate().is_ok());
    }
}
