//! Workflow recording data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Active,
    Stopped,
}

/// One plan execution captured in a recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedPlan {
    pub plan_id: String,
    /// 1-based position in the recording.
    pub sequence: usize,
    pub added_at: DateTime<Utc>,
    /// The original plan body as submitted.
    pub plan_data: Value,
    pub final_status: String,
    pub action_count: usize,
}

/// A named session capturing a sequence of plan executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecording {
    pub recording_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: RecordingStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub plans: Vec<RecordedPlan>,
    /// Replay plan generated when the recording stops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_plan: Option<Value>,
}

impl WorkflowRecording {
    pub fn create(title: &str, description: &str) -> Self {
        Self {
            recording_id: format!("rec-{}", &Uuid::new_v4().simple().to_string()[..12]),
            title: title.to_string(),
            description: description.to_string(),
            status: RecordingStatus::Active,
            created_at: Utc::now(),
            stopped_at: None,
            plans: Vec::new(),
            generated_plan: None,
        }
    }

    pub fn summary(&self) -> Value {
        serde_json::json!({
            "recording_id": self.recording_id,
            "title": self.title,
            "description": self.description,
            "status": self.status,
            "created_at": self.created_at,
            "stopped_at": self.stopped_at,
            "plan_count": self.plans.len(),
        })
    }
}
