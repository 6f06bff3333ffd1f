//! Shadow recorder: captures every plan executed while a session is active.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::models::{RecordedPlan, RecordingStatus, WorkflowRecording};
use super::replayer::WorkflowReplayer;
use crate::errors::{BridgeError, BridgeResult};
use crate::orchestration::state::ExecutionState;
use crate::protocol::models::Plan;

pub struct ShadowRecorder {
    /// recording_id -> recording (active and stopped).
    recordings: Mutex<HashMap<String, WorkflowRecording>>,
    /// At most one recording captures at a time.
    active: Mutex<Option<String>>,
}

impl ShadowRecorder {
    pub fn new() -> Self {
        Self {
            recordings: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
        }
    }

    pub fn start(&self, title: &str, description: &str) -> BridgeResult<WorkflowRecording> {
        let mut active = self.lock_active()?;
        if let Some(existing) = active.as_ref() {
            return Err(BridgeError::Internal(format!(
                "recording '{existing}' is already active"
            )));
        }
        let recording = WorkflowRecording::create(title, description);
        *active = Some(recording.recording_id.clone());
        self.lock_recordings()?
            .insert(recording.recording_id.clone(), recording.clone());
        tracing::info!(recording_id = %recording.recording_id, title, "recording started");
        Ok(recording)
    }

    /// Stop the active recording and attach its generated replay plan.
    pub fn stop(&self, recording_id: &str) -> BridgeResult<WorkflowRecording> {
        {
            let mut active = self.lock_active()?;
            if active.as_deref() == Some(recording_id) {
                *active = None;
            }
        }
        let mut recordings = self.lock_recordings()?;
        let recording = recordings
            .get_mut(recording_id)
            .ok_or_else(|| BridgeError::Internal(format!("no recording '{recording_id}'")))?;
        recording.status = RecordingStatus::Stopped;
        recording.stopped_at = Some(Utc::now());
        recording.generated_plan = Some(WorkflowReplayer::generate(recording));
        tracing::info!(recording_id, plans = recording.plans.len(), "recording stopped");
        Ok(recording.clone())
    }

    /// Capture one executed plan into the active recording, if any.
    pub fn observe(&self, plan: &Plan, state: &ExecutionState) {
        let Ok(active) = self.lock_active() else {
            return;
        };
        let Some(recording_id) = active.clone() else {
            return;
        };
        drop(active);

        if let Ok(mut recordings) = self.lock_recordings() {
            if let Some(recording) = recordings.get_mut(&recording_id) {
                let sequence = recording.plans.len() + 1;
                let plan_data = serde_json::to_value(plan).unwrap_or_default();
                recording.plans.push(RecordedPlan {
                    plan_id: plan.plan_id.clone(),
                    sequence,
                    added_at: Utc::now(),
                    plan_data,
                    final_status: state.plan_status.as_str().to_string(),
                    action_count: plan.actions.len(),
                });
            }
        }
    }

    pub fn get(&self, recording_id: &str) -> BridgeResult<Option<WorkflowRecording>> {
        Ok(self.lock_recordings()?.get(recording_id).cloned())
    }

    pub fn list(&self) -> BridgeResult<Vec<WorkflowRecording>> {
        let recordings = self.lock_recordings()?;
        let mut list: Vec<WorkflowRecording> = recordings.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    pub fn active_id(&self) -> Option<String> {
        self.lock_active().ok().and_then(|a| a.clone())
    }

    fn lock_recordings(
        &self,
    ) -> BridgeResult<std::sync::MutexGuard<'_, HashMap<String, WorkflowRecording>>> {
        self.recordings
            .lock()
            .map_err(|_| BridgeError::Internal("recorder lock poisoned".to_string()))
    }

    fn lock_active(&self) -> BridgeResult<std::sync::MutexGuard<'_, Option<String>>> {
        self.active
            .lock()
            .map_err(|_| BridgeError::Internal("recorder lock poisoned".to_string()))
    }
}

impl Default for ShadowRecorder {
    fn default() -> Self {
        Self::new()
    }
}
