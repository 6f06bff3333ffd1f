//! Plan group executor: bounded-concurrency fan-out of independent plans
//! with one aggregated result.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::executor::PlanExecutor;
use super::state::{ExecutionState, PlanStatus};
use crate::protocol::models::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Completed,
    PartialFailure,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanGroupResult {
    pub group_id: String,
    pub status: GroupStatus,
    pub summary: GroupSummary,
    pub plan_results: HashMap<String, ExecutionState>,
    pub errors: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct PlanGroupExecutor {
    executor: Arc<PlanExecutor>,
}

impl PlanGroupExecutor {
    pub fn new(executor: Arc<PlanExecutor>) -> Self {
        Self { executor }
    }

    pub async fn execute(
        &self,
        plans: Vec<Plan>,
        group_id: Option<String>,
        max_concurrent: usize,
        timeout_s: f64,
    ) -> PlanGroupResult {
        let group_id =
            group_id.unwrap_or_else(|| format!("group-{}", &Uuid::new_v4().simple().to_string()[..12]));
        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let mut handles = Vec::with_capacity(plans.len());
        for plan in plans {
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let plan_id = plan.plan_id.clone();
            handles.push((
                plan_id,
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    executor.run(plan).await
                }),
            ));
        }

        let mut plan_results = HashMap::new();
        let mut errors = HashMap::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(timeout_s);
        let mut timed_out = false;

        for (plan_id, handle) in handles {
            if timed_out {
                self.executor.cancel(&plan_id);
                handle.abort();
                errors.insert(plan_id, "group timed out".to_string());
                continue;
            }
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(Ok(state))) => {
                    plan_results.insert(plan_id, state);
                }
                Ok(Ok(Err(e))) => {
                    errors.insert(plan_id, e.to_string());
                }
                Ok(Err(join_err)) => {
                    errors.insert(plan_id, format!("execution task failed: {join_err}"));
                }
                Err(_) => {
                    timed_out = true;
                    self.executor.cancel(&plan_id);
                    errors.insert(plan_id, "group timed out".to_string());
                }
            }
        }

        let total = plan_results.len() + errors.len();
        let completed = plan_results
            .values()
            .filter(|s| s.plan_status == PlanStatus::Completed)
            .count();
        // A plan that ran to a failed/partial/cancelled terminal status
        // lands in plan_results, not errors; the group status must reflect
        // those outcomes too.
        let status = if timed_out {
            GroupStatus::Failed
        } else if errors.is_empty() && completed == total {
            GroupStatus::Completed
        } else if completed == 0 {
            GroupStatus::Failed
        } else {
            GroupStatus::PartialFailure
        };
        PlanGroupResult {
            group_id,
            status,
            summary: GroupSummary {
                total,
                completed,
                failed: total - completed,
            },
            plan_results,
            errors,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
