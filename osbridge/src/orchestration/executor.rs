//! Plan executor: wave-ordered execution with retries, rollback, approval
//! gates, timeouts and cooperative cancellation.
//!
//! The executor owns every mutation of a plan's [`ExecutionState`]; the
//! approval gate feeds decisions back through it. State is persisted on
//! every terminal per-action transition so a restarted daemon can resume
//! from the store.

use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};

use super::approval::{ApprovalDecision, ApprovalGate};
use super::resource_manager::ResourceManager;
use super::rollback::RollbackEngine;
use super::scheduler::compute_waves;
use super::state::{ActionStatus, ExecutionState, PlanStatus};
use super::state_store::PlanStateStore;
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{EventBus, Topic};
use crate::modules::{cancel_pair, CancelHandle, CancelSignal, ExecutionContext, ModuleRegistry};
use crate::protocol::models::{Action, OnErrorBehavior, Plan, PlanMode};
use crate::protocol::template::TemplateContext;
use crate::recording::ShadowRecorder;
use crate::security::{ActionSecurityInfo, GuardOutcome, SecurityManager};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Global cap on concurrently running actions per plan.
    pub max_concurrent_actions: usize,
    /// Unresolvable template references fail the action instead of
    /// substituting a literal marker.
    pub strict_templates: bool,
    pub working_directory: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: 8,
            strict_templates: true,
            working_directory: std::env::temp_dir(),
        }
    }
}

pub struct PlanExecutor {
    registry: Arc<ModuleRegistry>,
    security: Arc<SecurityManager>,
    resources: Arc<ResourceManager>,
    state_store: Arc<PlanStateStore>,
    approval: Arc<ApprovalGate>,
    rollback: RollbackEngine,
    bus: Arc<EventBus>,
    recorder: Option<Arc<ShadowRecorder>>,
    config: ExecutorConfig,
    inflight: Mutex<HashMap<String, Arc<CancelHandle>>>,
}

impl PlanExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ModuleRegistry>,
        security: Arc<SecurityManager>,
        resources: Arc<ResourceManager>,
        state_store: Arc<PlanStateStore>,
        approval: Arc<ApprovalGate>,
        bus: Arc<EventBus>,
        recorder: Option<Arc<ShadowRecorder>>,
        config: ExecutorConfig,
    ) -> Self {
        let rollback = RollbackEngine::new(registry.clone(), security.clone());
        Self {
            registry,
            security,
            resources,
            state_store,
            approval,
            rollback,
            bus,
            recorder,
            config,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn approval_gate(&self) -> &Arc<ApprovalGate> {
        &self.approval
    }

    pub fn state_store(&self) -> &Arc<PlanStateStore> {
        &self.state_store
    }

    /// Cancel an in-flight plan. Idempotent; false when the plan is not
    /// running.
    pub fn cancel(&self, plan_id: &str) -> bool {
        let handle = self
            .inflight
            .lock()
            .ok()
            .and_then(|inflight| inflight.get(plan_id).cloned());
        match handle {
            Some(handle) => {
                handle.cancel();
                self.approval.drop_plan(plan_id);
                self.bus
                    .emit(Topic::Plans, "plan_cancel_requested", json!({"plan_id": plan_id}));
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, plan_id: &str) -> bool {
        self.inflight
            .lock()
            .map(|inflight| inflight.contains_key(plan_id))
            .unwrap_or(false)
    }

    /// Execute a validated plan to a terminal status. The returned state is
    /// also persisted in the state store; plan-level failures are expressed
    /// in `plan_status`, not as `Err`.
    pub async fn run(&self, plan: Plan) -> BridgeResult<ExecutionState> {
        let plan = Arc::new(plan);
        let (handle, signal) = cancel_pair();
        let handle = Arc::new(handle);
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.insert(plan.plan_id.clone(), handle.clone());
        }

        let result = self.run_inner(&plan, &handle, signal).await;

        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&plan.plan_id);
        }
        self.approval.drop_plan(&plan.plan_id);

        if let (Ok(state), Some(recorder)) = (&result, &self.recorder) {
            recorder.observe(&plan, state);
        }
        result
    }

    async fn run_inner(
        &self,
        plan: &Arc<Plan>,
        handle: &Arc<CancelHandle>,
        signal: CancelSignal,
    ) -> BridgeResult<ExecutionState> {
        let waves = compute_waves(plan)?;

        let mut initial =
            ExecutionState::new(&plan.plan_id, plan.actions.iter().map(|a| a.id.clone()));
        initial.plan_status = PlanStatus::Running;
        initial.record_trail("plan_started", None);
        self.state_store.save(&initial).await?;
        self.bus.emit(
            Topic::Plans,
            "plan_started",
            json!({"plan_id": plan.plan_id, "actions": plan.actions.len()}),
        );

        let shared = Arc::new(AsyncMutex::new(initial));
        let fatal = Arc::new(AtomicBool::new(false));
        let global_sem = Arc::new(Semaphore::new(self.config.max_concurrent_actions.max(1)));

        let deadline = plan
            .timeout_seconds
            .map(|s| tokio::time::Instant::now() + Duration::from_secs_f64(s));

        for wave in &waves {
            if signal.is_cancelled() || fatal.load(Ordering::Acquire) {
                break;
            }
            let wave_futures = wave.iter().map(|action_id| {
                self.run_action(plan, action_id, &shared, &fatal, &global_sem, &signal)
            });
            let wave_run = futures::future::join_all(wave_futures);
            match deadline {
                Some(deadline) => {
                    tokio::pin!(wave_run);
                    tokio::select! {
                        _ = &mut wave_run => {}
                        _ = tokio::time::sleep_until(deadline) => {
                            tracing::warn!(plan_id = %plan.plan_id, "plan timeout breached; cancelling");
                            handle.cancel();
                            wave_run.await;
                        }
                    }
                }
                None => {
                    wave_run.await;
                }
            }
        }

        // Settle anything that never ran.
        let cancelled = signal.is_cancelled();
        let state = {
            let mut state = shared.lock().await;
            for action_state in state.actions.values_mut() {
                if !action_state.status.is_terminal() {
                    action_state.status = if cancelled {
                        ActionStatus::Cancelled
                    } else {
                        ActionStatus::Skipped
                    };
                }
            }
            state.plan_status = self.final_status(plan, &state, cancelled);
            state.finished_at = Some(chrono::Utc::now());
            state.record_trail("plan_finished", None);
            state.clone()
        };
        self.state_store.save(&state).await?;
        self.bus.emit(
            Topic::Plans,
            "plan_finished",
            json!({"plan_id": plan.plan_id, "status": state.plan_status.as_str()}),
        );
        Ok(state)
    }

    fn final_status(&self, plan: &Plan, state: &ExecutionState, cancelled: bool) -> PlanStatus {
        if cancelled {
            return PlanStatus::Cancelled;
        }
        let failed: Vec<&str> = state
            .actions
            .iter()
            .filter(|(_, a)| a.status == ActionStatus::Failed)
            .map(|(id, _)| id.as_str())
            .collect();
        if failed.is_empty() {
            return PlanStatus::Completed;
        }
        let all_continue = failed.iter().all(|id| {
            plan.get_action(id)
                .map(|a| a.on_error == OnErrorBehavior::Continue)
                .unwrap_or(false)
        });
        if all_continue {
            PlanStatus::Partial
        } else {
            PlanStatus::Failed
        }
    }

    async fn run_action(
        &self,
        plan: &Arc<Plan>,
        action_id: &str,
        shared: &Arc<AsyncMutex<ExecutionState>>,
        fatal: &Arc<AtomicBool>,
        global_sem: &Arc<Semaphore>,
        cancel: &CancelSignal,
    ) {
        let Some(original) = plan.get_action(action_id) else {
            return;
        };
        let mut action = original.clone();

        let _global = match global_sem.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        if cancel.is_cancelled() {
            self.mark_cancelled(plan, &action, shared).await;
            return;
        }

        // Dependencies must have succeeded; anything else skips this action.
        let unmet = {
            let state = shared.lock().await;
            action
                .depends_on
                .iter()
                .find(|dep| {
                    state
                        .action(dep)
                        .map(|a| a.status != ActionStatus::Succeeded)
                        .unwrap_or(true)
                })
                .cloned()
        };
        if let Some(dep) = unmet {
            let err = BridgeError::DependencyFailed(dep);
            {
                let mut state = shared.lock().await;
                let entry = state.action_mut(&action.id);
                entry.status = ActionStatus::Skipped;
                entry.error = Some(err.to_record());
                state.errors.insert(action.id.clone(), err.to_record());
                state.record_trail("action_skipped", Some(&action.id));
            }
            self.persist(shared).await;
            return;
        }

        if plan.mode == PlanMode::DryRun {
            let mut state = shared.lock().await;
            state.action_mut(&action.id).status = ActionStatus::Skipped;
            state.record_trail("action_dry_run", Some(&action.id));
            return;
        }

        // Approval gate on entry, for actions flagged in the plan or forced
        // to prompt by the profile.
        let needs_approval = action.requires_approval
            || matches!(
                self.security.guard.check(&action.module, &action.action),
                Ok(GuardOutcome::RequiresApproval)
            );
        if needs_approval {
            match self.suspend_for_approval(plan, &action, shared, cancel).await {
                Ok(None) => {}
                Ok(Some(edited)) => action.params = edited,
                Err(err) if matches!(err, BridgeError::Cancelled) => {
                    self.mark_cancelled(plan, &action, shared).await;
                    return;
                }
                Err(err) => {
                    self.fail_action(plan, &action, err, shared, fatal, cancel).await;
                    return;
                }
            }
        }

        let retry = plan.retry_for(&action);
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                self.mark_cancelled(plan, &action, shared).await;
                return;
            }

            {
                let mut state = shared.lock().await;
                let entry = state.action_mut(&action.id);
                entry.status = ActionStatus::Running;
                entry.attempt = attempt;
                if entry.first_started_at.is_none() {
                    entry.first_started_at = Some(chrono::Utc::now());
                }
                state.record_trail("action_started", Some(&action.id));
            }
            self.security
                .audit
                .action_started(&plan.plan_id, &action.id, &action.action_key(), attempt);

            match self.attempt_action(plan, &action, shared, cancel).await {
                Ok(result) => {
                    self.security
                        .audit
                        .action_succeeded(&plan.plan_id, &action.id, attempt);
                    let (sanitized, changed) = self.security.sanitize_output(&result);
                    self.security
                        .audit
                        .action_sanitised(&plan.plan_id, &action.id, changed);
                    {
                        let mut state = shared.lock().await;
                        let entry = state.action_mut(&action.id);
                        entry.status = ActionStatus::Succeeded;
                        entry.result = Some(sanitized.clone());
                        entry.last_finished_at = Some(chrono::Utc::now());
                        state.results.insert(action.id.clone(), sanitized);
                        state.record_trail("action_succeeded", Some(&action.id));
                    }
                    self.persist(shared).await;
                    return;
                }
                Err(BridgeError::Cancelled) => {
                    self.mark_cancelled(plan, &action, shared).await;
                    return;
                }
                Err(err) => {
                    let retryable = action.on_error == OnErrorBehavior::Retry
                        && err.is_retryable()
                        && attempt < max_attempts;
                    if retryable {
                        let delay = backoff_delay(&retry, attempt);
                        tracing::info!(
                            plan_id = %plan.plan_id,
                            action_id = %action.id,
                            attempt,
                            delay_s = delay.as_secs_f64(),
                            error = %err,
                            "action failed; retrying after backoff"
                        );
                        {
                            let mut state = shared.lock().await;
                            state.action_mut(&action.id).status = ActionStatus::Pending;
                            state.record_trail("action_retry_scheduled", Some(&action.id));
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                self.mark_cancelled(plan, &action, shared).await;
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    self.fail_action(plan, &action, err, shared, fatal, cancel).await;
                    return;
                }
            }
        }
    }

    /// One dispatch attempt: admission pipeline, template resolution,
    /// module lookup, resource permit, execution with timeout and cancel.
    async fn attempt_action(
        &self,
        plan: &Arc<Plan>,
        action: &Action,
        shared: &Arc<AsyncMutex<ExecutionState>>,
        cancel: &CancelSignal,
    ) -> BridgeResult<Value> {
        let info = self.security_info(action);
        self.security.admit(plan, action, &info).await?;

        let (results, statuses) = {
            let state = shared.lock().await;
            let statuses: HashMap<String, String> = state
                .actions
                .iter()
                .map(|(id, a)| (id.clone(), a.status.as_str().to_string()))
                .collect();
            (state.results.clone(), statuses)
        };
        let template = TemplateContext {
            plan,
            results: &results,
            statuses: &statuses,
            strict: self.config.strict_templates,
        };
        let params = template.resolve_params(&action.params)?;

        let module = self.registry.get(&action.module)?;
        let _permit = self.resources.acquire(&action.module).await?;

        let ctx = ExecutionContext {
            plan_id: plan.plan_id.clone(),
            action_id: action.id.clone(),
            previous_results: Arc::new(results),
            working_directory: self.config.working_directory.clone(),
            security: self.security.clone(),
            cancel: cancel.clone(),
        };

        let timeout = Duration::from_secs_f64(action.timeout_s);
        let execution = module.execute(&action.action, &params, &ctx);
        tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            outcome = tokio::time::timeout(timeout, execution) => match outcome {
                Ok(result) => result,
                Err(_) => Err(BridgeError::Timeout(action.timeout_s)),
            },
        }
    }

    /// Security metadata for one action, merged from the module manifest.
    fn security_info(&self, action: &Action) -> ActionSecurityInfo {
        let spec = self
            .registry
            .manifest(&action.module)
            .and_then(|m| m.action(&action.action).cloned());
        match spec {
            Some(spec) => ActionSecurityInfo {
                permission_required: spec.permission_required.clone(),
                risk_level: spec.risk_level,
                sensitive: spec.is_sensitive(),
            },
            None => ActionSecurityInfo::default(),
        }
    }

    async fn suspend_for_approval(
        &self,
        plan: &Arc<Plan>,
        action: &Action,
        shared: &Arc<AsyncMutex<ExecutionState>>,
        cancel: &CancelSignal,
    ) -> BridgeResult<Option<serde_json::Map<String, Value>>> {
        {
            let mut state = shared.lock().await;
            state.action_mut(&action.id).status = ActionStatus::AwaitingApproval;
            state.plan_status = PlanStatus::AwaitingApproval;
            state.record_trail("awaiting_approval", Some(&action.id));
        }
        self.persist(shared).await;
        self.bus.emit(
            Topic::Plans,
            "plan_suspended",
            json!({
                "plan_id": plan.plan_id,
                "action_id": action.id,
                "summary": format!(
                    "{} wants to run {} with params {}",
                    plan.plan_id,
                    action.action_key(),
                    Value::Object(action.params.clone())
                ),
            }),
        );

        let rx = self.approval.register(&plan.plan_id, &action.id)?;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            decision = rx => match decision {
                Ok(ApprovalDecision::Approve) => Ok(None),
                Ok(ApprovalDecision::Edit { params }) => Ok(Some(params)),
                Ok(ApprovalDecision::Reject { reason }) => Err(BridgeError::UserRejected(reason)),
                Err(_) => Err(BridgeError::Cancelled),
            },
        };

        if !matches!(outcome, Err(BridgeError::Cancelled)) {
            let mut state = shared.lock().await;
            state.plan_status = PlanStatus::Running;
            self.bus.emit(
                Topic::Plans,
                "plan_resumed",
                json!({"plan_id": plan.plan_id, "action_id": action.id}),
            );
        }
        outcome
    }

    async fn fail_action(
        &self,
        plan: &Arc<Plan>,
        action: &Action,
        err: BridgeError,
        shared: &Arc<AsyncMutex<ExecutionState>>,
        fatal: &Arc<AtomicBool>,
        cancel: &CancelSignal,
    ) {
        let record = err.to_record();
        self.security
            .audit
            .action_failed(&plan.plan_id, &action.id, &record.code, &record.message);
        self.security
            .audit
            .error(&plan.plan_id, Some(&action.id), &record.code, &record.message);

        {
            let mut state = shared.lock().await;
            let entry = state.action_mut(&action.id);
            entry.status = ActionStatus::Failed;
            entry.error = Some(record.clone());
            entry.last_finished_at = Some(chrono::Utc::now());
            state.errors.insert(action.id.clone(), record);
            state.record_trail("action_failed", Some(&action.id));
        }
        self.persist(shared).await;

        match action.on_error {
            OnErrorBehavior::Continue => {}
            OnErrorBehavior::Rollback => {
                fatal.store(true, Ordering::Release);
                let (results, statuses) = {
                    let state = shared.lock().await;
                    let statuses: HashMap<String, String> = state
                        .actions
                        .iter()
                        .map(|(id, a)| (id.clone(), a.status.as_str().to_string()))
                        .collect();
                    (state.results.clone(), statuses)
                };
                self.rollback
                    .execute(
                        plan,
                        action,
                        &results,
                        &statuses,
                        &self.config.working_directory,
                        cancel.clone(),
                        0,
                    )
                    .await;
            }
            _ => fatal.store(true, Ordering::Release),
        }
    }

    async fn mark_cancelled(
        &self,
        plan: &Arc<Plan>,
        action: &Action,
        shared: &Arc<AsyncMutex<ExecutionState>>,
    ) {
        {
            let mut state = shared.lock().await;
            let entry = state.action_mut(&action.id);
            if entry.status.is_terminal() {
                return;
            }
            entry.status = ActionStatus::Cancelled;
            entry.last_finished_at = Some(chrono::Utc::now());
            state.record_trail("action_cancelled", Some(&action.id));
        }
        self.security.audit.action_cancelled(&plan.plan_id, &action.id);
        self.persist(shared).await;
    }

    async fn persist(&self, shared: &Arc<AsyncMutex<ExecutionState>>) {
        let snapshot = shared.lock().await.clone();
        if let Err(e) = self.state_store.save(&snapshot).await {
            tracing::error!(plan_id = %snapshot.plan_id, error = %e, "failed to persist execution state");
        }
    }
}

/// Exponential backoff with uniform 0.5-1.5 jitter.
fn backoff_delay(retry: &crate::protocol::models::RetryConfig, attempt: u32) -> Duration {
    let base = (retry.backoff_initial_s * retry.backoff_factor.powi(attempt as i32 - 1))
        .min(retry.max_backoff_s);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64((base * jitter).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = crate::protocol::models::RetryConfig {
            max_attempts: 5,
            backoff_initial_s: 1.0,
            backoff_factor: 2.0,
            max_backoff_s: 3.0,
        };
        let d1 = backoff_delay(&retry, 1).as_secs_f64();
        assert!((0.5..=1.5).contains(&d1));
        let d3 = backoff_delay(&retry, 3).as_secs_f64();
        // attempt 3: min(3.0, 4.0) = 3.0, jittered.
        assert!((1.5..=4.5).contains(&d3));
    }
}
