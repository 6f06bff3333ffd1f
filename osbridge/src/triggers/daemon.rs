//! The trigger daemon: reactive plan launches.
//!
//! Owns the watcher lifecycle, the priority fire queue and its worker loop,
//! the conflict resolver, and trigger health. Definitions persist in the
//! trigger store; on boot the daemon reconstructs watchers for every
//! `active` trigger.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::conflict::ConflictResolver;
use super::context::SessionContextPropagator;
use super::models::{
    ConflictPolicy, TriggerCondition, TriggerDefinition, TriggerFireEvent, TriggerState,
};
use super::scheduler::{PriorityFireScheduler, QueuedFire};
use super::store::TriggerStore;
use super::watchers::{build_watcher, Watcher};
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{EventBus, Topic};
use crate::orchestration::{PlanExecutor, PlanStatus};
use crate::protocol::parser;

#[derive(Debug, Clone)]
pub struct TriggerDaemonConfig {
    pub max_concurrent_fires: usize,
    /// Consecutive failures after which a trigger is auto-disabled.
    pub failure_threshold: u32,
    /// How long a `queue`-policy fire waits for its resource.
    pub queue_wait_timeout_s: f64,
}

impl Default for TriggerDaemonConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fires: 5,
            failure_threshold: 5,
            queue_wait_timeout_s: 300.0,
        }
    }
}

pub struct TriggerDaemon {
    store: Arc<TriggerStore>,
    bus: Arc<EventBus>,
    executor: Arc<PlanExecutor>,
    propagator: Arc<SessionContextPropagator>,
    conflict: Arc<ConflictResolver>,
    scheduler: Arc<PriorityFireScheduler>,
    watchers: AsyncMutex<HashMap<String, Box<dyn Watcher>>>,
    config: TriggerDaemonConfig,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerDaemon {
    pub fn new(
        store: Arc<TriggerStore>,
        bus: Arc<EventBus>,
        executor: Arc<PlanExecutor>,
        config: TriggerDaemonConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            executor,
            propagator: Arc::new(SessionContextPropagator::new()),
            conflict: Arc::new(ConflictResolver::new()),
            scheduler: Arc::new(PriorityFireScheduler::new()),
            watchers: AsyncMutex::new(HashMap::new()),
            config,
            worker: Mutex::new(None),
        })
    }

    pub fn propagator(&self) -> &Arc<SessionContextPropagator> {
        &self.propagator
    }

    pub fn conflict_resolver(&self) -> &Arc<ConflictResolver> {
        &self.conflict
    }

    pub fn store(&self) -> &Arc<TriggerStore> {
        &self.store
    }

    /// Boot: reconstruct watchers for stored active triggers and start the
    /// fire worker.
    pub async fn start(self: &Arc<Self>) -> BridgeResult<()> {
        let active = self.store.list_by_state(TriggerState::Active)?;
        for trigger in active {
            if let Err(e) = self.start_watcher(&trigger).await {
                tracing::error!(trigger = %trigger.trigger_id, error = %e, "failed to restore watcher");
            }
        }

        let daemon = self.clone();
        let worker = tokio::spawn(async move {
            let gate = Arc::new(Semaphore::new(daemon.config.max_concurrent_fires.max(1)));
            loop {
                let fire = daemon.scheduler.next().await;
                let permit = match gate.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    daemon.handle_fire(fire).await;
                    drop(permit);
                });
            }
        });
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(old) = slot.replace(worker) {
                old.abort();
            }
        }
        tracing::info!("trigger daemon started");
        Ok(())
    }

    pub async fn stop(&self) {
        if let Ok(mut slot) = self.worker.lock() {
            if let Some(worker) = slot.take() {
                worker.abort();
            }
        }
        let mut watchers = self.watchers.lock().await;
        for (_, watcher) in watchers.iter() {
            watcher.stop().await;
        }
        watchers.clear();
        tracing::info!("trigger daemon stopped");
    }

    /// Register a new definition. Inactive triggers get no watcher until
    /// activation.
    pub async fn register(
        self: &Arc<Self>,
        trigger: TriggerDefinition,
    ) -> BridgeResult<TriggerDefinition> {
        trigger
            .condition
            .validate()
            .map_err(BridgeError::WatcherFailed)?;
        self.store.upsert(&trigger)?;
        if trigger.state == TriggerState::Active {
            self.start_watcher(&trigger).await?;
        }
        Ok(trigger)
    }

    pub async fn activate(self: &Arc<Self>, trigger_id: &str) -> BridgeResult<()> {
        let mut trigger = self.require(trigger_id)?;
        if trigger.state == TriggerState::Active {
            return Ok(());
        }
        trigger.state = TriggerState::Active;
        trigger.enabled_at = Some(chrono::Utc::now());
        trigger.health = Default::default();
        self.store.upsert(&trigger)?;
        self.start_watcher(&trigger).await
    }

    /// Deactivation atomically stops the watcher before flipping state.
    pub async fn deactivate(&self, trigger_id: &str) -> BridgeResult<()> {
        self.stop_watcher(trigger_id).await;
        let mut trigger = self.require(trigger_id)?;
        trigger.state = TriggerState::Inactive;
        self.store.upsert(&trigger)?;
        Ok(())
    }

    pub async fn delete(&self, trigger_id: &str) -> BridgeResult<bool> {
        self.stop_watcher(trigger_id).await;
        self.store.delete(trigger_id)
    }

    pub fn list(&self) -> BridgeResult<Vec<TriggerDefinition>> {
        self.store.list()
    }

    async fn start_watcher(self: &Arc<Self>, trigger: &TriggerDefinition) -> BridgeResult<()> {
        let watcher = build_watcher(trigger)?;
        let daemon = Arc::downgrade(self);
        let trigger_id = trigger.trigger_id.clone();
        let priority = trigger.priority;
        watcher
            .start(Arc::new(move |event: TriggerFireEvent| {
                if let Some(daemon) = daemon.upgrade() {
                    daemon.scheduler.enqueue(&trigger_id, priority, event);
                }
            }))
            .await?;
        let mut watchers = self.watchers.lock().await;
        if let Some(old) = watchers.insert(trigger.trigger_id.clone(), watcher) {
            old.stop().await;
        }
        Ok(())
    }

    async fn stop_watcher(&self, trigger_id: &str) {
        let removed = self.watchers.lock().await.remove(trigger_id);
        if let Some(watcher) = removed {
            watcher.stop().await;
        }
    }

    fn require(&self, trigger_id: &str) -> BridgeResult<TriggerDefinition> {
        self.store
            .get(trigger_id)?
            .ok_or_else(|| BridgeError::Internal(format!("no trigger '{trigger_id}'")))
    }

    async fn handle_fire(self: &Arc<Self>, fire: QueuedFire) {
        let Ok(Some(mut trigger)) = self.store.get(&fire.trigger_id) else {
            return;
        };
        if !matches!(trigger.state, TriggerState::Active | TriggerState::Firing) {
            tracing::debug!(trigger = %trigger.trigger_id, "dropping fire for non-active trigger");
            return;
        }

        let plan_id = format!(
            "trig-{}-{}",
            trigger.trigger_id,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        // Conflict resolution over the optional resource lock.
        if let Some(resource) = trigger.resource_lock.clone() {
            if !self.resolve_conflict(&trigger, &resource, &plan_id).await {
                return;
            }
        }

        let plan = match self.build_plan(&trigger, &fire.event, &plan_id) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(trigger = %trigger.trigger_id, error = %e, "fire produced an invalid plan");
                self.record_outcome(&mut trigger, false, Some(e.to_string())).await;
                if let Some(resource) = &trigger.resource_lock {
                    let _ = self.conflict.release(resource, &plan_id);
                }
                return;
            }
        };

        trigger.state = TriggerState::Firing;
        trigger.last_fired_at = Some(chrono::Utc::now());
        trigger.fire_count += 1;
        let _ = self.store.upsert(&trigger);
        self.bus.emit(
            Topic::Plans,
            "trigger_fired",
            json!({
                "trigger_id": trigger.trigger_id,
                "trigger_name": trigger.name,
                "plan_id": plan_id,
                "event_type": fire.event.event_type,
            }),
        );

        self.propagator.bind(&plan_id, fire.event.clone());
        let outcome = self.executor.run(plan).await;
        self.propagator.unbind(&plan_id);
        if let Some(resource) = &trigger.resource_lock {
            let _ = self.conflict.release(resource, &plan_id);
        }

        // A `once` condition disables itself after its single fire.
        let once = matches!(trigger.condition, TriggerCondition::Once { .. });
        match outcome {
            Ok(state) if state.plan_status != PlanStatus::Failed => {
                self.record_outcome(&mut trigger, true, None).await;
            }
            Ok(state) => {
                self.record_outcome(
                    &mut trigger,
                    false,
                    Some(format!("plan finished {}", state.plan_status.as_str())),
                )
                .await;
            }
            Err(e) => {
                self.record_outcome(&mut trigger, false, Some(e.to_string())).await;
            }
        }
        if once {
            let _ = self.deactivate(&trigger.trigger_id).await;
        }
    }

    /// Apply the trigger's conflict policy; true means the fire may proceed
    /// holding the lock.
    async fn resolve_conflict(
        self: &Arc<Self>,
        trigger: &TriggerDefinition,
        resource: &str,
        plan_id: &str,
    ) -> bool {
        let attempt = self
            .conflict
            .try_acquire(resource, plan_id, trigger.priority);
        let holder = match attempt {
            Ok(Ok(())) => return true,
            Ok(Err(holder)) => holder,
            Err(e) => {
                tracing::error!(error = %e, "conflict resolver failure");
                return false;
            }
        };

        match trigger.conflict_policy {
            ConflictPolicy::Reject => {
                self.bus.emit(
                    Topic::Plans,
                    "trigger_rejected",
                    json!({
                        "trigger_id": trigger.trigger_id,
                        "resource": resource,
                        "held_by": holder.plan_id,
                    }),
                );
                false
            }
            ConflictPolicy::Preempt if trigger.priority > holder.priority => {
                tracing::info!(
                    resource,
                    preempted = %holder.plan_id,
                    by = %plan_id,
                    "preempting lower-priority plan"
                );
                self.executor.cancel(&holder.plan_id);
                match self.conflict.preempt(resource, plan_id, trigger.priority) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::error!(error = %e, "preemption failed");
                        false
                    }
                }
            }
            // Preempt against an equal-or-higher holder degrades to queue.
            ConflictPolicy::Preempt | ConflictPolicy::Queue => {
                let timeout = Duration::from_secs_f64(self.config.queue_wait_timeout_s);
                match self
                    .conflict
                    .acquire_queued(resource, plan_id, trigger.priority, timeout)
                    .await
                {
                    Ok(true) => true,
                    Ok(false) => {
                        self.bus.emit(
                            Topic::Plans,
                            "trigger_rejected",
                            json!({
                                "trigger_id": trigger.trigger_id,
                                "resource": resource,
                                "reason": "queue wait timed out",
                            }),
                        );
                        false
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "queued acquire failed");
                        false
                    }
                }
            }
        }
    }

    /// Instantiate the plan template for one fire, injecting daemon
    /// metadata while preserving template-supplied keys.
    fn build_plan(
        &self,
        trigger: &TriggerDefinition,
        event: &TriggerFireEvent,
        plan_id: &str,
    ) -> BridgeResult<crate::protocol::models::Plan> {
        let mut body = trigger
            .plan_template
            .as_object()
            .cloned()
            .unwrap_or_else(Map::new);
        body.insert("plan_id".to_string(), Value::String(plan_id.to_string()));
        body.entry("protocol_version".to_string())
            .or_insert_with(|| Value::String(crate::protocol::PROTOCOL_VERSION.to_string()));

        let mut metadata = body
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        metadata.insert(
            "execution_source".to_string(),
            Value::String("trigger_daemon".to_string()),
        );
        metadata.insert(
            "trigger_id".to_string(),
            Value::String(trigger.trigger_id.clone()),
        );
        metadata.insert("trigger_name".to_string(), Value::String(trigger.name.clone()));
        metadata.insert(
            "fire_event_type".to_string(),
            Value::String(event.event_type.clone()),
        );
        body.insert("metadata".to_string(), Value::Object(metadata));

        parser::parse(&Value::Object(body))
    }

    async fn record_outcome(&self, trigger: &mut TriggerDefinition, ok: bool, error: Option<String>) {
        if ok {
            trigger.health.ok = true;
            trigger.health.last_error = None;
            trigger.health.consecutive_failures = 0;
            if trigger.state == TriggerState::Firing {
                trigger.state = TriggerState::Active;
            }
        } else {
            trigger.health.ok = false;
            trigger.health.consecutive_failures += 1;
            trigger.health.last_error = error.clone();
            if trigger.health.consecutive_failures >= self.config.failure_threshold {
                tracing::warn!(
                    trigger = %trigger.trigger_id,
                    failures = trigger.health.consecutive_failures,
                    "trigger auto-disabled after repeated failures"
                );
                trigger.state = TriggerState::Disabled;
                self.stop_watcher(&trigger.trigger_id).await;
                self.bus.emit(
                    Topic::Errors,
                    "trigger_disabled",
                    json!({
                        "trigger_id": trigger.trigger_id,
                        "consecutive_failures": trigger.health.consecutive_failures,
                        "last_error": error,
                    }),
                );
            } else if trigger.state == TriggerState::Firing {
                trigger.state = TriggerState::Active;
            }
        }
        if let Err(e) = self.store.upsert(trigger) {
            tracing::error!(error = %e, "failed to persist trigger health");
        }
    }
}
