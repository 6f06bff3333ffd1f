//! Time-based watchers: cron, interval, once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::Cron;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{FireCallback, Watcher};
use crate::errors::{BridgeError, BridgeResult};
use crate::triggers::models::{TriggerDefinition, TriggerFireEvent};

/// Shared identity snapshot the spawned loops stamp onto fire events.
#[derive(Clone, Debug)]
pub(crate) struct TriggerIdent {
    pub trigger_id: String,
    pub trigger_name: String,
}

impl TriggerIdent {
    pub(crate) fn of(trigger: &TriggerDefinition) -> Self {
        Self {
            trigger_id: trigger.trigger_id.clone(),
            trigger_name: trigger.name.clone(),
        }
    }

    pub(crate) fn event(&self, event_type: &str, payload: serde_json::Value) -> TriggerFireEvent {
        TriggerFireEvent {
            trigger_id: self.trigger_id.clone(),
            trigger_name: self.trigger_name.clone(),
            event_type: event_type.to_string(),
            fired_at: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug)]
pub struct CronWatcher {
    ident: TriggerIdent,
    schedule: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CronWatcher {
    pub fn new(trigger: &TriggerDefinition, schedule: &str) -> BridgeResult<Self> {
        parse_cron(schedule)?;
        Ok(Self {
            ident: TriggerIdent::of(trigger),
            schedule: schedule.to_string(),
            task: Mutex::new(None),
        })
    }
}

fn parse_cron(schedule: &str) -> BridgeResult<Cron> {
    Cron::new(schedule)
        .with_seconds_optional()
        .parse()
        .map_err(|e| BridgeError::WatcherFailed(format!("bad cron '{schedule}': {e}")))
}

#[async_trait]
impl Watcher for CronWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let ident = self.ident.clone();
        let cron = parse_cron(&self.schedule)?;
        let handle = tokio::spawn(async move {
            loop {
                // Next occurrence is recomputed after every fire.
                let now = Utc::now();
                let next: DateTime<Utc> = match cron.find_next_occurrence(&now, false) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::error!(trigger = %ident.trigger_id, error = %e, "cron schedule exhausted");
                        return;
                    }
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                callback(ident.event(
                    "cron.tick",
                    serde_json::json!({"scheduled_for": next.to_rfc3339()}),
                ));
            }
        });
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        abort_task(&self.task);
    }
}

pub struct IntervalWatcher {
    ident: TriggerIdent,
    seconds: f64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalWatcher {
    pub fn new(trigger: &TriggerDefinition, seconds: f64) -> Self {
        Self {
            ident: TriggerIdent::of(trigger),
            seconds,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Watcher for IntervalWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let ident = self.ident.clone();
        let period = Duration::from_secs_f64(self.seconds.max(0.001));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                callback(ident.event("interval.tick", serde_json::json!({})));
            }
        });
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        abort_task(&self.task);
    }
}

/// Fires once at a wall-clock instant, then falls silent; the daemon
/// deactivates the trigger on the fire.
pub struct OnceWatcher {
    ident: TriggerIdent,
    at: DateTime<Utc>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OnceWatcher {
    pub fn new(trigger: &TriggerDefinition, at: DateTime<Utc>) -> Self {
        Self {
            ident: TriggerIdent::of(trigger),
            at,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Watcher for OnceWatcher {
    async fn start(&self, callback: FireCallback) -> BridgeResult<()> {
        let ident = self.ident.clone();
        let at = self.at;
        let handle = tokio::spawn(async move {
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            callback(ident.event(
                "once.fired",
                serde_json::json!({"scheduled_for": at.to_rfc3339()}),
            ));
        });
        store_task(&self.task, handle);
        Ok(())
    }

    async fn stop(&self) {
        abort_task(&self.task);
    }
}

pub(crate) fn store_task(slot: &Mutex<Option<JoinHandle<()>>>, handle: JoinHandle<()>) {
    if let Ok(mut task) = slot.lock() {
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }
}

pub(crate) fn abort_task(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Ok(mut task) = slot.lock() {
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}
