//! Trigger watchers: one runtime observer per condition kind.
//!
//! A watcher observes its event source and invokes the fire callback each
//! time the condition is satisfied. Watchers are created for `active`
//! triggers only and destroyed on deactivation or deletion.

pub mod composite;
pub mod system;
pub mod temporal;

use async_trait::async_trait;
use std::sync::Arc;

use super::models::{TriggerCondition, TriggerDefinition, TriggerFireEvent};
use crate::errors::{BridgeError, BridgeResult};

pub type FireCallback = Arc<dyn Fn(TriggerFireEvent) + Send + Sync>;

#[async_trait]
pub trait Watcher: Send + Sync {
    /// Begin observing; `callback` is invoked on every condition match.
    async fn start(&self, callback: FireCallback) -> BridgeResult<()>;
    /// Stop observing and release resources. Idempotent.
    async fn stop(&self);
}

/// Build the watcher for a trigger's condition.
pub fn build_watcher(trigger: &TriggerDefinition) -> BridgeResult<Box<dyn Watcher>> {
    trigger
        .condition
        .validate()
        .map_err(BridgeError::WatcherFailed)?;
    build_for_condition(trigger, &trigger.condition)
}

pub(crate) fn build_for_condition(
    trigger: &TriggerDefinition,
    condition: &TriggerCondition,
) -> BridgeResult<Box<dyn Watcher>> {
    Ok(match condition {
        TriggerCondition::Cron { schedule } => {
            Box::new(temporal::CronWatcher::new(trigger, schedule)?)
        }
        TriggerCondition::Interval { seconds } => {
            Box::new(temporal::IntervalWatcher::new(trigger, *seconds))
        }
        TriggerCondition::Once { at } => Box::new(temporal::OnceWatcher::new(trigger, *at)),
        TriggerCondition::Filesystem {
            path,
            events,
            coalesce_ms,
        } => Box::new(system::FileSystemWatcher::new(
            trigger,
            path,
            events.clone(),
            *coalesce_ms,
        )),
        TriggerCondition::Process {
            name,
            pid,
            on,
            poll_interval_s,
        } => Box::new(system::ProcessWatcher::new(
            trigger,
            name.clone(),
            *pid,
            *on,
            *poll_interval_s,
        )),
        TriggerCondition::Resource {
            metric,
            threshold_pct,
            hysteresis_pct,
            poll_interval_s,
        } => Box::new(system::ResourceWatcher::new(
            trigger,
            *metric,
            *threshold_pct,
            *hysteresis_pct,
            *poll_interval_s,
        )),
        TriggerCondition::Composite {
            op,
            children,
            within_s,
        } => {
            let mut child_watchers = Vec::with_capacity(children.len());
            for child in children {
                child_watchers.push(build_for_condition(trigger, child)?);
            }
            Box::new(composite::CompositeWatcher::new(
                trigger,
                *op,
                child_watchers,
                *within_s,
            ))
        }
    })
}
