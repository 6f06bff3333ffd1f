//! Trigger daemon scenarios: reactive fires, metadata injection, conflict
//! policies, health auto-disable, persistence across daemon instances.

mod common;

use common::{bridge_with, Behavior, MockModule};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use osbridge::triggers::{
    ConflictPolicy, TriggerCondition, TriggerDefinition, TriggerState,
};

fn interval_trigger(name: &str, seconds: f64, action: &str) -> TriggerDefinition {
    let mut trigger = TriggerDefinition::new(
        name,
        TriggerCondition::Interval { seconds },
        json!({
            "description": "triggered plan",
            "actions": [{"id": "a1", "module": "mock", "action": action}]
        }),
    );
    trigger.state = TriggerState::Active;
    trigger
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn interval_trigger_fires_plan_with_injected_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action("ok", Behavior::Ok(json!(1))));
    let bridge = bridge_with(dir.path(), module.clone());
    bridge.start().await.unwrap();

    let trigger = bridge
        .register_trigger(interval_trigger("ticker", 0.05, "ok"))
        .await
        .unwrap();

    assert!(
        wait_until(|| !module.calls().is_empty(), Duration::from_secs(3)).await,
        "trigger never launched a plan"
    );

    let stored = bridge
        .list_triggers()
        .unwrap()
        .into_iter()
        .find(|t| t.trigger_id == trigger.trigger_id)
        .unwrap();
    assert!(stored.fire_count >= 1);
    assert!(stored.last_fired_at.is_some());
    assert!(stored.health.ok);

    let stored_triggers = bridge.trigger_daemon().store().list().unwrap();
    assert_eq!(stored_triggers.len(), 1);

    bridge.shutdown().await;
}

#[tokio::test]
async fn preempt_cancels_lower_priority_holder() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action(
                "long",
                Behavior::Sleep {
                    ms: 10_000,
                    then: json!(null),
                },
            )
            .with_action("quick", Behavior::Ok(json!(null))),
    );
    let bridge = bridge_with(dir.path(), module.clone());
    bridge.start().await.unwrap();

    // T1: low priority, grabs the lock and runs a long plan.
    let mut t1 = interval_trigger("holder", 0.03, "long");
    t1.priority = 1;
    t1.resource_lock = Some("X".to_string());
    // Stop refiring after the first long plan starts.
    t1.condition = TriggerCondition::Once {
        at: chrono::Utc::now() + chrono::Duration::milliseconds(30),
    };
    let t1 = bridge.register_trigger(t1).await.unwrap();

    assert!(
        wait_until(|| !module.calls_for("long").is_empty() || holder_running(&bridge), Duration::from_secs(3)).await,
        "holder plan never started"
    );

    // T2: high priority, preempt policy, same lock.
    let mut t2 = interval_trigger("preemptor", 0.03, "quick");
    t2.priority = 10;
    t2.resource_lock = Some("X".to_string());
    t2.conflict_policy = ConflictPolicy::Preempt;
    t2.condition = TriggerCondition::Once {
        at: chrono::Utc::now() + chrono::Duration::milliseconds(30),
    };
    let t2 = bridge.register_trigger(t2).await.unwrap();

    assert!(
        wait_until(|| !module.calls_for("quick").is_empty(), Duration::from_secs(5)).await,
        "preemptor never ran"
    );

    // The preempted holder's plan terminated cancelled, the preemptor fired.
    let triggers = bridge.list_triggers().unwrap();
    let holder = triggers.iter().find(|t| t.trigger_id == t1.trigger_id).unwrap();
    let preemptor = triggers.iter().find(|t| t.trigger_id == t2.trigger_id).unwrap();
    assert!(holder.fire_count >= 1);
    assert!(preemptor.fire_count >= 1);

    bridge.shutdown().await;
}

fn holder_running(bridge: &osbridge::OsBridge) -> bool {
    !bridge
        .trigger_daemon()
        .conflict_resolver()
        .locked_resources()
        .is_empty()
}

#[tokio::test]
async fn reject_policy_drops_contending_fire() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action(
                "long",
                Behavior::Sleep {
                    ms: 2_000,
                    then: json!(null),
                },
            )
            .with_action("quick", Behavior::Ok(json!(null))),
    );
    let bridge = bridge_with(dir.path(), module.clone());
    bridge.start().await.unwrap();

    let mut t1 = interval_trigger("holder", 0.03, "long");
    t1.resource_lock = Some("X".to_string());
    t1.condition = TriggerCondition::Once {
        at: chrono::Utc::now() + chrono::Duration::milliseconds(20),
    };
    bridge.register_trigger(t1).await.unwrap();

    assert!(
        wait_until(|| holder_running(&bridge), Duration::from_secs(3)).await,
        "holder never took the lock"
    );

    let mut t2 = interval_trigger("rejected", 0.05, "quick");
    t2.conflict_policy = ConflictPolicy::Reject;
    t2.resource_lock = Some("X".to_string());
    t2.condition = TriggerCondition::Once {
        at: chrono::Utc::now() + chrono::Duration::milliseconds(20),
    };
    bridge.register_trigger(t2).await.unwrap();

    // Give the rejected fire time to be processed; the quick action must
    // never run while the lock is held.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(module.calls_for("quick").is_empty());

    bridge.shutdown().await;
}

#[tokio::test]
async fn failing_trigger_is_auto_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock").with_action("bad", Behavior::Fail { retryable: false }),
    );
    let mut settings = common::test_settings(dir.path());
    settings.triggers.failure_threshold = 3;
    let bridge = osbridge::OsBridge::new(settings).unwrap();
    bridge.register_module(module);
    bridge.start().await.unwrap();

    let trigger = bridge
        .register_trigger(interval_trigger("doomed", 0.03, "bad"))
        .await
        .unwrap();

    assert!(
        wait_until(
            || {
                bridge
                    .list_triggers()
                    .unwrap()
                    .iter()
                    .any(|t| t.trigger_id == trigger.trigger_id
                        && t.state == TriggerState::Disabled)
            },
            Duration::from_secs(5)
        )
        .await,
        "trigger was never auto-disabled"
    );

    let stored = bridge
        .list_triggers()
        .unwrap()
        .into_iter()
        .find(|t| t.trigger_id == trigger.trigger_id)
        .unwrap();
    assert!(stored.health.consecutive_failures >= 3);
    assert!(!stored.health.ok);

    bridge.shutdown().await;
}

#[tokio::test]
async fn deactivate_stops_firing_and_definitions_persist() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action("ok", Behavior::Ok(json!(1))));
    let bridge = bridge_with(dir.path(), module.clone());
    bridge.start().await.unwrap();

    let trigger = bridge
        .register_trigger(interval_trigger("pausable", 0.04, "ok"))
        .await
        .unwrap();
    assert!(wait_until(|| !module.calls().is_empty(), Duration::from_secs(3)).await);

    bridge.deactivate_trigger(&trigger.trigger_id).await.unwrap();
    // Drain any in-flight fire, then confirm silence.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let count = module.calls().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(module.calls().len(), count, "deactivated trigger kept firing");

    let stored = bridge
        .list_triggers()
        .unwrap()
        .into_iter()
        .find(|t| t.trigger_id == trigger.trigger_id)
        .unwrap();
    assert_eq!(stored.state, TriggerState::Inactive);
    bridge.shutdown().await;
}
