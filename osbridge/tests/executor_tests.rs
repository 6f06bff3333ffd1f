//! End-to-end executor scenarios: chains, waves, retries, rollback,
//! timeouts, cancellation and plan groups.

mod common;

use common::{bridge_with, Behavior, MockModule};
use serde_json::json;
use std::sync::Arc;

use osbridge::orchestration::{ActionStatus, GroupStatus, PlanStatus};

#[tokio::test]
async fn empty_plan_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock"));
    let bridge = bridge_with(dir.path(), module);

    let state = bridge
        .submit_plan(&json!({"plan_id": "empty", "actions": []}))
        .await
        .unwrap();
    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert!(state.actions.is_empty());
}

#[tokio::test]
async fn linear_chain_passes_results_through_templates() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action("produce", Behavior::Ok(json!({"value": 1})))
            .with_action("consume", Behavior::Echo),
    );
    let bridge = bridge_with(dir.path(), module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "chain",
            "actions": [
                {"id": "a1", "module": "mock", "action": "produce"},
                {"id": "a2", "module": "mock", "action": "consume",
                 "params": {"input": "${actions.a1.result.value}"},
                 "depends_on": ["a1"]},
                {"id": "a3", "module": "mock", "action": "consume",
                 "params": {"status": "${actions.a2.status}"},
                 "depends_on": ["a2"]}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert_eq!(state.results["a2"]["input"]["input"], json!(1));
    assert_eq!(state.results["a3"]["input"]["status"], json!("succeeded"));

    // Three dispatches, strictly ordered by the chain.
    let calls = module.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].finished <= calls[1].started);
    assert!(calls[1].finished <= calls[2].started);
}

#[tokio::test]
async fn waves_respect_dependencies_and_caps() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock").with_action(
            "work",
            Behavior::Sleep {
                ms: 40,
                then: json!({"ok": true}),
            },
        ),
    );
    let mut settings = common::test_settings(dir.path());
    settings.resources.limits.insert("mock".to_string(), 2);
    let bridge = osbridge::OsBridge::new(settings).unwrap();
    bridge.register_module(module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "waves",
            "actions": [
                {"id": "a", "module": "mock", "action": "work"},
                {"id": "b", "module": "mock", "action": "work"},
                {"id": "c", "module": "mock", "action": "work", "depends_on": ["a", "b"]},
                {"id": "d", "module": "mock", "action": "work", "depends_on": ["c"]}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Completed);
    // Per-module concurrency cap held at every instant.
    assert!(module.max_concurrent_seen() <= 2);

    // c started only after both a and b finished (wave barrier).
    let calls = module.calls();
    assert_eq!(calls.len(), 4);
    let mut by_order = calls.clone();
    by_order.sort_by_key(|c| c.started);
    let first_two_end = by_order[0].finished.max(by_order[1].finished);
    assert!(by_order[2].started >= first_two_end);
    assert!(by_order[3].started >= by_order[2].finished);
}

#[tokio::test]
async fn retry_then_succeed_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action(
        "flaky",
        Behavior::FailTimes {
            failures: 1,
            then: json!({"ok": true}),
        },
    ));
    let bridge = bridge_with(dir.path(), module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "retry",
            "actions": [
                {"id": "a1", "module": "mock", "action": "flaky",
                 "on_error": "retry",
                 "retry": {"max_attempts": 2, "backoff_initial_s": 0.05,
                           "backoff_factor": 2.0, "max_backoff_s": 1.0}}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert_eq!(state.actions["a1"].attempt, 2);

    let calls = module.calls_for("flaky");
    assert_eq!(calls.len(), 2, "exactly two dispatch attempts");
    // Backoff gap between attempts (jitter lower bound is 0.5 * initial).
    let gap = calls[1].started.duration_since(calls[0].finished);
    assert!(gap.as_millis() >= 25, "gap {gap:?} shorter than min backoff");
}

#[tokio::test]
async fn retry_attempts_are_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock").with_action("broken", Behavior::Fail { retryable: true }),
    );
    let bridge = bridge_with(dir.path(), module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "bounded",
            "actions": [
                {"id": "a1", "module": "mock", "action": "broken",
                 "on_error": "retry",
                 "retry": {"max_attempts": 3, "backoff_initial_s": 0.01,
                           "backoff_factor": 1.0, "max_backoff_s": 0.05}}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Failed);
    assert_eq!(module.calls_for("broken").len(), 3);
    assert_eq!(state.errors["a1"].code, "provider_error");
}

#[tokio::test]
async fn rollback_dispatches_compensation_once() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action("create", Behavior::Ok(json!({"resource": "x"})))
            .with_action("break", Behavior::Fail { retryable: false })
            .with_action("undo", Behavior::Ok(json!({"undone": true}))),
    );
    let bridge = bridge_with(dir.path(), module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "rollback",
            "actions": [
                {"id": "a1", "module": "mock", "action": "create"},
                {"id": "a2", "module": "mock", "action": "break",
                 "depends_on": ["a1"],
                 "on_error": "rollback",
                 "rollback": {"action": "undo_a1",
                              "params": {"resource": "${actions.a1.result.resource}"}}},
                {"id": "undo_a1", "module": "mock", "action": "undo", "depends_on": []}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.actions["a1"].status, ActionStatus::Succeeded);
    assert_eq!(state.actions["a2"].status, ActionStatus::Failed);
    assert_eq!(state.plan_status, PlanStatus::Failed);
    // The compensating action ran exactly once, via the rollback engine.
    let undo_calls = module.calls_for("undo");
    assert_eq!(undo_calls.len(), 1);
    assert_eq!(undo_calls[0].params["resource"], json!("x"));
}

#[tokio::test]
async fn continue_policy_yields_partial() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action("ok", Behavior::Ok(json!(1)))
            .with_action("bad", Behavior::Fail { retryable: false }),
    );
    let bridge = bridge_with(dir.path(), module);

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "partial",
            "actions": [
                {"id": "a1", "module": "mock", "action": "bad", "on_error": "continue"},
                {"id": "a2", "module": "mock", "action": "ok"},
                {"id": "a3", "module": "mock", "action": "ok", "depends_on": ["a1"]}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Partial);
    assert_eq!(state.actions["a2"].status, ActionStatus::Succeeded);
    // a3's dependency failed, so it was skipped with a recorded reason.
    assert_eq!(state.actions["a3"].status, ActionStatus::Skipped);
    assert_eq!(state.errors["a3"].code, "dependency_failed");
}

#[tokio::test]
async fn timeout_fails_the_action() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action(
        "slow",
        Behavior::Sleep {
            ms: 2_000,
            then: json!(null),
        },
    ));
    let bridge = bridge_with(dir.path(), module);

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "timeout",
            "actions": [
                {"id": "a1", "module": "mock", "action": "slow", "timeout_s": 0.05}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Failed);
    assert_eq!(state.errors["a1"].code, "timeout");
}

#[tokio::test]
async fn cancel_stops_pending_waves() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action(
                "slow",
                Behavior::Sleep {
                    ms: 5_000,
                    then: json!(null),
                },
            )
            .with_action("after", Behavior::Ok(json!(null))),
    );
    let bridge = Arc::new(bridge_with(dir.path(), module.clone()));

    let submitter = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .submit_plan(&json!({
                    "plan_id": "cancel-me",
                    "actions": [
                        {"id": "a1", "module": "mock", "action": "slow", "timeout_s": 30},
                        {"id": "a2", "module": "mock", "action": "after", "depends_on": ["a1"]}
                    ]
                }))
                .await
        })
    };

    // Let the first wave start, then cancel.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(bridge.cancel_plan("cancel-me"));

    let state = submitter.await.unwrap().unwrap();
    assert_eq!(state.plan_status, PlanStatus::Cancelled);
    assert_eq!(state.actions["a1"].status, ActionStatus::Cancelled);
    assert_eq!(state.actions["a2"].status, ActionStatus::Cancelled);
    // The second wave never dispatched.
    assert!(module.calls_for("after").is_empty());
}

#[tokio::test]
async fn validation_rejects_cycles_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock"));
    let bridge = bridge_with(dir.path(), module);

    let err = bridge
        .submit_plan(&json!({
            "plan_id": "cyclic",
            "actions": [
                {"id": "a", "module": "mock", "action": "x", "depends_on": ["a"]}
            ]
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert!(err.to_string().contains("a -> a"));
}

#[tokio::test]
async fn plan_group_aggregates_and_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action(
        "work",
        Behavior::Sleep {
            ms: 30,
            then: json!({"ok": true}),
        },
    ));
    let bridge = bridge_with(dir.path(), module.clone());

    let raws: Vec<serde_json::Value> = (0..3)
        .map(|i| {
            json!({
                "plan_id": format!("member-{i}"),
                "actions": [{"id": "a1", "module": "mock", "action": "work"}]
            })
        })
        .collect();

    let result = bridge
        .submit_plan_group(&raws, Some("g1".to_string()), 1, 30.0)
        .await
        .unwrap();

    assert_eq!(result.group_id, "g1");
    assert_eq!(result.status, GroupStatus::Completed);
    assert_eq!(result.summary.total, 3);
    assert_eq!(result.summary.completed, 3);
    assert_eq!(result.summary.failed, 0);
    assert_eq!(
        result.summary.total,
        result.plan_results.len() + result.errors.len()
    );
    // max_concurrent = 1 forces strictly sequential member execution.
    assert_eq!(module.max_concurrent_seen(), 1);
}

#[tokio::test]
async fn plan_group_reflects_failed_member_plans() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock")
            .with_action("ok", Behavior::Ok(json!(1)))
            .with_action("bad", Behavior::Fail { retryable: false }),
    );
    let bridge = bridge_with(dir.path(), module);

    // One member completes, one runs to a failed terminal status. The
    // failed plan lands in plan_results (no execution-level error), and the
    // group status must still reflect it.
    let raws = vec![
        json!({
            "plan_id": "good-member",
            "actions": [{"id": "a1", "module": "mock", "action": "ok"}]
        }),
        json!({
            "plan_id": "bad-member",
            "actions": [{"id": "a1", "module": "mock", "action": "bad"}]
        }),
    ];
    let result = bridge
        .submit_plan_group(&raws, None, 2, 30.0)
        .await
        .unwrap();

    assert!(result.errors.is_empty());
    assert_eq!(
        result.plan_results["bad-member"].plan_status,
        PlanStatus::Failed
    );
    assert_eq!(result.status, GroupStatus::PartialFailure);
    assert_eq!(result.summary.total, 2);
    assert_eq!(result.summary.completed, 1);
    assert_eq!(result.summary.failed, 1);
}

#[tokio::test]
async fn plan_group_with_only_failed_plans_is_failed() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("mock").with_action("bad", Behavior::Fail { retryable: false }),
    );
    let bridge = bridge_with(dir.path(), module);

    let raws: Vec<serde_json::Value> = (0..2)
        .map(|i| {
            json!({
                "plan_id": format!("doomed-{i}"),
                "actions": [{"id": "a1", "module": "mock", "action": "bad"}]
            })
        })
        .collect();
    let result = bridge
        .submit_plan_group(&raws, None, 2, 30.0)
        .await
        .unwrap();

    assert!(result.errors.is_empty());
    assert_eq!(result.status, GroupStatus::Failed);
    assert_eq!(result.summary.completed, 0);
    assert_eq!(result.summary.failed, 2);
}

#[tokio::test]
async fn plan_group_timeout_cancels_stragglers() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action(
        "work",
        Behavior::Sleep {
            ms: 5_000,
            then: json!(null),
        },
    ));
    let bridge = bridge_with(dir.path(), module);

    let raws = vec![json!({
        "plan_id": "straggler",
        "actions": [{"id": "a1", "module": "mock", "action": "work", "timeout_s": 30}]
    })];
    let result = bridge
        .submit_plan_group(&raws, None, 2, 0.2)
        .await
        .unwrap();

    assert_eq!(result.status, GroupStatus::Failed);
    assert_eq!(result.errors["straggler"], "group timed out");
    assert_eq!(result.summary.total, 1);
    assert_eq!(result.summary.failed, 1);
}

#[tokio::test]
async fn state_is_persisted_for_resumability() {
    let dir = tempfile::tempdir().unwrap();
    let module =
        Arc::new(MockModule::new("mock").with_action("ok", Behavior::Ok(json!({"n": 7}))));
    let bridge = bridge_with(dir.path(), module);

    bridge
        .submit_plan(&json!({
            "plan_id": "persisted",
            "actions": [{"id": "a1", "module": "mock", "action": "ok"}]
        }))
        .await
        .unwrap();

    let loaded = bridge.plan_state("persisted").unwrap().expect("state on disk");
    assert_eq!(loaded.plan_status, PlanStatus::Completed);
    assert_eq!(loaded.results["a1"]["n"], json!(7));
}

#[tokio::test]
async fn dry_run_skips_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action("ok", Behavior::Ok(json!(1))));
    let bridge = bridge_with(dir.path(), module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "dry",
            "mode": "dry_run",
            "actions": [{"id": "a1", "module": "mock", "action": "ok"}]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert_eq!(state.actions["a1"].status, ActionStatus::Skipped);
    assert!(module.calls().is_empty());
}
