//! Security envelope scenarios: permission self-healing, profile denies,
//! scan blocking, approval gating, rate limiting.

mod common;

use common::{bridge_with, Behavior, MockModule};
use serde_json::json;
use std::sync::Arc;

use osbridge::orchestration::{ActionStatus, PlanStatus};
use osbridge::security::{PermissionScope, RiskLevel};

#[tokio::test]
async fn permission_self_healing_flow() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_protected_action(
        "write",
        "mock.write",
        Behavior::Ok(json!({"written": true})),
    ));
    let bridge = bridge_with(dir.path(), module);

    // First submission: no grant, the action fails with a recovery hint.
    let state = bridge
        .submit_plan(&json!({
            "plan_id": "needs-grant",
            "actions": [{"id": "a1", "module": "mock", "action": "write"}]
        }))
        .await
        .unwrap();
    assert_eq!(state.plan_status, PlanStatus::Failed);
    let error = &state.errors["a1"];
    assert_eq!(error.code, "permission_not_granted");
    let recovery = error.recovery.as_ref().expect("recovery hint");
    assert_eq!(recovery.module, "security");
    assert_eq!(recovery.action, "request_permission");
    assert_eq!(recovery.params["permission_id"], "mock.write");

    // The LLM follows the hint.
    bridge
        .request_permission("mock.write", "mock", PermissionScope::Session, RiskLevel::Medium)
        .unwrap();

    // Resubmission succeeds.
    let state = bridge
        .submit_plan(&json!({
            "plan_id": "with-grant",
            "actions": [{"id": "a1", "module": "mock", "action": "write"}]
        }))
        .await
        .unwrap();
    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert_eq!(state.results["a1"]["written"], json!(true));
}

#[tokio::test]
async fn profile_deny_is_terminal_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(
        MockModule::new("filesystem").with_action("write_file", Behavior::Ok(json!(null))),
    );
    let mut settings = common::test_settings(dir.path());
    settings.security.profile = "readonly".to_string();
    let bridge = osbridge::OsBridge::new(settings).unwrap();
    bridge.register_module(module.clone());

    let state = bridge
        .submit_plan(&json!({
            "plan_id": "denied",
            "actions": [
                {"id": "a1", "module": "filesystem", "action": "write_file",
                 "on_error": "retry", "retry": {"max_attempts": 3}}
            ]
        }))
        .await
        .unwrap();

    assert_eq!(state.plan_status, PlanStatus::Failed);
    assert_eq!(state.errors["a1"].code, "permission_denied");
    // Never dispatched, and never retried despite the retry policy.
    assert!(module.calls().is_empty());
    assert_eq!(state.actions["a1"].attempt, 1);
}

#[tokio::test]
async fn poisoned_input_is_scan_blocked_before_scheduling() {
    let dir = tempfile::tempdir().unwrap();
    let module =
        Arc::new(MockModule::new("mock").with_action("run", Behavior::Ok(json!(null))));
    let mut settings = common::test_settings(dir.path());
    settings.security.profile = "standard".to_string();
    let bridge = osbridge::OsBridge::new(settings).unwrap();
    bridge.register_module(module.clone());

    let err = bridge
        .submit_plan(&json!({
            "plan_id": "poisoned",
            "actions": [
                {"id": "a1", "module": "mock", "action": "run",
                 "params": {"command": "rm -rf / --force"}}
            ]
        }))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "scan_blocked");
    assert!(module.calls().is_empty());
}

#[tokio::test]
async fn approval_gate_approve_and_reject() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action("ok", Behavior::Ok(json!(42))));
    let bridge = Arc::new(bridge_with(dir.path(), module.clone()));

    // Approve path.
    let submitter = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .submit_plan(&json!({
                    "plan_id": "approve-me",
                    "actions": [
                        {"id": "a1", "module": "mock", "action": "ok",
                         "requires_approval": true}
                    ]
                }))
                .await
        })
    };
    wait_for_pending(&bridge).await;
    let pending = bridge.pending_approvals();
    assert_eq!(pending[0].plan_id, "approve-me");
    bridge.approve_action("approve-me", "a1").unwrap();
    let state = submitter.await.unwrap().unwrap();
    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert_eq!(state.results["a1"], json!(42));

    // Reject path: the action fails as user_rejected.
    let submitter = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .submit_plan(&json!({
                    "plan_id": "reject-me",
                    "actions": [
                        {"id": "a1", "module": "mock", "action": "ok",
                         "requires_approval": true}
                    ]
                }))
                .await
        })
    };
    wait_for_pending(&bridge).await;
    bridge
        .reject_action("reject-me", "a1", "not on my machine")
        .unwrap();
    let state = submitter.await.unwrap().unwrap();
    assert_eq!(state.plan_status, PlanStatus::Failed);
    assert_eq!(state.actions["a1"].status, ActionStatus::Failed);
    assert_eq!(state.errors["a1"].code, "user_rejected");
}

#[tokio::test]
async fn approval_with_edited_params() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action("echo", Behavior::Echo));
    let bridge = Arc::new(bridge_with(dir.path(), module));

    let submitter = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            bridge
                .submit_plan(&json!({
                    "plan_id": "edit-me",
                    "actions": [
                        {"id": "a1", "module": "mock", "action": "echo",
                         "params": {"path": "/etc/passwd"},
                         "requires_approval": true}
                    ]
                }))
                .await
        })
    };
    wait_for_pending(&bridge).await;
    let mut edited = serde_json::Map::new();
    edited.insert("path".to_string(), json!("/tmp/safe.txt"));
    bridge
        .edit_and_approve_action("edit-me", "a1", edited)
        .unwrap();

    let state = submitter.await.unwrap().unwrap();
    assert_eq!(state.plan_status, PlanStatus::Completed);
    assert_eq!(state.results["a1"]["input"]["path"], json!("/tmp/safe.txt"));
}

#[tokio::test]
async fn rate_limit_carries_wait_hint() {
    let dir = tempfile::tempdir().unwrap();
    let module = Arc::new(MockModule::new("mock").with_action("tick", Behavior::Ok(json!(null))));
    let mut settings = common::test_settings(dir.path());
    settings
        .security
        .rate_limits
        .insert("mock.tick".to_string(), 1);
    let bridge = osbridge::OsBridge::new(settings).unwrap();
    bridge.register_module(module);

    let first = bridge
        .submit_plan(&json!({
            "plan_id": "rl-1",
            "actions": [{"id": "a1", "module": "mock", "action": "tick"}]
        }))
        .await
        .unwrap();
    assert_eq!(first.plan_status, PlanStatus::Completed);

    let second = bridge
        .submit_plan(&json!({
            "plan_id": "rl-2",
            "actions": [{"id": "a1", "module": "mock", "action": "tick"}]
        }))
        .await
        .unwrap();
    assert_eq!(second.plan_status, PlanStatus::Failed);
    let error = &second.errors["a1"];
    assert_eq!(error.code, "rate_limit_exceeded");
    let hint = error.recovery.as_ref().expect("wait hint");
    assert!(hint.params["seconds"].as_f64().unwrap() > 0.0);
}

async fn wait_for_pending(bridge: &osbridge::OsBridge) {
    for _ in 0..100 {
        if !bridge.pending_approvals().is_empty() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("no approval became pending");
}
