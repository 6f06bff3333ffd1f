//! Structured audit trail.
//!
//! Every security-relevant outcome becomes an [`AuditEvent`] on the event
//! bus, under the topic that matches its kind. For a given action the
//! emission order is strict: started -> (scanned|verified)* ->
//! (succeeded|failed) -> sanitised.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::events::{EventBus, Topic};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unix epoch milliseconds.
    pub ts: i64,
    pub kind: String,
    /// Who caused the event ("executor", "trigger_daemon", "api", ...).
    pub actor: String,
    /// What the event is about, e.g. "plan-1/a2" or "filesystem.write".
    pub subject: String,
    #[serde(default)]
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(kind: &str, actor: &str, subject: &str, payload: Value) -> Self {
        Self {
            ts: Utc::now().timestamp_millis(),
            kind: kind.to_string(),
            actor: actor.to_string(),
            subject: subject.to_string(),
            payload,
        }
    }
}

pub struct AuditLogger {
    bus: Arc<EventBus>,
    actor: String,
}

impl AuditLogger {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            actor: "executor".to_string(),
        }
    }

    pub fn with_actor(bus: Arc<EventBus>, actor: &str) -> Self {
        Self {
            bus,
            actor: actor.to_string(),
        }
    }

    fn emit(&self, topic: Topic, kind: &str, subject: &str, payload: Value) {
        let event = AuditEvent::new(kind, &self.actor, subject, payload.clone());
        let mut body = json!({
            "actor": event.actor,
            "subject": event.subject,
        });
        if let (Some(obj), Some(extra)) = (body.as_object_mut(), payload.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        self.bus.emit(topic, kind, body);
    }

    pub fn action_started(&self, plan_id: &str, action_id: &str, action_key: &str, attempt: u32) {
        self.emit(
            Topic::Actions,
            "action_started",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "action": action_key, "attempt": attempt}),
        );
    }

    pub fn action_succeeded(&self, plan_id: &str, action_id: &str, attempt: u32) {
        self.emit(
            Topic::Actions,
            "action_succeeded",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "attempt": attempt}),
        );
    }

    pub fn action_failed(&self, plan_id: &str, action_id: &str, code: &str, message: &str) {
        self.emit(
            Topic::Actions,
            "action_failed",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "code": code, "message": message}),
        );
    }

    pub fn action_cancelled(&self, plan_id: &str, action_id: &str) {
        self.emit(
            Topic::Actions,
            "action_cancelled",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id}),
        );
    }

    pub fn action_sanitised(&self, plan_id: &str, action_id: &str, changed: bool) {
        self.emit(
            Topic::Actions,
            "action_sanitised",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "changed": changed}),
        );
    }

    pub fn permission_granted(&self, permission: &str, module_id: &str, scope: &str) {
        self.emit(
            Topic::Permissions,
            "permission_granted",
            permission,
            json!({"permission": permission, "module_id": module_id, "scope": scope}),
        );
    }

    pub fn permission_revoked(&self, permission: &str, module_id: &str) {
        self.emit(
            Topic::Permissions,
            "permission_revoked",
            permission,
            json!({"permission": permission, "module_id": module_id}),
        );
    }

    pub fn permission_check_failed(&self, plan_id: &str, action_id: &str, permission: &str) {
        self.emit(
            Topic::Permissions,
            "permission_check_failed",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "permission": permission}),
        );
    }

    pub fn rate_limit_exceeded(&self, action_key: &str, limit: u32) {
        self.emit(
            Topic::Security,
            "rate_limit_exceeded",
            action_key,
            json!({"action": action_key, "limit": limit}),
        );
    }

    pub fn scan_blocked(&self, plan_id: &str, action_id: &str, risk_score: f64, threats: Value) {
        self.emit(
            Topic::Security,
            "scan_blocked",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "risk_score": risk_score, "threats": threats}),
        );
    }

    pub fn action_scanned(&self, plan_id: &str, action_id: &str, verdict: &str, risk_score: f64) {
        self.emit(
            Topic::Security,
            "action_scanned",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "verdict": verdict, "risk_score": risk_score}),
        );
    }

    pub fn sensitive_action_invoked(&self, plan_id: &str, action_id: &str, action_key: &str, verdict: &str) {
        self.emit(
            Topic::Security,
            "sensitive_action_invoked",
            &format!("{plan_id}/{action_id}"),
            json!({"plan_id": plan_id, "action_id": action_id, "action": action_key, "verdict": verdict}),
        );
    }

    pub fn rollback_executed(&self, plan_id: &str, failed_action: &str, rollback_action: &str, ok: bool) {
        self.emit(
            Topic::Actions,
            "rollback_executed",
            &format!("{plan_id}/{failed_action}"),
            json!({"plan_id": plan_id, "failed_action": failed_action, "rollback_action": rollback_action, "ok": ok}),
        );
    }

    pub fn error(&self, plan_id: &str, action_id: Option<&str>, code: &str, message: &str) {
        self.emit(
            Topic::Errors,
            code,
            plan_id,
            json!({"plan_id": plan_id, "action_id": action_id, "code": code, "message": message}),
        );
    }

    pub fn plan_event(&self, kind: &str, plan_id: &str, payload: Value) {
        self.emit(Topic::Plans, kind, plan_id, payload);
    }
}
