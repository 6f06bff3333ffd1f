//! Approval gate for actions flagged `requires_approval` (or forced to
//! prompt by the active profile).
//!
//! The executor suspends the action, emits a `plan_suspended` event and
//! waits on a per-action channel. An external caller resolves with
//! approve, reject or edited params; reject fails the action with
//! `user_rejected` and the action's `on_error` policy takes it from there.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::errors::{BridgeError, BridgeResult};

#[derive(Debug)]
pub enum ApprovalDecision {
    Approve,
    Reject { reason: String },
    /// Approve with replacement params.
    Edit { params: Map<String, Value> },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PendingApproval {
    pub plan_id: String,
    pub action_id: String,
}

pub struct ApprovalGate {
    pending: Mutex<HashMap<(String, String), oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Open the wait channel for `(plan, action)`. Called by the executor
    /// before it suspends.
    pub fn register(
        &self,
        plan_id: &str,
        action_id: &str,
    ) -> BridgeResult<oneshot::Receiver<ApprovalDecision>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.lock()?;
        pending.insert((plan_id.to_string(), action_id.to_string()), tx);
        Ok(rx)
    }

    /// Deliver an external decision. Fails when nothing is waiting.
    pub fn resolve(
        &self,
        plan_id: &str,
        action_id: &str,
        decision: ApprovalDecision,
    ) -> BridgeResult<()> {
        let sender = {
            let mut pending = self.lock()?;
            pending.remove(&(plan_id.to_string(), action_id.to_string()))
        };
        match sender {
            Some(tx) => tx.send(decision).map_err(|_| {
                BridgeError::Internal("approval waiter went away".to_string())
            }),
            None => Err(BridgeError::Internal(format!(
                "no action awaiting approval for {plan_id}/{action_id}"
            ))),
        }
    }

    pub fn pending(&self) -> Vec<PendingApproval> {
        self.lock()
            .map(|pending| {
                let mut list: Vec<PendingApproval> = pending
                    .keys()
                    .map(|(plan_id, action_id)| PendingApproval {
                        plan_id: plan_id.clone(),
                        action_id: action_id.clone(),
                    })
                    .collect();
                list.sort_by(|a, b| (&a.plan_id, &a.action_id).cmp(&(&b.plan_id, &b.action_id)));
                list
            })
            .unwrap_or_default()
    }

    /// Drop every waiter of a plan (cancellation path); their receivers
    /// observe a closed channel.
    pub fn drop_plan(&self, plan_id: &str) {
        if let Ok(mut pending) = self.lock() {
            pending.retain(|(pid, _), _| pid != plan_id);
        }
    }

    fn lock(
        &self,
    ) -> BridgeResult<std::sync::MutexGuard<'_, HashMap<(String, String), oneshot::Sender<ApprovalDecision>>>>
    {
        self.pending
            .lock()
            .map_err(|_| BridgeError::Internal("approval gate lock poisoned".to_string()))
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approve_reaches_waiter() {
        let gate = ApprovalGate::new();
        let rx = gate.register("p", "a").unwrap();
        assert_eq!(gate.pending().len(), 1);
        gate.resolve("p", "a", ApprovalDecision::Approve).unwrap();
        assert!(matches!(rx.await.unwrap(), ApprovalDecision::Approve));
        assert!(gate.pending().is_empty());
    }

    #[tokio::test]
    async fn resolve_without_waiter_fails() {
        let gate = ApprovalGate::new();
        assert!(gate
            .resolve("p", "ghost", ApprovalDecision::Approve)
            .is_err());
    }

    #[tokio::test]
    async fn drop_plan_closes_waiters() {
        let gate = ApprovalGate::new();
        let rx = gate.register("p", "a").unwrap();
        gate.drop_plan("p");
        assert!(rx.await.is_err());
    }
}
