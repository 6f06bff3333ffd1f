//! Conflict resolver: the table of resource locks across triggered plans.
//!
//! At most one plan holds a resource at any instant. Policies decide what
//! an incoming fire does when its resource is held: `queue` waits for
//! release (with a timeout), `preempt` cancels a lower-priority holder,
//! `reject` drops the fire.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::{BridgeError, BridgeResult};

#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
    pub plan_id: String,
    pub priority: i32,
}

pub struct ConflictResolver {
    locks: Mutex<HashMap<String, LockHolder>>,
    /// One broadcast for all releases; waiters re-check their resource.
    released: Notify,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Notify::new(),
        }
    }

    fn lock_table(&self) -> BridgeResult<std::sync::MutexGuard<'_, HashMap<String, LockHolder>>> {
        self.locks
            .lock()
            .map_err(|_| BridgeError::Internal("conflict resolver lock poisoned".to_string()))
    }

    /// Try to take `resource` for `plan_id`. Returns the current holder on
    /// contention.
    pub fn try_acquire(
        &self,
        resource: &str,
        plan_id: &str,
        priority: i32,
    ) -> BridgeResult<Result<(), LockHolder>> {
        let mut locks = self.lock_table()?;
        match locks.get(resource) {
            Some(holder) => Ok(Err(holder.clone())),
            None => {
                locks.insert(
                    resource.to_string(),
                    LockHolder {
                        plan_id: plan_id.to_string(),
                        priority,
                    },
                );
                tracing::debug!(resource, plan_id, "resource locked");
                Ok(Ok(()))
            }
        }
    }

    /// Wait until `resource` is free and grab it, or give up after
    /// `timeout`.
    pub async fn acquire_queued(
        &self,
        resource: &str,
        plan_id: &str,
        priority: i32,
        timeout: Duration,
    ) -> BridgeResult<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire(resource, plan_id, priority)?.is_ok() {
                return Ok(true);
            }
            let notified = self.released.notified();
            // Re-check after registering interest to close the release race.
            if self.try_acquire(resource, plan_id, priority)?.is_ok() {
                return Ok(true);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
            }
        }
    }

    /// Release `resource` if `plan_id` holds it; wakes queued waiters.
    pub fn release(&self, resource: &str, plan_id: &str) -> BridgeResult<()> {
        let mut locks = self.lock_table()?;
        if locks.get(resource).map(|h| h.plan_id.as_str()) == Some(plan_id) {
            locks.remove(resource);
            tracing::debug!(resource, plan_id, "resource released");
            self.released.notify_waiters();
        }
        Ok(())
    }

    /// Release everything `plan_id` holds (plan termination).
    pub fn release_all(&self, plan_id: &str) -> BridgeResult<()> {
        let mut locks = self.lock_table()?;
        let before = locks.len();
        locks.retain(|_, holder| holder.plan_id != plan_id);
        if locks.len() != before {
            self.released.notify_waiters();
        }
        Ok(())
    }

    /// Forcibly transfer `resource` to a preempting plan. The caller is
    /// responsible for cancelling the previous holder's plan.
    pub fn preempt(&self, resource: &str, plan_id: &str, priority: i32) -> BridgeResult<Option<LockHolder>> {
        let mut locks = self.lock_table()?;
        let previous = locks.insert(
            resource.to_string(),
            LockHolder {
                plan_id: plan_id.to_string(),
                priority,
            },
        );
        Ok(previous)
    }

    pub fn holder_of(&self, resource: &str) -> Option<LockHolder> {
        self.lock_table().ok()?.get(resource).cloned()
    }

    pub fn locked_resources(&self) -> HashMap<String, LockHolder> {
        self.lock_table().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}
