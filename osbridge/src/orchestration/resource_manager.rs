//! Per-module concurrency caps.
//!
//! One counting semaphore per module, created lazily with the default cap
//! or a configured override. Permits are RAII: released on every exit path
//! including timeout and cancellation.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::{BridgeError, BridgeResult};

pub struct ResourceManager {
    limits: HashMap<String, usize>,
    default_limit: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub limit: usize,
    pub available: usize,
    pub in_use: usize,
}

impl ResourceManager {
    pub fn new(limits: HashMap<String, usize>, default_limit: usize) -> Self {
        Self {
            limits,
            default_limit: default_limit.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, module_id: &str) -> BridgeResult<Arc<Semaphore>> {
        let mut semaphores = self
            .semaphores
            .lock()
            .map_err(|_| BridgeError::Internal("resource manager lock poisoned".to_string()))?;
        Ok(semaphores
            .entry(module_id.to_string())
            .or_insert_with(|| {
                let limit = self.limit_for(module_id);
                Arc::new(Semaphore::new(limit))
            })
            .clone())
    }

    pub fn limit_for(&self, module_id: &str) -> usize {
        self.limits
            .get(module_id)
            .copied()
            .unwrap_or(self.default_limit)
            .max(1)
    }

    /// Wait for a permit on the module's semaphore. FIFO fairness comes
    /// from tokio's semaphore queueing.
    pub async fn acquire(&self, module_id: &str) -> BridgeResult<OwnedSemaphorePermit> {
        let semaphore = self.semaphore(module_id)?;
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::Internal("resource semaphore closed".to_string()))
    }

    /// Snapshot of every module's semaphore, for monitoring.
    pub fn status(&self) -> HashMap<String, ResourceStatus> {
        let semaphores = match self.semaphores.lock() {
            Ok(guard) => guard,
            Err(_) => return HashMap::new(),
        };
        semaphores
            .iter()
            .map(|(module_id, sem)| {
                let limit = self.limit_for(module_id);
                let available = sem.available_permits();
                (
                    module_id.clone(),
                    ResourceStatus {
                        limit,
                        available,
                        in_use: limit.saturating_sub(available),
                    },
                )
            })
            .collect()
    }
}
