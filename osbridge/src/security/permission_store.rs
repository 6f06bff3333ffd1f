//! Grant storage.
//!
//! Session grants live only in memory; permanent grants are mirrored to a
//! JSON file with atomic write-temp-then-rename so a crash never leaves a
//! torn file. All operations are O(1) over hash keys behind one mutex.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use super::models::{grant_key, PermissionGrant, PermissionScope};
use crate::errors::{BridgeError, BridgeResult};

pub struct PermissionStore {
    grants: Mutex<HashMap<String, PermissionGrant>>,
    /// File backing permanent grants; `None` keeps everything in memory.
    path: Option<PathBuf>,
}

impl PermissionStore {
    pub fn in_memory() -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Open a store backed by `path`, loading any persisted permanent
    /// grants.
    pub fn open(path: impl Into<PathBuf>) -> BridgeResult<Self> {
        let path = path.into();
        let mut grants = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let persisted: Vec<PermissionGrant> = serde_json::from_str(&content)?;
            for grant in persisted {
                grants.insert(grant.key(), grant);
            }
        }
        Ok(Self {
            grants: Mutex::new(grants),
            path: Some(path),
        })
    }

    pub fn insert(&self, grant: PermissionGrant) -> BridgeResult<()> {
        let persist = grant.scope == PermissionScope::Permanent;
        {
            let mut grants = self.lock()?;
            grants.insert(grant.key(), grant);
        }
        if persist {
            self.persist()?;
        }
        Ok(())
    }

    pub fn remove(&self, permission_id: &str, module_id: &str) -> BridgeResult<bool> {
        let removed = {
            let mut grants = self.lock()?;
            grants.remove(&grant_key(permission_id, module_id))
        };
        match removed {
            Some(grant) => {
                if grant.scope == PermissionScope::Permanent {
                    self.persist()?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Current, unexpired grant for `(permission, module)`. Expired entries
    /// are pruned on the way out.
    pub fn get(&self, permission_id: &str, module_id: &str) -> BridgeResult<Option<PermissionGrant>> {
        let key = grant_key(permission_id, module_id);
        let mut grants = self.lock()?;
        if let Some(grant) = grants.get(&key) {
            if grant.is_expired() {
                grants.remove(&key);
                return Ok(None);
            }
            return Ok(Some(grant.clone()));
        }
        Ok(None)
    }

    pub fn list(&self) -> BridgeResult<Vec<PermissionGrant>> {
        let grants = self.lock()?;
        Ok(grants.values().cloned().collect())
    }

    /// Drop expired grants; returns how many were pruned.
    pub fn prune_expired(&self) -> BridgeResult<usize> {
        let pruned = {
            let mut grants = self.lock()?;
            let before = grants.len();
            grants.retain(|_, g| !g.is_expired());
            before - grants.len()
        };
        if pruned > 0 {
            self.persist()?;
        }
        Ok(pruned)
    }

    fn lock(&self) -> BridgeResult<std::sync::MutexGuard<'_, HashMap<String, PermissionGrant>>> {
        self.grants
            .lock()
            .map_err(|_| BridgeError::Internal("permission store lock poisoned".to_string()))
    }

    fn persist(&self) -> BridgeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let permanent: Vec<PermissionGrant> = {
            let grants = self.lock()?;
            grants
                .values()
                .filter(|g| g.scope == PermissionScope::Permanent)
                .cloned()
                .collect()
        };
        let payload = serde_json::to_string_pretty(&permanent)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(payload.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| BridgeError::Internal(format!("persist grants: {e}")))?;
        Ok(())
    }
}
