//! Persistent plan state store.
//!
//! One JSON file per plan id under the state directory, written crash-safe
//! (write-temp, fsync, rename). Writes are serialised per plan id; reads
//! are snapshots. This store is the source of truth for resumability after
//! a daemon restart.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use super::state::ExecutionState;
use crate::errors::{BridgeError, BridgeResult};

pub struct PlanStateStore {
    dir: PathBuf,
    /// Per-plan write locks.
    locks: Mutex<HashMap<String, std::sync::Arc<AsyncMutex<()>>>>,
}

impl PlanStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> BridgeResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, plan_id: &str) -> PathBuf {
        // Plan ids are caller-supplied; keep the file name filesystem-safe.
        let safe: String = plan_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn lock_for(&self, plan_id: &str) -> BridgeResult<std::sync::Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| BridgeError::Internal("state store lock poisoned".to_string()))?;
        Ok(locks
            .entry(plan_id.to_string())
            .or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(())))
            .clone())
    }

    pub async fn save(&self, state: &ExecutionState) -> BridgeResult<()> {
        let lock = self.lock_for(&state.plan_id)?;
        let _guard = lock.lock().await;
        let path = self.path_for(&state.plan_id);
        let payload = serde_json::to_vec_pretty(state)?;
        let dir = self.dir.clone();
        // Blocking fs work off the async path.
        tokio::task::spawn_blocking(move || -> BridgeResult<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&payload)?;
            tmp.flush()?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .map_err(|e| BridgeError::Internal(format!("persist state: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| BridgeError::Internal(format!("state write task: {e}")))??;
        Ok(())
    }

    pub fn load(&self, plan_id: &str) -> BridgeResult<Option<ExecutionState>> {
        let path = self.path_for(plan_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let state: ExecutionState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    pub fn list(&self) -> BridgeResult<Vec<String>> {
        let mut plan_ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                plan_ids.push(stem.to_string());
            }
        }
        plan_ids.sort();
        Ok(plan_ids)
    }

    pub fn delete(&self, plan_id: &str) -> BridgeResult<bool> {
        let path = self.path_for(plan_id);
        if path.exists() {
            std::fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::state::{ActionStatus, PlanStatus};

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::open(dir.path()).unwrap();

        let mut state = ExecutionState::new("plan-9", ["a1".to_string()]);
        state.plan_status = PlanStatus::Running;
        state.action_mut("a1").status = ActionStatus::Succeeded;
        state
            .results
            .insert("a1".to_string(), serde_json::json!({"value": 7}));
        store.save(&state).await.unwrap();

        let loaded = store.load("plan-9").unwrap().expect("state present");
        assert_eq!(loaded.plan_status, PlanStatus::Running);
        assert_eq!(loaded.results["a1"]["value"], 7);
        assert_eq!(store.list().unwrap(), vec!["plan-9"]);
    }

    #[tokio::test]
    async fn save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::open(dir.path()).unwrap();
        let mut state = ExecutionState::new("p", ["a".to_string()]);
        store.save(&state).await.unwrap();
        state.plan_status = PlanStatus::Completed;
        store.save(&state).await.unwrap();
        let loaded = store.load("p").unwrap().unwrap();
        assert_eq!(loaded.plan_status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn delete_and_missing_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::open(dir.path()).unwrap();
        assert!(store.load("ghost").unwrap().is_none());
        assert!(!store.delete("ghost").unwrap());
        let state = ExecutionState::new("real", []);
        store.save(&state).await.unwrap();
        assert!(store.delete("real").unwrap());
        assert!(store.load("real").unwrap().is_none());
    }

    #[tokio::test]
    async fn unsafe_plan_ids_are_sanitised() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::open(dir.path()).unwrap();
        let state = ExecutionState::new("../evil/plan", []);
        store.save(&state).await.unwrap();
        // The file lands inside the state dir, not outside it.
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
