//! Module registry: uniform lookup and invocation of capability providers.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{BridgeModule, ModuleManifest};
use crate::errors::{BridgeError, BridgeResult};
use crate::protocol::validator::SchemaSource;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Availability {
    Unknown,
    Available,
    Failed,
}

struct Entry {
    module: Arc<dyn BridgeModule>,
    manifest: ModuleManifest,
    availability: Availability,
    failure: Option<String>,
}

/// Registry of `module_id -> provider`, with lazily-checked availability.
/// Manifests are snapshotted at registration so introspection never calls
/// into a provider.
pub struct ModuleRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    /// Bumped on every (de)registration; schema caches key off it.
    generation: std::sync::atomic::AtomicU64,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn register(&self, module: Arc<dyn BridgeModule>) {
        let manifest = module.manifest();
        let module_id = manifest.module_id.clone();
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                module_id.clone(),
                Entry {
                    module,
                    manifest,
                    availability: Availability::Unknown,
                    failure: None,
                },
            );
        }
        self.bump();
        tracing::info!(module = %module_id, "module registered");
    }

    pub fn deregister(&self, module_id: &str) -> bool {
        let removed = self
            .entries
            .write()
            .map(|mut entries| entries.remove(module_id).is_some())
            .unwrap_or(false);
        if removed {
            self.bump();
            tracing::info!(module = module_id, "module deregistered");
        }
        removed
    }

    /// Resolve a provider for dispatch, surfacing a recorded load failure.
    pub fn get(&self, module_id: &str) -> BridgeResult<Arc<dyn BridgeModule>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| BridgeError::Internal("module registry lock poisoned".to_string()))?;
        let entry = entries
            .get(module_id)
            .ok_or_else(|| BridgeError::UnknownModule(module_id.to_string()))?;
        if entry.availability == Availability::Failed {
            return Err(BridgeError::ModuleLoad(
                module_id.to_string(),
                entry.failure.clone().unwrap_or_default(),
            ));
        }
        Ok(entry.module.clone())
    }

    /// Record a provider's first-use outcome; a failed module reports
    /// `module_load_error` from then on.
    pub fn mark_availability(&self, module_id: &str, ok: bool, failure: Option<String>) {
        if let Ok(mut entries) = self.entries.write() {
            if let Some(entry) = entries.get_mut(module_id) {
                entry.availability = if ok {
                    Availability::Available
                } else {
                    Availability::Failed
                };
                entry.failure = failure;
            }
        }
    }

    pub fn manifest(&self, module_id: &str) -> Option<ModuleManifest> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(module_id).map(|e| e.manifest.clone()))
    }

    /// All manifests, sorted by module id for deterministic output.
    pub fn manifests(&self) -> Vec<ModuleManifest> {
        let mut manifests: Vec<ModuleManifest> = self
            .entries
            .read()
            .map(|entries| entries.values().map(|e| e.manifest.clone()).collect())
            .unwrap_or_default();
        manifests.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        manifests
    }

    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Context snippets from every registered module, for the prompt
    /// generator.
    pub fn context_snippets(&self) -> Vec<(String, String)> {
        let modules: Vec<(String, Arc<dyn BridgeModule>)> = self
            .entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, e)| (id.clone(), e.module.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut snippets: Vec<(String, String)> = modules
            .into_iter()
            .filter_map(|(id, m)| m.context_snippet().map(|s| (id, s)))
            .collect();
        snippets.sort();
        snippets
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(std::sync::atomic::Ordering::Acquire)
    }

    fn bump(&self) {
        self.generation
            .fetch_add(1, std::sync::atomic::Ordering::Release);
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaSource for ModuleRegistry {
    fn has_module(&self, module_id: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(module_id))
            .unwrap_or(false)
    }

    fn has_action(&self, module_id: &str, action: &str) -> bool {
        self.manifest(module_id)
            .map(|m| m.action(action).is_some())
            .unwrap_or(false)
    }

    fn params_schema(&self, module_id: &str, action: &str) -> Option<Value> {
        self.manifest(module_id)?
            .action(action)?
            .params_schema
            .clone()
    }
}
