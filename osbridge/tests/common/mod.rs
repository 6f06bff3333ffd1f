//! Shared test support: a configurable in-process capability module and a
//! bridge builder wired into a temp directory.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use osbridge::config::Settings;
use osbridge::errors::{BridgeError, BridgeResult};
use osbridge::modules::{ActionSpec, BridgeModule, ExecutionContext, ModuleManifest};
use osbridge::security::RiskLevel;
use osbridge::OsBridge;

/// What one mock action does when dispatched.
#[derive(Clone)]
pub enum Behavior {
    /// Return this value.
    Ok(Value),
    /// Return `{"input": <params>}`.
    Echo,
    /// Fail `failures` times with a retryable error, then return the value.
    FailTimes { failures: u32, then: Value },
    /// Always fail; `retryable` controls the error classification.
    Fail { retryable: bool },
    /// Sleep (honouring cancellation), then return the value.
    Sleep { ms: u64, then: Value },
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub action: String,
    pub params: Value,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct Counters {
    running: AtomicUsize,
    max_running: AtomicUsize,
}

/// A scriptable capability provider for integration tests.
pub struct MockModule {
    module_id: String,
    specs: Vec<ActionSpec>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    remaining_failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<Vec<CallRecord>>,
    counters: Counters,
}

impl MockModule {
    pub fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            specs: Vec::new(),
            behaviors: Mutex::new(HashMap::new()),
            remaining_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_action(mut self, name: &str, behavior: Behavior) -> Self {
        self.specs.push(ActionSpec::new(name, "mock action"));
        self.set_behavior(name, behavior);
        self
    }

    /// Action that requires a granted permission.
    pub fn with_protected_action(
        mut self,
        name: &str,
        permission: &str,
        behavior: Behavior,
    ) -> Self {
        self.specs
            .push(ActionSpec::new(name, "protected mock action").with_permission(
                permission,
                // Medium keeps the action below the sensitive threshold.
                RiskLevel::Medium,
            ));
        self.set_behavior(name, behavior);
        self
    }

    fn set_behavior(&self, name: &str, behavior: Behavior) {
        if let Behavior::FailTimes { failures, .. } = &behavior {
            self.remaining_failures
                .lock()
                .unwrap()
                .insert(name.to_string(), *failures);
        }
        self.behaviors
            .lock()
            .unwrap()
            .insert(name.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, action: &str) -> Vec<CallRecord> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .collect()
    }

    pub fn max_concurrent_seen(&self) -> usize {
        self.counters.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeModule for MockModule {
    async fn execute(
        &self,
        action: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> BridgeResult<Value> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(action)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownAction {
                module: self.module_id.clone(),
                action: action.to_string(),
            })?;

        let running = self.counters.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_running
            .fetch_max(running, Ordering::SeqCst);
        let started = Instant::now();

        let result = match behavior {
            Behavior::Ok(value) => Ok(value),
            Behavior::Echo => Ok(json!({"input": Value::Object(params.clone())})),
            Behavior::FailTimes { then, .. } => {
                let mut remaining = self.remaining_failures.lock().unwrap();
                let left = remaining.entry(action.to_string()).or_insert(0);
                if *left > 0 {
                    *left -= 1;
                    Err(BridgeError::Provider {
                        message: "transient mock failure".to_string(),
                        retryable: true,
                    })
                } else {
                    Ok(then)
                }
            }
            Behavior::Fail { retryable } => Err(BridgeError::Provider {
                message: "mock failure".to_string(),
                retryable,
            }),
            Behavior::Sleep { ms, then } => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(BridgeError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(then),
                }
            }
        };

        self.counters.running.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(CallRecord {
            action: action.to_string(),
            params: Value::Object(params.clone()),
            started,
            finished: Instant::now(),
        });
        result
    }

    fn manifest(&self) -> ModuleManifest {
        ModuleManifest {
            module_id: self.module_id.clone(),
            version: "1.0".to_string(),
            description: "scriptable test module".to_string(),
            platforms: vec![],
            actions: self.specs.clone(),
        }
    }
}

/// Settings wired into a temp directory, unrestricted profile, null sink.
pub fn test_settings(dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.daemon.state_dir = dir.join("state");
    settings.daemon.working_directory = dir.to_path_buf();
    settings.security.profile = "unrestricted".to_string();
    settings.security.grants_file = Some(dir.join("grants.json"));
    settings.triggers.store_path = dir.join("triggers.db");
    settings.events.sink = "null".to_string();
    settings
}

pub fn bridge_with(dir: &std::path::Path, module: Arc<MockModule>) -> OsBridge {
    let bridge = OsBridge::new(test_settings(dir)).expect("bridge builds");
    bridge.register_module(module);
    bridge
}
