//! Configuration loading.

pub mod types;

pub use types::{
    DaemonSettings, EventSettings, ExecutorSettings, IntentVerifierSettings, ModuleSettings,
    ResourceSettings, SanitizerSettings, SecuritySettings, Settings, TriggerSettings,
};

use std::path::Path;

use crate::errors::{BridgeError, BridgeResult};

impl Settings {
    /// Load settings from a YAML file; absent file means defaults. After
    /// the file, scalar `OSBRIDGE_*` environment overrides apply.
    pub fn load(config_file: Option<&Path>) -> BridgeResult<Self> {
        let mut settings = match config_file {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)
                    .map_err(|e| BridgeError::Parse(format!("config {path:?}: {e}")))?
            }
            _ => Settings::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("OSBRIDGE_STATE_DIR") {
            self.daemon.state_dir = dir.into();
        }
        if let Ok(profile) = std::env::var("OSBRIDGE_PROFILE") {
            self.security.profile = profile;
        }
        if let Ok(value) = std::env::var("OSBRIDGE_MAX_CONCURRENT_ACTIONS") {
            if let Ok(parsed) = value.parse() {
                self.executor.max_concurrent_actions = parsed;
            }
        }
        if let Ok(value) = std::env::var("OSBRIDGE_EVENT_SINK") {
            self.events.sink = value;
        }
        if let Ok(value) = std::env::var("OSBRIDGE_TRIGGERS_ENABLED") {
            self.triggers.enabled = matches!(value.as_str(), "1" | "true" | "yes");
        }
    }
}
