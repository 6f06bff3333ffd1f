//! Daemon configuration model.
//!
//! Loaded from a YAML file with serde defaults for everything, then
//! selectively overridden from `OSBRIDGE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub state_dir: PathBuf,
    pub working_directory: PathBuf,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        let base = dirs_base();
        Self {
            state_dir: base.join("state"),
            working_directory: std::env::temp_dir(),
        }
    }
}

fn dirs_base() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".osbridge")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentVerifierSettings {
    pub enabled: bool,
    /// "openai" | "anthropic" | "ollama" | "null"
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub api_key_env: String,
    pub cache_ttl_s: f64,
}

impl Default for IntentVerifierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "null".to_string(),
            model: String::new(),
            endpoint: String::new(),
            api_key_env: "OSBRIDGE_VERIFIER_API_KEY".to_string(),
            cache_ttl_s: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerSettings {
    pub max_depth: usize,
    pub max_list_items: usize,
    pub max_str_len: usize,
    pub injection_scan: bool,
}

impl Default for SanitizerSettings {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_list_items: 256,
            max_str_len: 16_384,
            injection_scan: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Built-in profile name, or a name resolved in `profile_file`.
    pub profile: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_file: Option<PathBuf>,
    pub grants_file: Option<PathBuf>,
    pub default_rate_limit_per_minute: u32,
    pub rate_limits: HashMap<String, u32>,
    pub intent_verifier: IntentVerifierSettings,
    pub sanitizer: SanitizerSettings,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            profile: "standard".to_string(),
            profile_file: None,
            grants_file: Some(dirs_base().join("grants.json")),
            default_rate_limit_per_minute: 120,
            rate_limits: HashMap::new(),
            intent_verifier: IntentVerifierSettings::default(),
            sanitizer: SanitizerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub max_concurrent_actions: usize,
    pub strict_templates: bool,
    pub strict_validation: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_actions: 8,
            strict_templates: true,
            strict_validation: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub default_limit: usize,
    pub limits: HashMap<String, usize>,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            default_limit: 10,
            limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

impl ModuleSettings {
    /// Enabled modules minus the disabled list.
    pub fn active_modules(&self) -> Vec<String> {
        self.enabled
            .iter()
            .filter(|m| !self.disabled.contains(m))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub enabled: bool,
    pub store_path: PathBuf,
    pub max_concurrent_fires: usize,
    pub failure_threshold: u32,
    pub queue_wait_timeout_s: f64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: dirs_base().join("triggers.db"),
            max_concurrent_fires: 5,
            failure_threshold: 5,
            queue_wait_timeout_s: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// "null" | "file"
    pub sink: String,
    pub path: PathBuf,
    pub queue_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            sink: "null".to_string(),
            path: dirs_base().join("events.ndjson"),
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub daemon: DaemonSettings,
    pub security: SecuritySettings,
    pub executor: ExecutorSettings,
    pub resources: ResourceSettings,
    pub modules: ModuleSettings,
    pub triggers: TriggerSettings,
    pub events: EventSettings,
}
