//! Capability module system.
//!
//! Every capability provider (filesystem, HTTP, database, GUI, ...) lives
//! behind the uniform [`BridgeModule`] interface. The core never sees
//! provider internals; it dispatches through the registry and introspects
//! through manifests.

mod context;
mod registry;

pub use context::{cancel_pair, CancelHandle, CancelSignal, ExecutionContext};
pub use registry::ModuleRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::BridgeResult;
use crate::security::{AuditLevel, DataClassification, RiskLevel};

/// Declared metadata for one action a module exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema for the action's params; `None` means open-world.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns_schema: Option<Value>,
    /// Dotted permission id a caller must hold, e.g. `filesystem.write`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_required: Option<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub data_classification: DataClassification,
    #[serde(default)]
    pub audit_level: AuditLevel,
    /// Irreversible actions are always treated as sensitive.
    #[serde(default)]
    pub irreversible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl ActionSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params_schema: None,
            returns_schema: None,
            permission_required: None,
            risk_level: RiskLevel::Low,
            data_classification: DataClassification::Public,
            audit_level: AuditLevel::Basic,
            irreversible: false,
            rate_limit_per_minute: None,
            platforms: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn with_params_schema(mut self, schema: Value) -> Self {
        self.params_schema = Some(schema);
        self
    }

    pub fn with_permission(mut self, permission: &str, risk: RiskLevel) -> Self {
        self.permission_required = Some(permission.to_string());
        self.risk_level = risk;
        self
    }

    /// Whether the intent verifier should judge this action.
    pub fn is_sensitive(&self) -> bool {
        self.irreversible || self.risk_level >= RiskLevel::High
    }
}

/// Introspection surface of one module, consumed by the validator, the
/// catalog and the system-prompt generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    pub module_id: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl ModuleManifest {
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// The uniform provider interface. Implementations must treat the context
/// as read-only and honour its cancel signal at suspension points.
#[async_trait]
pub trait BridgeModule: Send + Sync {
    async fn execute(
        &self,
        action: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> BridgeResult<Value>;

    fn manifest(&self) -> ModuleManifest;

    /// Optional snippet inlined into the generated system prompt.
    fn context_snippet(&self) -> Option<String> {
        None
    }
}
