//! Permission profiles: the static, profile-level policy layer.
//!
//! A profile maps `module.action` to allow/deny/prompt with a default
//! policy, and carries the strictness knobs the scanner pipeline consults.
//! Profiles are loaded from a YAML map of named profiles or taken from the
//! built-in set (`readonly`, `standard`, `unrestricted`).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Allow,
    Deny,
    /// Allowed, but the action must pass through the approval gate.
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub module: String,
    /// `None` matches every action of the module.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub policy: Policy,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionProfile {
    pub name: String,
    pub default_policy: Policy,
    #[serde(default)]
    pub overrides: Vec<PolicyOverride>,
    /// Strict profiles block on scanner warnings and intent-verifier
    /// rejections; permissive ones log and continue.
    #[serde(default)]
    pub strict_mode: bool,
    /// Aggregate scanner risk score above which input is blocked.
    #[serde(default = "PermissionProfile::default_max_risk")]
    pub max_scan_risk_score: f64,
}

impl PermissionProfile {
    fn default_max_risk() -> f64 {
        0.8
    }

    /// First matching override wins; most-specific (module+action) entries
    /// should be listed before module-wide ones.
    pub fn policy_for(&self, module: &str, action: &str) -> (Policy, Option<&str>) {
        for ov in &self.overrides {
            if ov.module != module && ov.module != "*" {
                continue;
            }
            match &ov.action {
                Some(a) if a != "*" && !action_matches(a, action) => continue,
                _ => return (ov.policy, Some(ov.reason.as_str())),
            }
        }
        (self.default_policy, None)
    }

    /// Deny every action that mutates state; allow reads.
    pub fn readonly() -> Self {
        let deny_writes = ["write", "delete", "move", "create", "execute", "run", "set"]
            .iter()
            .map(|verb| PolicyOverride {
                module: "*".to_string(),
                action: Some(format!("{verb}*")),
                policy: Policy::Deny,
                reason: "readonly profile".to_string(),
            })
            .collect();
        Self {
            name: "readonly".to_string(),
            default_policy: Policy::Allow,
            overrides: deny_writes,
            strict_mode: true,
            max_scan_risk_score: 0.5,
        }
    }

    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            default_policy: Policy::Allow,
            overrides: vec![PolicyOverride {
                module: "os_exec".to_string(),
                action: None,
                policy: Policy::Prompt,
                reason: "shell execution requires approval".to_string(),
            }],
            strict_mode: true,
            max_scan_risk_score: Self::default_max_risk(),
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            name: "unrestricted".to_string(),
            default_policy: Policy::Allow,
            overrides: Vec::new(),
            strict_mode: false,
            max_scan_risk_score: 1.0,
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "readonly" => Some(Self::readonly()),
            "standard" => Some(Self::standard()),
            "unrestricted" => Some(Self::unrestricted()),
            _ => None,
        }
    }

    /// Load a named profile from a YAML file of `name -> profile body`.
    pub fn load(path: &Path, name: &str) -> BridgeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut profiles: std::collections::HashMap<String, ProfileBody> =
            serde_yaml::from_str(&content)
                .map_err(|e| BridgeError::Parse(format!("profile file {path:?}: {e}")))?;
        let body = profiles
            .remove(name)
            .ok_or_else(|| BridgeError::Internal(format!("no profile '{name}' in {path:?}")))?;
        Ok(Self {
            name: name.to_string(),
            default_policy: body.default_policy,
            overrides: body.overrides,
            strict_mode: body.strict_mode,
            max_scan_risk_score: body.max_scan_risk_score,
        })
    }
}

/// On-disk profile body; the name is the map key.
#[derive(Debug, Deserialize)]
struct ProfileBody {
    default_policy: Policy,
    #[serde(default)]
    overrides: Vec<PolicyOverride>,
    #[serde(default)]
    strict_mode: bool,
    #[serde(default = "PermissionProfile::default_max_risk")]
    max_scan_risk_score: f64,
}

/// Glob-lite matching for override actions: a trailing `*` matches any
/// suffix.
pub(crate) fn action_matches(pattern: &str, action: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        action.starts_with(prefix)
    } else {
        pattern == action
    }
}
