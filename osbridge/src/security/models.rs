//! Security data model: permissions, grants, risk levels, classifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

/// How data handled by an action is classified, declared per action in the
/// module manifest and consumed by audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    #[default]
    Public,
    Internal,
    Sensitive,
    Secret,
}

/// How much audit detail an action's outcome is recorded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    None,
    #[default]
    Basic,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionScope {
    /// Dies with the daemon process.
    Session,
    /// Persisted across restarts.
    Permanent,
}

/// A grant authorising one module to exercise one dotted permission id
/// (e.g. `filesystem.write`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub permission_id: String,
    pub module_id: String,
    pub scope: PermissionScope,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

impl PermissionGrant {
    pub fn session(permission_id: &str, module_id: &str, risk_level: RiskLevel) -> Self {
        Self {
            permission_id: permission_id.to_string(),
            module_id: module_id.to_string(),
            scope: PermissionScope::Session,
            granted_at: Utc::now(),
            expires_at: None,
            risk_level,
        }
    }

    pub fn permanent(permission_id: &str, module_id: &str, risk_level: RiskLevel) -> Self {
        Self {
            scope: PermissionScope::Permanent,
            ..Self::session(permission_id, module_id, risk_level)
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() > t).unwrap_or(false)
    }

    /// Composite key the store indexes on.
    pub fn key(&self) -> String {
        grant_key(&self.permission_id, &self.module_id)
    }
}

pub fn grant_key(permission_id: &str, module_id: &str) -> String {
    format!("{module_id}::{permission_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn grant_expiry() {
        let grant = PermissionGrant::session("filesystem.write", "filesystem", RiskLevel::High);
        assert!(!grant.is_expired());
        let expired = grant.with_expiry(Utc::now() - chrono::Duration::seconds(1));
        assert!(expired.is_expired());
    }

    #[test]
    fn risk_level_parses() {
        assert_eq!("critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert!("apocalyptic".parse::<RiskLevel>().is_err());
    }
}
