//! Error taxonomy for the bridge.
//!
//! Every failure the core can surface maps to one variant with a stable
//! string code. Security rejections carry structured recovery hints so the
//! submitting LLM can self-correct (notably `permission_not_granted`, which
//! names the exact `security.request_permission` call to make next).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A machine-readable suggestion for how the caller can recover from an
/// error, expressed as the next action to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryHint {
    pub module: String,
    pub action: String,
    pub params: Value,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    // --- Input ---
    #[error("plan parse error: {0}")]
    Parse(String),

    #[error("plan validation failed: {0}")]
    Validation(String),

    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("unknown action '{module}.{action}'")]
    UnknownAction { module: String, action: String },

    // --- Security ---
    #[error("permission denied by profile for {module}.{action}: {reason}")]
    PermissionDenied {
        module: String,
        action: String,
        reason: String,
    },

    #[error("permission '{permission}' not granted for module '{module_id}'")]
    PermissionNotGranted {
        permission: String,
        module_id: String,
        action: Option<String>,
        risk_level: String,
    },

    #[error("rate limit exceeded for '{action_key}' ({limit}/min), retry in {retry_after_s:.1}s")]
    RateLimitExceeded {
        action_key: String,
        limit: u32,
        retry_after_s: f64,
    },

    #[error("input scan blocked action: {0}")]
    ScanBlocked(String),

    #[error("intent verification rejected action: {0}")]
    SuspiciousIntent(String),

    #[error("action rejected by user: {0}")]
    UserRejected(String),

    // --- Execution ---
    #[error("template resolution failed: {0}")]
    Template(String),

    #[error("action timed out after {0}s")]
    Timeout(f64),

    #[error("execution cancelled")]
    Cancelled,

    #[error("module '{module}' unavailable: {reason}")]
    ProviderUnavailable { module: String, reason: String },

    #[error("module error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to load module '{0}': {1}")]
    ModuleLoad(String, String),

    // --- Orchestration ---
    #[error("rollback of action '{0}' failed: {1}")]
    RollbackFailed(String, String),

    #[error("rollback depth {0} exceeded")]
    RollbackDepthExceeded(usize),

    #[error("dependency '{0}' did not succeed")]
    DependencyFailed(String),

    // --- Triggers ---
    #[error("watcher failed: {0}")]
    WatcherFailed(String),

    #[error("trigger fire rejected: resource '{0}' is locked")]
    ConflictRejected(String),

    #[error("trigger '{0}' is disabled")]
    TriggerDisabled(String),

    // --- Internal ---
    #[error("internal error: {0}")]
    Internal(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl BridgeError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Parse(_) => "parse_error",
            BridgeError::Validation(_) => "validation_error",
            BridgeError::UnknownModule(_) => "unknown_module",
            BridgeError::UnknownAction { .. } => "unknown_action",
            BridgeError::PermissionDenied { .. } => "permission_denied",
            BridgeError::PermissionNotGranted { .. } => "permission_not_granted",
            BridgeError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            BridgeError::ScanBlocked(_) => "scan_blocked",
            BridgeError::SuspiciousIntent(_) => "suspicious_intent",
            BridgeError::UserRejected(_) => "user_rejected",
            BridgeError::Template(_) => "template_error",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::Cancelled => "cancelled",
            BridgeError::ProviderUnavailable { .. } => "provider_unavailable",
            BridgeError::Provider { .. } => "provider_error",
            BridgeError::UnsupportedPlatform(_) => "unsupported_platform",
            BridgeError::ModuleLoad(..) => "module_load_error",
            BridgeError::RollbackFailed(..) => "rollback_failed",
            BridgeError::RollbackDepthExceeded(_) => "rollback_depth_exceeded",
            BridgeError::DependencyFailed(_) => "dependency_failed",
            BridgeError::WatcherFailed(_) => "watcher_failed",
            BridgeError::ConflictRejected(_) => "conflict_rejected",
            BridgeError::TriggerDisabled(_) => "trigger_disabled",
            BridgeError::Internal(_)
            | BridgeError::Io(_)
            | BridgeError::Sqlite(_)
            | BridgeError::Serde(_) => "internal_error",
        }
    }

    /// Whether the retry policy may re-dispatch an action that failed with
    /// this error. Only transport-shaped failures qualify; parse, validation,
    /// security and template errors are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_)
                | BridgeError::ProviderUnavailable { .. }
                | BridgeError::Provider {
                    retryable: true,
                    ..
                }
        )
    }

    /// Structured recovery hint, where one exists for this error kind.
    pub fn recovery(&self) -> Option<RecoveryHint> {
        match self {
            BridgeError::PermissionNotGranted {
                permission,
                module_id,
                risk_level,
                ..
            } => Some(RecoveryHint {
                module: "security".to_string(),
                action: "request_permission".to_string(),
                params: serde_json::json!({
                    "permission_id": permission,
                    "module_id": module_id,
                    "risk_level": risk_level,
                    "scope": "session",
                }),
            }),
            BridgeError::RateLimitExceeded { retry_after_s, .. } => Some(RecoveryHint {
                module: "system".to_string(),
                action: "wait".to_string(),
                params: serde_json::json!({ "seconds": retry_after_s }),
            }),
            _ => None,
        }
    }

    /// Convert to the serialisable record stored in `ExecutionState.errors`.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            code: self.code().to_string(),
            message: self.to_string(),
            recovery: self.recovery(),
            cause: std::error::Error::source(self).map(|c| c.to_string()),
        }
    }
}

/// Serialisable snapshot of a [`BridgeError`], persisted in execution state
/// and returned in API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

pub type BridgeResult<T> = Result<T, BridgeError>;
