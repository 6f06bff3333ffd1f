//! Profile-level permission guard: the first stage of the admission
//! pipeline. Matching denies short-circuit before any grant or scanner
//! work happens.

use super::profiles::{PermissionProfile, Policy};
use crate::errors::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    /// Allowed, but must pass the approval gate before dispatch.
    RequiresApproval,
}

pub struct PermissionGuard {
    profile: PermissionProfile,
}

impl PermissionGuard {
    pub fn new(profile: PermissionProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &PermissionProfile {
        &self.profile
    }

    pub fn check(&self, module: &str, action: &str) -> BridgeResult<GuardOutcome> {
        let (policy, reason) = self.profile.policy_for(module, action);
        match policy {
            Policy::Allow => Ok(GuardOutcome::Allow),
            Policy::Prompt => Ok(GuardOutcome::RequiresApproval),
            Policy::Deny => Err(BridgeError::PermissionDenied {
                module: module.to_string(),
                action: action.to_string(),
                reason: reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or("profile default policy")
                    .to_string(),
            }),
        }
    }
}
