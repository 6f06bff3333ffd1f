//! Grant-level permission checks.
//!
//! For actions that declare a required permission id, the manager consults
//! the store; a missing grant fails with `permission_not_granted` carrying
//! the exact `security.request_permission` call the LLM should make next.

use std::sync::Arc;

use super::models::{PermissionGrant, PermissionScope, RiskLevel};
use super::permission_store::PermissionStore;
use crate::errors::{BridgeError, BridgeResult};

pub struct PermissionManager {
    store: Arc<PermissionStore>,
}

impl PermissionManager {
    pub fn new(store: Arc<PermissionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    /// Verify a grant exists for `(permission_id, module_id)`.
    pub fn check(
        &self,
        permission_id: &str,
        module_id: &str,
        action: Option<&str>,
        risk_level: RiskLevel,
    ) -> BridgeResult<PermissionGrant> {
        match self.store.get(permission_id, module_id)? {
            Some(grant) => Ok(grant),
            None => Err(BridgeError::PermissionNotGranted {
                permission: permission_id.to_string(),
                module_id: module_id.to_string(),
                action: action.map(str::to_string),
                risk_level: risk_level.to_string(),
            }),
        }
    }

    pub fn grant(
        &self,
        permission_id: &str,
        module_id: &str,
        scope: PermissionScope,
        risk_level: RiskLevel,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> BridgeResult<PermissionGrant> {
        let mut grant = match scope {
            PermissionScope::Session => {
                PermissionGrant::session(permission_id, module_id, risk_level)
            }
            PermissionScope::Permanent => {
                PermissionGrant::permanent(permission_id, module_id, risk_level)
            }
        };
        if let Some(at) = expires_at {
            grant = grant.with_expiry(at);
        }
        self.store.insert(grant.clone())?;
        tracing::info!(permission = permission_id, module = module_id, scope = ?scope, "permission granted");
        Ok(grant)
    }

    pub fn revoke(&self, permission_id: &str, module_id: &str) -> BridgeResult<bool> {
        let removed = self.store.remove(permission_id, module_id)?;
        if removed {
            tracing::info!(permission = permission_id, module = module_id, "permission revoked");
        }
        Ok(removed)
    }

    pub fn list(&self) -> BridgeResult<Vec<PermissionGrant>> {
        self.store.list()
    }
}
