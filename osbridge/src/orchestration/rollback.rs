//! Rollback engine.
//!
//! When an action fails with `on_error: rollback`, the engine resolves the
//! compensating action by id in the same plan, merges the failed action's
//! `rollback.params` over the target's params, resolves templates against
//! completed results, and dispatches exactly once. Rollback actions never
//! trigger further rollbacks; a depth cap guards against chains. Failures
//! are logged and audited, never surfaced as exceptions.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::modules::{CancelSignal, ExecutionContext, ModuleRegistry};
use crate::protocol::models::{Action, Plan};
use crate::protocol::template::TemplateContext;
use crate::security::SecurityManager;

pub const MAX_ROLLBACK_DEPTH: usize = 5;

pub struct RollbackEngine {
    registry: Arc<ModuleRegistry>,
    security: Arc<SecurityManager>,
}

impl RollbackEngine {
    pub fn new(registry: Arc<ModuleRegistry>, security: Arc<SecurityManager>) -> Self {
        Self { registry, security }
    }

    /// Dispatch the compensating action for `failed_action`. Returns
    /// whether the rollback ran and succeeded.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        plan: &Plan,
        failed_action: &Action,
        results: &HashMap<String, Value>,
        statuses: &HashMap<String, String>,
        working_directory: &std::path::Path,
        cancel: CancelSignal,
        depth: usize,
    ) -> bool {
        if depth >= MAX_ROLLBACK_DEPTH {
            tracing::error!(
                action_id = %failed_action.id,
                max_depth = MAX_ROLLBACK_DEPTH,
                "rollback depth exceeded; halting"
            );
            return false;
        }

        let Some(rollback) = &failed_action.rollback else {
            return false;
        };
        let Some(target) = plan.get_action(&rollback.action) else {
            tracing::error!(
                action_id = %failed_action.id,
                rollback_target = %rollback.action,
                "rollback target not found in plan"
            );
            return false;
        };

        // Rollback-specific params override the target's own.
        let mut params = target.params.clone();
        for (k, v) in &rollback.params {
            params.insert(k.clone(), v.clone());
        }

        let template = TemplateContext {
            plan,
            results,
            statuses,
            strict: false,
        };
        let params = match template.resolve_params(&params) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "rollback template resolution failed");
                return false;
            }
        };

        tracing::info!(
            failed_action = %failed_action.id,
            rollback_action = %target.id,
            "executing rollback"
        );

        let module = match self.registry.get(&target.module) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "rollback module unavailable");
                self.security
                    .audit
                    .rollback_executed(&plan.plan_id, &failed_action.id, &target.id, false);
                return false;
            }
        };

        let ctx = ExecutionContext {
            plan_id: plan.plan_id.clone(),
            action_id: target.id.clone(),
            previous_results: Arc::new(results.clone()),
            working_directory: working_directory.to_path_buf(),
            security: self.security.clone(),
            cancel,
        };

        let ok = match module.execute(&target.action, &params, &ctx).await {
            Ok(_) => {
                tracing::info!(rollback_action = %target.id, "rollback completed");
                true
            }
            Err(e) => {
                tracing::error!(rollback_action = %target.id, error = %e, "rollback failed");
                false
            }
        };
        self.security
            .audit
            .rollback_executed(&plan.plan_id, &failed_action.id, &target.id, ok);
        ok
    }
}
