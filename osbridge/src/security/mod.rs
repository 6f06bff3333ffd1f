//! Security envelope: profiles, grants, rate limiting, scanners, intent
//! verification, output sanitisation, audit trail.
//!
//! The [`SecurityManager`] aggregates all subsystems and is injected into
//! the executor and every module's execution context. Admission control is
//! a strict-order pipeline; each stage can reject, and rejections come back
//! as error values, never unwinds.

pub mod audit;
pub mod guard;
pub mod intent_verifier;
pub mod llm_client;
pub mod models;
pub mod permission_store;
pub mod permissions;
pub mod profiles;
pub mod prompt_composer;
pub mod providers;
pub mod rate_limiter;
pub mod sanitizer;
pub mod scanners;
pub mod threat_categories;

pub use audit::{AuditEvent, AuditLogger};
pub use guard::{GuardOutcome, PermissionGuard};
pub use intent_verifier::{IntentVerifier, VerificationResult, VerificationVerdict};
pub use llm_client::{ChatOptions, LlmClient, LlmMessage, LlmResponse, NullLlmClient};
pub use models::{
    AuditLevel, DataClassification, PermissionGrant, PermissionScope, RiskLevel,
};
pub use permission_store::PermissionStore;
pub use permissions::PermissionManager;
pub use profiles::{PermissionProfile, Policy, PolicyOverride};
pub use prompt_composer::PromptComposer;
pub use providers::{AnthropicLlmClient, OllamaLlmClient, OpenAiLlmClient};
pub use rate_limiter::ActionRateLimiter;
pub use sanitizer::OutputSanitizer;
pub use scanners::{
    HeuristicScanner, InputScanner, PipelineResult, ScanContext, ScanResult, ScanVerdict,
    ScannerRegistry, ThreatDetail,
};
pub use threat_categories::{ThreatCategory, ThreatCategoryRegistry};

use serde_json::Value;

use crate::errors::{BridgeError, BridgeResult};
use crate::protocol::models::{Action, Plan};

/// Per-action security metadata the executor gathers from the plan and the
/// module manifest before admission.
#[derive(Debug, Clone, Default)]
pub struct ActionSecurityInfo {
    /// Dotted permission id required by the manifest or the plan.
    pub permission_required: Option<String>,
    pub risk_level: RiskLevel,
    /// Sensitive actions go through the intent verifier when one is
    /// configured.
    pub sensitive: bool,
}

/// What the pipeline learned while admitting an action.
#[derive(Debug, Default)]
pub struct AdmissionReport {
    /// The profile demands the approval gate for this action.
    pub requires_approval: bool,
    pub risk_score: f64,
    pub verification: Option<VerificationResult>,
}

/// Aggregate of all security subsystems, built once by the composition root.
pub struct SecurityManager {
    pub guard: PermissionGuard,
    pub permissions: PermissionManager,
    pub rate_limiter: ActionRateLimiter,
    pub scanners: ScannerRegistry,
    pub sanitizer: OutputSanitizer,
    pub audit: AuditLogger,
    pub intent_verifier: Option<IntentVerifier>,
}

impl SecurityManager {
    /// Run the admission pipeline for one action, in strict stage order:
    /// profile guard, grant check, rate limit, input scanners, intent
    /// verifier. The first rejection wins.
    pub async fn admit(
        &self,
        plan: &Plan,
        action: &Action,
        info: &ActionSecurityInfo,
    ) -> BridgeResult<AdmissionReport> {
        let mut report = AdmissionReport::default();

        // 1. Profile-level guard.
        match self.guard.check(&action.module, &action.action) {
            Ok(GuardOutcome::Allow) => {}
            Ok(GuardOutcome::RequiresApproval) => report.requires_approval = true,
            Err(err) => {
                self.audit.permission_check_failed(
                    &plan.plan_id,
                    &action.id,
                    &action.action_key(),
                );
                return Err(err);
            }
        }

        // 2. Grant-level check.
        let required = action
            .permission_required
            .as_deref()
            .or(info.permission_required.as_deref());
        if let Some(permission) = required {
            if let Err(err) = self.permissions.check(
                permission,
                &action.module,
                Some(&action.action),
                info.risk_level,
            ) {
                self.audit
                    .permission_check_failed(&plan.plan_id, &action.id, permission);
                return Err(err);
            }
        }

        // 3. Rate limit.
        if let Err(err) = self.rate_limiter.check(&action.action_key()) {
            if let BridgeError::RateLimitExceeded { limit, .. } = &err {
                self.audit.rate_limit_exceeded(&action.action_key(), *limit);
            }
            return Err(err);
        }

        // 4. Input scanners.
        let ctx = ScanContext {
            module: action.module.clone(),
            action: action.action.clone(),
            params: action.params.clone(),
            plan_description: plan.description.clone(),
        };
        let scan = self.scanners.scan(&ctx, self.guard.profile());
        report.risk_score = scan.risk_score;
        self.audit.action_scanned(
            &plan.plan_id,
            &action.id,
            verdict_str(scan.verdict),
            scan.risk_score,
        );
        if scan.verdict == ScanVerdict::Reject {
            let threats: Vec<&ThreatDetail> =
                scan.results.iter().flat_map(|r| &r.threats).collect();
            let summary = threats
                .iter()
                .map(|t| t.category.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            self.audit.scan_blocked(
                &plan.plan_id,
                &action.id,
                scan.risk_score,
                serde_json::to_value(&threats).unwrap_or(Value::Null),
            );
            return Err(BridgeError::ScanBlocked(format!(
                "{} (risk {:.2})",
                if summary.is_empty() { "input rejected" } else { summary.as_str() },
                scan.risk_score
            )));
        }

        // 5. Intent verification for sensitive actions.
        if info.sensitive {
            if let Some(verifier) = &self.intent_verifier {
                let verification = verifier.verify(&plan.description, action).await?;
                self.audit.sensitive_action_invoked(
                    &plan.plan_id,
                    &action.id,
                    &action.action_key(),
                    verification_str(verification.verdict),
                );
                report.verification = Some(verification);
            }
        }

        Ok(report)
    }

    /// Input scan over a whole plan before scheduling: every action is
    /// scanned; the first rejection fails the plan.
    pub fn scan_plan(&self, plan: &Plan) -> BridgeResult<()> {
        for action in &plan.actions {
            let ctx = ScanContext {
                module: action.module.clone(),
                action: action.action.clone(),
                params: action.params.clone(),
                plan_description: plan.description.clone(),
            };
            let scan = self.scanners.scan(&ctx, self.guard.profile());
            if scan.verdict == ScanVerdict::Reject {
                self.audit.scan_blocked(
                    &plan.plan_id,
                    &action.id,
                    scan.risk_score,
                    Value::Null,
                );
                return Err(BridgeError::ScanBlocked(format!(
                    "action '{}' rejected by input scan (risk {:.2})",
                    action.id, scan.risk_score
                )));
            }
        }
        Ok(())
    }

    /// Output sanitisation (pipeline stage 7); returns the cleaned value
    /// and whether anything changed.
    pub fn sanitize_output(&self, value: &Value) -> (Value, bool) {
        let cleaned = self.sanitizer.sanitize(value);
        let changed = &cleaned != value;
        (cleaned, changed)
    }
}

fn verdict_str(v: ScanVerdict) -> &'static str {
    match v {
        ScanVerdict::Allow => "allow",
        ScanVerdict::Warn => "warn",
        ScanVerdict::Reject => "reject",
    }
}

fn verification_str(v: VerificationVerdict) -> &'static str {
    match v {
        VerificationVerdict::Approve => "approve",
        VerificationVerdict::Warn => "warn",
        VerificationVerdict::Reject => "reject",
    }
}
