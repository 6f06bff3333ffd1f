//! OSBridge core: the process-wide composition root.
//!
//! Builds every subsystem from [`Settings`] and injects dependencies
//! explicitly; there are no implicit globals. This struct is the API
//! surface transports (HTTP/WebSocket, CLI) translate onto.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{PromptOptions, SchemaRegistry, SystemPromptGenerator};
use crate::config::Settings;
use crate::errors::{BridgeError, BridgeResult};
use crate::events::{EventBus, FileSink, NullSink};
use crate::modules::{BridgeModule, ModuleRegistry};
use crate::orchestration::{
    ApprovalDecision, ExecutionState, ExecutorConfig, PendingApproval, PlanExecutor,
    PlanGroupExecutor, PlanGroupResult, PlanStateStore, ResourceManager,
};
use crate::protocol::{self, MigrationRegistry, Plan, RepairResult};
use crate::recording::{ShadowRecorder, WorkflowRecording, WorkflowReplayer};
use crate::security::{
    ActionRateLimiter, AuditLogger, IntentVerifier, LlmClient, OutputSanitizer, PermissionGuard,
    PermissionManager, PermissionProfile, PermissionScope, PermissionStore, PromptComposer,
    RiskLevel, ScannerRegistry, SecurityManager, ThreatCategoryRegistry,
};
use crate::triggers::{TriggerDaemon, TriggerDaemonConfig, TriggerDefinition, TriggerStore};

pub struct OsBridge {
    settings: Settings,
    bus: Arc<EventBus>,
    registry: Arc<ModuleRegistry>,
    security: Arc<SecurityManager>,
    executor: Arc<PlanExecutor>,
    group_executor: PlanGroupExecutor,
    recorder: Arc<ShadowRecorder>,
    trigger_daemon: Arc<TriggerDaemon>,
    schemas: Arc<SchemaRegistry>,
    prompt_generator: SystemPromptGenerator,
    migrations: MigrationRegistry,
    profile: PermissionProfile,
}

impl OsBridge {
    pub fn new(settings: Settings) -> BridgeResult<Self> {
        std::fs::create_dir_all(&settings.daemon.state_dir)?;

        let bus = EventBus::new(settings.events.queue_capacity);
        match settings.events.sink.as_str() {
            "file" => bus.register(Arc::new(FileSink::new(&settings.events.path))),
            _ => bus.register(Arc::new(NullSink)),
        }

        let profile = Self::resolve_profile(&settings)?;
        let grant_store = match &settings.security.grants_file {
            Some(path) => Arc::new(PermissionStore::open(path)?),
            None => Arc::new(PermissionStore::in_memory()),
        };

        let sanitizer_cfg = &settings.security.sanitizer;
        let security = Arc::new(SecurityManager {
            guard: PermissionGuard::new(profile.clone()),
            permissions: PermissionManager::new(grant_store),
            rate_limiter: ActionRateLimiter::new(
                settings.security.rate_limits.clone(),
                settings.security.default_rate_limit_per_minute,
            ),
            scanners: ScannerRegistry::with_defaults(),
            sanitizer: OutputSanitizer::new(
                sanitizer_cfg.max_depth,
                sanitizer_cfg.max_list_items,
                sanitizer_cfg.max_str_len,
                sanitizer_cfg.injection_scan,
            ),
            audit: AuditLogger::new(bus.clone()),
            intent_verifier: Self::build_verifier(&settings, &profile),
        });

        let registry = Arc::new(ModuleRegistry::new());
        let resources = Arc::new(ResourceManager::new(
            settings.resources.limits.clone(),
            settings.resources.default_limit,
        ));
        let state_store = Arc::new(PlanStateStore::open(
            settings.daemon.state_dir.join("plans"),
        )?);
        let recorder = Arc::new(ShadowRecorder::new());

        let executor = Arc::new(PlanExecutor::new(
            registry.clone(),
            security.clone(),
            resources,
            state_store,
            Arc::new(crate::orchestration::ApprovalGate::new()),
            bus.clone(),
            Some(recorder.clone()),
            ExecutorConfig {
                max_concurrent_actions: settings.executor.max_concurrent_actions,
                strict_templates: settings.executor.strict_templates,
                working_directory: settings.daemon.working_directory.clone(),
            },
        ));

        let trigger_store = Arc::new(TriggerStore::open(&settings.triggers.store_path)?);
        let trigger_daemon = TriggerDaemon::new(
            trigger_store,
            bus.clone(),
            executor.clone(),
            TriggerDaemonConfig {
                max_concurrent_fires: settings.triggers.max_concurrent_fires,
                failure_threshold: settings.triggers.failure_threshold,
                queue_wait_timeout_s: settings.triggers.queue_wait_timeout_s,
            },
        );

        let schemas = Arc::new(SchemaRegistry::new(registry.clone()));
        let prompt_generator = SystemPromptGenerator::new(registry.clone(), schemas.clone());

        Ok(Self {
            settings,
            bus,
            registry,
            security,
            group_executor: PlanGroupExecutor::new(executor.clone()),
            executor,
            recorder,
            trigger_daemon,
            schemas,
            prompt_generator,
            migrations: MigrationRegistry::default(),
            profile,
        })
    }

    fn resolve_profile(settings: &Settings) -> BridgeResult<PermissionProfile> {
        let name = settings.security.profile.as_str();
        if let Some(profile) = PermissionProfile::builtin(name) {
            return Ok(profile);
        }
        match &settings.security.profile_file {
            Some(path) => PermissionProfile::load(path, name),
            None => Err(BridgeError::Internal(format!(
                "unknown permission profile '{name}' and no profile_file configured"
            ))),
        }
    }

    fn build_verifier(settings: &Settings, profile: &PermissionProfile) -> Option<IntentVerifier> {
        let cfg = &settings.security.intent_verifier;
        if !cfg.enabled {
            return None;
        }
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();
        let client: Box<dyn LlmClient> = match cfg.provider.as_str() {
            "openai" => Box::new(crate::security::OpenAiLlmClient::new(
                cfg.endpoint.clone(),
                api_key,
                cfg.model.clone(),
            )),
            "anthropic" => Box::new(crate::security::AnthropicLlmClient::new(
                cfg.endpoint.clone(),
                api_key,
                cfg.model.clone(),
            )),
            "ollama" => Box::new(crate::security::OllamaLlmClient::new(
                cfg.endpoint.clone(),
                cfg.model.clone(),
            )),
            _ => Box::new(crate::security::NullLlmClient),
        };
        Some(IntentVerifier::new(
            client,
            PromptComposer::new(ThreatCategoryRegistry::default()),
            profile.strict_mode,
            Duration::from_secs_f64(cfg.cache_ttl_s),
        ))
    }

    // --- lifecycle ---

    pub async fn start(&self) -> BridgeResult<()> {
        if self.settings.triggers.enabled {
            self.trigger_daemon.start().await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.trigger_daemon.stop().await;
        self.bus.flush().await;
        self.bus.shutdown();
    }

    // --- modules ---

    pub fn register_module(&self, module: Arc<dyn BridgeModule>) {
        self.registry.register(module);
        self.schemas.clear_cache();
    }

    pub fn deregister_module(&self, module_id: &str) -> bool {
        let removed = self.registry.deregister(module_id);
        if removed {
            self.schemas.clear_cache();
        }
        removed
    }

    pub fn module_manifests(&self) -> Vec<crate::modules::ModuleManifest> {
        self.registry.manifests()
    }

    pub fn module_manifest(&self, module_id: &str) -> Option<crate::modules::ModuleManifest> {
        self.registry.manifest(module_id)
    }

    pub fn action_schema(&self, module_id: &str, action: &str) -> Value {
        self.schemas.action_params_schema(module_id, action)
    }

    // --- plans ---

    /// Full submission path: migrate, parse, validate, input-scan, execute.
    pub async fn submit_plan(&self, raw: &Value) -> BridgeResult<ExecutionState> {
        let plan = self.prepare_plan(raw)?;
        self.executor.run(plan).await
    }

    /// Everything up to (not including) execution; shared by submit paths.
    pub fn prepare_plan(&self, raw: &Value) -> BridgeResult<Plan> {
        let migrated = self.migrations.migrate(raw.clone())?;
        let plan = protocol::parse(&migrated)?;
        protocol::validate(
            &plan,
            self.registry.as_ref(),
            self.settings.executor.strict_validation,
        )?;
        self.security.scan_plan(&plan)?;
        Ok(plan)
    }

    pub async fn submit_plan_group(
        &self,
        raws: &[Value],
        group_id: Option<String>,
        max_concurrent: usize,
        timeout_s: f64,
    ) -> BridgeResult<PlanGroupResult> {
        let mut plans = Vec::with_capacity(raws.len());
        for raw in raws {
            plans.push(self.prepare_plan(raw)?);
        }
        Ok(self
            .group_executor
            .execute(plans, group_id, max_concurrent, timeout_s)
            .await)
    }

    pub fn plan_state(&self, plan_id: &str) -> BridgeResult<Option<ExecutionState>> {
        self.executor.state_store().load(plan_id)
    }

    pub fn cancel_plan(&self, plan_id: &str) -> bool {
        self.executor.cancel(plan_id)
    }

    pub fn repair_plan(&self, raw: &Value, diagnostics: &[String]) -> RepairResult {
        protocol::repair(raw, diagnostics)
    }

    // --- approvals ---

    pub fn approve_action(&self, plan_id: &str, action_id: &str) -> BridgeResult<()> {
        self.executor
            .approval_gate()
            .resolve(plan_id, action_id, ApprovalDecision::Approve)
    }

    pub fn reject_action(&self, plan_id: &str, action_id: &str, reason: &str) -> BridgeResult<()> {
        self.executor.approval_gate().resolve(
            plan_id,
            action_id,
            ApprovalDecision::Reject {
                reason: reason.to_string(),
            },
        )
    }

    pub fn edit_and_approve_action(
        &self,
        plan_id: &str,
        action_id: &str,
        params: serde_json::Map<String, Value>,
    ) -> BridgeResult<()> {
        self.executor
            .approval_gate()
            .resolve(plan_id, action_id, ApprovalDecision::Edit { params })
    }

    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.executor.approval_gate().pending()
    }

    // --- permissions ---

    pub fn request_permission(
        &self,
        permission_id: &str,
        module_id: &str,
        scope: PermissionScope,
        risk_level: RiskLevel,
    ) -> BridgeResult<()> {
        let grant =
            self.security
                .permissions
                .grant(permission_id, module_id, scope, risk_level, None)?;
        let scope = match grant.scope {
            PermissionScope::Session => "session",
            PermissionScope::Permanent => "permanent",
        };
        self.security
            .audit
            .permission_granted(permission_id, module_id, scope);
        Ok(())
    }

    pub fn revoke_permission(&self, permission_id: &str, module_id: &str) -> BridgeResult<bool> {
        let revoked = self.security.permissions.revoke(permission_id, module_id)?;
        if revoked {
            self.security
                .audit
                .permission_revoked(permission_id, module_id);
        }
        Ok(revoked)
    }

    // --- scanners ---

    pub fn list_scanners(&self) -> Vec<crate::security::scanners::ScannerInfo> {
        self.security.scanners.list()
    }

    pub fn set_scanner_enabled(&self, name: &str, enabled: bool) -> bool {
        self.security.scanners.set_enabled(name, enabled)
    }

    // --- triggers ---

    pub async fn register_trigger(
        &self,
        trigger: TriggerDefinition,
    ) -> BridgeResult<TriggerDefinition> {
        self.trigger_daemon.register(trigger).await
    }

    pub async fn activate_trigger(&self, trigger_id: &str) -> BridgeResult<()> {
        self.trigger_daemon.activate(trigger_id).await
    }

    pub async fn deactivate_trigger(&self, trigger_id: &str) -> BridgeResult<()> {
        self.trigger_daemon.deactivate(trigger_id).await
    }

    pub async fn delete_trigger(&self, trigger_id: &str) -> BridgeResult<bool> {
        self.trigger_daemon.delete(trigger_id).await
    }

    pub fn list_triggers(&self) -> BridgeResult<Vec<TriggerDefinition>> {
        self.trigger_daemon.list()
    }

    // --- recordings ---

    pub fn start_recording(&self, title: &str, description: &str) -> BridgeResult<WorkflowRecording> {
        self.recorder.start(title, description)
    }

    pub fn stop_recording(&self, recording_id: &str) -> BridgeResult<WorkflowRecording> {
        self.recorder.stop(recording_id)
    }

    pub fn list_recordings(&self) -> BridgeResult<Vec<WorkflowRecording>> {
        self.recorder.list()
    }

    pub fn replay_plan(&self, recording_id: &str) -> BridgeResult<Value> {
        let recording = self
            .recorder
            .get(recording_id)?
            .ok_or_else(|| BridgeError::Internal(format!("no recording '{recording_id}'")))?;
        Ok(WorkflowReplayer::generate(&recording))
    }

    // --- introspection ---

    pub fn system_prompt(&self, options: &PromptOptions) -> String {
        self.prompt_generator.generate_text(&self.profile, options)
    }

    pub fn system_prompt_json(&self, options: &PromptOptions) -> Value {
        self.prompt_generator.generate_json(&self.profile, options)
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn trigger_daemon(&self) -> &Arc<TriggerDaemon> {
        &self.trigger_daemon
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
