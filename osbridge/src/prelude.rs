//! Convenience re-exports for embedding the bridge.

pub use crate::bridge_core::OsBridge;
pub use crate::config::Settings;
pub use crate::errors::{BridgeError, BridgeResult, ErrorRecord, RecoveryHint};
pub use crate::events::{Event, EventBus, EventSink, Topic};
pub use crate::modules::{
    ActionSpec, BridgeModule, CancelSignal, ExecutionContext, ModuleManifest, ModuleRegistry,
};
pub use crate::orchestration::{
    ActionStatus, ApprovalDecision, ExecutionState, PlanExecutor, PlanGroupResult, PlanStatus,
};
pub use crate::protocol::{Action, ExecutionMode, OnErrorBehavior, Plan, RetryConfig};
pub use crate::security::{PermissionProfile, PermissionScope, RiskLevel, SecurityManager};
pub use crate::triggers::{TriggerCondition, TriggerDaemon, TriggerDefinition, TriggerState};
