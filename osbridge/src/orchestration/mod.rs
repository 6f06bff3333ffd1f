//! Orchestration: wave scheduling, execution state, the plan executor,
//! rollback, approval gating, resource caps and plan groups.

pub mod approval;
pub mod executor;
pub mod plan_group;
pub mod resource_manager;
pub mod rollback;
pub mod scheduler;
pub mod state;
pub mod state_store;

pub use approval::{ApprovalDecision, ApprovalGate, PendingApproval};
pub use executor::{ExecutorConfig, PlanExecutor};
pub use plan_group::{GroupStatus, GroupSummary, PlanGroupExecutor, PlanGroupResult};
pub use resource_manager::{ResourceManager, ResourceStatus};
pub use rollback::{RollbackEngine, MAX_ROLLBACK_DEPTH};
pub use scheduler::compute_waves;
pub use state::{ActionState, ActionStatus, ExecutionState, PlanStatus, STATE_VERSION};
pub use state_store::PlanStateStore;
