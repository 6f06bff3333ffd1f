//! Reactive trigger subsystem: persistent definitions, runtime watchers, a
//! priority fire scheduler, resource-lock conflict resolution, and
//! session-context propagation.

pub mod conflict;
pub mod context;
pub mod daemon;
pub mod models;
pub mod scheduler;
pub mod store;
pub mod watchers;

pub use conflict::{ConflictResolver, LockHolder};
pub use context::SessionContextPropagator;
pub use daemon::{TriggerDaemon, TriggerDaemonConfig};
pub use models::{
    CompositeOp, ConflictPolicy, FsEventKind, ProcessTransition, ResourceMetric,
    TriggerCondition, TriggerDefinition, TriggerFireEvent, TriggerHealth, TriggerState,
    MAX_CONDITION_DEPTH,
};
pub use scheduler::PriorityFireScheduler;
pub use store::TriggerStore;
pub use watchers::{build_watcher, FireCallback, Watcher};
