//! Plan protocol: model, parsing, validation, migration, repair, templating.

pub mod compat;
pub mod migration;
pub mod models;
pub mod parser;
pub mod repair;
pub mod template;
pub mod validator;

pub use compat::{CompatibilityReport, ModuleVersionChecker};
pub use migration::MigrationRegistry;
pub use models::{
    Action, ExecutionMode, OnErrorBehavior, Plan, PlanMode, RetryConfig, RollbackConfig,
    PROTOCOL_VERSION,
};
pub use parser::parse;
pub use repair::{repair, CorrectionPromptFormatter, RepairChange, RepairResult};
pub use template::TemplateContext;
pub use validator::{validate, OpenWorld, SchemaSource};
