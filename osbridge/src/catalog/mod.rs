//! Capability catalog: schema registry and system-prompt generation for
//! external callers.

mod schema_registry;
mod system_prompt;

pub use schema_registry::SchemaRegistry;
pub use system_prompt::{PromptOptions, SystemPromptGenerator};
