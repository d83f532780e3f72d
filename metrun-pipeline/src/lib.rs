//! Metrun Pipeline
//!
//! Declarative pipeline handling for metrun:
//! - Variable pool threaded through pipeline steps
//! - Command template engine (conditionals, optional fragments, variables)
//! - Pipeline definition loading with group enable/disable
//! - Tool discovery against stored path bindings and `$PATH`

pub mod definition;
pub mod error;
pub mod pool;
pub mod template;
pub mod tools;

pub use definition::{Group, InputKind, PipelineDefinition, ResolvedCommand};
pub use error::DefinitionError;
pub use pool::{VariablePool, is_truthy};
pub use template::{CommandTemplate, Resolution, expand};
pub use tools::find_tool;
