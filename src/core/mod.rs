// Core Layer: errors and the collaborators injected into the passes
//
// The workspace answers tensor existence and alias registration; the schema
// registry answers per-operator capability queries.

pub mod error;
pub mod schema;
pub mod workspace;

// Re-export commonly used types
pub use error::{OptimizerError, Result};
pub use schema::{OpSchema, OpSchemaRegistry, PruneRule};
pub use workspace::{LocalWorkspace, TensorHandle, Workspace};
