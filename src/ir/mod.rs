// IR Module: graph definitions and their derived structure

pub mod builder;
pub mod dag;
pub mod graph;
pub mod node;
pub mod symbol;

// Re-exports
pub use builder::GraphBuilder;
pub use dag::{DagIndex, DagNode};
pub use graph::{GradientRequest, GraphDef, GRADIENT_SUFFIX};
pub use node::{ArgValue, Argument, OperatorDef, Slot, MIRROR_STAGE_ARG, SHAPE_LIKE_ARG};
pub use symbol::{SymbolTable, TensorId};
