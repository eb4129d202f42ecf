// TensorPlan: static graph optimizer for dataflow graph definitions
//
// Takes a declarative graph (operators consuming and producing named tensors,
// plus preserved outputs and requested gradients) and rewrites it into an
// equivalent, execution-ready graph with a bounded memory footprint.
//
// Architecture:
// - ir: graph definitions, interned tensor ids and the per-pass DAG index
// - core: error type, operator schemas and the workspace abstraction
// - optimizer: pruning, in-place aliasing, recomputation planning and
//   buffer-pool simulation, composed by optimization level
// - compiler: validation plus a fingerprint-keyed cache of optimized graphs

pub mod compiler;
pub mod core;
pub mod ir;
pub mod optimizer;

// Re-export commonly used items for convenience
pub use crate::compiler::GraphCompiler;
pub use crate::core::{LocalWorkspace, OpSchema, OpSchemaRegistry, OptimizerError, Result, Workspace};
pub use crate::ir::{GraphBuilder, GraphDef, OperatorDef, Slot, TensorId};
pub use crate::optimizer::{GraphOptimizer, OptLevel, OptimizeOptions, OptimizedGraph, Phase, RecomputePlan};
