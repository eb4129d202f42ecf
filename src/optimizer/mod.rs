// Optimizer Module: graph rewriting passes

pub mod gc;
pub mod inplace;
pub mod mirror;
pub mod options;
pub mod pass;
pub mod pipeline;
pub mod prune;

// Re-exports
pub use gc::{simulate_gc, SimulateGc, OUTPUT_BUFFER_PREFIX};
pub use inplace::{add_inplace, AddInplace};
pub use mirror::{mirror_stage, MirrorStage, RecomputePlan, MIRROR_BUFFER_PREFIX, MIRROR_POOL_SIZE};
pub use options::{OptLevel, OptimizeOptions, Phase, OPT_LEVEL_ENV, PHASE_ENV};
pub use pass::{GraphPass, PassContext, PassManager};
pub use pipeline::{GraphOptimizer, OptimizedGraph};
pub use prune::{prune_nodes, PruneNodes};
