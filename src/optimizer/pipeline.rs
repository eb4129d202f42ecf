// Graph Optimizer
//
// Facade over the individual passes. Each pass is available on its own; the
// `optimize` entry point assembles them into a pipeline for an optimization
// level and phase:
//
//   prune-nodes -> add-inplace -> (mirror-stage | simulate-gc)

use crate::core::error::{OptimizerError, Result};
use crate::core::schema::OpSchemaRegistry;
use crate::core::workspace::Workspace;
use crate::ir::GraphDef;
use crate::optimizer::gc::{simulate_gc, SimulateGc};
use crate::optimizer::inplace::{add_inplace, AddInplace};
use crate::optimizer::mirror::{mirror_stage, MirrorStage, RecomputePlan};
use crate::optimizer::options::OptimizeOptions;
use crate::optimizer::pass::{PassContext, PassManager};
use crate::optimizer::prune::{prune_nodes, PruneNodes};

/// Result of an optimization run
#[derive(Debug, Clone)]
pub struct OptimizedGraph {
    /// Execution-ready graph
    pub graph: GraphDef,
    /// Replay lists for recomputed buffers; empty unless the mirror stage ran
    pub recompute_plan: RecomputePlan,
}

impl OptimizedGraph {
    /// Operators to replay to regenerate the buffer version named `buffer`
    pub fn replay_ops(&self, buffer: &str) -> Result<&[usize]> {
        self.recompute_plan
            .get_by_name(&self.graph, buffer)
            .ok_or_else(|| OptimizerError::UnknownTensor(buffer.to_string()))
    }
}

/// Graph optimizer bound to a workspace and a schema registry
pub struct GraphOptimizer<'a> {
    workspace: &'a mut dyn Workspace,
    schemas: &'a OpSchemaRegistry,
}

impl<'a> GraphOptimizer<'a> {
    pub fn new(workspace: &'a mut dyn Workspace, schemas: &'a OpSchemaRegistry) -> Self {
        Self { workspace, schemas }
    }

    pub fn prune_nodes(&self, graph: &GraphDef) -> GraphDef {
        prune_nodes(graph, &*self.workspace, self.schemas)
    }

    pub fn add_inplace(&mut self, graph: &GraphDef) -> GraphDef {
        add_inplace(graph, &mut *self.workspace, self.schemas)
    }

    pub fn mirror_stage(&mut self, graph: &GraphDef) -> Result<(GraphDef, RecomputePlan)> {
        mirror_stage(graph, &mut *self.workspace)
    }

    pub fn simulate_gc(&self, graph: &GraphDef) -> GraphDef {
        simulate_gc(graph, &*self.workspace, self.schemas)
    }

    /// Passes enabled by `options`, in execution order
    pub fn pass_manager(options: &OptimizeOptions) -> PassManager {
        let mut manager = PassManager::new();
        if options.prunes() {
            manager.add_pass(Box::new(PruneNodes::new()));
        }
        if options.aliases_inplace() {
            manager.add_pass(Box::new(AddInplace::new()));
        }
        if options.plans_recompute() {
            manager.add_pass(Box::new(MirrorStage::new()));
        }
        if options.pools_buffers() {
            manager.add_pass(Box::new(SimulateGc::new()));
        }
        manager
    }

    /// Run every pass enabled by `options`
    pub fn optimize(&mut self, graph: &GraphDef, options: &OptimizeOptions) -> Result<OptimizedGraph> {
        let mut manager = Self::pass_manager(options);
        log::debug!(
            "Optimizing '{}' at {} ({}): {:?}",
            graph.name,
            options.level,
            options.phase,
            manager.pass_names()
        );

        let mut cx = PassContext::new(&mut *self.workspace, self.schemas);
        let graph = manager.run_all(graph.clone(), &mut cx)?;
        Ok(OptimizedGraph {
            graph,
            recompute_plan: cx.recompute_plan,
        })
    }
}
