// Optimization Pass Infrastructure

use crate::core::error::Result;
use crate::core::schema::OpSchemaRegistry;
use crate::core::workspace::Workspace;
use crate::ir::GraphDef;
use crate::optimizer::mirror::RecomputePlan;

/// Collaborators shared by the passes of one optimization run
pub struct PassContext<'a> {
    /// Tensor existence and alias registration
    pub workspace: &'a mut dyn Workspace,
    /// Operator capability declarations
    pub schemas: &'a OpSchemaRegistry,
    /// Filled in by the mirror stage
    pub recompute_plan: RecomputePlan,
}

impl<'a> PassContext<'a> {
    pub fn new(workspace: &'a mut dyn Workspace, schemas: &'a OpSchemaRegistry) -> Self {
        Self {
            workspace,
            schemas,
            recompute_plan: RecomputePlan::default(),
        }
    }
}

/// Optimization pass trait
///
/// A pass maps one graph definition to a new one; the input is never mutated.
pub trait GraphPass {
    /// Run the pass on a graph
    fn run(&mut self, graph: &GraphDef, cx: &mut PassContext<'_>) -> Result<GraphDef>;

    /// Get pass name
    fn name(&self) -> &str;
}

/// Pass manager for running multiple passes in order
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add_pass(&mut self, pass: Box<dyn GraphPass>) {
        self.passes.push(pass);
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Names of the scheduled passes
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn run_all(&mut self, graph: GraphDef, cx: &mut PassContext<'_>) -> Result<GraphDef> {
        let mut current = graph;
        for pass in &mut self.passes {
            log::debug!(
                "Running optimization pass '{}' on '{}' ({} operators)",
                pass.name(),
                current.name,
                current.op_count()
            );
            let next = pass.run(&current, cx)?;
            if next.ops() != current.ops() {
                log::debug!(
                    "Pass '{}' modified the graph: {} -> {} operators",
                    pass.name(),
                    current.op_count(),
                    next.op_count()
                );
                log::trace!("{}", next);
            } else {
                log::trace!("Pass '{}' made no changes", pass.name());
            }
            current = next;
        }
        Ok(current)
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}
