// Pruning Pass
//
// Keeps only the operators needed to produce the declared outputs and to
// connect each requested cost gradient to its with-respect-to gradient.
//
// Two coloring sweeps over the same DAG:
// - backward from every output (and every gradient cost) through parent edges
// - forward from each cost gradient through child edges, marking a
//   connecting path to the with-respect-to gradient
//
// Surviving operators then have unneeded slots rewritten to absent, followed by
// the prune rules their schema declares.

use crate::core::error::Result;
use crate::core::schema::OpSchemaRegistry;
use crate::core::workspace::Workspace;
use crate::ir::{DagIndex, GraphDef, Slot, TensorId};
use crate::optimizer::pass::{GraphPass, PassContext};
use rustc_hash::{FxHashMap, FxHashSet};

/// Dead/irrelevant operator elimination
#[derive(Debug, Default)]
pub struct PruneNodes;

impl PruneNodes {
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for PruneNodes {
    fn run(&mut self, graph: &GraphDef, cx: &mut PassContext<'_>) -> Result<GraphDef> {
        Ok(prune_nodes(graph, &*cx.workspace, cx.schemas))
    }

    fn name(&self) -> &str {
        "prune-nodes"
    }
}

/// Prune `graph`; see the module documentation
pub fn prune_nodes(
    graph: &GraphDef,
    workspace: &dyn Workspace,
    schemas: &OpSchemaRegistry,
) -> GraphDef {
    let dag = DagIndex::build(graph);
    let mut required: FxHashSet<TensorId> = FxHashSet::default();

    // The cost of a gradient request has to be evaluated to be differentiated
    let targets = graph
        .outputs()
        .iter()
        .copied()
        .chain(graph.gradients().iter().map(|request| request.cost));
    for target in targets {
        if !required.contains(&target) {
            color_backward(&dag, target, &mut required);
        }
    }

    for request in graph.gradients() {
        let source = resolve_gradient(graph, workspace, request.cost);
        let leaf = resolve_gradient(graph, workspace, request.wrt);
        match (source, leaf) {
            (Some(source), Some(leaf)) => {
                if !color_forward(&dag, source, leaf, &mut required) {
                    log::debug!(
                        "No path from {} to {}",
                        graph.name_of(source),
                        graph.name_of(leaf)
                    );
                }
            }
            _ => log::debug!(
                "Gradient d{}/d{} does not resolve to graph tensors",
                graph.name_of(request.cost),
                graph.name_of(request.wrt)
            ),
        }
    }

    let mut materialized: FxHashSet<TensorId> = workspace
        .tensor_names()
        .iter()
        .filter_map(|name| graph.tensor(name))
        .collect();
    materialized.extend(graph.inputs().iter().copied());

    // Every writer of a required tensor survives, not only the last one
    let mut pruned = graph.without_ops();
    for (index, op) in graph.ops().iter().enumerate() {
        if !op.output_tensors().any(|id| required.contains(&id)) {
            continue;
        }
        let mut op = op.clone();

        for slot in op.inputs.iter_mut() {
            if let Slot::Present(id) = *slot {
                if !required.contains(&id) || !materialized.contains(&id) {
                    *slot = Slot::Absent;
                }
            }
        }
        for slot in op.outputs.iter_mut() {
            if let Slot::Present(id) = *slot {
                if required.contains(&id) {
                    materialized.insert(id);
                } else {
                    *slot = Slot::Absent;
                }
            }
        }
        if let Some(schema) = schemas.schema_for(&op.op_type) {
            if schema.apply_prune_rules(&mut op) {
                log::trace!("Prune rules of {} dropped inputs of #{}", op.op_type, index);
            }
        }

        pruned.push_op(op);
    }

    log::debug!(
        "Pruned '{}': kept {} of {} operators ({} required tensors)",
        graph.name,
        pruned.op_count(),
        graph.op_count(),
        required.len()
    );
    pruned
}

/// Gradient tensor of `id`, following workspace aliases
fn resolve_gradient(graph: &GraphDef, workspace: &dyn Workspace, id: TensorId) -> Option<TensorId> {
    let name = graph.gradient_name(id);
    let name = if workspace.has_tensor(&name) {
        workspace.tensor_name(&name)
    } else {
        name
    };
    graph.tensor(&name)
}

/// Mark `target` and all of its transitive parents
fn color_backward(dag: &DagIndex, target: TensorId, required: &mut FxHashSet<TensorId>) {
    let mut stack = vec![target];
    while let Some(v) = stack.pop() {
        if !required.insert(v) {
            continue;
        }
        for &u in dag.parents(v) {
            if !required.contains(&u) {
                stack.push(u);
            }
        }
    }
}

/// Depth-first search from `source` to `leaf` through child edges.
///
/// `visited` holds false for tensors explored without reaching the leaf and
/// true for tensors known to lead to it. Reaching the leaf marks the current
/// path and ends the exploration of the tensor it was reached from; reaching a
/// tensor known to lead to the leaf marks the current path without descending.
/// Returns true if any path was marked.
fn color_forward(
    dag: &DagIndex,
    source: TensorId,
    leaf: TensorId,
    required: &mut FxHashSet<TensorId>,
) -> bool {
    let mut visited: FxHashMap<TensorId, bool> = FxHashMap::default();
    let mut path = vec![source];
    let mut cursors = vec![0usize];
    let mut found = false;
    visited.insert(source, false);

    while let Some(&u) = path.last() {
        let depth = path.len() - 1;
        let Some(&v) = dag.children(u).get(cursors[depth]) else {
            path.pop();
            cursors.pop();
            continue;
        };
        cursors[depth] += 1;

        if v == leaf {
            mark_path(&path, v, &mut visited, required);
            found = true;
            path.pop();
            cursors.pop();
            continue;
        }

        match visited.get(&v) {
            Some(true) => {
                mark_path(&path, v, &mut visited, required);
                found = true;
            }
            Some(false) => {}
            None => {
                visited.insert(v, false);
                path.push(v);
                cursors.push(0);
            }
        }
    }
    found
}

fn mark_path(
    path: &[TensorId],
    last: TensorId,
    visited: &mut FxHashMap<TensorId, bool>,
    required: &mut FxHashSet<TensorId>,
) {
    for &node in path.iter().chain(std::iter::once(&last)) {
        visited.insert(node, true);
        required.insert(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workspace::LocalWorkspace;
    use crate::ir::GraphBuilder;

    fn prune(graph: &GraphDef, ws: &LocalWorkspace) -> GraphDef {
        prune_nodes(graph, ws, OpSchemaRegistry::builtin())
    }

    #[test]
    fn test_keeps_chain_to_output() {
        let mut builder = GraphBuilder::new("g");
        builder.input("A");
        builder.input("B");
        builder.op("Add", &["A", "B"], &["C"]);
        builder.op("Relu", &["C"], &["D"]);
        builder.output("D");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        assert_eq!(pruned.ops(), graph.ops());
    }

    #[test]
    fn test_drops_unreachable_consumer() {
        let mut builder = GraphBuilder::new("g");
        builder.input("A");
        builder.input("B");
        builder.op("Add", &["A", "B"], &["C"]);
        builder.op("Relu", &["C"], &["D"]);
        builder.output("C");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        assert_eq!(pruned.op_count(), 1);
        assert_eq!(pruned.op(0).op_type, "Add");
    }

    #[test]
    fn test_keeps_every_writer_of_required_tensor() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Relu", &["X"], &["A"]);
        builder.op("Dropout", &["A"], &["A"]);
        builder.output("A");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        assert_eq!(pruned.ops(), graph.ops());
    }

    #[test]
    fn test_unrequired_outputs_become_absent() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Split", &["X"], &["Y0", "Y1"]);
        builder.output("Y1");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        let y1 = graph.tensor("Y1").unwrap();
        assert_eq!(pruned.op(0).outputs, vec![Slot::Absent, y1.into()]);
    }

    #[test]
    fn test_unfed_inputs_become_absent() {
        let mut builder = GraphBuilder::new("g");
        builder.input("A");
        builder.op("Add", &["A", "Bias"], &["C"]);
        builder.output("C");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        let a = graph.tensor("A").unwrap();
        assert_eq!(pruned.op(0).inputs, vec![a.into(), Slot::Absent]);

        let mut ws = LocalWorkspace::new();
        ws.feed("Bias");
        let pruned = prune(&graph, &ws);
        assert!(!pruned.op(0).inputs[1].is_absent());
    }

    #[test]
    fn test_forward_path_marks_gradient_chain() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Relu", &["X"], &["Y"]);
        builder.op("Loss", &["Y"], &["L"]);
        builder.op("LossGradient", &["Y", "L_grad"], &["Y_grad"]);
        builder.op("ReluGradient", &["Y", "Y_grad"], &["X_grad"]);
        builder.op("Sigmoid", &["Y_grad"], &["Unused"]);
        builder.gradient("L", "X");
        let graph = builder.build();

        let mut ws = LocalWorkspace::new();
        ws.feed("L_grad");
        let pruned = prune(&graph, &ws);
        let types: Vec<&str> = pruned.ops().iter().map(|op| op.op_type.as_str()).collect();
        assert_eq!(types, vec!["Relu", "Loss", "LossGradient", "ReluGradient"]);
        // Y is required by the cost, L_grad by the gradient path
        assert!(pruned.op(2).inputs.iter().all(|slot| !slot.is_absent()));
    }

    #[test]
    fn test_unresolved_gradient_is_noop() {
        let mut builder = GraphBuilder::new("g");
        builder.op("Relu", &["X"], &["Y"]);
        builder.gradient("Nope", "X");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        assert_eq!(pruned.op_count(), 0);
    }

    #[test]
    fn test_gradient_name_resolved_through_alias() {
        let mut builder = GraphBuilder::new("g");
        builder.op("Scale", &["Seed"], &["H"]);
        builder.op("Scale", &["H"], &["X_grad"]);
        builder.gradient("L", "X");
        let graph = builder.build();

        let mut ws = LocalWorkspace::new();
        ws.feed("Seed");
        assert!(ws.set_tensor_alias("Seed", "L_grad"));
        let pruned = prune(&graph, &ws);
        assert_eq!(pruned.op_count(), 2);
    }

    #[test]
    fn test_forward_search_reuses_known_paths() {
        // G fans out to two branches that merge again before the leaf
        let mut builder = GraphBuilder::new("g");
        builder.op("Relu", &["G"], &["P"]);
        builder.op("Relu", &["G"], &["Q"]);
        builder.op("Add", &["P", "Q"], &["R"]);
        builder.op("Relu", &["R"], &["W_grad"]);
        let graph = builder.build();
        let dag = DagIndex::build(&graph);

        let id = |name| graph.tensor(name).unwrap();
        let mut required = FxHashSet::default();
        assert!(color_forward(&dag, id("G"), id("W_grad"), &mut required));
        for name in ["G", "P", "Q", "R", "W_grad"] {
            assert!(required.contains(&id(name)), "{} should be required", name);
        }
    }

    #[test]
    fn test_forward_search_skips_dead_ends() {
        let mut builder = GraphBuilder::new("g");
        builder.op("Relu", &["G"], &["Dead"]);
        builder.op("Relu", &["Dead"], &["DeadEnd"]);
        builder.op("Relu", &["G"], &["W_grad"]);
        let graph = builder.build();
        let dag = DagIndex::build(&graph);

        let id = |name| graph.tensor(name).unwrap();
        let mut required = FxHashSet::default();
        assert!(color_forward(&dag, id("G"), id("W_grad"), &mut required));
        assert!(!required.contains(&id("Dead")));
        assert!(!required.contains(&id("DeadEnd")));
    }

    #[test]
    fn test_affine_gradient_rule_applied() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.input("Alpha");
        builder.input("Y_grad");
        builder.op("AffineGradient", &["X", "Alpha", "Y_grad"], &["X_grad", "Alpha_grad", "Beta_grad"]);
        builder.output("X_grad");
        let graph = builder.build();

        let pruned = prune(&graph, &LocalWorkspace::new());
        let op = pruned.op(0);
        assert!(op.inputs[0].is_absent());
        assert!(op.outputs[1].is_absent() && op.outputs[2].is_absent());
    }
}
