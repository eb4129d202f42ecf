// Property Tests: structural guarantees of the optimizer passes
//
// Random layered graphs are built from unary and binary operators over the
// graph inputs and earlier outputs; each property is checked pass by pass.

use proptest::prelude::*;
use std::collections::BTreeSet;
use tensorplan::optimizer::{add_inplace, prune_nodes, simulate_gc, OUTPUT_BUFFER_PREFIX};
use tensorplan::{
    GraphBuilder, GraphDef, GraphOptimizer, LocalWorkspace, OpSchemaRegistry, OptimizeOptions,
    Slot, TensorId,
};

const OP_TYPES: [&str; 5] = ["Relu", "Sigmoid", "Add", "Mul", "MatMul"];

/// (operator kind, first operand, second operand, declared as output)
type OpSpec = (usize, usize, usize, bool);

fn op_specs() -> impl Strategy<Value = Vec<OpSpec>> {
    prop::collection::vec((0..OP_TYPES.len(), any::<usize>(), any::<usize>(), any::<bool>()), 1..16)
}

fn build_graph(specs: &[OpSpec]) -> GraphDef {
    let mut builder = GraphBuilder::new("random");
    let mut names = vec!["X0".to_string(), "X1".to_string()];
    builder.input("X0");
    builder.input("X1");

    for (i, &(kind, a, b, is_output)) in specs.iter().enumerate() {
        let op_type = OP_TYPES[kind];
        let a = names[a % names.len()].clone();
        let b = names[b % names.len()].clone();
        let output = format!("T{}", i);
        if kind < 2 {
            builder.op(op_type, &[a.as_str()], &[output.as_str()]);
        } else {
            builder.op(op_type, &[a.as_str(), b.as_str()], &[output.as_str()]);
        }
        if is_output || i + 1 == specs.len() {
            builder.output(&output);
        }
        names.push(output);
    }
    builder.build()
}

/// Position of each operator in the original graph, keyed by its unique output
fn original_index(graph: &GraphDef, output: TensorId) -> usize {
    graph
        .ops()
        .iter()
        .position(|op| op.outputs.contains(&Slot::Present(output)))
        .unwrap()
}

fn consumers(graph: &GraphDef, id: TensorId) -> usize {
    graph
        .ops()
        .iter()
        .flat_map(|op| op.inputs.iter())
        .filter(|slot| slot.is(id))
        .count()
}

/// Slots rewritten between two graphs of the same shape
fn renames(before: &GraphDef, after: &GraphDef) -> Vec<(TensorId, TensorId)> {
    let mut out = Vec::new();
    for (old, new) in before.ops().iter().zip(after.ops()) {
        let inputs = old.inputs.iter().zip(&new.inputs);
        let outputs = old.outputs.iter().zip(&new.outputs);
        for (from, to) in inputs.chain(outputs) {
            if let (Slot::Present(from), Slot::Present(to)) = (*from, *to) {
                if from != to {
                    out.push((from, to));
                }
            }
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_prune_never_grows_and_keeps_order(specs in op_specs()) {
        let graph = build_graph(&specs);
        let pruned = prune_nodes(&graph, &LocalWorkspace::new(), OpSchemaRegistry::builtin());

        prop_assert!(pruned.op_count() <= graph.op_count());
        let positions: Vec<usize> = pruned
            .ops()
            .iter()
            .map(|op| original_index(&graph, op.output_tensors().next().unwrap()))
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_surviving_operators_are_needed(specs in op_specs()) {
        let graph = build_graph(&specs);
        let pruned = prune_nodes(&graph, &LocalWorkspace::new(), OpSchemaRegistry::builtin());

        for (i, op) in pruned.ops().iter().enumerate() {
            let needed = op.output_tensors().any(|id| {
                graph.outputs().contains(&id)
                    || pruned.ops()[i + 1..].iter().any(|later| later.reads(id))
            });
            prop_assert!(needed, "operator #{} ({}) is not needed", i, op.op_type);
        }
    }

    #[test]
    fn prop_inplace_respects_boundary_and_single_consumer(specs in op_specs()) {
        let graph = build_graph(&specs);
        let pruned = prune_nodes(&graph, &LocalWorkspace::new(), OpSchemaRegistry::builtin());
        let mut ws = LocalWorkspace::new();
        let aliased = add_inplace(&pruned, &mut ws, OpSchemaRegistry::builtin());
        let boundary = graph.boundary();

        prop_assert_eq!(aliased.op_count(), pruned.op_count());
        for (from, to) in renames(&pruned, &aliased) {
            prop_assert!(!boundary.contains(&from));
            prop_assert!(!boundary.contains(&to));
        }

        // An output written in place overwrites an input read nowhere else
        for (i, (old, new)) in pruned.ops().iter().zip(aliased.ops()).enumerate() {
            for (from, to) in old.outputs.iter().zip(&new.outputs) {
                let Slot::Present(target) = *to else { continue };
                if from == to {
                    continue;
                }
                let overwritten = old.inputs.iter().zip(&new.inputs).any(|(original, rewritten)| {
                    rewritten.is(target)
                        && original.tensor().map_or(false, |u| consumers(&pruned, u) == 1)
                });
                prop_assert!(overwritten, "operator #{} writes in place over a shared tensor", i);
            }
        }
    }

    #[test]
    fn prop_buffer_pool_respects_boundary(specs in op_specs()) {
        let graph = build_graph(&specs);
        let ws = LocalWorkspace::new();
        let pruned = prune_nodes(&graph, &ws, OpSchemaRegistry::builtin());
        let pooled = simulate_gc(&pruned, &ws, OpSchemaRegistry::builtin());
        let boundary = graph.boundary();

        for (from, to) in renames(&pruned, &pooled) {
            prop_assert!(!boundary.contains(&from));
            prop_assert!(!boundary.contains(&to));
        }
    }

    #[test]
    fn prop_unary_chain_uses_two_buffers(length in 1usize..40) {
        let mut builder = GraphBuilder::new("chain");
        builder.input("T0");
        for i in 0..length {
            builder.op("Relu", &[format!("T{}", i).as_str()], &[format!("T{}", i + 1).as_str()]);
        }
        builder.output(&format!("T{}", length));
        let graph = builder.build();

        let pooled = simulate_gc(&graph, &LocalWorkspace::new(), OpSchemaRegistry::builtin());
        let buffers: BTreeSet<TensorId> = pooled
            .ops()
            .iter()
            .flat_map(|op| op.output_tensors())
            .filter(|&id| pooled.name_of(id).starts_with(OUTPUT_BUFFER_PREFIX))
            .collect();
        prop_assert!(buffers.len() <= 2);
    }

    #[test]
    fn prop_optimization_is_deterministic(specs in op_specs()) {
        let graph = build_graph(&specs);
        let run = || {
            let mut ws = LocalWorkspace::new();
            let mut optimizer = GraphOptimizer::new(&mut ws, OpSchemaRegistry::builtin());
            let optimized = optimizer.optimize(&graph, &OptimizeOptions::default()).unwrap();
            optimized.graph.to_string()
        };
        prop_assert_eq!(run(), run());
    }
}
