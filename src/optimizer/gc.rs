// Buffer-Pool Simulation
//
// Simulates a reference-counting allocator over the operator order: every
// intermediate output is assigned a pooled temporary buffer, and a buffer goes
// back to the pool once the last consumer of the tensor it holds has run.
// Peak temporary memory is then bounded by the widest point of the graph
// instead of its length.

use crate::core::error::Result;
use crate::core::schema::OpSchemaRegistry;
use crate::core::workspace::Workspace;
use crate::ir::{ArgValue, GraphDef, Slot, TensorId, SHAPE_LIKE_ARG};
use crate::optimizer::pass::{GraphPass, PassContext};
use rustc_hash::{FxHashMap, FxHashSet};

/// Name prefix of pooled temporary buffers
pub const OUTPUT_BUFFER_PREFIX: &str = "/share/buffer/output:";

/// Buffer pooling for forward-only graphs
#[derive(Debug, Default)]
pub struct SimulateGc;

impl SimulateGc {
    pub fn new() -> Self {
        Self
    }
}

impl GraphPass for SimulateGc {
    fn run(&mut self, graph: &GraphDef, cx: &mut PassContext<'_>) -> Result<GraphDef> {
        Ok(simulate_gc(graph, &*cx.workspace, cx.schemas))
    }

    fn name(&self) -> &str {
        "simulate-gc"
    }
}

/// LIFO free list plus a counter for minting new buffers
#[derive(Debug, Default)]
struct BufferPool {
    free: Vec<TensorId>,
    minted: FxHashSet<TensorId>,
    next: usize,
}

impl BufferPool {
    fn acquire(&mut self, graph: &mut GraphDef) -> TensorId {
        if let Some(buffer) = self.free.pop() {
            return buffer;
        }
        let buffer = graph.intern(&format!("{}{}", OUTPUT_BUFFER_PREFIX, self.next));
        self.next += 1;
        self.minted.insert(buffer);
        buffer
    }

    fn release(&mut self, buffer: TensorId) {
        self.free.push(buffer);
    }

    fn owns(&self, id: TensorId) -> bool {
        self.minted.contains(&id)
    }
}

/// Assign pooled buffers to intermediate outputs
pub fn simulate_gc(
    graph: &GraphDef,
    workspace: &dyn Workspace,
    schemas: &OpSchemaRegistry,
) -> GraphDef {
    let mut ref_count: FxHashMap<TensorId, usize> = FxHashMap::default();
    let mut blacklist = graph.boundary();
    for op in graph.ops() {
        for id in op.input_tensors() {
            *ref_count.entry(id).or_default() += 1;
        }
        let Some(schema) = schemas.schema_for(&op.op_type) else {
            continue;
        };
        // Views of input 0 keep referring to its storage
        if schema.is_dimension_op() {
            if let Some(&Slot::Present(x)) = op.inputs.first() {
                blacklist.insert(x);
            }
        }
        if schema.is_shape_like_reader() {
            for value in op.args_named(SHAPE_LIKE_ARG) {
                if let ArgValue::Str(name) = value {
                    let resolved = workspace.tensor_name(name);
                    blacklist.extend(graph.tensor(name));
                    blacklist.extend(graph.tensor(&resolved));
                }
            }
        }
    }

    let mut out = graph.clone();
    let mut renamed: FxHashMap<TensorId, TensorId> = FxHashMap::default();
    let mut pool = BufferPool::default();
    for (index, op) in graph.ops().iter().enumerate() {
        if op.inputs.is_empty() {
            continue;
        }
        let mut rewritten = op.clone();

        let mut reclaimed = Vec::new();
        for slot in rewritten.inputs.iter_mut() {
            let Slot::Present(id) = *slot else {
                continue;
            };
            let current = renamed.get(&id).copied().unwrap_or(id);
            *slot = Slot::Present(current);
            if let Some(count) = ref_count.get_mut(&id) {
                *count -= 1;
                if *count == 0 && pool.owns(current) {
                    reclaimed.push(current);
                }
            }
        }

        let dimension_op = schemas
            .schema_for(&op.op_type)
            .map_or(false, |schema| schema.is_dimension_op());
        if !dimension_op {
            for (j, output) in op.outputs.iter().enumerate() {
                let Slot::Present(id) = *output else {
                    continue;
                };
                if blacklist.contains(&id) {
                    continue;
                }
                if let Some(pos) = op.input_positions(id).next() {
                    rewritten.outputs[j] = rewritten.inputs[pos];
                } else {
                    let buffer = pool.acquire(&mut out);
                    log::trace!(
                        "#{} ({}): {} -> {}",
                        index,
                        op.op_type,
                        graph.name_of(id),
                        out.name_of(buffer)
                    );
                    renamed.insert(id, buffer);
                    rewritten.outputs[j] = Slot::Present(buffer);
                }
            }
        }

        // Freed only after this operator's outputs are placed
        for buffer in reclaimed {
            pool.release(buffer);
        }
        out.ops_mut()[index] = rewritten;
    }

    log::debug!(
        "'{}': {} outputs pooled into {} buffers",
        graph.name,
        renamed.len(),
        pool.next
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workspace::LocalWorkspace;
    use crate::ir::GraphBuilder;
    use std::collections::BTreeSet;

    fn run(graph: &GraphDef, ws: &LocalWorkspace) -> GraphDef {
        simulate_gc(graph, ws, OpSchemaRegistry::builtin())
    }

    fn slot(graph: &GraphDef, name: &str) -> Slot {
        Slot::Present(graph.tensor(name).unwrap())
    }

    fn buffer_names(graph: &GraphDef) -> BTreeSet<String> {
        graph
            .ops()
            .iter()
            .flat_map(|op| op.output_tensors())
            .map(|id| graph.name_of(id).to_string())
            .filter(|name| name.starts_with(OUTPUT_BUFFER_PREFIX))
            .collect()
    }

    #[test]
    fn test_unary_chain_uses_two_buffers() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        let names = ["X", "A1", "A2", "A3", "A4", "A5", "Y"];
        for pair in names.windows(2) {
            builder.op("Relu", &[pair[0]], &[pair[1]]);
        }
        builder.output("Y");
        let graph = builder.build();

        let out = run(&graph, &LocalWorkspace::new());
        assert_eq!(buffer_names(&out).len(), 2);
        assert_eq!(out.op(0).inputs, vec![slot(&graph, "X")]);
        assert_eq!(out.op(5).outputs, vec![slot(&graph, "Y")]);
        // Each operator reads what the previous one wrote
        for i in 1..out.op_count() {
            assert_eq!(out.op(i).inputs, out.op(i - 1).outputs);
        }
    }

    #[test]
    fn test_buffer_reused_only_after_last_consumer() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Relu", &["X"], &["A"]);
        builder.op("Relu", &["A"], &["B"]);
        builder.op("Add", &["A", "B"], &["C"]);
        builder.op("Relu", &["C"], &["D"]);
        builder.output("D");
        let graph = builder.build();

        let out = run(&graph, &LocalWorkspace::new());
        let b0 = slot(&out, "/share/buffer/output:0");
        let b1 = slot(&out, "/share/buffer/output:1");
        let b2 = slot(&out, "/share/buffer/output:2");
        assert_eq!(out.op(0).outputs, vec![b0]);
        assert_eq!(out.op(1).outputs, vec![b1]);
        // A and B die at Add, but C is placed before they are reclaimed
        assert_eq!(out.op(2).inputs, vec![b0, b1]);
        assert_eq!(out.op(2).outputs, vec![b2]);
        assert_eq!(out.op(3).inputs, vec![b2]);
    }

    #[test]
    fn test_dimension_operator_input_is_kept() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Relu", &["X"], &["A"]);
        builder.op("Relu", &["A"], &["B"]);
        builder.op("Reshape", &["B"], &["C"]);
        builder.op("Relu", &["C"], &["D"]);
        builder.output("D");
        let graph = builder.build();

        let out = run(&graph, &LocalWorkspace::new());
        assert_eq!(out.op(0).outputs, vec![slot(&out, "/share/buffer/output:0")]);
        assert_eq!(out.op(1).outputs, vec![slot(&graph, "B")]);
        assert_eq!(out.op(2).outputs, vec![slot(&graph, "C")]);
        assert_eq!(out.op(3).inputs, vec![slot(&graph, "C")]);
    }

    #[test]
    fn test_shape_like_reference_is_kept() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Relu", &["X"], &["A"]);
        builder.op("Sigmoid", &["X"], &["S"]);
        builder
            .op("Crop", &["A"], &["B"])
            .with_arg(SHAPE_LIKE_ARG, "Like");
        builder.output("B");
        let graph = builder.build();

        let mut ws = LocalWorkspace::new();
        ws.set_tensor_alias("S", "Like");
        let out = run(&graph, &ws);
        assert_eq!(out.op(0).outputs, vec![slot(&out, "/share/buffer/output:0")]);
        assert_eq!(out.op(1).outputs, vec![slot(&graph, "S")]);
        assert_eq!(out.op(2).outputs, vec![slot(&graph, "B")]);
    }

    #[test]
    fn test_source_operators_untouched() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Fill", &[], &["W"]);
        builder.op("MatMul", &["X", "W"], &["H"]);
        builder.op("Relu", &["H"], &["Y"]);
        builder.output("Y");
        let graph = builder.build();

        let out = run(&graph, &LocalWorkspace::new());
        assert_eq!(out.op(0), graph.op(0));
        assert_eq!(out.op(1).inputs, vec![slot(&graph, "X"), slot(&graph, "W")]);
        assert_eq!(out.op(1).outputs, vec![slot(&out, "/share/buffer/output:0")]);
    }

    #[test]
    fn test_inplace_output_follows_its_input() {
        let mut builder = GraphBuilder::new("g");
        builder.input("X");
        builder.op("Relu", &["X"], &["A"]);
        builder.op("Dropout", &["A"], &["A"]);
        builder.op("Relu", &["A"], &["B"]);
        builder.output("B");
        let graph = builder.build();

        let out = run(&graph, &LocalWorkspace::new());
        let b0 = slot(&out, "/share/buffer/output:0");
        assert_eq!(out.op(1).inputs, vec![b0]);
        assert_eq!(out.op(1).outputs, vec![b0]);
        assert_eq!(out.op(2).inputs, vec![b0]);
        assert_eq!(buffer_names(&out).len(), 1);
    }
}
