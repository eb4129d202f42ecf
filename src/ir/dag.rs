// DAG Index
//
// Per-pass structural index of a graph definition: for every tensor, the
// operator that writes it and its parent/child tensors. Passes rewrite the
// graph, so an index is never reused across passes.

use crate::ir::graph::GraphDef;
use crate::ir::symbol::TensorId;

/// Structural record of a single tensor
#[derive(Debug, Clone, Default)]
pub struct DagNode {
    /// Index of the last operator writing this tensor
    pub producer: Option<usize>,
    /// Tensors read by the producer
    pub parents: Vec<TensorId>,
    /// Outputs of operators reading this tensor, one entry per edge
    pub children: Vec<TensorId>,
}

/// Tensor-level DAG built from operator order
#[derive(Debug, Clone)]
pub struct DagIndex {
    nodes: Vec<DagNode>,
}

impl DagIndex {
    /// Build the index for `graph`
    pub fn build(graph: &GraphDef) -> Self {
        let mut nodes = vec![DagNode::default(); graph.num_tensors()];

        for (index, op) in graph.ops().iter().enumerate() {
            for v in op.output_tensors() {
                for u in op.input_tensors() {
                    nodes[v.index()].parents.push(u);
                    nodes[u.index()].children.push(v);
                }
                nodes[v.index()].producer = Some(index);
            }
        }

        log::trace!(
            "Built DAG index for '{}': {} tensors, {} operators",
            graph.name,
            nodes.len(),
            graph.op_count()
        );

        Self { nodes }
    }

    /// Node of a tensor; ids interned after the build have an empty node
    pub fn node(&self, id: TensorId) -> &DagNode {
        static EMPTY: DagNode = DagNode {
            producer: None,
            parents: Vec::new(),
            children: Vec::new(),
        };
        self.nodes.get(id.index()).unwrap_or(&EMPTY)
    }

    pub fn producer(&self, id: TensorId) -> Option<usize> {
        self.node(id).producer
    }

    pub fn parents(&self, id: TensorId) -> &[TensorId] {
        &self.node(id).parents
    }

    pub fn children(&self, id: TensorId) -> &[TensorId] {
        &self.node(id).children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
