// IR Builder: Public API for composing graph definitions
//
// Provides a fluent interface over GraphDef that works with tensor names

use crate::ir::graph::GraphDef;
use crate::ir::node::{OperatorDef, Slot};
use crate::ir::symbol::TensorId;

/// Builder for constructing graph definitions
pub struct GraphBuilder {
    graph: GraphDef,
}

impl GraphBuilder {
    /// Create a new graph builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: GraphDef::new(name),
        }
    }

    /// Intern a tensor name
    pub fn tensor(&mut self, name: &str) -> TensorId {
        self.graph.intern(name)
    }

    /// Declare a graph-level input
    pub fn input(&mut self, name: &str) -> TensorId {
        let id = self.graph.intern(name);
        self.graph.add_input(id);
        id
    }

    /// Declare a graph-level output (a target that must be preserved)
    pub fn output(&mut self, name: &str) -> TensorId {
        let id = self.graph.intern(name);
        self.graph.add_output(id);
        id
    }

    /// Request the gradient of `cost` with respect to `wrt`
    pub fn gradient(&mut self, cost: &str, wrt: &str) -> &mut Self {
        let cost = self.graph.intern(cost);
        let wrt = self.graph.intern(wrt);
        self.graph.add_gradient(cost, wrt);
        self
    }

    /// Append an operator whose slots are all present
    pub fn op(&mut self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> &mut OperatorDef {
        let inputs: Vec<Slot> = inputs
            .iter()
            .map(|name| self.graph.intern(name).into())
            .collect();
        let outputs: Vec<Slot> = outputs
            .iter()
            .map(|name| self.graph.intern(name).into())
            .collect();
        self.op_slots(op_type, inputs, outputs)
    }

    /// Append an operator with explicit slots, allowing absent ones
    pub fn op_slots(
        &mut self,
        op_type: &str,
        inputs: Vec<Slot>,
        outputs: Vec<Slot>,
    ) -> &mut OperatorDef {
        let index = self.graph.push_op(OperatorDef::new(op_type, inputs, outputs));
        &mut self.graph.ops_mut()[index]
    }

    /// Finish building
    pub fn build(self) -> GraphDef {
        self.graph
    }
}
