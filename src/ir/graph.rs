// Graph Definition
//
// A graph definition is an ordered operator list plus the boundary of the
// graph: fed inputs, preserved outputs and gradient requests. Operator order
// is the only representation of topological order.

use crate::ir::node::{OperatorDef, Slot};
use crate::ir::symbol::{SymbolTable, TensorId};
use rustc_hash::FxHashSet;
use std::fmt;

/// Suffix appended to a tensor name to name its gradient
pub const GRADIENT_SUFFIX: &str = "_grad";

/// Request to differentiate `cost` with respect to `wrt`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GradientRequest {
    pub cost: TensorId,
    pub wrt: TensorId,
}

/// Dataflow graph definition
#[derive(Debug, Clone, Default)]
pub struct GraphDef {
    /// Graph name (used in logs)
    pub name: String,
    symbols: SymbolTable,
    ops: Vec<OperatorDef>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    gradients: Vec<GradientRequest>,
}

impl GraphDef {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Intern a tensor name into this graph's symbol table
    pub fn intern(&mut self, name: &str) -> TensorId {
        self.symbols.intern(name)
    }

    /// Look up a tensor by name
    pub fn tensor(&self, name: &str) -> Option<TensorId> {
        self.symbols.get(name)
    }

    /// Name of a tensor
    pub fn name_of(&self, id: TensorId) -> &str {
        self.symbols.name(id)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Number of interned tensors
    pub fn num_tensors(&self) -> usize {
        self.symbols.len()
    }

    /// Append an operator
    pub fn push_op(&mut self, op: OperatorDef) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    pub fn ops(&self) -> &[OperatorDef] {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut [OperatorDef] {
        &mut self.ops
    }

    pub fn op(&self, index: usize) -> &OperatorDef {
        &self.ops[index]
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Copy of this graph with the same boundary and symbols but no operators
    pub fn without_ops(&self) -> Self {
        Self {
            name: self.name.clone(),
            symbols: self.symbols.clone(),
            ops: Vec::new(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            gradients: self.gradients.clone(),
        }
    }

    /// Mark a tensor as a graph-level input
    pub fn add_input(&mut self, id: TensorId) {
        if !self.inputs.contains(&id) {
            self.inputs.push(id);
        }
    }

    /// Mark a tensor as a graph-level output
    pub fn add_output(&mut self, id: TensorId) {
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
    }

    pub fn add_gradient(&mut self, cost: TensorId, wrt: TensorId) {
        let request = GradientRequest { cost, wrt };
        if !self.gradients.contains(&request) {
            self.gradients.push(request);
        }
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn gradients(&self) -> &[GradientRequest] {
        &self.gradients
    }

    /// Graph inputs and outputs; these names are bound externally and must
    /// never be renamed
    pub fn boundary(&self) -> FxHashSet<TensorId> {
        self.inputs.iter().chain(self.outputs.iter()).copied().collect()
    }

    /// Name of the gradient tensor of `id` under the `_grad` convention
    pub fn gradient_name(&self, id: TensorId) -> String {
        format!("{}{}", self.name_of(id), GRADIENT_SUFFIX)
    }

    fn fmt_slot(&self, f: &mut fmt::Formatter, slot: Slot) -> fmt::Result {
        match slot {
            Slot::Present(id) => write!(f, "{}", self.name_of(id)),
            Slot::Absent => write!(f, "_"),
        }
    }

    fn fmt_slots(&self, f: &mut fmt::Formatter, slots: &[Slot]) -> fmt::Result {
        for (i, slot) in slots.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            self.fmt_slot(f, *slot)?;
        }
        Ok(())
    }
}

impl fmt::Display for GraphDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "graph {} {{", self.name)?;
        for (i, op) in self.ops.iter().enumerate() {
            write!(f, "  #{} {}(", i, op.op_type)?;
            self.fmt_slots(f, &op.inputs)?;
            write!(f, ") -> (")?;
            self.fmt_slots(f, &op.outputs)?;
            write!(f, ")")?;
            for arg in &op.args {
                write!(f, " {}={}", arg.name, arg.value)?;
            }
            writeln!(f)?;
        }
        let names = |ids: &[TensorId]| {
            ids.iter()
                .map(|id| self.name_of(*id).to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "  inputs: [{}]", names(&self.inputs))?;
        writeln!(f, "  outputs: [{}]", names(&self.outputs))?;
        for grad in &self.gradients {
            writeln!(
                f,
                "  gradient: d{}/d{}",
                self.name_of(grad.cost),
                self.name_of(grad.wrt)
            )?;
        }
        write!(f, "}}")
    }
}
