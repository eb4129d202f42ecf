// Operator Schemas
//
// Per-operator-type capability declarations consulted by the optimizer:
// slot counts, in-place pairs, algebraic prune rules, storage sharing and the
// shape-related flags used by buffer pooling. Passes never match on operator
// type names; new operator types declare their behaviour here.

use crate::core::error::{OptimizerError, Result};
use crate::ir::node::{OperatorDef, Slot};
use rustc_hash::FxHashMap;

lazy_static::lazy_static! {
    /// Process-wide registry of the built-in operator schemas
    static ref BUILTIN_SCHEMAS: OpSchemaRegistry = builtin_schemas();
}

/// "If every output in `when_absent` is absent, input `drop_input` is not
/// needed" rule for gradient operators whose partial derivatives use
/// different operands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneRule {
    pub when_absent: Vec<usize>,
    pub drop_input: usize,
}

impl PruneRule {
    pub fn new(when_absent: &[usize], drop_input: usize) -> Self {
        Self {
            when_absent: when_absent.to_vec(),
            drop_input,
        }
    }

    /// Apply the rule; returns true if an input was dropped
    pub fn apply(&self, op: &mut OperatorDef) -> bool {
        let triggered = !self.when_absent.is_empty()
            && self
                .when_absent
                .iter()
                .all(|&out| op.outputs.get(out).map_or(false, |slot| slot.is_absent()));
        if !triggered {
            return false;
        }
        match op.inputs.get_mut(self.drop_input) {
            Some(slot) if !slot.is_absent() => {
                *slot = Slot::Absent;
                true
            }
            _ => false,
        }
    }
}

/// Capability declaration of one operator type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSchema {
    op_type: String,
    min_inputs: usize,
    max_inputs: usize,
    min_outputs: usize,
    max_outputs: usize,
    inplace: Vec<(usize, usize)>,
    prune_rules: Vec<PruneRule>,
    shared_outputs: Vec<(usize, usize)>,
    dimension_op: bool,
    reads_shape_like: bool,
}

impl OpSchema {
    /// Schema accepting any number of inputs and outputs, with no capabilities
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            min_inputs: 0,
            max_inputs: usize::MAX,
            min_outputs: 0,
            max_outputs: usize::MAX,
            inplace: Vec::new(),
            prune_rules: Vec::new(),
            shared_outputs: Vec::new(),
            dimension_op: false,
            reads_shape_like: false,
        }
    }

    pub fn num_inputs(self, n: usize) -> Self {
        self.num_inputs_range(n, n)
    }

    pub fn num_inputs_range(mut self, min: usize, max: usize) -> Self {
        self.min_inputs = min;
        self.max_inputs = max;
        self
    }

    pub fn num_outputs(self, n: usize) -> Self {
        self.num_outputs_range(n, n)
    }

    pub fn num_outputs_range(mut self, min: usize, max: usize) -> Self {
        self.min_outputs = min;
        self.max_outputs = max;
        self
    }

    /// Declare (input slot, output slot) pairs that may share storage
    pub fn inplace(mut self, pairs: &[(usize, usize)]) -> Self {
        self.inplace.extend_from_slice(pairs);
        self
    }

    /// Declare an algebraic prune rule
    pub fn prune_rule(mut self, when_absent: &[usize], drop_input: usize) -> Self {
        self.prune_rules.push(PruneRule::new(when_absent, drop_input));
        self
    }

    /// Output `output` always shares storage with input `input` by convention
    pub fn shares_storage(mut self, output: usize, input: usize) -> Self {
        self.shared_outputs.push((output, input));
        self
    }

    /// Output is a view of input 0 with different dimensions
    pub fn dimension_op(mut self) -> Self {
        self.dimension_op = true;
        self
    }

    /// Operator copies the shape of the tensor named by its `shape_like` argument
    pub fn reads_shape_like(mut self) -> Self {
        self.reads_shape_like = true;
        self
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// True if any in-place pair is declared
    pub fn allows_inplace(&self) -> bool {
        !self.inplace.is_empty()
    }

    /// True if input slot `input` may be overwritten by output slot `output`
    pub fn check_inplace(&self, input: usize, output: usize) -> bool {
        self.inplace.contains(&(input, output))
    }

    pub fn prune_rules(&self) -> &[PruneRule] {
        &self.prune_rules
    }

    /// (output slot, input slot) storage-sharing declarations
    pub fn shared_outputs(&self) -> &[(usize, usize)] {
        &self.shared_outputs
    }

    pub fn is_dimension_op(&self) -> bool {
        self.dimension_op
    }

    pub fn is_shape_like_reader(&self) -> bool {
        self.reads_shape_like
    }

    /// Apply every prune rule in declaration order
    pub fn apply_prune_rules(&self, op: &mut OperatorDef) -> bool {
        let mut changed = false;
        for rule in &self.prune_rules {
            changed |= rule.apply(op);
        }
        changed
    }

    /// Check slot counts of `op`, the operator at position `op_index`
    pub fn verify(&self, op_index: usize, op: &OperatorDef) -> Result<()> {
        let actual = op.inputs.len();
        if actual < self.min_inputs || actual > self.max_inputs {
            return Err(OptimizerError::InvalidInputCount {
                op_index,
                op_type: op.op_type.clone(),
                min: self.min_inputs,
                max: self.max_inputs,
                actual,
            });
        }
        let actual = op.outputs.len();
        if actual < self.min_outputs || actual > self.max_outputs {
            return Err(OptimizerError::InvalidOutputCount {
                op_index,
                op_type: op.op_type.clone(),
                min: self.min_outputs,
                max: self.max_outputs,
                actual,
            });
        }
        Ok(())
    }
}

/// Registry mapping operator types to schemas
#[derive(Debug, Clone, Default)]
pub struct OpSchemaRegistry {
    schemas: FxHashMap<String, OpSchema>,
}

impl OpSchemaRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared registry of the built-in schemas
    pub fn builtin() -> &'static OpSchemaRegistry {
        &BUILTIN_SCHEMAS
    }

    /// Owned copy of the built-in schemas, to be extended by the caller
    pub fn with_builtin() -> Self {
        BUILTIN_SCHEMAS.clone()
    }

    /// Register a schema, replacing any previous one for the same type
    pub fn register(&mut self, schema: OpSchema) -> &mut Self {
        self.schemas.insert(schema.op_type.clone(), schema);
        self
    }

    pub fn schema_for(&self, op_type: &str) -> Option<&OpSchema> {
        self.schemas.get(op_type)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn builtin_schemas() -> OpSchemaRegistry {
    let mut registry = OpSchemaRegistry::new();

    // Elementwise arithmetic: A, B => Y
    for op_type in ["Add", "Sub", "Mul", "Div", "Maximum", "Minimum"] {
        registry.register(OpSchema::new(op_type).num_inputs(2).num_outputs(1).inplace(&[(0, 0)]));
    }
    for op_type in ["RAdd", "RSub", "RMul", "RDiv"] {
        registry.register(OpSchema::new(op_type).num_inputs(2).num_outputs(1).inplace(&[(1, 0)]));
    }
    // dY => dA, dB
    for op_type in ["AddGradient", "SubGradient", "RAddGradient", "RSubGradient"] {
        registry.register(OpSchema::new(op_type).num_inputs(1).num_outputs(2).inplace(&[(0, 0)]));
    }
    // A, B, dY => dA, dB
    for op_type in ["MulGradient", "RMulGradient"] {
        registry.register(
            OpSchema::new(op_type)
                .num_inputs(3)
                .num_outputs(2)
                .inplace(&[(2, 0)])
                .prune_rule(&[0], 1)
                .prune_rule(&[1], 0),
        );
    }
    // dB requires both A and B
    for op_type in ["DivGradient", "RDivGradient"] {
        registry.register(
            OpSchema::new(op_type)
                .num_inputs(3)
                .num_outputs(2)
                .prune_rule(&[1], 0)
                .prune_rule(&[0, 1], 1),
        );
    }

    // Activations: X => Y, and Y, dY => dX
    for op_type in ["Relu", "Elu", "SElu", "Sigmoid", "Tanh", "Dropout", "Exp", "Square"] {
        registry.register(OpSchema::new(op_type).num_inputs(1).num_outputs(1).inplace(&[(0, 0)]));
        registry.register(
            OpSchema::new(format!("{}Gradient", op_type))
                .num_inputs(2)
                .num_outputs(1)
                .inplace(&[(1, 0)]),
        );
    }

    // X, alpha, [beta] => Y
    registry.register(OpSchema::new("Affine").num_inputs_range(2, 3).num_outputs(1).inplace(&[(0, 0)]));
    // X, alpha, dY => dX, dAlpha, dBeta; X is only needed for dAlpha
    registry.register(
        OpSchema::new("AffineGradient")
            .num_inputs(3)
            .num_outputs(3)
            .inplace(&[(2, 0)])
            .prune_rule(&[1], 0),
    );

    registry.register(OpSchema::new("BiasAdd").num_inputs(2).num_outputs(1).inplace(&[(0, 0)]));
    // X, dY => dX, [dB]; dX is dY by definition
    registry.register(
        OpSchema::new("BiasAddGradient")
            .num_inputs(2)
            .num_outputs_range(1, 2)
            .shares_storage(0, 1),
    );

    registry.register(OpSchema::new("MatMul").num_inputs(2).num_outputs(1));
    registry.register(OpSchema::new("MatMulGradient").num_inputs(3).num_outputs(2));
    registry.register(OpSchema::new("Conv2d").num_inputs_range(2, 3).num_outputs(1));
    registry.register(OpSchema::new("Conv2dGradient").num_inputs_range(3, 4).num_outputs_range(2, 3));
    registry.register(OpSchema::new("Repeat").num_inputs(1).num_outputs(1));
    registry.register(OpSchema::new("RepeatGradient").num_inputs(2).num_outputs(1));

    // Dimension operators produce views of input 0
    registry.register(OpSchema::new("Shape").num_inputs(1).num_outputs(1).dimension_op());
    for op_type in ["Squeeze", "Flatten", "ExpandDims"] {
        registry.register(OpSchema::new(op_type).num_inputs(1).num_outputs(1).dimension_op());
    }
    registry.register(
        OpSchema::new("Reshape")
            .num_inputs(1)
            .num_outputs(1)
            .dimension_op()
            .reads_shape_like(),
    );
    for op_type in ["Crop", "NNResize", "BilinearResize"] {
        registry.register(OpSchema::new(op_type).num_inputs(1).num_outputs(1).reads_shape_like());
    }

    // Sources
    for op_type in ["Fill", "GivenTensorFill", "RandomUniform", "RandomNormal"] {
        registry.register(OpSchema::new(op_type).num_inputs(0).num_outputs(1));
    }

    registry
}
