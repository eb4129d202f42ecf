// Operator Definitions
//
// An operator reads and writes tensors through ordered slots. A slot may be
// absent, in which case it takes no part in dataflow.

use crate::ir::symbol::TensorId;
use std::fmt;

/// Name of the argument that enables recomputation of an operator's first input
pub const MIRROR_STAGE_ARG: &str = "mirror_stage";

/// Name of the argument naming a tensor whose shape an operator copies
pub const SHAPE_LIKE_ARG: &str = "shape_like";

/// Input or output slot of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Slot bound to a tensor
    Present(TensorId),
    /// Unused slot
    Absent,
}

impl Slot {
    pub fn tensor(self) -> Option<TensorId> {
        match self {
            Slot::Present(id) => Some(id),
            Slot::Absent => None,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, Slot::Absent)
    }

    /// True if this slot is bound to `id`
    pub fn is(self, id: TensorId) -> bool {
        self == Slot::Present(id)
    }
}

impl From<TensorId> for Slot {
    fn from(id: TensorId) -> Self {
        Slot::Present(id)
    }
}

/// Typed argument value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strs(Vec<String>),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Str(v) => write!(f, "{:?}", v),
            ArgValue::Ints(v) => write!(f, "{:?}", v),
            ArgValue::Floats(v) => write!(f, "{:?}", v),
            ArgValue::Strs(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<f32> for ArgValue {
    fn from(v: f32) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<Vec<i64>> for ArgValue {
    fn from(v: Vec<i64>) -> Self {
        ArgValue::Ints(v)
    }
}

/// Named operator argument
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: ArgValue,
}

/// A single operator of a graph definition
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDef {
    /// Operator type tag (e.g. "Add", "MatMulGradient")
    pub op_type: String,
    /// Ordered input slots
    pub inputs: Vec<Slot>,
    /// Ordered output slots
    pub outputs: Vec<Slot>,
    /// Named arguments
    pub args: Vec<Argument>,
}

impl OperatorDef {
    pub fn new(op_type: impl Into<String>, inputs: Vec<Slot>, outputs: Vec<Slot>) -> Self {
        Self {
            op_type: op_type.into(),
            inputs,
            outputs,
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn with_arg(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> &mut Self {
        self.args.push(Argument {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// All arguments with the given name, in declaration order
    pub fn args_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ArgValue> + 'a {
        self.args
            .iter()
            .filter(move |arg| arg.name == name)
            .map(|arg| &arg.value)
    }

    /// Gradient operators follow the `<Forward>Gradient` naming convention
    pub fn is_gradient(&self) -> bool {
        self.op_type.contains("Gradient")
    }

    /// True if any nonzero `mirror_stage` integer argument is set
    pub fn mirror_stage(&self) -> bool {
        self.args_named(MIRROR_STAGE_ARG)
            .any(|value| matches!(value, ArgValue::Int(v) if *v != 0))
    }

    /// Present input tensors
    pub fn input_tensors(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.inputs.iter().filter_map(|slot| slot.tensor())
    }

    /// Present output tensors
    pub fn output_tensors(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.outputs.iter().filter_map(|slot| slot.tensor())
    }

    /// True if `id` is read by this operator
    pub fn reads(&self, id: TensorId) -> bool {
        self.inputs.iter().any(|slot| slot.is(id))
    }

    /// Input slot positions reading `id`
    pub fn input_positions(&self, id: TensorId) -> impl Iterator<Item = usize> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.is(id))
            .map(|(pos, _)| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::symbol::SymbolTable;

    #[test]
    fn test_slot_accessors() {
        let mut table = SymbolTable::new();
        let a = table.intern("A");
        assert_eq!(Slot::Present(a).tensor(), Some(a));
        assert!(Slot::Absent.is_absent());
        assert!(Slot::Present(a).is(a));
        assert!(!Slot::Absent.is(a));
    }

    #[test]
    fn test_mirror_stage_flag() {
        let mut table = SymbolTable::new();
        let x = table.intern("X");
        let y = table.intern("Y");
        let mut op = OperatorDef::new("Conv", vec![x.into()], vec![y.into()]);
        assert!(!op.mirror_stage());
        op.with_arg(MIRROR_STAGE_ARG, 0i64);
        assert!(!op.mirror_stage());
        op.with_arg(MIRROR_STAGE_ARG, 1i64);
        assert!(op.mirror_stage());
    }

    #[test]
    fn test_gradient_convention() {
        let op = OperatorDef::new("MatMulGradient", vec![], vec![]);
        assert!(op.is_gradient());
        let op = OperatorDef::new("MatMul", vec![], vec![]);
        assert!(!op.is_gradient());
    }

    #[test]
    fn test_input_positions() {
        let mut table = SymbolTable::new();
        let a = table.intern("A");
        let b = table.intern("B");
        let op = OperatorDef::new("Mul", vec![a.into(), b.into(), a.into()], vec![]);
        assert_eq!(op.input_positions(a).collect::<Vec<_>>(), vec![0, 2]);
        assert!(op.reads(b));
    }
}
