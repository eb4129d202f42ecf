// Core Layer: Error Types
//
// All fatal compile conditions surface through OptimizerError. Soft failures
// (refused aliases, unresolved gradient names) are not errors and never reach
// this type.

use thiserror::Error;

/// Errors raised while validating or optimizing a graph definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptimizerError {
    /// The rotating mirror-stage pool has no free slot for an output
    #[error(
        "no enough buffers for outputs: operator #{op_index} ({op_type}) needs a slot \
         but all {pool_size} rotating buffers are in use"
    )]
    BufferPoolExhausted {
        op_index: usize,
        op_type: String,
        pool_size: usize,
    },

    /// Operator has an input count outside its schema's range
    #[error("operator #{op_index} ({op_type}) takes {min}..={max} inputs, got {actual}")]
    InvalidInputCount {
        op_index: usize,
        op_type: String,
        min: usize,
        max: usize,
        actual: usize,
    },

    /// Operator has an output count outside its schema's range
    #[error("operator #{op_index} ({op_type}) takes {min}..={max} outputs, got {actual}")]
    InvalidOutputCount {
        op_index: usize,
        op_type: String,
        min: usize,
        max: usize,
        actual: usize,
    },

    /// A tensor name was referenced that the graph does not know
    #[error("unknown tensor: {0}")]
    UnknownTensor(String),

    /// Structurally invalid graph definition
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
}

/// Result type for optimizer operations
pub type Result<T> = std::result::Result<T, OptimizerError>;
