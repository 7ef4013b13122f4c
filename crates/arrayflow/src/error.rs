//! Error taxonomy shared by every layer of the compiler.
//!
//! Shape errors are raised while a graph is being built, unsupported errors at
//! the point an operation is attempted, and memory errors while kernel
//! arguments are prepared. Nothing here is recovered silently.

use thiserror::Error;

use crate::backend::BackendError;
use crate::expr::EvalError;

/// Violations of the shape algebra, detected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("cannot reshape {from} ({from_size} elements) to {to} ({to_size} elements)")]
    ReshapeMismatch {
        from: String,
        from_size: usize,
        to: String,
        to_size: usize,
    },
    #[error("invalid permutation {order:?} for rank {rank}")]
    InvalidPermutation { order: Vec<usize>, rank: usize },
    #[error("subset {subset} at offsets {offsets:?} exceeds container {container}")]
    SubsetOutOfRange {
        container: String,
        subset: String,
        offsets: Vec<usize>,
    },
    #[error("expected rank {expected}, found rank {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("element count overflows for dims {dims:?}")]
    Overflow { dims: Vec<usize> },
    #[error("shape {actual} is not compatible with {expected}: {reason}")]
    Incompatible {
        expected: String,
        actual: String,
        reason: String,
    },
    #[error("cannot infer dimension in {dims:?}: {reason}")]
    Inference { dims: Vec<isize>, reason: String },
}

/// Operations the compiler refuses to perform rather than produce a wrong answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedError {
    #[error("delta through variable-count input {input} of {node} is not supported")]
    VariableCountDelta { node: String, input: usize },
    #[error("delta of a product with {arity} non-constant factors is not supported")]
    NaryProductDelta { arity: usize },
    #[error("value of {node} cannot be expressed: {reason}")]
    UnresolvableValue { node: String, reason: String },
    #[error("{node} must be isolated into its own scope (loop count {count})")]
    RequiresIsolation { node: String, count: usize },
    #[error("{operation} is not supported: {reason}")]
    Operation { operation: String, reason: String },
}

impl UnsupportedError {
    pub fn unresolvable(node: impl Into<String>, reason: impl Into<String>) -> Self {
        UnsupportedError::UnresolvableValue {
            node: node.into(),
            reason: reason.into(),
        }
    }

    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        UnsupportedError::Operation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Buffer view misuse, detected before any kernel runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("views do not share a root buffer (roots {expected} and {found})")]
    CrossRoot { expected: u64, found: u64 },
    #[error("view of {len} elements at offset {offset} exceeds root buffer of {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("expected {expected} elements, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("missing input buffer for argument {position}")]
    MissingInput { position: usize },
    #[error("batch views are not contiguous: expected offset {expected}, found {found}")]
    NonContiguous { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Evaluation(#[from] EvalError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }

    pub(crate) fn requires_isolation(&self) -> bool {
        matches!(
            self,
            Error::Unsupported(UnsupportedError::RequiresIsolation { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
