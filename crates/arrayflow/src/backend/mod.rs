//! Backend contract.
//!
//! A [`KernelBackend`] executes compiled [`KernelProgram`]s over host
//! collections; a [`KernelTextTarget`] renders them as source text. Both
//! consume the same program and never see the graph.

pub mod registry;
mod text;

use std::fmt;

use crate::expr::EvalError;
use crate::memory::Collection;
use crate::scope::KernelProgram;

pub use registry::{create_backend, has_backend, list_backends, register_backend};
pub use text::{ConversionError, ConversionResult, KernelTextTarget};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
    Evaluation(EvalError),
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
            BackendError::Evaluation(err) => write!(f, "kernel evaluation failed: {err}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Evaluation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EvalError> for BackendError {
    fn from(err: EvalError) -> Self {
        BackendError::Evaluation(err)
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Executes compiled kernel programs.
pub trait KernelBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Runs every scope of `program` in schedule order.
    ///
    /// `arguments[i]` is bound to array `i` of the program; array 0 is the
    /// output and is written in place. Intermediates arrive zero-filled.
    fn execute(&self, program: &KernelProgram, arguments: &[Collection]) -> BackendResult<()>;
}
