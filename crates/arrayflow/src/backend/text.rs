use thiserror::Error;

use crate::scope::KernelProgram;

#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct ConversionError {
    message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type ConversionResult<T> = Result<T, ConversionError>;

/// Renders kernel programs as source text for an external toolchain.
pub trait KernelTextTarget: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> u64 {
        0
    }
    fn file_extension(&self) -> &str;
    fn render(&self, program: &KernelProgram) -> ConversionResult<String>;
}
