//! C source rendering of compiled kernel programs.
//!
//! Each scope becomes a `static` function taking the global id and its array
//! arguments (`argN` plus `argN_len`); the exported entry point runs every
//! scope over its extent in schedule order.

mod emit;
mod utils;

use arrayflow::backend::{ConversionResult, KernelTextTarget};
use arrayflow::scope::KernelProgram;
use tracing::debug;

pub struct CTarget;

impl CTarget {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CTarget {
    fn default() -> Self {
        Self
    }
}

impl KernelTextTarget for CTarget {
    fn name(&self) -> &str {
        "c"
    }

    fn version(&self) -> u64 {
        1
    }

    fn file_extension(&self) -> &str {
        "c"
    }

    fn render(&self, program: &KernelProgram) -> ConversionResult<String> {
        let source = emit::render_program(program)?;
        debug!(
            program = %program.name,
            scopes = program.scope_count(),
            bytes = source.len(),
            "rendered C kernel"
        );
        Ok(source)
    }
}
