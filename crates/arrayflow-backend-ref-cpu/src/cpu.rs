//! Host interpreter for compiled kernel programs.
//!
//! Argument buffers are snapshotted once per program; every scope then runs
//! its statements for each global id of its extent, in schedule order, and
//! the written arrays are copied back into the caller's views at the end.

use smallvec::SmallVec;
use tracing::trace;

use arrayflow::backend::{BackendError, BackendResult, KernelBackend};
use arrayflow::expr::{read_element, ArrayId, EvalError, Expr, ExprEnv, ExprKind, Scalar, GLOBAL_INDEX};
use arrayflow::memory::Collection;
use arrayflow::scope::{KernelProgram, Scope, Statement, Target};

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl KernelBackend for CpuBackend {
    fn backend_name(&self) -> &str {
        "cpu"
    }

    fn execute(&self, program: &KernelProgram, arguments: &[Collection]) -> BackendResult<()> {
        if arguments.len() != program.arrays.len() {
            return Err(BackendError::execution(format!(
                "{} expects {} arguments, received {}",
                program.name,
                program.arrays.len(),
                arguments.len()
            )));
        }
        let mut buffers: Vec<Vec<f64>> = arguments.iter().map(Collection::to_vec).collect();
        let mut written = vec![false; buffers.len()];
        for scope in program.schedule() {
            run_scope(scope, &mut buffers)?;
            for array in scope.writes() {
                if let Some(flag) = written.get_mut(array.position()) {
                    *flag = true;
                }
            }
        }
        for ((argument, values), written) in arguments.iter().zip(&buffers).zip(written) {
            if written {
                argument
                    .write_all(values)
                    .map_err(|err| BackendError::execution(err.to_string()))?;
            }
        }
        Ok(())
    }
}

fn run_scope(scope: &Scope, buffers: &mut [Vec<f64>]) -> BackendResult<()> {
    let extent = scope
        .extent
        .resolve(|array| buffers.get(array.position()).map(Vec::len))
        .ok_or_else(|| {
            BackendError::execution(format!("extent of {} refers to an unbound array", scope.name))
        })?;
    trace!(scope = %scope.name, extent, mem = scope.mem, "running scope");
    let mut locals = Locals::default();
    for gid in 0..extent {
        locals.set_index(GLOBAL_INDEX, gid as i64);
        run_statements(&scope.statements, &mut locals, buffers)?;
    }
    Ok(())
}

fn run_statements(
    statements: &[Statement],
    locals: &mut Locals,
    buffers: &mut [Vec<f64>],
) -> BackendResult<()> {
    for statement in statements {
        match statement {
            Statement::Declare { name, kind, value } => {
                let value = evaluate(value, locals, buffers)?;
                let value = match kind {
                    ExprKind::Double => Scalar::Double(value.as_f64()),
                    ExprKind::Int => Scalar::Int(value.as_i64()),
                    ExprKind::Bool => Scalar::Bool(value.is_truthy()),
                };
                locals.set_variable(name, value);
            }
            Statement::Assign {
                target: Target::Var(name),
                value,
            } => {
                let value = evaluate(value, locals, buffers)?;
                locals.set_variable(name, value);
            }
            Statement::Assign {
                target: Target::Element { array, index },
                value,
            } => {
                let position = evaluate(index, locals, buffers)?.as_i64();
                let value = evaluate(value, locals, buffers)?.as_f64();
                store(buffers, *array, position, value)?;
            }
            Statement::Loop { index, limit, body } => {
                let limit = evaluate(limit, locals, buffers)?.as_i64();
                for i in 0..limit.max(0) {
                    locals.set_index(&index.name, i);
                    run_statements(body, locals, buffers)?;
                }
            }
        }
    }
    Ok(())
}

fn evaluate(expr: &Expr, locals: &Locals, buffers: &[Vec<f64>]) -> BackendResult<Scalar> {
    let frame = Frame { locals, buffers };
    Ok(expr.evaluate(&frame)?)
}

fn store(buffers: &mut [Vec<f64>], array: ArrayId, position: i64, value: f64) -> BackendResult<()> {
    let buffer = buffers
        .get_mut(array.position())
        .ok_or(EvalError::UnknownArray(array))?;
    let len = buffer.len();
    let slot = usize::try_from(position)
        .ok()
        .and_then(|p| buffer.get_mut(p))
        .ok_or(EvalError::ElementOutOfRange {
            array,
            index: position,
            len,
        })?;
    *slot = value;
    Ok(())
}

/// Index and variable bindings of the statement currently running. Kernels
/// bind a handful of names, so linear lookup is enough.
#[derive(Debug, Default)]
struct Locals {
    indices: SmallVec<[(String, i64); 4]>,
    variables: SmallVec<[(String, Scalar); 4]>,
}

impl Locals {
    fn set_index(&mut self, name: &str, value: i64) {
        match self.indices.iter_mut().find(|(bound, _)| bound == name) {
            Some((_, slot)) => *slot = value,
            None => self.indices.push((name.to_string(), value)),
        }
    }

    fn set_variable(&mut self, name: &str, value: Scalar) {
        match self.variables.iter_mut().find(|(bound, _)| bound == name) {
            Some((_, slot)) => *slot = value,
            None => self.variables.push((name.to_string(), value)),
        }
    }
}

struct Frame<'a> {
    locals: &'a Locals,
    buffers: &'a [Vec<f64>],
}

impl ExprEnv for Frame<'_> {
    fn index_value(&self, name: &str) -> Option<i64> {
        self.locals
            .indices
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| *value)
    }

    fn variable(&self, name: &str) -> Option<Scalar> {
        self.locals
            .variables
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| *value)
    }

    fn element(&self, array: ArrayId, index: i64) -> Result<f64, EvalError> {
        let values = self
            .buffers
            .get(array.position())
            .ok_or(EvalError::UnknownArray(array))?;
        read_element(array, values, index)
    }

    fn length(&self, array: ArrayId) -> Option<usize> {
        self.buffers.get(array.position()).map(Vec::len)
    }
}
