use std::collections::HashMap;

use thiserror::Error;

use super::{ArrayId, Expr, Op, Scalar};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("index `{0}` is not bound")]
    UnboundIndex(String),
    #[error("variable `{0}` is not bound")]
    UnboundVariable(String),
    #[error("array {0:?} is not bound")]
    UnknownArray(ArrayId),
    #[error("read of element {index} from array {array:?} of length {len}")]
    ElementOutOfRange { array: ArrayId, index: i64, len: usize },
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("{op:?} expects {expected} operands, found {found}")]
    Arity {
        op: Op,
        expected: usize,
        found: usize,
    },
}

/// Bindings an expression is evaluated against.
pub trait ExprEnv {
    fn index_value(&self, name: &str) -> Option<i64>;
    fn variable(&self, name: &str) -> Option<Scalar>;
    fn element(&self, array: ArrayId, index: i64) -> Result<f64, EvalError>;
    fn length(&self, array: ArrayId) -> Option<usize>;
}

/// Hash-map backed environment over borrowed array contents.
#[derive(Debug, Default, Clone)]
pub struct MapEnv<'a> {
    indices: HashMap<String, i64>,
    variables: HashMap<String, Scalar>,
    arrays: HashMap<ArrayId, &'a [f64]>,
}

impl<'a> MapEnv<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_index(&mut self, name: impl Into<String>, value: i64) -> &mut Self {
        self.indices.insert(name.into(), value);
        self
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Scalar) -> &mut Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn bind_array(&mut self, array: ArrayId, values: &'a [f64]) -> &mut Self {
        self.arrays.insert(array, values);
        self
    }
}

impl ExprEnv for MapEnv<'_> {
    fn index_value(&self, name: &str) -> Option<i64> {
        self.indices.get(name).copied()
    }

    fn variable(&self, name: &str) -> Option<Scalar> {
        self.variables.get(name).copied()
    }

    fn element(&self, array: ArrayId, index: i64) -> Result<f64, EvalError> {
        let values = self
            .arrays
            .get(&array)
            .ok_or(EvalError::UnknownArray(array))?;
        read_element(array, values, index)
    }

    fn length(&self, array: ArrayId) -> Option<usize> {
        self.arrays.get(&array).map(|values| values.len())
    }
}

/// Bounds-checked read shared by environments backed by plain slices.
pub fn read_element(array: ArrayId, values: &[f64], index: i64) -> Result<f64, EvalError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| values.get(i).copied())
        .ok_or(EvalError::ElementOutOfRange {
            array,
            index,
            len: values.len(),
        })
}

impl Expr {
    pub fn evaluate(&self, env: &dyn ExprEnv) -> Result<Scalar, EvalError> {
        match self {
            Expr::Const(value) => Ok(*value),
            Expr::Index(index) => env
                .index_value(&index.name)
                .map(Scalar::Int)
                .ok_or_else(|| EvalError::UnboundIndex(index.name.clone())),
            Expr::Var(name) => env
                .variable(name)
                .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
            Expr::Element { array, index } => {
                let position = index.evaluate(env)?.as_i64();
                env.element(*array, position).map(Scalar::Double)
            }
            Expr::Length(array) => env
                .length(*array)
                .map(|len| Scalar::Int(len as i64))
                .ok_or(EvalError::UnknownArray(*array)),
            Expr::Apply { op, args } => match op {
                Op::Conditional => {
                    check_arity(*op, args, 3)?;
                    if args[0].evaluate(env)?.is_truthy() {
                        args[1].evaluate(env)
                    } else {
                        args[2].evaluate(env)
                    }
                }
                Op::And => {
                    for arg in args {
                        if !arg.evaluate(env)?.is_truthy() {
                            return Ok(Scalar::Bool(false));
                        }
                    }
                    Ok(Scalar::Bool(true))
                }
                Op::Or => {
                    for arg in args {
                        if arg.evaluate(env)?.is_truthy() {
                            return Ok(Scalar::Bool(true));
                        }
                    }
                    Ok(Scalar::Bool(false))
                }
                _ => {
                    let values = args
                        .iter()
                        .map(|arg| arg.evaluate(env))
                        .collect::<Result<Vec<_>, _>>()?;
                    apply_scalars(*op, &values)
                }
            },
        }
    }

    /// Evaluates as a double, the storage type of every collection.
    pub fn evaluate_f64(&self, env: &dyn ExprEnv) -> Result<f64, EvalError> {
        self.evaluate(env).map(|value| value.as_f64())
    }
}

fn check_arity<T>(op: Op, args: &[T], expected: usize) -> Result<(), EvalError> {
    if args.len() != expected {
        return Err(EvalError::Arity {
            op,
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

fn all_integral(values: &[Scalar]) -> bool {
    values
        .iter()
        .all(|value| !matches!(value, Scalar::Double(_)))
}

/// Applies `op` to already-evaluated operands. Integer operands use C
/// semantics: truncating division and a remainder with the dividend's sign.
pub(crate) fn apply_scalars(op: Op, values: &[Scalar]) -> Result<Scalar, EvalError> {
    if let Some(expected) = op.arity() {
        check_arity(op, values, expected)?;
    }
    let integral = all_integral(values);
    let value = match op {
        Op::Sum => {
            if integral {
                Scalar::Int(values.iter().fold(0i64, |acc, v| acc.wrapping_add(v.as_i64())))
            } else {
                Scalar::Double(values.iter().map(Scalar::as_f64).sum())
            }
        }
        Op::Product => {
            if integral {
                Scalar::Int(values.iter().fold(1i64, |acc, v| acc.wrapping_mul(v.as_i64())))
            } else {
                Scalar::Double(values.iter().map(Scalar::as_f64).product())
            }
        }
        Op::Negate => match values[0] {
            Scalar::Double(v) => Scalar::Double(-v),
            other => Scalar::Int(other.as_i64().wrapping_neg()),
        },
        Op::Quotient => {
            if integral {
                let divisor = values[1].as_i64();
                if divisor == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Scalar::Int(values[0].as_i64().wrapping_div(divisor))
            } else {
                Scalar::Double(values[0].as_f64() / values[1].as_f64())
            }
        }
        Op::Mod => {
            if integral {
                let modulus = values[1].as_i64();
                if modulus == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Scalar::Int(values[0].as_i64().wrapping_rem(modulus))
            } else {
                Scalar::Double(values[0].as_f64() % values[1].as_f64())
            }
        }
        Op::Min => {
            if integral {
                Scalar::Int(values[0].as_i64().min(values[1].as_i64()))
            } else {
                Scalar::Double(values[0].as_f64().min(values[1].as_f64()))
            }
        }
        Op::Max => {
            if integral {
                Scalar::Int(values[0].as_i64().max(values[1].as_i64()))
            } else {
                Scalar::Double(values[0].as_f64().max(values[1].as_f64()))
            }
        }
        Op::Exp => Scalar::Double(values[0].as_f64().exp()),
        Op::Ln => Scalar::Double(values[0].as_f64().ln()),
        Op::Sqrt => Scalar::Double(values[0].as_f64().sqrt()),
        Op::Abs => match values[0] {
            Scalar::Double(v) => Scalar::Double(v.abs()),
            other => Scalar::Int(other.as_i64().wrapping_abs()),
        },
        Op::Eq | Op::NotEq | Op::Less | Op::LessEq | Op::Greater | Op::GreaterEq => {
            Scalar::Bool(compare(op, values[0], values[1], integral))
        }
        Op::And => Scalar::Bool(values.iter().all(Scalar::is_truthy)),
        Op::Or => Scalar::Bool(values.iter().any(Scalar::is_truthy)),
        Op::Not => Scalar::Bool(!values[0].is_truthy()),
        Op::Conditional => {
            if values[0].is_truthy() {
                values[1]
            } else {
                values[2]
            }
        }
    };
    Ok(value)
}

fn compare(op: Op, a: Scalar, b: Scalar, integral: bool) -> bool {
    if integral {
        let (a, b) = (a.as_i64(), b.as_i64());
        match op {
            Op::Eq => a == b,
            Op::NotEq => a != b,
            Op::Less => a < b,
            Op::LessEq => a <= b,
            Op::Greater => a > b,
            _ => a >= b,
        }
    } else {
        let (a, b) = (a.as_f64(), b.as_f64());
        match op {
            Op::Eq => a == b,
            Op::NotEq => a != b,
            Op::Less => a < b,
            Op::LessEq => a <= b,
            Op::Greater => a > b,
            _ => a >= b,
        }
    }
}
