use super::{ArrayId, Expr, ExprKind, Op};
use crate::error::UnsupportedError;

/// One element of an array argument that an expression is differentiated by.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaTarget {
    pub array: ArrayId,
    /// Linear index of the element within `array`.
    pub index: Expr,
}

impl DeltaTarget {
    pub fn new(array: ArrayId, index: Expr) -> Self {
        Self { array, index }
    }
}

impl Expr {
    /// Symbolic derivative with respect to `target.array[target.index]`.
    ///
    /// Products with more than two non-constant factors are rejected with
    /// [`UnsupportedError::NaryProductDelta`]; callers may retry on
    /// [`Expr::binarize_products`].
    pub fn delta(&self, target: &DeltaTarget) -> Result<Expr, UnsupportedError> {
        Ok(self.delta_raw(target)?.simplify())
    }

    fn delta_raw(&self, target: &DeltaTarget) -> Result<Expr, UnsupportedError> {
        match self {
            Expr::Const(_) | Expr::Index(_) | Expr::Var(_) | Expr::Length(_) => Ok(zero()),
            Expr::Element { array, index } => {
                if *array == target.array {
                    Ok(Expr::conditional(
                        index.as_ref().clone().equals(target.index.clone()),
                        Expr::double(1.0),
                        Expr::double(0.0),
                    ))
                } else {
                    Ok(zero())
                }
            }
            Expr::Apply { op, args } => apply_delta(*op, args, target),
        }
    }
}

fn zero() -> Expr {
    Expr::double(0.0)
}

fn depends_on(expr: &Expr, target: &DeltaTarget) -> bool {
    expr.references(target.array)
}

fn apply_delta(op: Op, args: &[Expr], target: &DeltaTarget) -> Result<Expr, UnsupportedError> {
    if op.is_comparison() || op.is_logical() {
        return Ok(zero());
    }
    if !args.iter().any(|arg| depends_on(arg, target)) {
        return Ok(zero());
    }
    let d = |expr: &Expr| expr.delta_raw(target);
    match op {
        Op::Sum => Ok(Expr::sum(args.iter().map(d).collect::<Result<_, _>>()?)),
        Op::Negate => Ok(-d(&args[0])?),
        Op::Product => product_delta(args, target),
        Op::Quotient => {
            if args[0].kind() != ExprKind::Double && args[1].kind() != ExprKind::Double {
                return Ok(zero());
            }
            let (u, v) = (&args[0], &args[1]);
            if !depends_on(v, target) {
                return Ok(Expr::quotient(d(u)?, v.clone()));
            }
            let cross = u.clone() * d(v)?;
            let numerator = if depends_on(u, target) {
                d(u)? * v.clone() - cross
            } else {
                -cross
            };
            Ok(Expr::quotient(numerator, v.clone() * v.clone()))
        }
        Op::Mod => {
            if depends_on(&args[1], target) {
                return Err(UnsupportedError::operation(
                    "delta of modulo",
                    "the modulus depends on the target",
                ));
            }
            d(&args[0])
        }
        Op::Exp => Ok(Expr::exp(args[0].clone()) * d(&args[0])?),
        Op::Ln => Ok(Expr::quotient(d(&args[0])?, args[0].clone())),
        Op::Sqrt => Ok(Expr::quotient(
            d(&args[0])?,
            Expr::double(2.0) * args[0].clone().sqrt(),
        )),
        Op::Abs => Ok(Expr::conditional(
            args[0].clone().less_than(Expr::double(0.0)),
            -d(&args[0])?,
            d(&args[0])?,
        )),
        Op::Min => Ok(Expr::conditional(
            args[0].clone().less_or_equal(args[1].clone()),
            d(&args[0])?,
            d(&args[1])?,
        )),
        Op::Max => Ok(Expr::conditional(
            args[0].clone().greater_or_equal(args[1].clone()),
            d(&args[0])?,
            d(&args[1])?,
        )),
        Op::Conditional => Ok(Expr::conditional(
            args[0].clone(),
            d(&args[1])?,
            d(&args[2])?,
        )),
        _ => Err(UnsupportedError::operation(
            format!("delta of {op:?}"),
            "no derivative rule",
        )),
    }
}

/// `u·v -> u·dv + v·du`, with constant factors scaling the result.
fn product_delta(args: &[Expr], target: &DeltaTarget) -> Result<Expr, UnsupportedError> {
    let (varying, constant): (Vec<&Expr>, Vec<&Expr>) =
        args.iter().partition(|arg| depends_on(arg, target));
    let derivative = match varying.as_slice() {
        [u] => u.delta_raw(target)?,
        [u, v] => {
            // zero partials are left out rather than multiplied through
            let du = u.delta_raw(target)?.simplify();
            let dv = v.delta_raw(target)?.simplify();
            let mut terms = Vec::with_capacity(2);
            if !dv.is_zero() {
                terms.push((*u).clone() * dv);
            }
            if !du.is_zero() {
                terms.push((*v).clone() * du);
            }
            if terms.is_empty() {
                return Ok(zero());
            }
            Expr::sum(terms)
        }
        _ => {
            return Err(UnsupportedError::NaryProductDelta {
                arity: varying.len(),
            })
        }
    };
    if constant.is_empty() {
        return Ok(derivative);
    }
    let mut factors: Vec<Expr> = constant.into_iter().cloned().collect();
    factors.push(derivative);
    Ok(Expr::product(factors))
}
