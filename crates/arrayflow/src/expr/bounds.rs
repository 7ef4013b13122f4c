use super::{Expr, ExprKind, Op, Scalar};

/// Inclusive integer range an index expression is known to stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: i64,
    pub hi: i64,
}

impl Interval {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub fn point(value: i64) -> Self {
        Self::new(value, value)
    }

    pub fn unbounded_non_negative() -> Self {
        Self::new(0, i64::MAX)
    }

    pub fn is_non_negative(&self) -> bool {
        self.lo >= 0
    }

    /// Whether every value lies in `[lo, hi)`.
    pub fn within(&self, lo: i64, hi: i64) -> bool {
        self.lo >= lo && self.hi < hi
    }

    pub fn contains(&self, value: i64) -> bool {
        self.lo <= value && value <= self.hi
    }

    fn union(self, other: Interval) -> Interval {
        Interval::new(self.lo.min(other.lo), self.hi.max(other.hi))
    }

    fn add(self, other: Interval) -> Interval {
        Interval::new(
            clamp(self.lo as i128 + other.lo as i128),
            clamp(self.hi as i128 + other.hi as i128),
        )
    }

    fn mul(self, other: Interval) -> Interval {
        let corners = [
            self.lo as i128 * other.lo as i128,
            self.lo as i128 * other.hi as i128,
            self.hi as i128 * other.lo as i128,
            self.hi as i128 * other.hi as i128,
        ];
        let lo = corners.iter().copied().min().unwrap_or(0);
        let hi = corners.iter().copied().max().unwrap_or(0);
        Interval::new(clamp(lo), clamp(hi))
    }

    fn negate(self) -> Interval {
        Interval::new(clamp(-(self.hi as i128)), clamp(-(self.lo as i128)))
    }
}

fn clamp(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl Expr {
    /// Interval analysis for integer and boolean expressions.
    ///
    /// Returns `None` when nothing can be said (double-valued expressions,
    /// accumulator variables, element reads).
    pub fn bounds(&self) -> Option<Interval> {
        if self.kind() == ExprKind::Double {
            return None;
        }
        match self {
            Expr::Const(Scalar::Int(value)) => Some(Interval::point(*value)),
            Expr::Const(Scalar::Bool(value)) => Some(Interval::point(i64::from(*value))),
            Expr::Const(Scalar::Double(_)) => None,
            Expr::Index(index) => Some(match index.limit {
                Some(limit) => Interval::new(0, (limit as i64 - 1).max(0)),
                None => Interval::unbounded_non_negative(),
            }),
            Expr::Length(_) => Some(Interval::unbounded_non_negative()),
            Expr::Var(_) | Expr::Element { .. } => None,
            Expr::Apply { op, args } => apply_bounds(*op, args),
        }
    }
}

fn apply_bounds(op: Op, args: &[Expr]) -> Option<Interval> {
    if op.is_comparison() || op.is_logical() {
        return Some(Interval::new(0, 1));
    }
    match op {
        Op::Sum => args
            .iter()
            .try_fold(Interval::point(0), |acc, arg| Some(acc.add(arg.bounds()?))),
        Op::Product => args
            .iter()
            .try_fold(Interval::point(1), |acc, arg| Some(acc.mul(arg.bounds()?))),
        Op::Negate => Some(args.first()?.bounds()?.negate()),
        Op::Quotient => {
            let value = args.first()?.bounds()?;
            let divisor = args.get(1)?.as_int().filter(|k| *k > 0)?;
            Some(Interval::new(value.lo / divisor, value.hi / divisor))
        }
        Op::Mod => {
            let value = args.first()?.bounds()?;
            let modulus = args.get(1)?.as_int().filter(|k| *k > 0)?;
            if value.is_non_negative() {
                if value.hi < modulus {
                    Some(value)
                } else {
                    Some(Interval::new(0, modulus - 1))
                }
            } else {
                Some(Interval::new(-(modulus - 1), modulus - 1))
            }
        }
        Op::Min => {
            let a = args.first()?.bounds()?;
            let b = args.get(1)?.bounds()?;
            Some(Interval::new(a.lo.min(b.lo), a.hi.min(b.hi)))
        }
        Op::Max => {
            let a = args.first()?.bounds()?;
            let b = args.get(1)?.bounds()?;
            Some(Interval::new(a.lo.max(b.lo), a.hi.max(b.hi)))
        }
        Op::Abs => {
            let a = args.first()?.bounds()?;
            if a.is_non_negative() {
                Some(a)
            } else if a.hi <= 0 {
                Some(a.negate())
            } else {
                Some(Interval::new(0, a.hi.max(a.negate().hi)))
            }
        }
        Op::Conditional => {
            let then = args.get(1)?.bounds()?;
            let otherwise = args.get(2)?.bounds()?;
            Some(then.union(otherwise))
        }
        _ => None,
    }
}

impl Expr {
    /// Whether the value can never be infinite or NaN. Integer and boolean
    /// expressions always qualify; double expressions need a finite
    /// [`Expr::magnitude`].
    pub fn is_finite(&self) -> bool {
        self.kind() != ExprKind::Double || self.magnitude().is_some()
    }

    /// Upper bound on the absolute value, if one can be shown and is finite.
    pub fn magnitude(&self) -> Option<f64> {
        let bound = match self {
            Expr::Const(Scalar::Double(value)) => value.abs(),
            Expr::Apply { op, args } if self.kind() == ExprKind::Double => match op {
                Op::Sum => args.iter().try_fold(0.0, |acc, arg| Some(acc + arg.magnitude()?))?,
                Op::Product => args.iter().try_fold(1.0, |acc, arg| Some(acc * arg.magnitude()?))?,
                Op::Negate | Op::Abs => args.first()?.magnitude()?,
                Op::Min | Op::Max => args
                    .iter()
                    .try_fold(0.0f64, |acc, arg| Some(acc.max(arg.magnitude()?)))?,
                Op::Conditional => args.get(1)?.magnitude()?.max(args.get(2)?.magnitude()?),
                _ => return None,
            },
            _ => {
                let range = self.bounds()?;
                (range.lo as f64).abs().max((range.hi as f64).abs())
            }
        };
        bound.is_finite().then_some(bound)
    }
}
