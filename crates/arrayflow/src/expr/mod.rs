//! Scalar expression IR.
//!
//! Expressions are immutable trees. Each node owns its children outright;
//! common subexpressions are duplicated rather than shared. The value rule of
//! every graph node is an [`Expr`] over a linear output index.

mod bounds;
mod delta;
mod display;
mod eval;
mod simplify;

use std::collections::BTreeSet;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use serde::{Deserialize, Serialize};

pub use bounds::Interval;
pub use delta::DeltaTarget;
pub use eval::{read_element, EvalError, ExprEnv, MapEnv};
pub use simplify::SimplifyOptions;

/// Name of the per-invocation kernel index.
pub const GLOBAL_INDEX: &str = "global_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExprKind {
    Int,
    Double,
    Bool,
}

impl ExprKind {
    /// Result kind of an arithmetic combination.
    pub fn join(self, other: ExprKind) -> ExprKind {
        match (self, other) {
            (ExprKind::Double, _) | (_, ExprKind::Double) => ExprKind::Double,
            _ => ExprKind::Int,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl Scalar {
    pub fn kind(&self) -> ExprKind {
        match self {
            Scalar::Int(_) => ExprKind::Int,
            Scalar::Double(_) => ExprKind::Double,
            Scalar::Bool(_) => ExprKind::Bool,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Scalar::Int(v) => v as f64,
            Scalar::Double(v) => v,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Integer view; doubles truncate toward zero.
    pub fn as_i64(&self) -> i64 {
        match *self {
            Scalar::Int(v) => v,
            Scalar::Double(v) => v as i64,
            Scalar::Bool(v) => i64::from(v),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match *self {
            Scalar::Int(v) => v != 0,
            Scalar::Double(v) => v != 0.0,
            Scalar::Bool(v) => v,
        }
    }

    pub fn is_zero(&self) -> bool {
        match *self {
            Scalar::Int(v) => v == 0,
            Scalar::Double(v) => v == 0.0,
            Scalar::Bool(v) => !v,
        }
    }

    pub fn is_one(&self) -> bool {
        match *self {
            Scalar::Int(v) => v == 1,
            Scalar::Double(v) => v == 1.0,
            Scalar::Bool(v) => v,
        }
    }

    pub fn zero(kind: ExprKind) -> Scalar {
        match kind {
            ExprKind::Int => Scalar::Int(0),
            ExprKind::Double => Scalar::Double(0.0),
            ExprKind::Bool => Scalar::Bool(false),
        }
    }
}

/// Identifies one array argument of a compiled kernel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ArrayId(pub u32);

impl ArrayId {
    pub fn position(self) -> usize {
        self.0 as usize
    }
}

/// An integer index variable, optionally bounded by `limit` (exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub limit: Option<usize>,
}

impl Index {
    pub fn new(name: impl Into<String>, limit: Option<usize>) -> Self {
        Self {
            name: name.into(),
            limit,
        }
    }

    pub fn bounded(name: impl Into<String>, limit: usize) -> Self {
        Self::new(name, Some(limit))
    }

    /// The kernel's global per-invocation index.
    pub fn global(limit: Option<usize>) -> Self {
        Self::new(GLOBAL_INDEX, limit)
    }

    pub fn expr(&self) -> Expr {
        Expr::Index(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Sum,
    Product,
    Negate,
    Quotient,
    Mod,
    Min,
    Max,
    Exp,
    Ln,
    Sqrt,
    Abs,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    And,
    Or,
    Not,
    /// `[condition, then, else]`
    Conditional,
}

impl Op {
    /// Fixed operand count, `None` for variadic operators.
    pub fn arity(self) -> Option<usize> {
        match self {
            Op::Sum | Op::Product | Op::And | Op::Or => None,
            Op::Negate | Op::Exp | Op::Ln | Op::Sqrt | Op::Abs | Op::Not => Some(1),
            Op::Conditional => Some(3),
            _ => Some(2),
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Op::Eq | Op::NotEq | Op::Less | Op::LessEq | Op::Greater | Op::GreaterEq
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Op::And | Op::Or | Op::Not)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Scalar),
    Index(Index),
    /// A scalar local declared by the enclosing scope (accumulators, temporaries).
    Var(String),
    Element { array: ArrayId, index: Box<Expr> },
    /// Realized element count of an array argument.
    Length(ArrayId),
    Apply { op: Op, args: Vec<Expr> },
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Const(Scalar::Int(value))
    }

    pub fn double(value: f64) -> Expr {
        Expr::Const(Scalar::Double(value))
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Const(Scalar::Bool(value))
    }

    pub fn zero(kind: ExprKind) -> Expr {
        Expr::Const(Scalar::zero(kind))
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn element(array: ArrayId, index: Expr) -> Expr {
        Expr::Element {
            array,
            index: Box::new(index),
        }
    }

    pub fn length(array: ArrayId) -> Expr {
        Expr::Length(array)
    }

    pub fn apply(op: Op, args: Vec<Expr>) -> Expr {
        Expr::Apply { op, args }
    }

    /// Sum of `terms`; the empty sum is integer zero.
    pub fn sum(mut terms: Vec<Expr>) -> Expr {
        match terms.len() {
            0 => Expr::int(0),
            1 => terms.remove(0),
            _ => Expr::apply(Op::Sum, terms),
        }
    }

    /// Product of `factors`; the empty product is integer one.
    pub fn product(mut factors: Vec<Expr>) -> Expr {
        match factors.len() {
            0 => Expr::int(1),
            1 => factors.remove(0),
            _ => Expr::apply(Op::Product, factors),
        }
    }

    pub fn quotient(numerator: Expr, denominator: Expr) -> Expr {
        Expr::apply(Op::Quotient, vec![numerator, denominator])
    }

    pub fn modulo(value: Expr, modulus: Expr) -> Expr {
        Expr::apply(Op::Mod, vec![value, modulus])
    }

    pub fn exp(self) -> Expr {
        Expr::apply(Op::Exp, vec![self])
    }

    pub fn ln(self) -> Expr {
        Expr::apply(Op::Ln, vec![self])
    }

    pub fn sqrt(self) -> Expr {
        Expr::apply(Op::Sqrt, vec![self])
    }

    pub fn abs(self) -> Expr {
        Expr::apply(Op::Abs, vec![self])
    }

    pub fn min(self, other: Expr) -> Expr {
        Expr::apply(Op::Min, vec![self, other])
    }

    pub fn max(self, other: Expr) -> Expr {
        Expr::apply(Op::Max, vec![self, other])
    }

    pub fn equals(self, other: Expr) -> Expr {
        Expr::apply(Op::Eq, vec![self, other])
    }

    pub fn not_equals(self, other: Expr) -> Expr {
        Expr::apply(Op::NotEq, vec![self, other])
    }

    pub fn less_than(self, other: Expr) -> Expr {
        Expr::apply(Op::Less, vec![self, other])
    }

    pub fn less_or_equal(self, other: Expr) -> Expr {
        Expr::apply(Op::LessEq, vec![self, other])
    }

    pub fn greater_than(self, other: Expr) -> Expr {
        Expr::apply(Op::Greater, vec![self, other])
    }

    pub fn greater_or_equal(self, other: Expr) -> Expr {
        Expr::apply(Op::GreaterEq, vec![self, other])
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::apply(Op::And, vec![self, other])
    }

    pub fn all(mut terms: Vec<Expr>) -> Expr {
        match terms.len() {
            0 => Expr::boolean(true),
            1 => terms.remove(0),
            _ => Expr::apply(Op::And, terms),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::apply(Op::Or, vec![self, other])
    }

    pub fn not(self) -> Expr {
        Expr::apply(Op::Not, vec![self])
    }

    pub fn conditional(condition: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::apply(Op::Conditional, vec![condition, then, otherwise])
    }

    /// `lo <= self < hi`
    pub fn within(self, lo: Expr, hi: Expr) -> Expr {
        Expr::all(vec![self.clone().greater_or_equal(lo), self.less_than(hi)])
    }

    pub fn kind(&self) -> ExprKind {
        match self {
            Expr::Const(value) => value.kind(),
            Expr::Index(_) | Expr::Length(_) => ExprKind::Int,
            Expr::Var(_) | Expr::Element { .. } => ExprKind::Double,
            Expr::Apply { op, args } => match op {
                Op::Exp | Op::Ln | Op::Sqrt => ExprKind::Double,
                op if op.is_comparison() || op.is_logical() => ExprKind::Bool,
                Op::Conditional => match (args.get(1), args.get(2)) {
                    (Some(a), Some(b)) => match (a.kind(), b.kind()) {
                        (ExprKind::Bool, ExprKind::Bool) => ExprKind::Bool,
                        (x, y) => x.join(y),
                    },
                    _ => ExprKind::Double,
                },
                _ => args
                    .iter()
                    .map(Expr::kind)
                    .fold(ExprKind::Int, ExprKind::join),
            },
        }
    }

    pub fn as_const(&self) -> Option<Scalar> {
        match self {
            Expr::Const(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Const(Scalar::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_const().is_some_and(|value| value.is_zero())
    }

    pub fn is_one(&self) -> bool {
        self.as_const().is_some_and(|value| value.is_one())
    }

    pub fn children(&self) -> &[Expr] {
        match self {
            Expr::Apply { args, .. } => args,
            Expr::Element { index, .. } => std::slice::from_ref(index.as_ref()),
            _ => &[],
        }
    }

    /// Rebuilds this node with new operands. Leaves return themselves.
    pub fn generate(&self, args: Vec<Expr>) -> Expr {
        match self {
            Expr::Apply { op, .. } => Expr::apply(*op, args),
            Expr::Element { array, .. } => match args.into_iter().next() {
                Some(index) => Expr::element(*array, index),
                None => self.clone(),
            },
            _ => self.clone(),
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(Expr::node_count).sum::<usize>()
    }

    pub fn contains_index(&self, name: &str) -> bool {
        match self {
            Expr::Index(index) => index.name == name,
            _ => self.children().iter().any(|child| child.contains_index(name)),
        }
    }

    pub fn contains_var(&self, name: &str) -> bool {
        match self {
            Expr::Var(var) => var == name,
            _ => self.children().iter().any(|child| child.contains_var(name)),
        }
    }

    pub fn references(&self, array: ArrayId) -> bool {
        match self {
            Expr::Element { array: a, index } => *a == array || index.references(array),
            Expr::Length(a) => *a == array,
            _ => self.children().iter().any(|child| child.references(array)),
        }
    }

    /// Every array read by this expression.
    pub fn arrays(&self) -> BTreeSet<ArrayId> {
        let mut out = BTreeSet::new();
        self.collect_arrays(&mut out);
        out
    }

    pub(crate) fn collect_arrays(&self, out: &mut BTreeSet<ArrayId>) {
        match self {
            Expr::Element { array, index } => {
                out.insert(*array);
                index.collect_arrays(out);
            }
            Expr::Length(array) => {
                out.insert(*array);
            }
            _ => {
                for child in self.children() {
                    child.collect_arrays(out);
                }
            }
        }
    }

    /// Pre-order rewrite: where `f` returns a replacement the subtree is not
    /// visited further.
    pub fn transform(&self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self {
            Expr::Apply { op, args } => {
                Expr::apply(*op, args.iter().map(|arg| arg.transform(f)).collect())
            }
            Expr::Element { array, index } => Expr::element(*array, index.transform(f)),
            _ => self.clone(),
        }
    }

    pub fn substitute_index(&self, name: &str, replacement: &Expr) -> Expr {
        self.transform(&mut |expr| match expr {
            Expr::Index(index) if index.name == name => Some(replacement.clone()),
            _ => None,
        })
    }

    pub fn substitute_var(&self, name: &str, replacement: &Expr) -> Expr {
        self.transform(&mut |expr| match expr {
            Expr::Var(var) if var == name => Some(replacement.clone()),
            _ => None,
        })
    }

    /// Rewrites products with more than two operands into nested binary
    /// products, so the two-factor product rule applies at every level.
    pub fn binarize_products(&self) -> Expr {
        self.transform(&mut |expr| match expr {
            Expr::Apply {
                op: Op::Product,
                args,
            } if args.len() > 2 => {
                let mut iter = args.iter().map(Expr::binarize_products);
                let first = iter.next()?;
                Some(iter.fold(first, |acc, next| {
                    Expr::apply(Op::Product, vec![acc, next])
                }))
            }
            _ => None,
        })
    }
}

impl From<Index> for Expr {
    fn from(index: Index) -> Self {
        Expr::Index(index)
    }
}

impl From<&Index> for Expr {
    fn from(index: &Index) -> Self {
        Expr::Index(index.clone())
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::double(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::int(value)
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::apply(Op::Sum, vec![self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::apply(Op::Sum, vec![self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::apply(Op::Product, vec![self, rhs])
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::quotient(self, rhs)
    }
}

impl Rem for Expr {
    type Output = Expr;

    fn rem(self, rhs: Expr) -> Expr {
        Expr::modulo(self, rhs)
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::apply(Op::Negate, vec![self])
    }
}
