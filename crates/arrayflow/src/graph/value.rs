//! Value rules: the scalar expression each node kind yields at a linear index.

use crate::config::CompileConfig;
use crate::error::{Result, UnsupportedError};
use crate::expr::{ArrayId, Expr, Index};
use crate::{delta, repeated};

use super::{Comparison, ElementwiseOp, Node, NodeKind};

/// Decides how the inputs of a node are read while its value rule is built.
///
/// The kernel compiler answers with element reads of realized intermediates or
/// with inlined value rules; the direct evaluator always reads realized
/// arrays; the generic delta path inlines everything that depends on the
/// differentiation target.
/// Number of arrays and scopes a resolver had created at some point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Savepoint {
    pub arrays: usize,
    pub scopes: usize,
}

pub trait ValueResolver {
    fn config(&self) -> &CompileConfig;

    /// Value of `node` at `index`.
    fn value(&mut self, node: &Node, index: &Expr) -> Result<Expr>;

    /// Array holding the realized values of `node`.
    fn bind_array(&mut self, node: &Node) -> Result<ArrayId>;

    /// Largest aggregate count that may be unrolled inline.
    fn unroll_limit(&self) -> usize {
        self.config().isolation_count_threshold
    }

    /// An index variable no other expression of this resolver uses.
    fn fresh_index(&mut self, prefix: &str, limit: usize) -> Index;

    fn savepoint(&self) -> Savepoint {
        Savepoint::default()
    }

    /// Forgets arrays and scopes created after `savepoint`.
    fn rewind(&mut self, _savepoint: Savepoint) {}
}

impl Node {
    /// Expression for this node's element at `index`, reading inputs through
    /// `resolver`.
    pub fn value_at(&self, index: &Expr, resolver: &mut dyn ValueResolver) -> Result<Expr> {
        match self.kind() {
            NodeKind::Argument { .. } | NodeKind::Data { .. } => Err(
                UnsupportedError::unresolvable(self.describe(), "sources are read from arrays")
                    .into(),
            ),
            NodeKind::Constant { value } => Ok(Expr::double(*value)),
            NodeKind::Identity { size } => {
                let size = Expr::int(*size as i64);
                Ok(Expr::conditional(
                    Expr::quotient(index.clone(), size.clone())
                        .equals(Expr::modulo(index.clone(), size)),
                    Expr::double(1.0),
                    Expr::double(0.0),
                ))
            }
            NodeKind::ArithmeticSequence { initial, rate, .. } => {
                Ok(Expr::double(*initial) + index.clone() * Expr::double(*rate))
            }
            NodeKind::Elementwise(op) => {
                let values = self.broadcast_values(index, resolver)?;
                Ok(combine(*op, values))
            }
            NodeKind::Select(comparison) => {
                let mut values = self.broadcast_values(index, resolver)?.into_iter();
                let (Some(left), Some(right), Some(positive), Some(negative)) =
                    (values.next(), values.next(), values.next(), values.next())
                else {
                    return Err(UnsupportedError::unresolvable(
                        self.describe(),
                        "select expects four inputs",
                    )
                    .into());
                };
                Ok(Expr::conditional(
                    compare(*comparison, left, right),
                    positive,
                    negative,
                ))
            }
            NodeKind::Projection(projection) => {
                let input = &self.inputs()[0];
                let projected = projection.project(self.shape(), input.shape(), index)?;
                let options = resolver.config().simplify_options();
                let value = resolver.value(input, &projected.index.simplify_with(options))?;
                Ok(match projected.guard {
                    Some(guard) => {
                        Expr::conditional(guard.simplify_with(options), value, Expr::double(0.0))
                    }
                    None => value,
                })
            }
            NodeKind::Aggregate(spec) => repeated::inline_value(self, spec, index, resolver),
            NodeKind::Delta => delta::expression::delta_value(self, index, resolver),
        }
    }

    /// Input values at the broadcast positions matching output `index`.
    fn broadcast_values(
        &self,
        index: &Expr,
        resolver: &mut dyn ValueResolver,
    ) -> Result<Vec<Expr>> {
        let total = self.total_size();
        self.inputs()
            .iter()
            .map(|input| {
                let position = broadcast_index(input, total, index);
                resolver.value(input, &position)
            })
            .collect()
    }
}

/// Index into `input` that a broadcasting consumer of `total` elements reads
/// at `index`.
pub(crate) fn broadcast_index(input: &Node, total: usize, index: &Expr) -> Expr {
    let own = input.total_size();
    if input.is_fixed_count() && own == 1 {
        Expr::int(0)
    } else if !input.is_fixed_count() || own == total {
        index.clone()
    } else {
        Expr::modulo(index.clone(), Expr::int(own as i64))
    }
}

fn combine(op: ElementwiseOp, values: Vec<Expr>) -> Expr {
    // Arity is checked when the node is built.
    let operand = |i: usize| values.get(i).cloned().unwrap_or_else(|| Expr::double(0.0));
    match op {
        ElementwiseOp::Add => Expr::sum(values.clone()),
        ElementwiseOp::Multiply => Expr::product(values.clone()),
        ElementwiseOp::Subtract => operand(0) - operand(1),
        ElementwiseOp::Divide => Expr::quotient(operand(0), operand(1)),
        ElementwiseOp::Negate => -operand(0),
        ElementwiseOp::Exp => operand(0).exp(),
        ElementwiseOp::Log => operand(0).ln(),
        ElementwiseOp::Sqrt => operand(0).sqrt(),
        ElementwiseOp::Abs => operand(0).abs(),
        ElementwiseOp::Minimum => operand(0).min(operand(1)),
        ElementwiseOp::Maximum => operand(0).max(operand(1)),
    }
}

fn compare(comparison: Comparison, left: Expr, right: Expr) -> Expr {
    match comparison {
        Comparison::Equal => left.equals(right),
        Comparison::LessThan { inclusive: true } => left.less_or_equal(right),
        Comparison::LessThan { inclusive: false } => left.less_than(right),
        Comparison::GreaterThan { inclusive: true } => left.greater_or_equal(right),
        Comparison::GreaterThan { inclusive: false } => left.greater_than(right),
        Comparison::And => left
            .not_equals(Expr::double(0.0))
            .and(right.not_equals(Expr::double(0.0))),
    }
}
