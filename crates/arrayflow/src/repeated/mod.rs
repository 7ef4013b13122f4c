//! Repeated/aggregated computations.
//!
//! An aggregate folds `count` consecutive input elements into each output
//! element:
//!
//! ```text
//! value = initial
//! for i in 0..count { value = step(value, input[row * count + i]) }
//! ```
//!
//! Inline lowering either collapses the loop to a single read (when the
//! reduction is additive and at most one step can contribute) or unrolls
//! it. Aggregates that can do neither are isolated and emitted as a literal
//! loop by the scope compiler.

mod offset;
mod sequence;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, UnsupportedError};
use crate::expr::{Expr, Op};
use crate::graph::{Node, ValueResolver};

pub use sequence::ArithmeticIndexSequence;

/// Accumulator variable of an aggregate step.
pub const ACCUMULATOR: &str = "acc";
/// Current item variable of an aggregate step.
pub const ITEM: &str = "item";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Count {
    Fixed(usize),
    /// `length(input) / output size`, known only once the input is bound.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reduction {
    Sum,
    Max,
    Min,
    Product,
}

impl Reduction {
    pub fn identity(self) -> f64 {
        match self {
            Reduction::Sum => 0.0,
            Reduction::Max => f64::NEG_INFINITY,
            Reduction::Min => f64::INFINITY,
            Reduction::Product => 1.0,
        }
    }

    pub fn step(self) -> Expr {
        let acc = Expr::var(ACCUMULATOR);
        let item = Expr::var(ITEM);
        match self {
            Reduction::Sum => acc + item,
            Reduction::Max => acc.max(item),
            Reduction::Min => acc.min(item),
            Reduction::Product => acc * item,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Max => "max",
            Reduction::Min => "min",
            Reduction::Product => "product",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub count: Count,
    pub initial: Expr,
    /// Expression over [`ACCUMULATOR`] and [`ITEM`].
    pub step: Expr,
    /// Whether the loop may be replaced by a single unique-offset read.
    pub replace_loop: bool,
    reduction: Option<Reduction>,
}

impl AggregateSpec {
    pub fn new(count: Count, initial: Expr, step: Expr) -> Self {
        Self {
            count,
            initial,
            step,
            replace_loop: true,
            reduction: None,
        }
    }

    pub fn reduction(reduction: Reduction, count: Count) -> Self {
        Self {
            count,
            initial: Expr::double(reduction.identity()),
            step: reduction.step(),
            replace_loop: true,
            reduction: Some(reduction),
        }
    }

    pub fn with_replace_loop(mut self, replace_loop: bool) -> Self {
        self.replace_loop = replace_loop;
        self
    }

    pub fn kind(&self) -> Option<Reduction> {
        self.reduction
    }

    /// Whether the aggregate is a plain sum: zero initial value and an
    /// `acc + item` step.
    pub fn is_additive(&self) -> bool {
        if self.reduction == Some(Reduction::Sum) {
            return true;
        }
        if !self.initial.is_zero() {
            return false;
        }
        match &self.step {
            Expr::Apply { op: Op::Sum, args } if args.len() == 2 => {
                let acc = Expr::var(ACCUMULATOR);
                let item = Expr::var(ITEM);
                (args[0] == acc && args[1] == item) || (args[0] == item && args[1] == acc)
            }
            _ => false,
        }
    }

    pub fn apply_step(&self, acc: &Expr, item: &Expr) -> Expr {
        self.step
            .substitute_var(ACCUMULATOR, acc)
            .substitute_var(ITEM, item)
    }

    pub fn name(&self) -> &'static str {
        self.reduction.map_or("aggregate", Reduction::name)
    }
}

/// Inline value of an aggregate at `index`.
///
/// Fails with [`UnsupportedError::RequiresIsolation`] when the aggregate must
/// become its own loop scope.
pub(crate) fn inline_value(
    node: &Node,
    spec: &AggregateSpec,
    index: &Expr,
    resolver: &mut dyn ValueResolver,
) -> Result<Expr> {
    let Count::Fixed(count) = spec.count else {
        return Err(UnsupportedError::RequiresIsolation {
            node: node.describe(),
            count: 0,
        }
        .into());
    };
    let input = &node.inputs()[0];
    let config = resolver.config().clone();
    if spec.is_additive() && spec.replace_loop && config.enable_unique_offset {
        if let Some(value) = collapse(node, input, count, index, resolver)? {
            return Ok(value);
        }
    }
    if count > resolver.unroll_limit() {
        return Err(UnsupportedError::RequiresIsolation {
            node: node.describe(),
            count,
        }
        .into());
    }
    unroll(spec, input, count, index, resolver)
}

/// `initial` folded with every step written out.
pub(crate) fn unroll(
    spec: &AggregateSpec,
    input: &Node,
    count: usize,
    index: &Expr,
    resolver: &mut dyn ValueResolver,
) -> Result<Expr> {
    let options = resolver.config().simplify_options();
    let base = index.clone() * Expr::int(count as i64);
    let mut acc = spec.initial.clone();
    for step in 0..count {
        let position = (base.clone() + Expr::int(step as i64)).simplify_with(options);
        let item = resolver.value(input, &position)?;
        acc = spec.apply_step(&acc, &item).simplify_with(options);
    }
    Ok(acc)
}

/// Replaces an additive loop by a single read at the only step that can be
/// non-zero, if there provably is one.
pub(crate) fn collapse(
    node: &Node,
    input: &Node,
    count: usize,
    index: &Expr,
    resolver: &mut dyn ValueResolver,
) -> Result<Option<Expr>> {
    let config = resolver.config().clone();
    let options = config.simplify_options();
    let rows = node.total_size();
    let savepoint = resolver.savepoint();
    let row = resolver.fresh_index("row", rows);
    let local = resolver.fresh_index("local", count);
    let position = (row.expr() * Expr::int(count as i64) + local.expr()).simplify_with(options);
    let term = resolver.value(input, &position)?.simplify_with(options);

    let Some(offset) = offset::unique_nonzero_offset(&term, &row, &local, rows, count, &config)
    else {
        debug!(node = %node.describe(), count, "unique offset not found");
        resolver.rewind(savepoint);
        return Ok(None);
    };
    debug!(node = %node.describe(), count, offset = %offset, "collapsed aggregate");
    let value = Expr::conditional(
        offset
            .clone()
            .within(Expr::int(0), Expr::int(count as i64)),
        term.substitute_index(&local.name, &offset),
        Expr::double(0.0),
    );
    Ok(Some(
        value
            .substitute_index(&row.name, index)
            .simplify_with(options),
    ))
}
