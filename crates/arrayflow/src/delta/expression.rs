//! Value rule of the generic [`NodeKind::Delta`](crate::graph::NodeKind::Delta) node.

use tracing::warn;

use crate::config::CompileConfig;
use crate::error::{Result, UnsupportedError};
use crate::expr::{ArrayId, DeltaTarget, Expr, Index};
use crate::graph::{Node, Savepoint, ValueResolver};

/// Element `k` of `delta(f, x)`: the function is inlined at `k / |T|` down
/// to reads of `x`, then differentiated by `x[k % |T|]`.
pub(crate) fn delta_value(
    node: &Node,
    index: &Expr,
    resolver: &mut dyn ValueResolver,
) -> Result<Expr> {
    let function = &node.inputs()[0];
    let target = &node.inputs()[1];
    let width = Expr::int(target.total_size() as i64);
    let row = Expr::quotient(index.clone(), width.clone());
    let column = Expr::modulo(index.clone(), width);
    if function.matches(target) {
        return Ok(Expr::conditional(
            row.equals(column),
            Expr::double(1.0),
            Expr::double(0.0),
        ));
    }

    let options = resolver.config().simplify_options();
    let array = resolver.bind_array(target)?;
    let mut inlining = InliningResolver {
        parent: resolver,
        target,
        array,
    };
    let value = inlining.value(function, &row)?.simplify_with(options);
    let with_respect_to = DeltaTarget::new(array, column);
    match value.delta(&with_respect_to) {
        Ok(derivative) => Ok(derivative),
        Err(UnsupportedError::NaryProductDelta { arity }) => {
            warn!(
                node = %function.describe(),
                arity,
                "n-ary product in delta, differentiating binarized products"
            );
            Ok(value.binarize_products().delta(&with_respect_to)?)
        }
        Err(err) => Err(err.into()),
    }
}

/// Inlines every node that depends on the target so the target's reads are
/// visible to the expression derivative. Everything else is delegated.
struct InliningResolver<'a> {
    parent: &'a mut dyn ValueResolver,
    target: &'a Node,
    array: ArrayId,
}

impl ValueResolver for InliningResolver<'_> {
    fn config(&self) -> &CompileConfig {
        self.parent.config()
    }

    fn value(&mut self, node: &Node, index: &Expr) -> Result<Expr> {
        if node.matches(self.target) {
            return Ok(Expr::element(self.array, index.clone()));
        }
        if node.is_source() || !node.depends_on(self.target) {
            return self.parent.value(node, index);
        }
        node.value_at(index, self)
    }

    fn bind_array(&mut self, node: &Node) -> Result<ArrayId> {
        if node.depends_on(self.target) {
            return Err(UnsupportedError::unresolvable(
                node.describe(),
                "cannot realize a node that depends on the differentiation target",
            )
            .into());
        }
        self.parent.bind_array(node)
    }

    fn unroll_limit(&self) -> usize {
        self.config().max_unroll
    }

    fn fresh_index(&mut self, prefix: &str, limit: usize) -> Index {
        self.parent.fresh_index(prefix, limit)
    }

    fn savepoint(&self) -> Savepoint {
        self.parent.savepoint()
    }

    fn rewind(&mut self, savepoint: Savepoint) {
        self.parent.rewind(savepoint);
    }
}
