//! Eager host evaluation.
//!
//! Realizes every node into a host vector, one node at a time, without
//! compiling kernels. Aggregates always run their literal loop here, which
//! makes this evaluator the reference the kernel path is compared against.

use std::collections::HashMap;

use tracing::trace;

use crate::config::CompileConfig;
use crate::error::{MemoryError, Result, UnsupportedError};
use crate::expr::{ArrayId, Expr, Index, MapEnv, Scalar, GLOBAL_INDEX};
use crate::memory::Collection;
use crate::repeated::{AggregateSpec, Count, ACCUMULATOR, ITEM};
use crate::shape::TraversalPolicy;

use super::{Node, NodeId, NodeKind, ValueResolver};

/// Evaluates `node` against `inputs` (argument `i` binds `inputs[i]`).
pub fn evaluate(node: &Node, inputs: &[Collection], config: &CompileConfig) -> Result<Collection> {
    let mut resolver = DirectResolver::new(inputs, config);
    let id = resolver.bind_array(node)?;
    let values = resolver.arrays[id.position()].clone();
    let shape = if node.is_fixed_count() {
        node.shape().clone()
    } else {
        TraversalPolicy::try_new(vec![values.len()])?
    };
    Ok(Collection::from_vec(shape, values)?)
}

struct DirectResolver<'a> {
    config: &'a CompileConfig,
    inputs: &'a [Collection],
    arrays: Vec<Vec<f64>>,
    bound: HashMap<NodeId, ArrayId>,
    next_index: usize,
}

impl<'a> DirectResolver<'a> {
    fn new(inputs: &'a [Collection], config: &'a CompileConfig) -> Self {
        Self {
            config,
            inputs,
            arrays: Vec::new(),
            bound: HashMap::new(),
            next_index: 0,
        }
    }

    fn realize(&mut self, node: &Node) -> Result<Vec<f64>> {
        match node.kind() {
            NodeKind::Argument { position, .. } => self
                .inputs
                .get(*position)
                .map(Collection::to_vec)
                .ok_or_else(|| MemoryError::MissingInput { position: *position }.into()),
            NodeKind::Data { values } => Ok(values.to_vec()),
            NodeKind::Aggregate(spec) => self.run_loop(node, spec),
            _ => {
                let len = self.realized_len(node)?;
                let index = Index::global(Some(len));
                let expr = node
                    .value_at(&index.expr(), self)?
                    .simplify_with(self.config.simplify_options());
                let mut env = MapEnv::new();
                for (position, values) in self.arrays.iter().enumerate() {
                    env.bind_array(ArrayId(position as u32), values);
                }
                (0..len)
                    .map(|i| -> Result<f64> {
                        env.set_index(GLOBAL_INDEX, i as i64);
                        Ok(expr.evaluate_f64(&env)?)
                    })
                    .collect()
            }
        }
    }

    fn run_loop(&mut self, node: &Node, spec: &AggregateSpec) -> Result<Vec<f64>> {
        let id = self.bind_array(&node.inputs()[0])?;
        let input = &self.arrays[id.position()];
        let rows = node.total_size();
        let count = match spec.count {
            Count::Fixed(count) => count,
            Count::Dynamic if rows > 0 => input.len() / rows,
            Count::Dynamic => 0,
        };
        if input.len() < rows * count {
            return Err(MemoryError::LengthMismatch {
                expected: rows * count,
                actual: input.len(),
            }
            .into());
        }
        trace!(node = %node.describe(), rows, count, "direct aggregate loop");
        let mut out = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut env = MapEnv::new();
            let mut acc = spec.initial.evaluate(&env)?;
            for step in 0..count {
                env.set_variable(ACCUMULATOR, acc);
                env.set_variable(ITEM, Scalar::Double(input[row * count + step]));
                acc = spec.step.evaluate(&env)?;
            }
            out.push(acc.as_f64());
        }
        Ok(out)
    }

    /// Element count of `node` once its variable-count inputs are bound.
    fn realized_len(&mut self, node: &Node) -> Result<usize> {
        if node.is_fixed_count() {
            return Ok(node.total_size());
        }
        let mut len = None;
        for input in node.inputs() {
            if input.is_fixed_count() {
                continue;
            }
            let id = self.bind_array(input)?;
            let realized = self.arrays[id.position()].len();
            len = Some(len.map_or(realized, |current: usize| current.max(realized)));
        }
        Ok(len.unwrap_or_else(|| node.total_size()))
    }
}

impl ValueResolver for DirectResolver<'_> {
    fn config(&self) -> &CompileConfig {
        self.config
    }

    fn value(&mut self, node: &Node, index: &Expr) -> Result<Expr> {
        let array = self.bind_array(node)?;
        Ok(Expr::element(array, index.clone()))
    }

    fn bind_array(&mut self, node: &Node) -> Result<ArrayId> {
        if let Some(id) = self.bound.get(&node.id()) {
            return Ok(*id);
        }
        let values = self.realize(node)?;
        let id = ArrayId(u32::try_from(self.arrays.len()).map_err(|_| {
            UnsupportedError::operation("direct evaluation", "too many intermediate arrays")
        })?);
        self.arrays.push(values);
        self.bound.insert(node.id(), id);
        Ok(id)
    }

    fn fresh_index(&mut self, prefix: &str, limit: usize) -> Index {
        self.next_index += 1;
        Index::bounded(format!("{prefix}_{}", self.next_index), limit)
    }
}
