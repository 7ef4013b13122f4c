use std::collections::HashMap;

use tracing::debug;

use crate::config::CompileConfig;
use crate::error::{Error, Result, UnsupportedError};
use crate::expr::{ArrayId, Expr, ExprKind, Index};
use crate::graph::{Node, NodeId, NodeKind, Savepoint, ValueResolver};
use crate::repeated::{self, AggregateSpec, Count, ACCUMULATOR};
use crate::shape::TraversalPolicy;

use super::isolation::{isolation_reason, IsolationReason};
use super::{ArrayBinding, ArrayRole, Extent, KernelProgram, Scope, Statement, Target};

/// Compiles `node` into a kernel program whose output array is id 0.
pub fn compile(node: &Node, config: &CompileConfig) -> Result<KernelProgram> {
    let mut compiler = Compiler::new(config);
    let fixed_count = node.is_fixed_count();
    let output = compiler.allocate(ArrayRole::Output, node.shape().clone(), fixed_count);
    let extent = if fixed_count {
        Extent::Fixed(node.shape().count())
    } else {
        let source = variable_source(node).ok_or_else(|| {
            UnsupportedError::unresolvable(
                node.describe(),
                "no variable-count argument determines the output length",
            )
        })?;
        Extent::Dynamic {
            array: compiler.bind_array(&source)?,
            divisor: node.shape().size(),
        }
    };
    let mut entry = compiler
        .root_scope(node, output, extent, "kernel".to_string())
        .map_err(|err| at_root(node, err))?;
    entry.required = std::mem::take(&mut compiler.required);
    debug!(
        node = %node.describe(),
        scopes = entry.required.len() + 1,
        arrays = compiler.arrays.len(),
        "compiled kernel program"
    );
    Ok(KernelProgram {
        name: format!("kernel_{:016x}", node.signature()),
        entry,
        arrays: compiler.arrays,
        output_shape: node.shape().clone(),
        fixed_count,
    })
}

/// A scope root cannot be isolated any further.
fn at_root(node: &Node, err: Error) -> Error {
    if err.requires_isolation() {
        UnsupportedError::unresolvable(node.describe(), err.to_string()).into()
    } else {
        err
    }
}

/// First variable-count argument `node` reads.
fn variable_source(node: &Node) -> Option<Node> {
    match node.kind() {
        NodeKind::Argument {
            fixed_count: false, ..
        } => Some(node.clone()),
        _ => node.inputs().iter().find_map(variable_source),
    }
}

struct Compiler<'a> {
    config: &'a CompileConfig,
    arrays: Vec<ArrayBinding>,
    /// Realized non-argument nodes.
    bound: HashMap<NodeId, ArrayId>,
    /// Argument arrays by position.
    sources: HashMap<usize, ArrayId>,
    required: Vec<Scope>,
    next_name: usize,
}

impl<'a> Compiler<'a> {
    fn new(config: &'a CompileConfig) -> Self {
        Self {
            config,
            arrays: Vec::new(),
            bound: HashMap::new(),
            sources: HashMap::new(),
            required: Vec::new(),
            next_name: 0,
        }
    }

    fn allocate(&mut self, role: ArrayRole, shape: TraversalPolicy, fixed_count: bool) -> ArrayId {
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(ArrayBinding {
            id,
            role,
            shape,
            fixed_count,
        });
        id
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        self.next_name += 1;
        format!("{prefix}{}", self.next_name)
    }

    fn isolated_value(
        &mut self,
        node: &Node,
        index: &Expr,
        reason: IsolationReason,
    ) -> Result<Expr> {
        debug!(node = %node.describe(), %reason, "isolating node");
        let array = self.isolate(node)?;
        Ok(Expr::element(array, index.clone()))
    }

    /// Compiles `node` into a required scope writing a fresh intermediate.
    fn isolate(&mut self, node: &Node) -> Result<ArrayId> {
        if let Some(id) = self.bound.get(&node.id()) {
            return Ok(*id);
        }
        if !node.is_fixed_count() {
            return Err(UnsupportedError::unresolvable(
                node.describe(),
                "variable-count intermediates cannot be isolated",
            )
            .into());
        }
        let id = self.allocate(ArrayRole::Intermediate, node.shape().clone(), true);
        let extent = Extent::Fixed(node.shape().count());
        let scope = self
            .root_scope(node, id, extent, format!("scope{}", id.0))
            .map_err(|err| at_root(node, err))?;
        self.required.push(scope);
        self.bound.insert(node.id(), id);
        Ok(id)
    }

    /// Scope writing every element of `node` into `output`: each global id
    /// covers one item of `mem` elements.
    fn root_scope(
        &mut self,
        node: &Node,
        output: ArrayId,
        extent: Extent,
        name: String,
    ) -> Result<Scope> {
        let mem = node.shape().size();
        let limit = match extent {
            Extent::Fixed(count) => Some(count),
            Extent::Dynamic { .. } => None,
        };
        let gid = Index::global(limit);
        let options = self.config.simplify_options();
        let statements = if mem == 1 {
            self.root_statements(node, output, &gid.expr())?
        } else {
            let element = self.fresh_index("j", mem);
            let position = (gid.expr() * Expr::int(mem as i64) + element.expr())
                .simplify_with(options);
            let body = self.root_statements(node, output, &position)?;
            vec![Statement::Loop {
                index: element,
                limit: Expr::int(mem as i64),
                body,
            }]
        };
        Ok(Scope::new(name, extent, mem, statements))
    }

    fn root_statements(
        &mut self,
        node: &Node,
        output: ArrayId,
        position: &Expr,
    ) -> Result<Vec<Statement>> {
        let target = Target::Element {
            array: output,
            index: position.clone(),
        };
        if let NodeKind::Aggregate(spec) = node.kind() {
            return self.aggregate_statements(node, spec, target, position);
        }
        let value = node
            .value_at(position, self)?
            .simplify_with(self.config.simplify_options());
        Ok(vec![Statement::Assign { target, value }])
    }

    /// Collapse, unroll, or emit the literal loop, in that order of
    /// preference.
    fn aggregate_statements(
        &mut self,
        node: &Node,
        spec: &AggregateSpec,
        target: Target,
        position: &Expr,
    ) -> Result<Vec<Statement>> {
        let input = &node.inputs()[0];
        match spec.count {
            Count::Fixed(count) => {
                if spec.is_additive() && spec.replace_loop && self.config.enable_unique_offset {
                    if let Some(value) = repeated::collapse(node, input, count, position, self)? {
                        return Ok(vec![Statement::Assign { target, value }]);
                    }
                }
                if count <= self.config.isolation_count_threshold {
                    let value = repeated::unroll(spec, input, count, position, self)?;
                    return Ok(vec![Statement::Assign { target, value }]);
                }
                let index = self.fresh_index("i", count);
                self.literal_loop(spec, input, index, Expr::int(count as i64), target, position)
            }
            Count::Dynamic => {
                let source = variable_source(input).ok_or_else(|| {
                    UnsupportedError::unresolvable(
                        node.describe(),
                        "dynamic count without a variable-count argument",
                    )
                })?;
                let array = self.bind_array(&source)?;
                let limit = Expr::quotient(
                    Expr::length(array),
                    Expr::int(node.total_size() as i64),
                );
                let index = Index::new(self.fresh_name("i"), None);
                self.literal_loop(spec, input, index, limit, target, position)
            }
        }
    }

    fn literal_loop(
        &mut self,
        spec: &AggregateSpec,
        input: &Node,
        index: Index,
        limit: Expr,
        target: Target,
        position: &Expr,
    ) -> Result<Vec<Statement>> {
        let options = self.config.simplify_options();
        let accumulator = self.fresh_name(ACCUMULATOR);
        let item_position =
            (position.clone() * limit.clone() + index.expr()).simplify_with(options);
        let item = self.value(input, &item_position)?;
        let step = spec
            .apply_step(&Expr::var(accumulator.clone()), &item)
            .simplify_with(options);
        Ok(vec![
            Statement::Declare {
                name: accumulator.clone(),
                kind: ExprKind::Double,
                value: spec.initial.clone(),
            },
            Statement::Loop {
                index,
                limit,
                body: vec![Statement::Assign {
                    target: Target::Var(accumulator.clone()),
                    value: step,
                }],
            },
            Statement::Assign {
                target,
                value: Expr::var(accumulator),
            },
        ])
    }
}

impl ValueResolver for Compiler<'_> {
    fn config(&self) -> &CompileConfig {
        self.config
    }

    /// Inlines `node` where possible; otherwise reads it from an isolated
    /// scope's output.
    fn value(&mut self, node: &Node, index: &Expr) -> Result<Expr> {
        if node.is_source() || self.bound.contains_key(&node.id()) {
            let array = self.bind_array(node)?;
            return Ok(Expr::element(array, index.clone()));
        }
        if let Some(reason) = isolation_reason(node, self.config) {
            return self.isolated_value(node, index, reason);
        }
        let savepoint = self.savepoint();
        match node.value_at(index, self) {
            Ok(expr) => {
                let expr = expr.simplify_with(self.config.simplify_options());
                let nodes = expr.node_count();
                if nodes <= self.config.max_expression_nodes {
                    return Ok(expr);
                }
                self.rewind(savepoint);
                self.isolated_value(node, index, IsolationReason::ExpressionSize { nodes })
            }
            Err(err) if err.requires_isolation() => {
                self.rewind(savepoint);
                self.isolated_value(node, index, IsolationReason::LoopCount)
            }
            Err(err) => Err(err),
        }
    }

    fn bind_array(&mut self, node: &Node) -> Result<ArrayId> {
        match node.kind() {
            NodeKind::Argument {
                position,
                fixed_count,
            } => {
                if let Some(id) = self.sources.get(position) {
                    return Ok(*id);
                }
                let id = self.allocate(
                    ArrayRole::Input {
                        position: *position,
                    },
                    node.shape().clone(),
                    *fixed_count,
                );
                self.sources.insert(*position, id);
                Ok(id)
            }
            NodeKind::Data { values } => {
                if let Some(id) = self.bound.get(&node.id()) {
                    return Ok(*id);
                }
                let id = self.allocate(
                    ArrayRole::Constant {
                        values: values.clone(),
                    },
                    node.shape().clone(),
                    true,
                );
                self.bound.insert(node.id(), id);
                Ok(id)
            }
            _ => self.isolate(node),
        }
    }

    fn fresh_index(&mut self, prefix: &str, limit: usize) -> Index {
        Index::bounded(self.fresh_name(prefix), limit)
    }

    fn savepoint(&self) -> Savepoint {
        Savepoint {
            arrays: self.arrays.len(),
            scopes: self.required.len(),
        }
    }

    fn rewind(&mut self, savepoint: Savepoint) {
        self.arrays.truncate(savepoint.arrays);
        self.required.truncate(savepoint.scopes);
        self.bound.retain(|_, id| id.position() < savepoint.arrays);
        self.sources.retain(|_, id| id.position() < savepoint.arrays);
    }
}
