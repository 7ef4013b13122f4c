//! Graph-level differentiation.
//!
//! `delta(f, x)` builds a node shaped `S ++ T` (with `S` the shape of `f` and
//! `T` the shape of `x`) whose element `(s, t)` is `d f[s] / d x[t]`.
//! Strategies are tried in order: structural shortcuts, the transitive path
//! for nodes that are linear in their dependent inputs, the closed-form
//! chain rule for a few non-linear kinds, and finally the generic
//! [`NodeKind::Delta`] node, which differentiates the inlined value rule.

pub(crate) mod expression;

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::{CompileConfig, DeltaStrategy};
use crate::error::{Result, UnsupportedError};
use crate::graph::{ElementwiseOp, Node, NodeId, NodeKind, Projection};
use crate::repeated::Count;
use crate::shape::TraversalPolicy;

pub fn delta(node: &Node, target: &Node, config: &CompileConfig) -> Result<Node> {
    let output = node.shape().append(target.shape())?;
    if node.matches(target) {
        let identity = Node::identity(&target.shape().flatten())?;
        return identity.reshape(&output);
    }
    if !node.depends_on(target) {
        return Ok(Node::zeros(output));
    }
    if let Some((consumer, input)) = variable_count_use(node, target, &mut HashSet::new()) {
        return Err(UnsupportedError::VariableCountDelta {
            node: consumer.describe(),
            input,
        }
        .into());
    }
    if config.enable_transitive_delta {
        if let Some(result) = transitive(node, target, config)? {
            return result.reshape(&output);
        }
    }
    if config.delta_strategy == DeltaStrategy::ClosedForm {
        if let Some(result) = closed_form(node, target, config)? {
            return result.reshape(&output);
        }
        warn!(
            node = %node.describe(),
            target = %target.describe(),
            "no closed-form delta, falling back to the generic delta"
        );
    } else {
        debug!(node = %node.describe(), target = %target.describe(), "generic delta");
    }
    Ok(Node::build(
        NodeKind::Delta,
        output,
        vec![node.clone(), target.clone()],
    ))
}

/// First consumer on a path from `node` to `target` whose element count
/// depends on realized data, with the position of the offending input.
fn variable_count_use(
    node: &Node,
    target: &Node,
    visited: &mut HashSet<NodeId>,
) -> Option<(Node, usize)> {
    if node.matches(target) || !visited.insert(node.id()) {
        return None;
    }
    if let NodeKind::Aggregate(spec) = node.kind() {
        if spec.count == Count::Dynamic {
            return Some((node.clone(), 0));
        }
    }
    for (position, input) in node.inputs().iter().enumerate() {
        if !input.depends_on(target) {
            continue;
        }
        if !input.is_fixed_count() {
            return Some((node.clone(), position));
        }
        if let Some(found) = variable_count_use(input, target, visited) {
            return Some(found);
        }
    }
    None
}

/// Inputs through which the derivative passes linearly, or `None` when the
/// node is not linear in its dependent inputs.
fn transitive_inputs(node: &Node, target: &Node) -> Option<Vec<usize>> {
    let dependent: Vec<usize> = node
        .inputs()
        .iter()
        .enumerate()
        .filter(|(_, input)| input.depends_on(target))
        .map(|(position, _)| position)
        .collect();
    match node.kind() {
        NodeKind::Elementwise(
            ElementwiseOp::Add | ElementwiseOp::Subtract | ElementwiseOp::Negate,
        ) => Some((0..node.inputs().len()).collect()),
        NodeKind::Elementwise(ElementwiseOp::Multiply) if dependent.len() == 1 => Some(dependent),
        NodeKind::Elementwise(ElementwiseOp::Divide) if dependent == [0] => Some(dependent),
        NodeKind::Select(_) => Some(vec![2, 3]),
        NodeKind::Projection(_) => Some(vec![0]),
        NodeKind::Aggregate(spec) if spec.is_additive() && matches!(spec.count, Count::Fixed(_)) => {
            Some(vec![0])
        }
        _ => None,
    }
}

fn transitive(node: &Node, target: &Node, config: &CompileConfig) -> Result<Option<Node>> {
    let Some(positions) = transitive_inputs(node, target) else {
        return Ok(None);
    };
    let shape = node.shape();
    let trailing = target.shape();
    let mut deltas = Vec::with_capacity(positions.len());
    for &position in &positions {
        deltas.push(input_delta(node, position, target, config)?);
    }

    let rebuilt = match node.kind() {
        NodeKind::Projection(projection) => {
            let input = &node.inputs()[0];
            let derivative = &deltas[0];
            if derivative.is_zero() {
                return Ok(Some(Node::zeros(shape.append(trailing)?)));
            }
            derivative.project(
                projection.lift(shape, input.shape(), trailing.total_size()),
                shape.append(trailing)?,
            )
        }
        NodeKind::Aggregate(spec) => {
            let Count::Fixed(count) = spec.count else {
                return Ok(None);
            };
            let rows = shape.total_size();
            let width = trailing.total_size();
            deltas[0]
                .reshape(&TraversalPolicy::try_new(vec![rows, count, width])?)?
                .permute(&[0, 2, 1])?
                .aggregate(
                    TraversalPolicy::try_new(vec![rows * width])?,
                    spec.clone(),
                )?
        }
        _ => {
            let mut children = Vec::with_capacity(node.inputs().len());
            for (position, input) in node.inputs().iter().enumerate() {
                let child = match positions.iter().position(|&p| p == position) {
                    Some(slot) => lift(&deltas[slot], input, shape, trailing)?,
                    None => expand_over(input, shape, trailing)?,
                };
                children.push(child);
            }
            node.generate(children)?
        }
    };
    Ok(Some(rebuilt))
}

fn input_delta(
    node: &Node,
    position: usize,
    target: &Node,
    config: &CompileConfig,
) -> Result<Node> {
    let input = &node.inputs()[position];
    if !input.depends_on(target) {
        return Ok(Node::zeros(input.shape().append(target.shape())?));
    }
    if !input.is_fixed_count() {
        return Err(UnsupportedError::VariableCountDelta {
            node: node.describe(),
            input: position,
        }
        .into());
    }
    delta(input, target, config)
}

/// Derivative of a broadcast input carried to the consumer's `S ++ T`.
fn lift(
    derivative: &Node,
    input: &Node,
    shape: &TraversalPolicy,
    trailing: &TraversalPolicy,
) -> Result<Node> {
    let output = shape.append(trailing)?;
    if derivative.is_zero() {
        return Ok(Node::zeros(output));
    }
    if input.total_size() == shape.total_size() {
        return derivative.reshape(&output);
    }
    Ok(derivative.project(
        Projection::Tile.lift(shape, input.shape(), trailing.total_size()),
        output,
    ))
}

/// Value of `input` broadcast to `shape`, repeated over the target elements.
fn expand_over(input: &Node, shape: &TraversalPolicy, trailing: &TraversalPolicy) -> Result<Node> {
    input.broadcast_to(shape)?.expand(trailing)
}

fn closed_form(node: &Node, target: &Node, config: &CompileConfig) -> Result<Option<Node>> {
    let NodeKind::Elementwise(op) = node.kind() else {
        return Ok(None);
    };
    let shape = node.shape();
    let trailing = target.shape();
    let inputs = node.inputs();
    let derivative = |position: usize| -> Result<Node> {
        let d = input_delta(node, position, target, config)?;
        lift(&d, &inputs[position], shape, trailing)
    };
    let expanded = |value: &Node| expand_over(value, shape, trailing);

    let result = match op {
        ElementwiseOp::Multiply => {
            let dependent: Vec<usize> = (0..inputs.len())
                .filter(|&i| inputs[i].depends_on(target))
                .collect();
            if dependent.len() > 2 {
                warn!(
                    node = %node.describe(),
                    arity = dependent.len(),
                    "product rule supports two dependent factors, using the generic delta"
                );
                return Ok(None);
            }
            let mut terms = Vec::with_capacity(dependent.len());
            for &i in &dependent {
                let others: Vec<Node> = inputs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, input)| input.clone())
                    .collect();
                let rest = match others.len() {
                    0 => Node::constant(TraversalPolicy::new(vec![1]), 1.0),
                    1 => others[0].clone(),
                    _ => Node::multiply_all(others)?,
                };
                terms.push(expanded(&rest)?.multiply(&derivative(i)?)?);
            }
            Node::add_all(terms)?
        }
        ElementwiseOp::Divide => {
            let (u, v) = (&inputs[0], &inputs[1]);
            if !v.depends_on(target) {
                return Ok(Some(derivative(0)?.divide(&expanded(v)?)?));
            }
            let cross = expanded(u)?.multiply(&derivative(1)?)?;
            let numerator = if u.depends_on(target) {
                derivative(0)?.multiply(&expanded(v)?)?.subtract(&cross)?
            } else {
                cross.minus()?
            };
            numerator.divide(&expanded(&v.multiply(v)?)?)?
        }
        ElementwiseOp::Exp => expanded(node)?.multiply(&derivative(0)?)?,
        ElementwiseOp::Log => derivative(0)?.divide(&expanded(&inputs[0])?)?,
        ElementwiseOp::Sqrt => derivative(0)?.divide(&expanded(&node.scale(2.0)?)?)?,
        _ => return Ok(None),
    };
    Ok(Some(result))
}
