//! Node constructors.
//!
//! Every constructor validates shapes eagerly and returns the new node; no
//! constructor mutates an existing node.

use std::sync::Arc;

use crate::config::CompileConfig;
use crate::error::{Result, ShapeError, UnsupportedError};
use crate::memory::Collection;
use crate::repeated::{AggregateSpec, Count, Reduction};
use crate::shape::TraversalPolicy;

use super::{direct, Comparison, ElementwiseOp, Node, NodeKind, Projection};

impl Node {
    /// External input bound to `inputs[position]` at evaluation time.
    pub fn argument(position: usize, shape: TraversalPolicy) -> Node {
        Node::build(
            NodeKind::Argument {
                position,
                fixed_count: true,
            },
            shape,
            Vec::new(),
        )
    }

    /// External input whose element count is only known once it is bound.
    /// `shape` describes one realization and is used for item sizes.
    pub fn variable_argument(position: usize, shape: TraversalPolicy) -> Node {
        Node::build(
            NodeKind::Argument {
                position,
                fixed_count: false,
            },
            shape,
            Vec::new(),
        )
    }

    pub fn from_values(shape: TraversalPolicy, values: Vec<f64>) -> Result<Node> {
        if values.len() != shape.total_size() {
            return Err(ShapeError::Incompatible {
                expected: shape.to_string(),
                actual: format!("({})", values.len()),
                reason: "data length must equal the shape's total size".to_string(),
            }
            .into());
        }
        Ok(Node::build(
            NodeKind::Data {
                values: Arc::from(values),
            },
            shape,
            Vec::new(),
        ))
    }

    pub fn constant(shape: TraversalPolicy, value: f64) -> Node {
        Node::build(NodeKind::Constant { value }, shape, Vec::new())
    }

    pub fn zeros(shape: TraversalPolicy) -> Node {
        Node::constant(shape, 0.0)
    }

    pub fn epsilon(shape: TraversalPolicy) -> Node {
        Node::constant(shape, f64::EPSILON)
    }

    /// Identity over `shape`, shaped `shape ++ shape`.
    pub fn identity(shape: &TraversalPolicy) -> Result<Node> {
        Ok(Node::build(
            NodeKind::Identity {
                size: shape.total_size(),
            },
            shape.append(shape)?,
            Vec::new(),
        ))
    }

    pub fn arithmetic_sequence(shape: TraversalPolicy, initial: f64, rate: f64) -> Node {
        Node::build(
            NodeKind::ArithmeticSequence {
                initial,
                rate,
                fixed_count: true,
            },
            shape,
            Vec::new(),
        )
    }

    /// Sequence whose length follows the kernel's realized output.
    pub fn variable_sequence(shape: TraversalPolicy, initial: f64, rate: f64) -> Node {
        Node::build(
            NodeKind::ArithmeticSequence {
                initial,
                rate,
                fixed_count: false,
            },
            shape,
            Vec::new(),
        )
    }

    /// Multiplies every element by `factor`. Generators fold the factor into
    /// their parameters.
    pub fn scale(&self, factor: f64) -> Result<Node> {
        match self.kind() {
            NodeKind::ArithmeticSequence {
                initial,
                rate,
                fixed_count,
            } => Ok(Node::build(
                NodeKind::ArithmeticSequence {
                    initial: initial * factor,
                    rate: rate * factor,
                    fixed_count: *fixed_count,
                },
                self.shape().clone(),
                Vec::new(),
            )),
            NodeKind::Constant { value } => Ok(Node::constant(self.shape().clone(), value * factor)),
            _ => self.multiply(&Node::constant(TraversalPolicy::new(vec![1]), factor)),
        }
    }

    pub fn add(&self, other: &Node) -> Result<Node> {
        elementwise(ElementwiseOp::Add, vec![self.clone(), other.clone()])
    }

    pub fn add_all(inputs: Vec<Node>) -> Result<Node> {
        elementwise(ElementwiseOp::Add, inputs)
    }

    pub fn subtract(&self, other: &Node) -> Result<Node> {
        elementwise(ElementwiseOp::Subtract, vec![self.clone(), other.clone()])
    }

    pub fn multiply(&self, other: &Node) -> Result<Node> {
        elementwise(ElementwiseOp::Multiply, vec![self.clone(), other.clone()])
    }

    pub fn multiply_all(inputs: Vec<Node>) -> Result<Node> {
        elementwise(ElementwiseOp::Multiply, inputs)
    }

    pub fn divide(&self, other: &Node) -> Result<Node> {
        elementwise(ElementwiseOp::Divide, vec![self.clone(), other.clone()])
    }

    pub fn minus(&self) -> Result<Node> {
        elementwise(ElementwiseOp::Negate, vec![self.clone()])
    }

    pub fn exp(&self) -> Result<Node> {
        elementwise(ElementwiseOp::Exp, vec![self.clone()])
    }

    pub fn log(&self) -> Result<Node> {
        elementwise(ElementwiseOp::Log, vec![self.clone()])
    }

    pub fn sqrt(&self) -> Result<Node> {
        elementwise(ElementwiseOp::Sqrt, vec![self.clone()])
    }

    pub fn abs(&self) -> Result<Node> {
        elementwise(ElementwiseOp::Abs, vec![self.clone()])
    }

    pub fn minimum(&self, other: &Node) -> Result<Node> {
        elementwise(ElementwiseOp::Minimum, vec![self.clone(), other.clone()])
    }

    pub fn maximum(&self, other: &Node) -> Result<Node> {
        elementwise(ElementwiseOp::Maximum, vec![self.clone(), other.clone()])
    }

    /// `self > other ? positive : negative` (or `>=` when `inclusive`).
    pub fn greater_than(
        &self,
        other: &Node,
        positive: &Node,
        negative: &Node,
        inclusive: bool,
    ) -> Result<Node> {
        self.choose(Comparison::GreaterThan { inclusive }, other, positive, negative)
    }

    /// `self < other ? positive : negative` (or `<=` when `inclusive`).
    pub fn less_than(
        &self,
        other: &Node,
        positive: &Node,
        negative: &Node,
        inclusive: bool,
    ) -> Result<Node> {
        self.choose(Comparison::LessThan { inclusive }, other, positive, negative)
    }

    pub fn equals(&self, other: &Node, positive: &Node, negative: &Node) -> Result<Node> {
        self.choose(Comparison::Equal, other, positive, negative)
    }

    /// `positive` where both operands are non-zero, `negative` elsewhere.
    pub fn and(&self, other: &Node, positive: &Node, negative: &Node) -> Result<Node> {
        self.choose(Comparison::And, other, positive, negative)
    }

    fn choose(
        &self,
        comparison: Comparison,
        other: &Node,
        positive: &Node,
        negative: &Node,
    ) -> Result<Node> {
        select(
            comparison,
            vec![self.clone(), other.clone(), positive.clone(), negative.clone()],
        )
    }

    /// Output axis `k` walks input axis `order[k]`.
    pub fn permute(&self, order: &[usize]) -> Result<Node> {
        let shape = self.shape().permute(order)?;
        Ok(self.project(
            Projection::Permute {
                order: order.to_vec(),
            },
            shape,
        ))
    }

    /// Reverses the axis order.
    pub fn transpose(&self) -> Result<Node> {
        let order: Vec<usize> = (0..self.shape().rank()).rev().collect();
        self.permute(&order)
    }

    /// Window of `shape` starting at `offsets`.
    pub fn subset(&self, shape: TraversalPolicy, offsets: &[usize]) -> Result<Node> {
        self.shape().validate_subset(&shape, offsets)?;
        Ok(self.project(
            Projection::Subset {
                offsets: offsets.to_vec(),
            },
            shape,
        ))
    }

    /// Places this node into a zero-filled `canvas` at `offsets`.
    pub fn pad(&self, canvas: TraversalPolicy, offsets: &[usize]) -> Result<Node> {
        canvas.validate_subset(self.shape(), offsets)?;
        Ok(self.project(
            Projection::Pad {
                offsets: offsets.to_vec(),
            },
            canvas,
        ))
    }

    /// Pads every axis by `depths[axis]` zeros on both sides.
    pub fn pad_axes(&self, depths: &[usize]) -> Result<Node> {
        if depths.len() != self.shape().rank() {
            return Err(ShapeError::RankMismatch {
                expected: self.shape().rank(),
                actual: depths.len(),
            }
            .into());
        }
        let dims: Vec<usize> = self
            .shape()
            .dims()
            .iter()
            .zip(depths)
            .map(|(&dim, &depth)| dim + 2 * depth)
            .collect();
        let canvas = TraversalPolicy::try_new(dims)?.traverse(self.shape().traversal_axis());
        self.pad(canvas, depths)
    }

    /// `n` copies of this node stacked along a new leading axis.
    pub fn repeat(&self, n: usize) -> Result<Node> {
        Ok(self.project(Projection::Tile, self.shape().prepend_dimension(n)?))
    }

    /// Cyclic repetition filling `shape`, whose size must be a multiple of
    /// this node's.
    pub fn broadcast_to(&self, shape: &TraversalPolicy) -> Result<Node> {
        let own = self.total_size();
        let total = shape.total_size();
        if own == total {
            return self.reshape(shape);
        }
        if own == 0 || total % own != 0 {
            return Err(ShapeError::Incompatible {
                expected: shape.to_string(),
                actual: self.shape().to_string(),
                reason: "broadcast target must be a multiple of the input".to_string(),
            }
            .into());
        }
        Ok(self.project(Projection::Tile, shape.clone()))
    }

    /// Repeats every element over `extra`, shaped `S ++ extra`.
    pub fn expand(&self, extra: &TraversalPolicy) -> Result<Node> {
        Ok(self.project(
            Projection::Expand {
                inner: extra.total_size(),
            },
            self.shape().append(extra)?,
        ))
    }

    pub(crate) fn project(&self, projection: Projection, shape: TraversalPolicy) -> Node {
        Node::build(NodeKind::Projection(projection), shape, vec![self.clone()])
    }

    /// Aggregate producing `shape` from this node; row `r` folds input
    /// elements `r * count .. (r + 1) * count`.
    pub fn aggregate(&self, shape: TraversalPolicy, spec: AggregateSpec) -> Result<Node> {
        if let Count::Fixed(count) = spec.count {
            let expected = shape.total_size().checked_mul(count);
            if expected != Some(self.total_size()) {
                return Err(ShapeError::Incompatible {
                    expected: format!("{shape} x {count}"),
                    actual: self.shape().to_string(),
                    reason: "aggregate input must hold count elements per output".to_string(),
                }
                .into());
            }
        }
        Ok(Node::build(NodeKind::Aggregate(spec), shape, vec![self.clone()]))
    }

    /// Reduces each item (the extents from the traversal axis) to one value.
    pub fn reduce(&self, reduction: Reduction) -> Result<Node> {
        let shape = self.shape().replace(&TraversalPolicy::new(vec![1]));
        let count = if self.is_fixed_count() {
            Count::Fixed(self.shape().size())
        } else {
            Count::Dynamic
        };
        self.aggregate(shape, AggregateSpec::reduction(reduction, count))
    }

    pub fn sum(&self) -> Result<Node> {
        self.reduce(Reduction::Sum)
    }

    pub fn max(&self) -> Result<Node> {
        self.reduce(Reduction::Max)
    }

    pub fn min(&self) -> Result<Node> {
        self.reduce(Reduction::Min)
    }

    pub fn product(&self) -> Result<Node> {
        self.reduce(Reduction::Product)
    }

    /// Sums along `axis`, dropping it from the shape.
    pub fn sum_axis(&self, axis: usize) -> Result<Node> {
        let rank = self.shape().rank();
        if axis >= rank {
            return Err(ShapeError::AxisOutOfRange { axis, rank }.into());
        }
        let mut order: Vec<usize> = (0..rank).filter(|&a| a != axis).collect();
        order.push(axis);
        let moved = if axis + 1 == rank {
            self.clone()
        } else {
            self.permute(&order)?
        };
        let summed = moved.traverse(rank - 1).sum()?;
        let mut dims: Vec<usize> = order[..rank - 1]
            .iter()
            .map(|&a| self.shape().length(a))
            .collect();
        if dims.is_empty() {
            dims.push(1);
        }
        summed.reshape(&TraversalPolicy::try_new(dims)?)
    }

    /// Derivative of this node with respect to `target`, shaped `S ++ T`.
    pub fn delta(&self, target: &Node) -> Result<Node> {
        self.delta_with(target, &CompileConfig::default())
    }

    pub fn delta_with(&self, target: &Node, config: &CompileConfig) -> Result<Node> {
        crate::delta::delta(self, target, config)
    }

    /// Eagerly evaluates this node on the host without compiling a kernel.
    pub fn evaluate_direct(&self, inputs: &[Collection]) -> Result<Collection> {
        direct::evaluate(self, inputs, &CompileConfig::default())
    }
}

/// Output shape of a broadcasting node: the largest input, first on ties.
fn broadcast_shape(inputs: &[Node], operation: &str) -> Result<TraversalPolicy> {
    let Some(widest) = inputs
        .iter()
        .reduce(|best, next| {
            if next.total_size() > best.total_size() {
                next
            } else {
                best
            }
        })
    else {
        return Err(UnsupportedError::operation(operation, "no inputs").into());
    };
    let shape = widest.shape().clone();
    let total = shape.total_size();
    for input in inputs {
        let own = input.total_size();
        let fits = if input.is_fixed_count() {
            own == 1 || (own != 0 && total % own == 0)
        } else {
            own == total
        };
        if !fits {
            return Err(ShapeError::Incompatible {
                expected: shape.to_string(),
                actual: input.shape().to_string(),
                reason: format!("{operation} input does not broadcast"),
            }
            .into());
        }
    }
    Ok(shape)
}

pub(crate) fn elementwise(op: ElementwiseOp, inputs: Vec<Node>) -> Result<Node> {
    match op.arity() {
        Some(arity) if inputs.len() != arity => {
            return Err(UnsupportedError::operation(
                op.name(),
                format!("expected {arity} inputs, found {}", inputs.len()),
            )
            .into());
        }
        _ => {}
    }
    let shape = broadcast_shape(&inputs, op.name())?;
    if let Some(folded) = fold_zeros(op, &inputs, &shape)? {
        return Ok(folded);
    }
    Ok(Node::build(NodeKind::Elementwise(op), shape, inputs))
}

/// Graph-level identities involving constant zero inputs.
fn fold_zeros(op: ElementwiseOp, inputs: &[Node], shape: &TraversalPolicy) -> Result<Option<Node>> {
    let total = shape.total_size();
    let same_size = |node: &Node| node.is_fixed_count() && node.total_size() == total;
    Ok(match op {
        ElementwiseOp::Add => {
            let kept: Vec<&Node> = inputs.iter().filter(|input| !input.is_zero()).collect();
            match kept.as_slice() {
                [] => Some(Node::zeros(shape.clone())),
                [only] if same_size(*only) => Some(only.reshape(shape)?),
                _ if kept.len() < inputs.len() && kept.len() > 1 => {
                    let kept: Vec<Node> = kept.into_iter().cloned().collect();
                    if kept.iter().any(same_size) {
                        Some(elementwise(op, kept)?)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        // `0 * inf` is NaN, so only generator operands can be absorbed
        ElementwiseOp::Multiply
            if inputs.iter().any(Node::is_zero) && inputs.iter().all(Node::has_finite_values) =>
        {
            Some(Node::zeros(shape.clone()))
        }
        ElementwiseOp::Subtract if inputs[1].is_zero() && same_size(&inputs[0]) => {
            Some(inputs[0].reshape(shape)?)
        }
        ElementwiseOp::Negate if inputs[0].is_zero() => Some(Node::zeros(shape.clone())),
        _ => None,
    })
}

pub(crate) fn select(comparison: Comparison, inputs: Vec<Node>) -> Result<Node> {
    if inputs.len() != 4 {
        return Err(UnsupportedError::operation(
            "select",
            format!("expected 4 inputs, found {}", inputs.len()),
        )
        .into());
    }
    let shape = broadcast_shape(&inputs, "select")?;
    if inputs[2].is_zero() && inputs[3].is_zero() {
        return Ok(Node::zeros(shape));
    }
    Ok(Node::build(NodeKind::Select(comparison), shape, inputs))
}
