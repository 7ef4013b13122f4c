//! Computation graph.
//!
//! A [`Node`] is an immutable, reference-counted vertex: an output shape, a
//! list of inputs and a [`NodeKind`] that determines its value rule. Nodes only
//! ever reference inputs that already exist, so every graph is a DAG; loops are
//! expressed through [`NodeKind::Aggregate`]. Rewrites go through
//! [`Node::generate`].

pub mod direct;
mod ops;
mod projection;
mod value;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShapeError, UnsupportedError};
use crate::hashing::Fingerprint;
use crate::repeated::{AggregateSpec, Count};
use crate::shape::TraversalPolicy;

pub use projection::{Projected, Projection};
pub use value::{Savepoint, ValueResolver};

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

type SignatureKey = (NodeId, TraversalPolicy, bool);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    Exp,
    Log,
    Sqrt,
    Abs,
    Minimum,
    Maximum,
}

impl ElementwiseOp {
    /// Fixed input count, `None` for variadic sums and products.
    pub fn arity(self) -> Option<usize> {
        match self {
            ElementwiseOp::Add | ElementwiseOp::Multiply => None,
            ElementwiseOp::Subtract
            | ElementwiseOp::Divide
            | ElementwiseOp::Minimum
            | ElementwiseOp::Maximum => Some(2),
            _ => Some(1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementwiseOp::Add => "add",
            ElementwiseOp::Subtract => "subtract",
            ElementwiseOp::Multiply => "multiply",
            ElementwiseOp::Divide => "divide",
            ElementwiseOp::Negate => "negate",
            ElementwiseOp::Exp => "exp",
            ElementwiseOp::Log => "log",
            ElementwiseOp::Sqrt => "sqrt",
            ElementwiseOp::Abs => "abs",
            ElementwiseOp::Minimum => "min",
            ElementwiseOp::Maximum => "max",
        }
    }
}

/// Decision of a select node over its `[left, right]` operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    Equal,
    LessThan { inclusive: bool },
    GreaterThan { inclusive: bool },
    /// Both operands non-zero.
    And,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// External input buffer bound by position at evaluation time.
    Argument { position: usize, fixed_count: bool },
    /// Constant buffer embedded in the graph.
    Data { values: Arc<[f64]> },
    /// Every element equals `value` (zeros, epsilon, fills).
    Constant { value: f64 },
    /// `size x size` identity, flattened.
    Identity { size: usize },
    /// Element `i` is `initial + i * rate`.
    ArithmeticSequence {
        initial: f64,
        rate: f64,
        fixed_count: bool,
    },
    Elementwise(ElementwiseOp),
    /// Inputs `[left, right, positive, negative]`.
    Select(Comparison),
    Projection(Projection),
    Aggregate(AggregateSpec),
    /// Derivative of `inputs[0]` with respect to `inputs[1]`, shaped `S ++ T`.
    Delta,
}

impl NodeKind {
    pub fn name(&self) -> String {
        match self {
            NodeKind::Argument { position, .. } => format!("argument{position}"),
            NodeKind::Data { .. } => "data".to_string(),
            NodeKind::Constant { value } => format!("constant({value})"),
            NodeKind::Identity { .. } => "identity".to_string(),
            NodeKind::ArithmeticSequence { .. } => "sequence".to_string(),
            NodeKind::Elementwise(op) => op.name().to_string(),
            NodeKind::Select(comparison) => format!("select({comparison:?})"),
            NodeKind::Projection(projection) => projection.name().to_string(),
            NodeKind::Aggregate(spec) => spec.name().to_string(),
            NodeKind::Delta => "delta".to_string(),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, NodeKind::Argument { .. } | NodeKind::Data { .. })
    }
}

struct NodeData {
    id: NodeId,
    kind: NodeKind,
    shape: TraversalPolicy,
    inputs: Vec<Node>,
    isolated: bool,
}

#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeData>,
}

impl Node {
    pub(crate) fn build(kind: NodeKind, shape: TraversalPolicy, inputs: Vec<Node>) -> Node {
        Node {
            inner: Arc::new(NodeData {
                id: NodeId::next(),
                kind,
                shape,
                inputs,
                isolated: false,
            }),
        }
    }

    /// Same identity and configuration under a different shape of equal size.
    fn with_shape(&self, shape: TraversalPolicy) -> Node {
        Node {
            inner: Arc::new(NodeData {
                id: self.inner.id,
                kind: self.inner.kind.clone(),
                shape,
                inputs: self.inner.inputs.clone(),
                isolated: self.inner.isolated,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    pub fn shape(&self) -> &TraversalPolicy {
        &self.inner.shape
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inner.inputs
    }

    pub fn is_isolated(&self) -> bool {
        self.inner.isolated
    }

    pub fn total_size(&self) -> usize {
        self.inner.shape.total_size()
    }

    /// Whether the element count is known without looking at realized inputs.
    pub fn is_fixed_count(&self) -> bool {
        match &self.inner.kind {
            NodeKind::Argument { fixed_count, .. }
            | NodeKind::ArithmeticSequence { fixed_count, .. } => *fixed_count,
            NodeKind::Data { .. } | NodeKind::Constant { .. } | NodeKind::Identity { .. } => true,
            NodeKind::Aggregate(spec) if spec.count == Count::Dynamic => true,
            _ => self.inputs().iter().all(Node::is_fixed_count),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.inner.kind, NodeKind::Constant { value } if value == 0.0)
    }

    pub fn is_source(&self) -> bool {
        self.inner.kind.is_source()
    }

    /// Whether every element is known to be finite without reading an input.
    pub fn has_finite_values(&self) -> bool {
        match &self.inner.kind {
            NodeKind::Constant { value } => value.is_finite(),
            NodeKind::Identity { .. } => true,
            NodeKind::Data { values } => values.iter().all(|value| value.is_finite()),
            NodeKind::ArithmeticSequence {
                initial,
                rate,
                fixed_count: true,
            } => {
                let last = initial + rate * self.total_size().saturating_sub(1) as f64;
                initial.is_finite() && rate.is_finite() && last.is_finite()
            }
            NodeKind::Projection(_) => self.inputs().iter().all(Node::has_finite_values),
            _ => false,
        }
    }

    /// Whether `self` and `other` denote the same values: the same node, or
    /// two views of the same argument slot.
    pub fn matches(&self, other: &Node) -> bool {
        if self.id() == other.id() {
            return true;
        }
        match (self.kind(), other.kind()) {
            (
                NodeKind::Argument { position: a, .. },
                NodeKind::Argument { position: b, .. },
            ) => a == b && self.total_size() == other.total_size(),
            _ => false,
        }
    }

    pub fn depends_on(&self, target: &Node) -> bool {
        let mut visited = HashSet::new();
        self.depends_on_inner(target, &mut visited)
    }

    fn depends_on_inner(&self, target: &Node, visited: &mut HashSet<NodeId>) -> bool {
        if self.matches(target) {
            return true;
        }
        if !visited.insert(self.id()) {
            return false;
        }
        self.inputs()
            .iter()
            .any(|input| input.depends_on_inner(target, visited))
    }

    /// Rebuilds this node with `children` in place of its inputs.
    ///
    /// Kinds whose shape derives from their inputs (elementwise, select)
    /// re-derive it; the rest keep their configured shape and require
    /// children of the original sizes.
    pub fn generate(&self, children: Vec<Node>) -> Result<Node> {
        if children.len() != self.inputs().len() {
            return Err(UnsupportedError::operation(
                format!("generate {}", self.describe()),
                format!(
                    "expected {} children, found {}",
                    self.inputs().len(),
                    children.len()
                ),
            )
            .into());
        }
        if children.is_empty() {
            return Ok(self.clone());
        }
        let rebuilt = match self.kind() {
            NodeKind::Elementwise(op) => {
                let node = ops::elementwise(*op, children)?;
                self.keep_traversal(node)
            }
            NodeKind::Select(comparison) => {
                let node = ops::select(*comparison, children)?;
                self.keep_traversal(node)
            }
            kind => {
                for (child, input) in children.iter().zip(self.inputs()) {
                    if child.is_fixed_count() && child.total_size() != input.total_size() {
                        return Err(ShapeError::Incompatible {
                            expected: input.shape().to_string(),
                            actual: child.shape().to_string(),
                            reason: format!("replacement child of {}", self.describe()),
                        }
                        .into());
                    }
                }
                Node::build(kind.clone(), self.shape().clone(), children)
            }
        };
        Ok(if self.is_isolated() {
            rebuilt.isolate()
        } else {
            rebuilt
        })
    }

    fn keep_traversal(&self, node: Node) -> Node {
        if node.shape().same_extents(self.shape()) && node.shape() != self.shape() {
            node.with_shape(self.shape().clone())
        } else {
            node
        }
    }

    /// Same values under `shape`, substituting the shape where the value rule
    /// does not depend on it and wrapping in a reshape projection otherwise.
    pub fn reshape(&self, shape: &TraversalPolicy) -> Result<Node> {
        let shape = self.shape().reshape(shape)?;
        if &shape == self.shape() {
            return Ok(self.clone());
        }
        Ok(match self.kind() {
            NodeKind::Argument { .. }
            | NodeKind::Data { .. }
            | NodeKind::Constant { .. }
            | NodeKind::Identity { .. }
            | NodeKind::ArithmeticSequence { .. } => self.with_shape(shape),
            NodeKind::Projection(Projection::Reshape) => Node::build(
                NodeKind::Projection(Projection::Reshape),
                shape,
                self.inputs().to_vec(),
            ),
            _ => Node::build(
                NodeKind::Projection(Projection::Reshape),
                shape,
                vec![self.clone()],
            ),
        })
    }

    /// Same node with its traversal axis moved to `axis`.
    pub fn traverse(&self, axis: usize) -> Node {
        self.with_shape(self.shape().traverse(axis))
    }

    pub fn traverse_each(&self) -> Node {
        self.with_shape(self.shape().traverse_each())
    }

    /// Requests that this node be compiled into its own scope.
    pub fn isolate(&self) -> Node {
        Node {
            inner: Arc::new(NodeData {
                id: self.inner.id,
                kind: self.inner.kind.clone(),
                shape: self.inner.shape.clone(),
                inputs: self.inner.inputs.clone(),
                isolated: true,
            }),
        }
    }

    /// Structural hash over kinds, shapes and inputs; equal for graphs that
    /// compile to the same kernel.
    pub fn signature(&self) -> u64 {
        let mut memo = HashMap::new();
        self.signature_with(&mut memo)
    }

    fn signature_with(&self, memo: &mut HashMap<SignatureKey, u64>) -> u64 {
        let key = (self.id(), self.shape().clone(), self.is_isolated());
        if let Some(hash) = memo.get(&key) {
            return *hash;
        }
        let mut hasher = Fingerprint::new();
        hasher.write_serialized(self.kind());
        hasher.write_serialized(self.shape());
        hasher.write_u64(u64::from(self.is_isolated()));
        for input in self.inputs() {
            let child = input.signature_with(memo);
            hasher.write_u64(child);
        }
        let hash = hasher.finish();
        memo.insert(key, hash);
        hash
    }

    /// Short label such as `multiply#12(2, 3)` for logs and errors.
    pub fn describe(&self) -> String {
        format!("{}#{}{}", self.kind().name(), self.id().0, self.shape())
    }

    pub fn node_count(&self) -> usize {
        let mut visited = HashSet::new();
        self.count_unique(&mut visited)
    }

    fn count_unique(&self, visited: &mut HashSet<NodeId>) -> usize {
        if !visited.insert(self.id()) {
            return 0;
        }
        1 + self
            .inputs()
            .iter()
            .map(|input| input.count_unique(visited))
            .sum::<usize>()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.id() == other.id() && self.shape() == other.shape()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id().0)
            .field("kind", &self.kind().name())
            .field("shape", &self.shape().detail())
            .field("inputs", &self.inputs().iter().map(|n| n.id().0).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
