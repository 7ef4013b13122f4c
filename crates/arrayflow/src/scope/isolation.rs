use std::fmt;

use crate::config::CompileConfig;
use crate::graph::{Node, NodeKind};
use crate::repeated::Count;

/// Why a node was compiled into its own scope instead of being inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationReason {
    Explicit,
    KernelSize { elements: usize },
    DynamicCount,
    /// Aggregate loop too long to unroll and not collapsible.
    LoopCount,
    ExpressionSize { nodes: usize },
}

impl fmt::Display for IsolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationReason::Explicit => f.write_str("explicit request"),
            IsolationReason::KernelSize { elements } => {
                write!(f, "{elements} elements exceed the kernel size limit")
            }
            IsolationReason::DynamicCount => f.write_str("dynamic loop count"),
            IsolationReason::LoopCount => f.write_str("loop count above the unroll threshold"),
            IsolationReason::ExpressionSize { nodes } => {
                write!(f, "inlined expression of {nodes} nodes")
            }
        }
    }
}

/// Reasons known before attempting to inline `node`.
pub(crate) fn isolation_reason(node: &Node, config: &CompileConfig) -> Option<IsolationReason> {
    if node.is_isolated() {
        return Some(IsolationReason::Explicit);
    }
    if node.total_size() > config.max_kernel_elements {
        return Some(IsolationReason::KernelSize {
            elements: node.total_size(),
        });
    }
    match node.kind() {
        NodeKind::Aggregate(spec) if spec.count == Count::Dynamic => {
            Some(IsolationReason::DynamicCount)
        }
        _ => None,
    }
}
