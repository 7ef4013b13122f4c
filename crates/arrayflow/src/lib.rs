//! Lazy array computation graphs compiled into data-parallel kernels.
//!
//! Graphs are built from [`Node`] constructors, differentiated with
//! [`Node::delta`], lowered into [`KernelProgram`]s by [`scope::compile`] and
//! executed by a [`KernelBackend`] through an [`Evaluator`].

pub mod backend;
pub mod config;
pub mod delta;
mod env;
pub mod error;
pub mod evaluate;
pub mod expr;
pub mod graph;
pub mod hashing;
pub mod memory;
pub mod repeated;
pub mod scope;
pub mod shape;

pub use backend::{BackendError, BackendResult, KernelBackend, KernelTextTarget};
pub use config::{CompileConfig, DeltaStrategy};
pub use error::{Error, MemoryError, Result, ShapeError, UnsupportedError};
pub use evaluate::Evaluator;
pub use expr::{ArrayId, Expr};
pub use graph::{Comparison, ElementwiseOp, Node, NodeKind};
pub use memory::{Collection, RootBuffer};
pub use repeated::{AggregateSpec, Count, Reduction};
pub use scope::{KernelProgram, Scope};
pub use shape::TraversalPolicy;
