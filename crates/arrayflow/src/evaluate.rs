//! Kernel evaluation entry points.
//!
//! An [`Evaluator`] compiles nodes into [`KernelProgram`]s (cached by
//! structural signature and config digest), prepares the argument buffers a
//! program binds, and hands both to a [`KernelBackend`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, info};

use crate::backend::KernelBackend;
use crate::config::CompileConfig;
use crate::env::dump_scopes_enabled;
use crate::error::{Error, MemoryError, Result, UnsupportedError};
use crate::graph::Node;
use crate::hashing::Fingerprint;
use crate::memory::{ensure_same_root, Collection};
use crate::scope::{self, ArrayRole, Extent, KernelProgram};
use crate::shape::TraversalPolicy;

pub struct Evaluator<B: KernelBackend + ?Sized = dyn KernelBackend> {
    backend: Arc<B>,
    config: CompileConfig,
    cache: Mutex<LruCache<u64, Arc<KernelProgram>>>,
}

impl<B: KernelBackend + ?Sized> Evaluator<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, CompileConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: CompileConfig) -> Self {
        let capacity = NonZeroUsize::new(config.kernel_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            config,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Number of programs currently held by the kernel cache.
    pub fn cached_programs(&self) -> usize {
        self.cache.lock().expect("kernel cache lock poisoned").len()
    }

    /// Compiles `node`, reusing a cached program for structurally equal nodes.
    pub fn compile(&self, node: &Node) -> Result<Arc<KernelProgram>> {
        let key = self.cache_key(node);
        if let Some(program) = self
            .cache
            .lock()
            .expect("kernel cache lock poisoned")
            .get(&key)
        {
            debug!(program = %program.name, "kernel cache hit");
            return Ok(Arc::clone(program));
        }
        debug!(node = %node.describe(), "kernel cache miss");
        let program = Arc::new(scope::compile(node, &self.config)?);
        self.cache
            .lock()
            .expect("kernel cache lock poisoned")
            .put(key, Arc::clone(&program));
        Ok(program)
    }

    /// Evaluates `node` into a freshly allocated collection. Variable-count
    /// nodes produce a one-dimensional result sized from their inputs.
    pub fn evaluate(&self, node: &Node, inputs: &[Collection]) -> Result<Collection> {
        let program = self.compile(node)?;
        let shape = if program.fixed_count {
            program.output_shape.clone()
        } else {
            TraversalPolicy::try_new(vec![output_len(&program, inputs)?])?
        };
        let output = Collection::zeros(shape);
        self.run(&program, inputs, &output)?;
        Ok(output)
    }

    /// Evaluates `node` into the caller's `output` view.
    pub fn evaluate_into(&self, node: &Node, inputs: &[Collection], output: &Collection) -> Result<()> {
        let program = self.compile(node)?;
        self.run(&program, inputs, output)
    }

    /// Evaluates `node` once per input set, writing each result into the
    /// matching output view.
    ///
    /// The outputs must be contiguous views of one root buffer; this is
    /// checked before any kernel runs.
    pub fn evaluate_batch(
        &self,
        node: &Node,
        inputs: &[Vec<Collection>],
        outputs: &[Collection],
    ) -> Result<()> {
        if inputs.len() != outputs.len() {
            return Err(MemoryError::LengthMismatch {
                expected: outputs.len(),
                actual: inputs.len(),
            }
            .into());
        }
        ensure_same_root(outputs)?;
        for pair in outputs.windows(2) {
            let expected = pair[0].offset() + pair[0].len();
            if pair[1].offset() != expected {
                return Err(MemoryError::NonContiguous {
                    expected,
                    found: pair[1].offset(),
                }
                .into());
            }
        }
        let program = self.compile(node)?;
        for (batch, output) in inputs.iter().zip(outputs) {
            self.run(&program, batch, output)?;
        }
        Ok(())
    }

    fn run(&self, program: &KernelProgram, inputs: &[Collection], output: &Collection) -> Result<()> {
        let expected = output_len(program, inputs)?;
        if output.len() != expected {
            return Err(MemoryError::LengthMismatch {
                expected,
                actual: output.len(),
            }
            .into());
        }
        let arguments = prepare_arguments(program, inputs, output)?;
        if dump_scopes_enabled() {
            info!(backend = self.backend.backend_name(), "{}", program.summary());
        }
        self.backend.execute(program, &arguments)?;
        Ok(())
    }

    fn cache_key(&self, node: &Node) -> u64 {
        let mut hasher = Fingerprint::new();
        hasher.write_u64(node.signature());
        hasher.write_u64(self.config.digest());
        hasher.finish()
    }
}

/// Elements the program's output holds for the given inputs.
fn output_len(program: &KernelProgram, inputs: &[Collection]) -> Result<usize> {
    if program.fixed_count {
        return Ok(program.output_shape.total_size());
    }
    let length_of = |array| match program.binding(array).map(|binding| &binding.role) {
        Some(ArrayRole::Input { position }) => inputs.get(*position).map(Collection::len),
        _ => None,
    };
    let count = program.entry.extent.resolve(length_of).ok_or_else(|| {
        let position = match &program.entry.extent {
            Extent::Dynamic { array, .. } => match program.binding(*array).map(|b| &b.role) {
                Some(ArrayRole::Input { position }) => Some(*position),
                _ => None,
            },
            Extent::Fixed(_) => None,
        };
        match position {
            Some(position) => Error::from(MemoryError::MissingInput { position }),
            None => Error::from(UnsupportedError::operation(
                "evaluate",
                "dynamic extent is not bound to an input",
            )),
        }
    })?;
    Ok(count * program.entry.mem)
}

/// Buffers for every array the program binds, in array id order.
fn prepare_arguments(
    program: &KernelProgram,
    inputs: &[Collection],
    output: &Collection,
) -> Result<Vec<Collection>> {
    program
        .arrays
        .iter()
        .map(|binding| -> Result<Collection> {
            match &binding.role {
                ArrayRole::Output => Ok(output.clone()),
                ArrayRole::Input { position } => {
                    let input = inputs
                        .get(*position)
                        .ok_or(MemoryError::MissingInput { position: *position })?;
                    if binding.fixed_count && input.len() != binding.shape.total_size() {
                        return Err(MemoryError::LengthMismatch {
                            expected: binding.shape.total_size(),
                            actual: input.len(),
                        }
                        .into());
                    }
                    Ok(input.clone())
                }
                ArrayRole::Intermediate => Ok(Collection::zeros(binding.shape.clone())),
                ArrayRole::Constant { values } => {
                    Ok(Collection::from_vec(binding.shape.clone(), values.to_vec())?)
                }
            }
        })
        .collect()
}
