//! Compiler tuning knobs.
//!
//! A [`CompileConfig`] is an immutable value handed to every compiler entry
//! point; there is no process-wide mutable state. Environment overrides are
//! applied only when a caller asks for them via [`CompileConfig::from_env`].

use serde::{Deserialize, Serialize};

use crate::env::{env_flag, env_string, env_usize};
use crate::expr::SimplifyOptions;
use crate::hashing::fingerprint;

/// Default loop count at or below which aggregates are inlined into callers.
pub const DEFAULT_ISOLATION_COUNT_THRESHOLD: usize = 16;

/// How non-linear nodes are differentiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaStrategy {
    /// Product, quotient, exp, log and sqrt nodes build their derivative
    /// graph directly from the chain rule.
    ClosedForm,
    /// Every non-linear node goes through the expression-level derivative.
    Generic,
}

impl DeltaStrategy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "closed" | "closed-form" | "closed_form" => Some(DeltaStrategy::ClosedForm),
            "generic" | "expression" => Some(DeltaStrategy::Generic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Aggregates with more steps than this are isolated (or collapsed)
    /// instead of being unrolled into the caller.
    pub isolation_count_threshold: usize,
    pub enable_unique_offset: bool,
    /// Upper bound on `rows * count` evaluations the numeric offset search may spend.
    pub offset_search_limit: usize,
    pub delta_strategy: DeltaStrategy,
    pub enable_transitive_delta: bool,
    /// Largest output a single kernel invocation may address.
    pub max_kernel_elements: usize,
    /// Inlined expressions larger than this are isolated into their own scope.
    pub max_expression_nodes: usize,
    /// Unroll bound used when a derivative forces aggregates inline.
    pub max_unroll: usize,
    pub enable_index_simplification: bool,
    pub kernel_cache_capacity: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            isolation_count_threshold: DEFAULT_ISOLATION_COUNT_THRESHOLD,
            enable_unique_offset: true,
            offset_search_limit: 1 << 16,
            delta_strategy: DeltaStrategy::ClosedForm,
            enable_transitive_delta: true,
            max_kernel_elements: i32::MAX as usize,
            max_expression_nodes: 1 << 16,
            max_unroll: 4096,
            enable_index_simplification: true,
            kernel_cache_capacity: 64,
        }
    }
}

impl CompileConfig {
    /// Default configuration with `ARRAYFLOW_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_usize("ARRAYFLOW_ISOLATION_THRESHOLD") {
            self.isolation_count_threshold = value;
        }
        if let Some(value) = env_flag("ARRAYFLOW_UNIQUE_OFFSET") {
            self.enable_unique_offset = value;
        }
        if let Some(value) = env_usize("ARRAYFLOW_OFFSET_SEARCH_LIMIT") {
            self.offset_search_limit = value;
        }
        if let Some(value) = env_string("ARRAYFLOW_DELTA_STRATEGY") {
            match DeltaStrategy::parse(&value) {
                Some(strategy) => self.delta_strategy = strategy,
                None => tracing::warn!(value = %value, "unknown delta strategy override"),
            }
        }
        if let Some(value) = env_flag("ARRAYFLOW_TRANSITIVE_DELTA") {
            self.enable_transitive_delta = value;
        }
        if let Some(value) = env_usize("ARRAYFLOW_MAX_KERNEL_ELEMENTS") {
            self.max_kernel_elements = value;
        }
        if let Some(value) = env_usize("ARRAYFLOW_MAX_EXPRESSION_NODES") {
            self.max_expression_nodes = value;
        }
        if let Some(value) = env_flag("ARRAYFLOW_INDEX_SIMPLIFICATION") {
            self.enable_index_simplification = value;
        }
        self
    }

    pub fn with_isolation_count_threshold(mut self, threshold: usize) -> Self {
        self.isolation_count_threshold = threshold;
        self
    }

    pub fn with_unique_offset(mut self, enabled: bool) -> Self {
        self.enable_unique_offset = enabled;
        self
    }

    pub fn with_delta_strategy(mut self, strategy: DeltaStrategy) -> Self {
        self.delta_strategy = strategy;
        self
    }

    pub fn with_transitive_delta(mut self, enabled: bool) -> Self {
        self.enable_transitive_delta = enabled;
        self
    }

    pub fn with_max_kernel_elements(mut self, limit: usize) -> Self {
        self.max_kernel_elements = limit;
        self
    }

    pub fn with_max_expression_nodes(mut self, limit: usize) -> Self {
        self.max_expression_nodes = limit;
        self
    }

    pub fn with_index_simplification(mut self, enabled: bool) -> Self {
        self.enable_index_simplification = enabled;
        self
    }

    pub fn with_kernel_cache_capacity(mut self, capacity: usize) -> Self {
        self.kernel_cache_capacity = capacity;
        self
    }

    pub fn simplify_options(&self) -> SimplifyOptions {
        SimplifyOptions {
            index_rules: self.enable_index_simplification,
            ..SimplifyOptions::default()
        }
    }

    /// Stable digest used to key compiled kernels.
    pub fn digest(&self) -> u64 {
        fingerprint(self)
    }
}
