//! Kernel scopes.
//!
//! A [`Scope`] is the imperative unit a backend executes: for every global id
//! in its extent it runs a list of statements that read argument arrays and
//! write its output array. A [`KernelProgram`] bundles the entry scope, the
//! scopes of isolated subgraphs it requires, and the array bindings backends
//! need to marshal buffers.

mod compile;
mod isolation;

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::expr::{ArrayId, Expr, ExprKind, Index};
use crate::shape::TraversalPolicy;

pub use compile::compile;
pub use isolation::IsolationReason;

/// Number of global ids a scope runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Extent {
    Fixed(usize),
    /// `length(array) / divisor`, known once `array` is bound.
    Dynamic { array: ArrayId, divisor: usize },
}

impl Extent {
    pub fn as_expr(&self) -> Expr {
        match self {
            Extent::Fixed(count) => Expr::int(*count as i64),
            Extent::Dynamic { array, divisor } => {
                Expr::quotient(Expr::length(*array), Expr::int(*divisor as i64))
            }
        }
    }

    /// Extent for the given realized array lengths.
    pub fn resolve(&self, length_of: impl Fn(ArrayId) -> Option<usize>) -> Option<usize> {
        match self {
            Extent::Fixed(count) => Some(*count),
            Extent::Dynamic { array, divisor } => {
                length_of(*array).map(|len| if *divisor == 0 { 0 } else { len / divisor })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Target {
    Var(String),
    Element { array: ArrayId, index: Expr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Declare {
        name: String,
        kind: ExprKind,
        value: Expr,
    },
    Assign {
        target: Target,
        value: Expr,
    },
    /// `for index in 0..limit { body }`
    Loop {
        index: Index,
        limit: Expr,
        body: Vec<Statement>,
    },
}

impl Statement {
    fn visit_exprs<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match self {
            Statement::Declare { value, .. } => f(value),
            Statement::Assign { target, value } => {
                if let Target::Element { index, .. } = target {
                    f(index);
                }
                f(value);
            }
            Statement::Loop { limit, body, .. } => {
                f(limit);
                for statement in body {
                    statement.visit_exprs(f);
                }
            }
        }
    }

    fn collect_writes(&self, out: &mut BTreeSet<ArrayId>) {
        match self {
            Statement::Assign {
                target: Target::Element { array, .. },
                ..
            } => {
                out.insert(*array);
            }
            Statement::Loop { body, .. } => {
                for statement in body {
                    statement.collect_writes(out);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    /// Every array the scope reads or writes, in id order.
    pub arguments: Vec<ArrayId>,
    pub statements: Vec<Statement>,
    /// Scopes that must run to completion before this one.
    pub required: Vec<Scope>,
    pub extent: Extent,
    /// Elements written per global id.
    pub mem: usize,
}

impl Scope {
    pub fn new(
        name: impl Into<String>,
        extent: Extent,
        mem: usize,
        statements: Vec<Statement>,
    ) -> Self {
        let mut scope = Self {
            name: name.into(),
            arguments: Vec::new(),
            statements,
            required: Vec::new(),
            extent,
            mem,
        };
        let mut arguments = scope.reads();
        arguments.extend(scope.writes());
        scope.arguments = arguments.into_iter().collect();
        scope
    }

    /// Arrays read by any statement, including array lengths.
    pub fn reads(&self) -> BTreeSet<ArrayId> {
        let mut out = BTreeSet::new();
        if let Extent::Dynamic { array, .. } = &self.extent {
            out.insert(*array);
        }
        for statement in &self.statements {
            statement.visit_exprs(&mut |expr| expr.collect_arrays(&mut out));
        }
        out
    }

    pub fn writes(&self) -> BTreeSet<ArrayId> {
        let mut out = BTreeSet::new();
        for statement in &self.statements {
            statement.collect_writes(&mut out);
        }
        out
    }

    /// Arrays this scope needs from outside: read but not written here.
    pub fn dependencies(&self) -> BTreeSet<ArrayId> {
        let writes = self.writes();
        self.reads()
            .into_iter()
            .filter(|array| !writes.contains(array))
            .collect()
    }

    pub fn statement_count(&self) -> usize {
        fn count(statements: &[Statement]) -> usize {
            statements
                .iter()
                .map(|statement| match statement {
                    Statement::Loop { body, .. } => 1 + count(body),
                    _ => 1,
                })
                .sum()
        }
        count(&self.statements)
    }

    fn render(&self, out: &mut String) {
        let extent = match &self.extent {
            Extent::Fixed(count) => count.to_string(),
            Extent::Dynamic { array, divisor } => format!("len({array}) / {divisor}"),
        };
        let arguments: Vec<String> = self.arguments.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            out,
            "scope {}[{} x {}]({}):",
            self.name,
            extent,
            self.mem,
            arguments.join(", ")
        );
        render_statements(&self.statements, 1, out);
    }
}

fn render_statements(statements: &[Statement], depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    for statement in statements {
        match statement {
            Statement::Declare { name, value, .. } => {
                let _ = writeln!(out, "{pad}let {name} = {value}");
            }
            Statement::Assign {
                target: Target::Var(name),
                value,
            } => {
                let _ = writeln!(out, "{pad}{name} = {value}");
            }
            Statement::Assign {
                target: Target::Element { array, index },
                value,
            } => {
                let _ = writeln!(out, "{pad}{array}[{index}] = {value}");
            }
            Statement::Loop { index, limit, body } => {
                let _ = writeln!(out, "{pad}for {index} in 0..{limit}:");
                render_statements(body, depth + 1, out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayRole {
    Output,
    /// Bound from the caller's inputs by argument position.
    Input { position: usize },
    /// Written by a required scope, read by later ones.
    Intermediate,
    Constant { values: Arc<[f64]> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayBinding {
    pub id: ArrayId,
    pub role: ArrayRole,
    pub shape: TraversalPolicy,
    pub fixed_count: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelProgram {
    pub name: String,
    pub entry: Scope,
    /// Indexed by array id.
    pub arrays: Vec<ArrayBinding>,
    pub output_shape: TraversalPolicy,
    pub fixed_count: bool,
}

impl KernelProgram {
    pub fn output(&self) -> ArrayId {
        ArrayId(0)
    }

    pub fn binding(&self, id: ArrayId) -> Option<&ArrayBinding> {
        self.arrays.get(id.position())
    }

    /// Scopes in execution order: every required scope before the scope
    /// requiring it, the entry scope last.
    pub fn schedule(&self) -> Vec<&Scope> {
        fn visit<'a>(scope: &'a Scope, out: &mut Vec<&'a Scope>) {
            for child in &scope.required {
                visit(child, out);
            }
            out.push(scope);
        }
        let mut out = Vec::new();
        visit(&self.entry, &mut out);
        out
    }

    pub fn scope_count(&self) -> usize {
        self.schedule().len()
    }

    /// Human-readable listing of arrays and scopes.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "program {} -> {}", self.name, self.output_shape);
        for binding in &self.arrays {
            let role = match &binding.role {
                ArrayRole::Output => "output".to_string(),
                ArrayRole::Input { position } => format!("input {position}"),
                ArrayRole::Intermediate => "intermediate".to_string(),
                ArrayRole::Constant { values } => format!("constant[{}]", values.len()),
            };
            let _ = writeln!(out, "  {} {} {}", binding.id, binding.shape, role);
        }
        for scope in self.schedule() {
            scope.render(&mut out);
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
