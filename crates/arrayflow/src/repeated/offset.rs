//! Unique non-zero offset prover.
//!
//! Given a term expression over a `row` and a `local` index, finds an
//! expression `u(row)` such that the term is zero for every `local != u`.
//! Answers are conservative: `None` whenever uniqueness cannot be shown.

use tracing::trace;

use crate::config::CompileConfig;
use crate::expr::{Expr, ExprKind, Index, MapEnv, Op};

use super::sequence::ArithmeticIndexSequence;

pub(crate) fn unique_nonzero_offset(
    term: &Expr,
    row: &Index,
    local: &Index,
    rows: usize,
    count: usize,
    config: &CompileConfig,
) -> Option<Expr> {
    if let Some(offset) = solve(term, &local.name) {
        return Some(offset.simplify_with(config.simplify_options()));
    }
    numeric_offset(term, row, local, rows, count, config)
}

/// Structural pass: reads the offset off guards of the form `local == f(row)`.
fn solve(expr: &Expr, local: &str) -> Option<Expr> {
    let Expr::Apply { op, args } = expr else {
        return None;
    };
    match op {
        Op::Conditional if args[2].is_zero() => {
            solve_guard(&args[0], local).or_else(|| solve(&args[1], local))
        }
        Op::Conditional if args[1].is_zero() => solve(&args[2], local),
        Op::Product => args.iter().enumerate().find_map(|(position, factor)| {
            let offset = solve(factor, local)?;
            args.iter()
                .enumerate()
                .all(|(other, rest)| other == position || rest.is_finite())
                .then_some(offset)
        }),
        Op::Sum => {
            let mut agreed: Option<Expr> = None;
            for term in args.iter().filter(|term| !term.is_zero()) {
                let offset = solve(term, local)?;
                match &agreed {
                    Some(existing) if *existing != offset => return None,
                    Some(_) => {}
                    None => agreed = Some(offset),
                }
            }
            agreed
        }
        Op::Negate => solve(&args[0], local),
        Op::Quotient if provably_nonzero(&args[1]) => solve(&args[0], local),
        _ => None,
    }
}

/// `0 / d` is only zero when `d` can be neither zero nor NaN.
fn provably_nonzero(divisor: &Expr) -> bool {
    if let Some(value) = divisor.as_const() {
        return !value.is_zero() && !value.as_f64().is_nan();
    }
    divisor.kind() != ExprKind::Double
        && divisor.bounds().is_some_and(|range| !range.contains(0))
}

fn solve_guard(guard: &Expr, local: &str) -> Option<Expr> {
    let Expr::Apply { op, args } = guard else {
        return None;
    };
    match op {
        Op::Eq => {
            if args[0].kind() != ExprKind::Int || args[1].kind() != ExprKind::Int {
                return None;
            }
            let difference = (args[0].clone() - args[1].clone()).simplify();
            solve_linear(&difference, local)
        }
        Op::And => args.iter().find_map(|term| solve_guard(term, local)),
        _ => None,
    }
}

/// Solves `difference == 0` for `local` when `local` appears exactly once
/// with coefficient `1` or `-1`.
fn solve_linear(difference: &Expr, local: &str) -> Option<Expr> {
    let terms: Vec<Expr> = match difference {
        Expr::Apply { op: Op::Sum, args } => args.clone(),
        other => vec![other.clone()],
    };
    let mut coefficient = None;
    let mut rest = Vec::with_capacity(terms.len());
    for term in terms {
        if !term.contains_index(local) {
            rest.push(term);
            continue;
        }
        if coefficient.is_some() {
            return None;
        }
        coefficient = Some(local_coefficient(&term, local)?);
    }
    let rest = Expr::sum(rest);
    match coefficient? {
        1 => Some(-rest),
        -1 => Some(rest),
        _ => None,
    }
}

fn local_coefficient(term: &Expr, local: &str) -> Option<i64> {
    match term {
        Expr::Index(index) if index.name == local => Some(1),
        Expr::Apply {
            op: Op::Negate,
            args,
        } => local_coefficient(&args[0], local).map(|c| -c),
        Expr::Apply {
            op: Op::Product,
            args,
        } if args.len() == 2 => {
            let k = args[0].as_int()?;
            local_coefficient(&args[1], local).map(|c| c * k)
        }
        _ => None,
    }
}

/// Numeric pass: evaluates the term's zero pattern for every row and fits
/// the non-zero positions to an arithmetic index sequence.
fn numeric_offset(
    term: &Expr,
    row: &Index,
    local: &Index,
    rows: usize,
    count: usize,
    config: &CompileConfig,
) -> Option<Expr> {
    if rows.checked_mul(count)? > config.offset_search_limit {
        trace!(rows, count, "offset search exceeds its budget");
        return None;
    }
    if !only_indices(term, &[&row.name, &local.name]) {
        return None;
    }
    let options = config.simplify_options();
    let mut offsets = Vec::with_capacity(rows);
    for r in 0..rows as i64 {
        let at_row = term.substitute_index(&row.name, &Expr::int(r));
        let mut found = None;
        for l in 0..count as i64 {
            let value = at_row
                .substitute_index(&local.name, &Expr::int(l))
                .simplify_with(options);
            if provably_zero(&value) {
                continue;
            }
            if found.replace(l).is_some() {
                return None;
            }
        }
        offsets.push(found);
    }
    let sequence = ArithmeticIndexSequence::fit(&offsets)?;
    Some(sequence.to_expr(&row.expr()))
}

fn provably_zero(value: &Expr) -> bool {
    if value.is_zero() {
        return true;
    }
    // Index-free and array-free values can be folded outright.
    if value.arrays().is_empty() {
        let env = MapEnv::new();
        return value
            .evaluate(&env)
            .is_ok_and(|scalar| scalar.is_zero());
    }
    false
}

fn only_indices(expr: &Expr, allowed: &[&str]) -> bool {
    match expr {
        Expr::Index(index) => allowed.contains(&index.name.as_str()),
        _ => expr
            .children()
            .iter()
            .all(|child| only_indices(child, allowed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ArrayId;

    #[test]
    fn guard_equality_yields_offset() {
        let row = Index::bounded("row", 4);
        let local = Index::bounded("local", 4);
        let term = Expr::conditional(
            local.expr().equals(row.expr() + Expr::int(1)),
            Expr::double(2.0),
            Expr::double(0.0),
        );
        let offset = solve(&term, "local").expect("solvable");
        assert_eq!(offset.simplify(), (row.expr() + Expr::int(1)).simplify());
    }

    #[test]
    fn zero_factors_only_absorb_finite_operands() {
        let row = Index::bounded("row", 4);
        let local = Index::bounded("local", 4);
        let mask = Expr::conditional(
            local.expr().equals(row.expr()),
            Expr::double(1.0),
            Expr::double(0.0),
        );
        let read = Expr::element(ArrayId(0), local.expr());
        assert!(solve(&(mask.clone() * read.clone()), "local").is_none());
        assert!(solve(&Expr::quotient(mask.clone(), read), "local").is_none());
        assert!(solve(&Expr::quotient(mask.clone(), Expr::double(0.0)), "local").is_none());
        assert!(solve(&Expr::quotient(mask.clone(), Expr::double(2.0)), "local").is_some());
        let scaled = mask * (Expr::double(0.5) * row.expr());
        assert!(solve(&scaled, "local").is_some());
    }

    #[test]
    fn disagreeing_terms_are_rejected() {
        let row = Index::bounded("row", 4);
        let local = Index::bounded("local", 4);
        let a = Expr::conditional(local.expr().equals(row.expr()), Expr::double(1.0), Expr::double(0.0));
        let b = Expr::conditional(
            local.expr().equals(Expr::int(0)),
            Expr::double(1.0),
            Expr::double(0.0),
        );
        assert!(solve(&(a + b), "local").is_none());
    }

    #[test]
    fn numeric_search_finds_wrapped_offsets() {
        let row = Index::bounded("row", 6);
        let local = Index::bounded("local", 3);
        // Non-zero where local == row % 3, written so the guard is not linear.
        let term = Expr::conditional(
            Expr::modulo(row.expr() + Expr::int(3) - local.expr(), Expr::int(3)).equals(Expr::int(0)),
            Expr::double(1.0),
            Expr::double(0.0),
        );
        let config = CompileConfig::default();
        let offset =
            unique_nonzero_offset(&term, &row, &local, 6, 3, &config).expect("wrapped offset");
        for r in 0..6 {
            let mut env = MapEnv::new();
            env.set_index("row", r);
            assert_eq!(offset.evaluate(&env).expect("evaluates").as_i64(), r % 3);
        }
    }
}
