//! Normalisation and constant folding.
//!
//! [`Expr::simplify`] rewrites bottom-up until a fixed point: nested sums and
//! products are flattened, constants folded, identities dropped, like terms
//! combined, and integer quotient/modulo expressions over bounded indices
//! reduced using interval bounds.

use super::eval::apply_scalars;
use super::{Expr, ExprKind, Op, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplifyOptions {
    /// Enables the bounds-driven quotient, modulo and comparison rules.
    pub index_rules: bool,
    pub max_passes: usize,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            index_rules: true,
            max_passes: 32,
        }
    }
}

impl Expr {
    pub fn simplify(&self) -> Expr {
        self.simplify_with(SimplifyOptions::default())
    }

    pub fn simplify_with(&self, options: SimplifyOptions) -> Expr {
        let mut current = self.clone();
        for _ in 0..options.max_passes.max(1) {
            let next = rewrite(&current, &options);
            if next == current {
                return next;
            }
            current = next;
        }
        current
    }

    /// Collapses nested sums, products and junctions without folding anything.
    pub fn flatten(&self) -> Expr {
        match self {
            Expr::Apply { op, args } => {
                let args: Vec<Expr> = args.iter().map(Expr::flatten).collect();
                if is_associative(*op) {
                    let mut flat = Vec::with_capacity(args.len());
                    flatten_into(*op, args, &mut flat);
                    Expr::apply(*op, flat)
                } else {
                    Expr::apply(*op, args)
                }
            }
            Expr::Element { array, index } => Expr::element(*array, index.flatten()),
            _ => self.clone(),
        }
    }

    /// The value this expression folds to, if it is constant.
    pub fn constant_value(&self) -> Option<Scalar> {
        self.simplify().as_const()
    }
}

fn is_associative(op: Op) -> bool {
    matches!(op, Op::Sum | Op::Product | Op::And | Op::Or)
}

fn flatten_into(op: Op, args: Vec<Expr>, out: &mut Vec<Expr>) {
    for arg in args {
        match arg {
            Expr::Apply { op: inner, args } if inner == op => flatten_into(op, args, out),
            other => out.push(other),
        }
    }
}

fn rewrite(expr: &Expr, options: &SimplifyOptions) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Index(_) | Expr::Var(_) | Expr::Length(_) => expr.clone(),
        Expr::Element { array, index } => Expr::element(*array, rewrite(index, options)),
        Expr::Apply { op, args } => {
            let args: Vec<Expr> = args.iter().map(|arg| rewrite(arg, options)).collect();
            rewrite_apply(*op, args, options)
        }
    }
}

fn rewrite_apply(op: Op, args: Vec<Expr>, options: &SimplifyOptions) -> Expr {
    if op.arity().is_some_and(|arity| arity != args.len()) {
        return Expr::apply(op, args);
    }
    if op != Op::Conditional && args.iter().all(|arg| matches!(arg, Expr::Const(_))) {
        let values: Vec<Scalar> = args.iter().filter_map(Expr::as_const).collect();
        return match apply_scalars(op, &values) {
            Ok(value) => Expr::Const(value),
            Err(_) => Expr::apply(op, args),
        };
    }
    match op {
        Op::Sum => simplify_sum(args),
        Op::Product => simplify_product(args),
        Op::Negate => simplify_negate(args),
        Op::Quotient => simplify_quotient(args, options),
        Op::Mod => simplify_mod(args, options),
        Op::Min | Op::Max if args[0] == args[1] => args[0].clone(),
        Op::Min | Op::Max => simplify_extremum(op, args),
        Op::Ln => match &args[0] {
            Expr::Apply {
                op: Op::Exp,
                args: inner,
            } => inner[0].clone(),
            _ => Expr::apply(op, args),
        },
        Op::Abs => match &args[0] {
            inner @ Expr::Apply { op: Op::Abs, .. } => inner.clone(),
            _ => Expr::apply(op, args),
        },
        op if op.is_comparison() => simplify_comparison(op, args, options),
        Op::And => simplify_junction(args, true),
        Op::Or => simplify_junction(args, false),
        Op::Not => simplify_not(args),
        Op::Conditional => simplify_conditional(args),
        _ => Expr::apply(op, args),
    }
}

fn integral(a: Scalar, b: Scalar) -> bool {
    !matches!(a, Scalar::Double(_)) && !matches!(b, Scalar::Double(_))
}

fn add_scalars(a: Scalar, b: Scalar) -> Scalar {
    if integral(a, b) {
        Scalar::Int(a.as_i64().wrapping_add(b.as_i64()))
    } else {
        Scalar::Double(a.as_f64() + b.as_f64())
    }
}

fn mul_scalars(a: Scalar, b: Scalar) -> Scalar {
    if integral(a, b) {
        Scalar::Int(a.as_i64().wrapping_mul(b.as_i64()))
    } else {
        Scalar::Double(a.as_f64() * b.as_f64())
    }
}

fn neg_scalar(a: Scalar) -> Scalar {
    match a {
        Scalar::Double(v) => Scalar::Double(-v),
        other => Scalar::Int(other.as_i64().wrapping_neg()),
    }
}

fn is_minus_one(value: Scalar) -> bool {
    match value {
        Scalar::Int(v) => v == -1,
        Scalar::Double(v) => v == -1.0,
        Scalar::Bool(_) => false,
    }
}

fn arithmetic_kind(args: &[Expr]) -> ExprKind {
    args.iter().map(Expr::kind).fold(ExprKind::Int, ExprKind::join)
}

fn all_integral(args: &[Expr]) -> bool {
    args.iter().all(|arg| arg.kind() != ExprKind::Double)
}

/// Splits a term into a constant coefficient and the remaining base.
fn split_coefficient(term: Expr) -> (Scalar, Expr) {
    match term {
        Expr::Apply {
            op: Op::Negate,
            mut args,
        } if args.len() == 1 => {
            let (coefficient, base) = split_coefficient(args.remove(0));
            (neg_scalar(coefficient), base)
        }
        Expr::Apply {
            op: Op::Product,
            mut args,
        } if args.len() >= 2 && matches!(args[0], Expr::Const(_)) => {
            let coefficient = args[0].as_const().unwrap_or(Scalar::Int(1));
            args.remove(0);
            (coefficient, Expr::product(args))
        }
        other => (Scalar::Int(1), other),
    }
}

fn with_coefficient(coefficient: Scalar, base: Expr) -> Option<Expr> {
    // `x - x` is NaN for infinite `x`
    if coefficient.is_zero() && base.is_finite() {
        return None;
    }
    let keeps_kind = base.kind() == ExprKind::Double || coefficient.kind() != ExprKind::Double;
    if coefficient.is_one() && keeps_kind {
        return Some(base);
    }
    if is_minus_one(coefficient) && keeps_kind {
        return Some(-base);
    }
    let mut factors = vec![Expr::Const(coefficient)];
    match base {
        Expr::Apply {
            op: Op::Product,
            args,
        } => factors.extend(args),
        other => factors.push(other),
    }
    Some(Expr::apply(Op::Product, factors))
}

fn simplify_sum(args: Vec<Expr>) -> Expr {
    let kind = arithmetic_kind(&args);
    let mut flat = Vec::with_capacity(args.len());
    flatten_into(Op::Sum, args, &mut flat);

    let mut constant: Option<Scalar> = None;
    let mut terms: Vec<(Scalar, Expr)> = Vec::new();
    for term in flat {
        if let Expr::Const(value) = term {
            constant = Some(match constant {
                Some(acc) => add_scalars(acc, value),
                None => value,
            });
            continue;
        }
        let (coefficient, base) = split_coefficient(term);
        match terms.iter_mut().find(|(_, existing)| *existing == base) {
            Some(entry) => entry.0 = add_scalars(entry.0, coefficient),
            None => terms.push((coefficient, base)),
        }
    }

    let mut out: Vec<Expr> = terms
        .into_iter()
        .filter_map(|(coefficient, base)| with_coefficient(coefficient, base))
        .collect();
    if let Some(value) = constant {
        let keeps_kind = matches!(value, Scalar::Double(_)) && all_integral(&out);
        if !value.is_zero() || (keeps_kind && !out.is_empty()) {
            out.push(Expr::Const(value));
        }
    }
    if out.is_empty() {
        return Expr::zero(kind);
    }
    Expr::sum(out)
}

fn simplify_product(args: Vec<Expr>) -> Expr {
    let kind = arithmetic_kind(&args);
    let mut flat = Vec::with_capacity(args.len());
    flatten_into(Op::Product, args, &mut flat);

    let mut constant = Scalar::Int(1);
    let mut negative = false;
    let mut others = Vec::with_capacity(flat.len());
    for factor in flat {
        match factor {
            Expr::Const(value) => constant = mul_scalars(constant, value),
            Expr::Apply {
                op: Op::Negate,
                mut args,
            } if args.len() == 1 => {
                negative = !negative;
                others.push(args.remove(0));
            }
            other => others.push(other),
        }
    }
    if negative {
        constant = neg_scalar(constant);
    }
    if constant.is_zero() && others.iter().all(Expr::is_finite) {
        return Expr::zero(kind);
    }
    if others.is_empty() {
        return Expr::Const(constant);
    }
    let keeps_kind = constant.kind() != ExprKind::Double || !all_integral(&others);
    if constant.is_one() && keeps_kind {
        return Expr::product(others);
    }
    if is_minus_one(constant) && keeps_kind {
        return -Expr::product(others);
    }
    let mut factors = Vec::with_capacity(others.len() + 1);
    factors.push(Expr::Const(constant));
    factors.extend(others);
    Expr::apply(Op::Product, factors)
}

fn simplify_negate(mut args: Vec<Expr>) -> Expr {
    let arg = args.remove(0);
    match arg {
        Expr::Const(value) => Expr::Const(neg_scalar(value)),
        Expr::Apply {
            op: Op::Negate,
            mut args,
        } if args.len() == 1 => args.remove(0),
        Expr::Apply {
            op: Op::Product,
            mut args,
        } if matches!(args.first(), Some(Expr::Const(_))) => {
            if let Some(value) = args[0].as_const() {
                args[0] = Expr::Const(neg_scalar(value));
            }
            Expr::apply(Op::Product, args)
        }
        other => -other,
    }
}

/// Splits the terms of `expr` into exact multiples of `k` (already divided by
/// `k`) and the remaining terms. `None` when no term is a multiple.
fn split_multiples(expr: &Expr, k: i64) -> Option<(Vec<Expr>, Vec<Expr>)> {
    let terms: Vec<Expr> = match expr {
        Expr::Apply { op: Op::Sum, args } => args.clone(),
        other => vec![other.clone()],
    };
    let mut multiples = Vec::new();
    let mut rest = Vec::new();
    for term in terms {
        match &term {
            Expr::Const(Scalar::Int(c)) if c % k == 0 => multiples.push(Expr::int(c / k)),
            Expr::Apply {
                op: Op::Product,
                args,
            } if args.len() >= 2 && args[0].as_int().is_some_and(|m| m % k == 0) => {
                let m = args[0].as_int().unwrap_or(k);
                let mut factors = Vec::with_capacity(args.len());
                if m / k != 1 {
                    factors.push(Expr::int(m / k));
                }
                factors.extend(args[1..].iter().cloned());
                multiples.push(Expr::product(factors));
            }
            _ => rest.push(term),
        }
    }
    if multiples.is_empty() {
        None
    } else {
        Some((multiples, rest))
    }
}

fn non_negative(expr: &Expr) -> bool {
    expr.bounds().is_some_and(|bounds| bounds.is_non_negative())
}

fn positive_int_divisor(expr: &Expr, divisor: &Expr, options: &SimplifyOptions) -> Option<i64> {
    if !options.index_rules || expr.kind() == ExprKind::Double {
        return None;
    }
    divisor.as_int().filter(|k| *k > 0)
}

fn simplify_quotient(args: Vec<Expr>, options: &SimplifyOptions) -> Expr {
    let (a, b) = (&args[0], &args[1]);
    if b.is_one() && (b.kind() == ExprKind::Int || a.kind() == ExprKind::Double) {
        return a.clone();
    }
    if a.is_zero()
        && b
            .as_const()
            .is_some_and(|value| !value.is_zero() && !value.as_f64().is_nan())
    {
        return a.clone();
    }
    if let Some(k) = positive_int_divisor(a, b, options) {
        if a.bounds().is_some_and(|bounds| bounds.within(0, k)) {
            return Expr::int(0);
        }
        if let Expr::Apply {
            op: Op::Quotient,
            args: inner,
        } = a
        {
            if let Some(k2) = inner[1].as_int().filter(|k2| *k2 > 0) {
                if non_negative(&inner[0]) {
                    if let Some(combined) = k.checked_mul(k2) {
                        return Expr::quotient(inner[0].clone(), Expr::int(combined));
                    }
                }
            }
        }
        if let Some((mut multiples, rest)) = split_multiples(a, k) {
            let remainder = Expr::sum(rest);
            if non_negative(a) && non_negative(&remainder) {
                if !remainder.bounds().is_some_and(|bounds| bounds.within(0, k)) {
                    multiples.push(Expr::quotient(remainder, Expr::int(k)));
                }
                return Expr::sum(multiples);
            }
        }
    }
    Expr::apply(Op::Quotient, args)
}

fn simplify_mod(args: Vec<Expr>, options: &SimplifyOptions) -> Expr {
    let (a, b) = (&args[0], &args[1]);
    if let Some(k) = positive_int_divisor(a, b, options) {
        if k == 1 {
            return Expr::int(0);
        }
        if a.bounds().is_some_and(|bounds| bounds.within(0, k)) {
            return a.clone();
        }
        if let Expr::Apply {
            op: Op::Mod,
            args: inner,
        } = a
        {
            if inner[1].as_int().is_some_and(|k2| k2 > 0 && k2 % k == 0) && non_negative(&inner[0])
            {
                return Expr::modulo(inner[0].clone(), Expr::int(k));
            }
        }
        if let Some((_, rest)) = split_multiples(a, k) {
            let remainder = Expr::sum(rest);
            if non_negative(a) && non_negative(&remainder) {
                return Expr::modulo(remainder, Expr::int(k));
            }
        }
    }
    Expr::apply(Op::Mod, args)
}

/// Drops the fold identity of `min`/`max` (`+inf`/`-inf`).
fn simplify_extremum(op: Op, mut args: Vec<Expr>) -> Expr {
    let identity = if op == Op::Max {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    let is_identity =
        |expr: &Expr| matches!(expr, Expr::Const(Scalar::Double(v)) if *v == identity);
    if is_identity(&args[0]) && args[1].kind() == ExprKind::Double {
        return args.remove(1);
    }
    if is_identity(&args[1]) && args[0].kind() == ExprKind::Double {
        return args.remove(0);
    }
    Expr::apply(op, args)
}

fn comparison_holds(op: Op, same: bool) -> bool {
    match op {
        Op::Eq | Op::LessEq | Op::GreaterEq => same,
        _ => !same,
    }
}

fn simplify_comparison(op: Op, args: Vec<Expr>, options: &SimplifyOptions) -> Expr {
    let integral = all_integral(&args);
    if integral && args[0] == args[1] {
        return Expr::boolean(comparison_holds(op, true));
    }
    if integral && options.index_rules {
        let difference = simplify_sum(vec![args[0].clone(), simplify_negate(vec![args[1].clone()])]);
        if let Some(range) = difference.bounds() {
            let decided = match op {
                Op::Eq if range.lo > 0 || range.hi < 0 => Some(false),
                Op::Eq if range.lo == 0 && range.hi == 0 => Some(true),
                Op::NotEq if range.lo > 0 || range.hi < 0 => Some(true),
                Op::NotEq if range.lo == 0 && range.hi == 0 => Some(false),
                Op::Less if range.hi < 0 => Some(true),
                Op::Less if range.lo >= 0 => Some(false),
                Op::LessEq if range.hi <= 0 => Some(true),
                Op::LessEq if range.lo > 0 => Some(false),
                Op::Greater if range.lo > 0 => Some(true),
                Op::Greater if range.hi <= 0 => Some(false),
                Op::GreaterEq if range.lo >= 0 => Some(true),
                Op::GreaterEq if range.hi < 0 => Some(false),
                _ => None,
            };
            if let Some(value) = decided {
                return Expr::boolean(value);
            }
        }
    }
    Expr::apply(op, args)
}

fn simplify_junction(args: Vec<Expr>, is_and: bool) -> Expr {
    let op = if is_and { Op::And } else { Op::Or };
    let mut flat = Vec::with_capacity(args.len());
    flatten_into(op, args, &mut flat);
    let mut out: Vec<Expr> = Vec::with_capacity(flat.len());
    for arg in flat {
        if let Some(value) = arg.as_const() {
            if value.is_truthy() == is_and {
                continue;
            }
            return Expr::boolean(!is_and);
        }
        if !out.contains(&arg) {
            out.push(arg);
        }
    }
    match out.len() {
        0 => Expr::boolean(is_and),
        1 => out.remove(0),
        _ => Expr::apply(op, out),
    }
}

fn inverse_comparison(op: Op) -> Option<Op> {
    Some(match op {
        Op::Eq => Op::NotEq,
        Op::NotEq => Op::Eq,
        Op::Less => Op::GreaterEq,
        Op::LessEq => Op::Greater,
        Op::Greater => Op::LessEq,
        Op::GreaterEq => Op::Less,
        _ => return None,
    })
}

fn simplify_not(mut args: Vec<Expr>) -> Expr {
    let arg = args.remove(0);
    match arg {
        Expr::Apply {
            op: Op::Not,
            mut args,
        } if args.len() == 1 => args.remove(0),
        Expr::Apply { op, args } if op.is_comparison() && all_integral(&args) => {
            match inverse_comparison(op) {
                Some(inverse) => Expr::apply(inverse, args),
                None => Expr::apply(op, args).not(),
            }
        }
        other => other.not(),
    }
}

fn simplify_conditional(mut args: Vec<Expr>) -> Expr {
    let otherwise = args.remove(2);
    let then = args.remove(1);
    let condition = args.remove(0);
    if let Some(value) = condition.as_const() {
        return if value.is_truthy() { then } else { otherwise };
    }
    if then == otherwise {
        return then;
    }
    match condition {
        Expr::Apply {
            op: Op::Not,
            mut args,
        } if args.len() == 1 => Expr::conditional(args.remove(0), otherwise, then),
        condition => Expr::conditional(condition, then, otherwise),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{ArrayId, Index};

    #[test]
    fn like_terms_cancel() {
        let i = Index::bounded("i", 8).expr();
        let j = Index::bounded("j", 8).expr();
        let expr = i.clone() + j.clone() - i;
        assert_eq!(expr.simplify(), j);
    }

    #[test]
    fn quotient_of_row_major_index_recovers_row() {
        let row = Index::bounded("row", 5).expr();
        let col = Index::bounded("col", 3).expr();
        let linear = row.clone() * Expr::int(3) + col.clone();
        assert_eq!(Expr::quotient(linear.clone(), Expr::int(3)).simplify(), row);
        assert_eq!(Expr::modulo(linear, Expr::int(3)).simplify(), col);
    }

    #[test]
    fn double_identity_is_kept_for_integer_operands() {
        let i = Index::bounded("i", 4).expr();
        let scaled = (i.clone() * Expr::double(1.0)).simplify();
        assert_eq!(scaled.kind(), ExprKind::Double);
        assert_eq!((i.clone() * Expr::int(1)).simplify(), i);
    }

    #[test]
    fn zero_factor_keeps_unbounded_operands() {
        let x = Expr::element(ArrayId(0), Index::bounded("i", 4).expr());
        let i = Index::bounded("i", 4).expr();
        assert!((Expr::double(0.0) * i.clone()).simplify().is_zero());
        let masked = (Expr::double(0.0) * x.clone()).simplify();
        assert!(!masked.is_zero());
        let cancelled = (x.clone() - x.clone()).simplify();
        assert!(!cancelled.is_zero());
        assert_eq!(cancelled.simplify(), cancelled);
    }

    #[test]
    fn conditional_with_decidable_guard_folds() {
        let i = Index::bounded("i", 4).expr();
        let guarded = Expr::conditional(
            i.clone().less_than(Expr::int(4)),
            Expr::double(2.0),
            Expr::double(0.0),
        );
        assert_eq!(guarded.simplify(), Expr::double(2.0));
    }
}
