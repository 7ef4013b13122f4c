use arrayflow::expr::{Index, MapEnv};
use arrayflow::Expr;
use proptest::prelude::*;

const I_LIMIT: usize = 4;
const J_LIMIT: usize = 3;

fn index_leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        Just(Index::bounded("i", I_LIMIT).expr()),
        Just(Index::bounded("j", J_LIMIT).expr()),
    ]
}

/// Integer expressions over bounded indices that never go negative.
fn non_negative_int() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![(0i64..10).prop_map(Expr::int), index_leaf()];
    leaf.prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::sum),
            (0i64..5, inner).prop_map(|(k, e)| Expr::int(k) * e),
        ]
    })
}

fn int_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![(-10i64..10).prop_map(Expr::int), index_leaf()];
    let tree = leaf.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::sum),
            prop::collection::vec(inner.clone(), 2..3).prop_map(Expr::product),
            inner.clone().prop_map(|e| -e),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.min(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.max(b)),
            (inner.clone(), inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(a, b, t, f)| Expr::conditional(a.less_than(b), t, f)),
        ]
    });
    prop_oneof![
        4 => tree,
        1 => (non_negative_int(), 1i64..6).prop_map(|(a, k)| Expr::quotient(a, Expr::int(k))),
        1 => (non_negative_int(), 1i64..6).prop_map(|(a, k)| Expr::modulo(a, Expr::int(k))),
    ]
}

fn double_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-10.0f64..10.0).prop_map(Expr::double),
        Just(Expr::double(0.0)),
        Just(Expr::double(1.0)),
    ];
    leaf.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::sum),
            prop::collection::vec(inner.clone(), 2..3).prop_map(Expr::product),
            inner.clone().prop_map(|e| -e),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.max(b)),
            (int_expr(), int_expr(), inner.clone(), inner)
                .prop_map(|(a, b, t, f)| Expr::conditional(a.equals(b), t, f)),
        ]
    })
}

fn any_expr() -> impl Strategy<Value = Expr> {
    prop_oneof![int_expr(), double_expr()]
}

fn evaluations(expr: &Expr) -> Vec<f64> {
    let mut out = Vec::new();
    for i in 0..I_LIMIT as i64 {
        for j in 0..J_LIMIT as i64 {
            let mut env = MapEnv::new();
            env.set_index("i", i).set_index("j", j);
            out.push(expr.evaluate_f64(&env).expect("closed expression evaluates"));
        }
    }
    out
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
}

proptest! {
    #[test]
    fn simplify_is_idempotent(expr in any_expr()) {
        let once = expr.simplify();
        let twice = once.simplify();
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn simplify_preserves_values(expr in any_expr()) {
        let simplified = expr.simplify();
        let before = evaluations(&expr);
        let after = evaluations(&simplified);
        for (a, b) in before.iter().zip(&after) {
            prop_assert!(close(*a, *b), "{} = {} but {} = {}", expr, a, simplified, b);
        }
    }
}

#[test]
fn constants_fold_through_nested_sums() {
    let expr = Expr::sum(vec![
        Expr::int(2),
        Expr::sum(vec![Expr::int(3), Expr::int(-5)]),
        Expr::int(7),
    ]);
    assert_eq!(expr.simplify(), Expr::int(7));
}

#[test]
fn product_with_zero_is_zero() {
    let i = Index::bounded("i", 8).expr();
    assert_eq!((i * Expr::int(0)).simplify(), Expr::int(0));
}

#[test]
fn double_negation_cancels() {
    let i = Index::bounded("i", 8).expr();
    assert_eq!((-(-i.clone())).simplify(), i);
}

#[test]
fn bounded_index_comparisons_fold() {
    let i = Index::bounded("i", 5).expr();
    assert_eq!(i.clone().less_than(Expr::int(5)).simplify(), Expr::boolean(true));
    assert_eq!(i.clone().greater_or_equal(Expr::int(0)).simplify(), Expr::boolean(true));
    let undecided = i.clone().less_than(Expr::int(3)).simplify();
    assert_eq!(undecided, i.less_than(Expr::int(3)));
}

#[test]
fn index_rules_can_be_disabled() {
    use arrayflow::expr::SimplifyOptions;

    let row = Index::bounded("row", 4).expr();
    let col = Index::bounded("col", 6).expr();
    let linear = row.clone() * Expr::int(6) + col;
    let quotient = Expr::quotient(linear, Expr::int(6));
    assert_eq!(quotient.simplify(), row);
    let untouched = quotient.simplify_with(SimplifyOptions {
        index_rules: false,
        ..SimplifyOptions::default()
    });
    assert_ne!(untouched, row);
}
