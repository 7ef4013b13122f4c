use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrayflow::{
    shape, Collection, CompileConfig, DeltaStrategy, Error, Evaluator, Node, NodeKind,
    UnsupportedError,
};
use arrayflow_backend_ref_cpu::CpuBackend;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

const X: [f64; 3] = [0.5, 1.25, 2.0];

fn input() -> Collection {
    Collection::pack(&X)
}

fn generic() -> CompileConfig {
    CompileConfig::default().with_delta_strategy(DeltaStrategy::Generic)
}

/// Evaluates through the CPU kernel path and checks it against the direct
/// evaluator before returning the values.
fn run(node: &Node, inputs: &[Collection]) -> anyhow::Result<Vec<f64>> {
    let evaluator = Evaluator::new(Arc::new(CpuBackend::new()));
    let kernel = evaluator.evaluate(node, inputs)?.to_vec();
    let direct = node.evaluate_direct(inputs)?.to_vec();
    assert_close(&kernel, &direct);
    Ok(kernel)
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "length differs");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= 1e-9 * (1.0 + e.abs()), "{actual:?} != {expected:?}");
    }
}

/// Row-major `n x n` matrix with `f(x[i])` on the diagonal.
fn diagonal(f: impl Fn(f64) -> f64) -> Vec<f64> {
    let n = X.len();
    let mut out = vec![0.0; n * n];
    for (i, &x) in X.iter().enumerate() {
        out[i * n + i] = f(x);
    }
    out
}

#[test]
fn delta_of_target_is_identity() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let d = x.delta(&x)?;
    assert_eq!(d.shape().dims(), &[3, 3]);
    assert_eq!(run(&d, &[input()])?, diagonal(|_| 1.0));
    Ok(())
}

#[test]
fn delta_of_independent_node_is_zero() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let y = Node::argument(1, shape![2]);
    let d = y.exp()?.delta(&x)?;
    assert_eq!(d.shape().dims(), &[2, 3]);
    assert!(d.is_zero());
    Ok(())
}

#[test]
fn delta_is_linear() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let f = x.multiply(&x)?;
    let g = x.exp()?;
    for config in [CompileConfig::default(), generic()] {
        let of_sum = f.add(&g)?.delta_with(&x, &config)?;
        let sum_of = f
            .delta_with(&x, &config)?
            .add(&g.delta_with(&x, &config)?)?;
        let expected = diagonal(|v| 2.0 * v + v.exp());
        assert_close(&run(&of_sum, &[input()])?, &expected);
        assert_close(&run(&sum_of, &[input()])?, &expected);
    }
    Ok(())
}

#[test]
fn product_rule_matches_between_strategies() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let f = x.multiply(&x.exp()?)?;

    let closed = f.delta(&x)?;
    let expression = f.delta_with(&x, &generic())?;
    assert!(!matches!(closed.kind(), NodeKind::Delta));
    assert!(matches!(expression.kind(), NodeKind::Delta));

    let expected = diagonal(|v| v.exp() * (1.0 + v));
    assert_close(&run(&closed, &[input()])?, &expected);
    assert_close(&run(&expression, &[input()])?, &expected);
    Ok(())
}

#[test]
fn unary_chain_rules_match_between_strategies() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let one = Node::constant(shape![1], 1.0);
    let cases: Vec<(Node, fn(f64) -> f64)> = vec![
        (x.log()?, |v| 1.0 / v),
        (x.sqrt()?, |v| 0.5 / v.sqrt()),
        (x.scale(2.0)?.exp()?, |v| 2.0 * (2.0 * v).exp()),
        (one.divide(&x)?, |v| -1.0 / (v * v)),
        (x.divide(&x.add(&one)?)?, |v| 1.0 / ((v + 1.0) * (v + 1.0))),
    ];
    for (f, derivative) in cases {
        let expected = diagonal(derivative);
        assert_close(&run(&f.delta(&x)?, &[input()])?, &expected);
        assert_close(&run(&f.delta_with(&x, &generic())?, &[input()])?, &expected);
    }
    Ok(())
}

#[test]
fn three_factor_product_falls_back_to_the_expression_path() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let f = Node::multiply_all(vec![x.clone(), x.exp()?, x.sqrt()?])?;
    let d = f.delta(&x)?;
    let expected = diagonal(|v| {
        let (e, s) = (v.exp(), v.sqrt());
        e * s + v * e * s + v * e / (2.0 * s)
    });
    assert_close(&run(&d, &[input()])?, &expected);
    Ok(())
}

#[test]
fn delta_passes_through_sums() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![4]);
    let w = Node::from_values(shape![4], vec![1.0, -2.0, 0.5, 3.0])?;
    let dot = x.multiply(&w)?.sum()?;
    let d = dot.delta(&x)?;
    assert_eq!(d.shape().dims(), &[1, 4]);
    let inputs = [Collection::pack(&[9.0, 8.0, 7.0, 6.0])];
    assert_eq!(run(&d, &inputs)?, vec![1.0, -2.0, 0.5, 3.0]);
    assert_eq!(run(&x.sum()?.delta(&x)?, &inputs)?, vec![1.0; 4]);
    Ok(())
}

#[test]
fn delta_passes_through_projections() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![4]);
    let d = x.subset(shape![2], &[1])?.delta(&x)?;
    assert_eq!(d.shape().dims(), &[2, 4]);
    let inputs = [Collection::pack(&[1.0, 2.0, 3.0, 4.0])];
    assert_eq!(
        run(&d, &inputs)?,
        vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    );
    Ok(())
}

#[test]
fn delta_of_select_follows_the_taken_branch() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let zero = Node::zeros(shape![1]);
    let relu = x.greater_than(&zero, &x, &zero, false)?;
    let d = relu.delta(&x)?;
    let inputs = [Collection::pack(&[-1.0, 2.0, 0.0])];
    assert_eq!(
        run(&d, &inputs)?,
        vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]
    );
    Ok(())
}

#[test]
fn delta_through_variable_count_input_is_rejected() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let v = Node::variable_argument(1, shape![3]);
    let mixed = v.add(&x)?;
    assert!(!mixed.is_fixed_count());
    let err = mixed.scale(2.0)?.delta(&x).expect_err("variable-count input");
    assert!(matches!(
        err,
        Error::Unsupported(UnsupportedError::VariableCountDelta { .. })
    ));
    Ok(())
}

#[test]
fn delta_of_dynamic_count_sum_is_rejected_when_requested() -> anyhow::Result<()> {
    let x = Node::variable_argument(0, shape![1]);
    let total = x.sum()?;
    assert!(total.is_fixed_count());
    for config in [CompileConfig::default(), generic()] {
        let err = total.delta_with(&x, &config).expect_err("dynamic count");
        assert!(matches!(
            err,
            Error::Unsupported(UnsupportedError::VariableCountDelta { .. })
        ));
        let err = total
            .exp()?
            .delta_with(&x, &config)
            .expect_err("dynamic count below a fixed-count node");
        assert!(matches!(
            err,
            Error::Unsupported(UnsupportedError::VariableCountDelta { .. })
        ));
    }
    Ok(())
}

struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn warnings_while(f: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<usize> {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(count.clone()));
    tracing::subscriber::with_default(subscriber, f)?;
    Ok(count.load(Ordering::SeqCst))
}

#[test]
fn closed_form_fallback_to_generic_delta_warns() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let magnitude = x.abs()?;

    let warned = warnings_while(|| {
        let d = magnitude.delta(&x)?;
        assert!(matches!(d.kind(), NodeKind::Delta));
        Ok(())
    })?;
    assert!(warned >= 1);

    let chosen = warnings_while(|| {
        magnitude.delta_with(&x, &generic())?;
        Ok(())
    })?;
    assert_eq!(chosen, 0);

    let closed = warnings_while(|| {
        x.exp()?.delta(&x)?;
        Ok(())
    })?;
    assert_eq!(closed, 0);
    Ok(())
}
