use std::sync::Arc;

use arrayflow::scope::{compile, Statement};
use arrayflow::{shape, Collection, CompileConfig, Evaluator, Node};
use arrayflow_backend_ref_cpu::CpuBackend;

fn cpu(config: CompileConfig) -> Evaluator<CpuBackend> {
    Evaluator::with_config(Arc::new(CpuBackend::new()), config)
}

fn has_loop(statements: &[Statement]) -> bool {
    statements
        .iter()
        .any(|statement| matches!(statement, Statement::Loop { .. }))
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "length differs");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= 1e-9 * (1.0 + e.abs()), "{actual:?} != {expected:?}");
    }
}

/// `sum_j (identity[i, j] == 1 ? x[i] : 0)`, which only ever reads the
/// diagonal.
fn diagonal_sum(x: &Node, n: usize) -> arrayflow::Result<Node> {
    let size = shape![n];
    Node::identity(&size)?
        .equals(
            &Node::constant(shape![1], 1.0),
            &x.expand(&size)?,
            &Node::zeros(shape![1]),
        )?
        .traverse(1)
        .sum()
}

fn same_bits(actual: &[f64], expected: &[f64]) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| (a.is_nan() && e.is_nan()) || a == e)
}

#[test]
fn diagonal_sum_collapses_to_a_single_read() -> anyhow::Result<()> {
    // 20 is above the unroll threshold, so only a collapse avoids the loop.
    let x = Node::argument(0, shape![20]);
    let node = diagonal_sum(&x, 20)?;
    let program = compile(&node, &CompileConfig::default())?;
    assert_eq!(program.scope_count(), 1);
    assert_eq!(program.entry.statements.len(), 1);
    assert!(!has_loop(&program.entry.statements));

    let values: Vec<f64> = (0..20).map(f64::from).collect();
    let input = Collection::pack(&values);
    let out = cpu(CompileConfig::default()).evaluate(&node, &[input])?;
    assert_eq!(out.to_vec(), values);
    Ok(())
}

#[test]
fn collapsed_and_looped_sums_agree() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![4]);
    let node = diagonal_sum(&x, 4)?;
    let input = Collection::pack(&[1.0, 2.0, 3.0, 4.0]);

    let looped_config = CompileConfig::default()
        .with_unique_offset(false)
        .with_isolation_count_threshold(0);
    let program = compile(&node, &looped_config)?;
    assert_eq!(program.entry.statements.len(), 3);
    assert!(has_loop(&program.entry.statements));

    let collapsed = cpu(CompileConfig::default()).evaluate(&node, &[input.clone()])?;
    let looped = cpu(looped_config).evaluate(&node, &[input.clone()])?;
    let direct = node.evaluate_direct(&[input])?;

    assert_eq!(collapsed.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(looped.to_vec(), collapsed.to_vec());
    assert_eq!(direct.to_vec(), collapsed.to_vec());
    Ok(())
}

#[test]
fn identity_times_sequence_collapses() -> anyhow::Result<()> {
    let size = shape![20];
    let node = Node::identity(&size)?
        .multiply(&Node::arithmetic_sequence(size.clone(), 1.0, 1.0).expand(&size)?)?
        .traverse(1)
        .sum()?;
    let program = compile(&node, &CompileConfig::default())?;
    assert_eq!(program.scope_count(), 1);
    assert!(!has_loop(&program.entry.statements));
    let out = cpu(CompileConfig::default()).evaluate(&node, &[])?;
    assert_eq!(out.to_vec(), (1..=20).map(f64::from).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn masked_terms_over_a_zero_divisor_stay_nan() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![4]);
    let y = Node::argument(1, shape![4]);
    let node = Node::identity(&shape![4])?
        .multiply(&x.expand(&shape![4])?)?
        .divide(&y)?
        .traverse(1)
        .sum()?;
    let inputs = [
        Collection::pack(&[1.0, 2.0, 3.0, 4.0]),
        Collection::pack(&[1.0, 0.0, 1.0, 1.0]),
    ];
    let expected = [f64::NAN, f64::INFINITY, f64::NAN, f64::NAN];

    let collapsing = cpu(CompileConfig::default()).evaluate(&node, &inputs)?.to_vec();
    let plain = cpu(CompileConfig::default().with_unique_offset(false))
        .evaluate(&node, &inputs)?
        .to_vec();
    let direct = node.evaluate_direct(&inputs)?.to_vec();
    assert!(same_bits(&collapsing, &expected), "{collapsing:?}");
    assert!(same_bits(&plain, &expected), "{plain:?}");
    assert!(same_bits(&direct, &expected), "{direct:?}");
    Ok(())
}

#[test]
fn failed_collapse_leaves_no_extra_bindings() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3, 4]);
    let node = x.exp()?.isolate().traverse(1).sum()?;
    let with_collapse = compile(&node, &CompileConfig::default())?;
    let without = compile(&node, &CompileConfig::default().with_unique_offset(false))?;
    assert_eq!(with_collapse.scope_count(), without.scope_count());
    assert_eq!(with_collapse.arrays.len(), without.arrays.len());
    let roles = |program: &arrayflow::scope::KernelProgram| {
        program
            .arrays
            .iter()
            .map(|binding| format!("{:?}", binding.role))
            .collect::<Vec<_>>()
    };
    assert_eq!(roles(&with_collapse), roles(&without));
    Ok(())
}

#[test]
fn unrolled_and_looped_max_agree() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3, 5]);
    let node = x.traverse(1).max()?;
    assert_eq!(node.shape().dims(), &[3, 1]);
    let values = vec![
        3.0, -1.0, 7.5, 2.0, 0.0, //
        -4.0, -2.0, -8.0, -3.0, -9.0, //
        1.0, 1.0, 1.0, 6.0, 1.0,
    ];
    let input = Collection::from_vec(shape![3, 5], values)?;

    let unrolled_program = compile(&node, &CompileConfig::default())?;
    assert_eq!(unrolled_program.entry.statements.len(), 1);

    let looped_config = CompileConfig::default().with_isolation_count_threshold(2);
    let looped_program = compile(&node, &looped_config)?;
    assert!(has_loop(&looped_program.entry.statements));

    let unrolled = cpu(CompileConfig::default()).evaluate(&node, &[input.clone()])?;
    let looped = cpu(looped_config).evaluate(&node, &[input.clone()])?;
    assert_eq!(unrolled.to_vec(), vec![7.5, -2.0, 6.0]);
    assert_eq!(looped.to_vec(), unrolled.to_vec());
    assert_eq!(node.evaluate_direct(&[input])?.to_vec(), unrolled.to_vec());
    Ok(())
}

#[test]
fn long_sums_loop_unless_the_threshold_allows_unrolling() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![40]);
    let node = x.sum()?;
    let input = Collection::pack(&(1..=40).map(f64::from).collect::<Vec<_>>());

    let looped = compile(&node, &CompileConfig::default())?;
    assert!(has_loop(&looped.entry.statements));
    let generous = CompileConfig::default().with_isolation_count_threshold(64);
    let unrolled = compile(&node, &generous)?;
    assert!(!has_loop(&unrolled.entry.statements));

    let a = cpu(CompileConfig::default()).evaluate(&node, &[input.clone()])?;
    let b = cpu(generous).evaluate(&node, &[input])?;
    assert_eq!(a.to_vec(), vec![820.0]);
    assert_eq!(b.to_vec(), vec![820.0]);
    Ok(())
}

#[test]
fn long_reduction_under_elementwise_is_isolated() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![2, 20]);
    let node = x.traverse(1).sum()?.exp()?;
    let program = compile(&node, &CompileConfig::default())?;
    assert_eq!(program.scope_count(), 2);

    let values: Vec<f64> = (0..40).map(|i| f64::from(i) * 0.01).collect();
    let input = Collection::from_vec(shape![2, 20], values)?;
    let kernel = cpu(CompileConfig::default()).evaluate(&node, &[input.clone()])?;
    let direct = node.evaluate_direct(&[input])?;
    assert_close(&kernel.to_vec(), &direct.to_vec());
    assert_close(&kernel.to_vec(), &[1.9f64.exp(), 5.9f64.exp()]);
    Ok(())
}

#[test]
fn dynamic_count_sum_reads_the_bound_length() -> anyhow::Result<()> {
    let x = Node::variable_argument(0, shape![4]);
    let node = x.sum()?;
    assert!(node.is_fixed_count());
    let input = Collection::pack(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    let out = cpu(CompileConfig::default()).evaluate(&node, &[input.clone()])?;
    assert_eq!(out.to_vec(), vec![28.0]);
    assert_eq!(node.evaluate_direct(&[input])?.to_vec(), vec![28.0]);
    Ok(())
}

#[test]
fn sum_axis_drops_the_reduced_axis() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![2, 3]);
    let input = Collection::from_vec(shape![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    let evaluator = cpu(CompileConfig::default());

    let columns = x.sum_axis(0)?;
    assert_eq!(columns.shape().dims(), &[3]);
    assert_eq!(evaluator.evaluate(&columns, &[input.clone()])?.to_vec(), vec![5.0, 7.0, 9.0]);

    let rows = x.sum_axis(1)?;
    assert_eq!(rows.shape().dims(), &[2]);
    assert_eq!(evaluator.evaluate(&rows, &[input])?.to_vec(), vec![6.0, 15.0]);
    Ok(())
}

#[test]
fn product_and_min_reduce_each_item() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![2, 3]);
    let input = Collection::from_vec(shape![2, 3], vec![1.0, 2.0, 3.0, -4.0, 5.0, 0.5])?;
    let evaluator = cpu(CompileConfig::default());
    let product = x.traverse(1).product()?;
    let min = x.traverse(1).min()?;
    assert_eq!(evaluator.evaluate(&product, &[input.clone()])?.to_vec(), vec![6.0, -10.0]);
    assert_eq!(evaluator.evaluate(&min, &[input])?.to_vec(), vec![1.0, -4.0]);
    Ok(())
}
