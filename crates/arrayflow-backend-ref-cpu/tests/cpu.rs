use std::sync::Arc;

use arrayflow::backend::{has_backend, BackendError, KernelBackend};
use arrayflow::scope::compile;
use arrayflow::{shape, Collection, CompileConfig, Evaluator, Node, TraversalPolicy};
use arrayflow_backend_ref_cpu::{register_cpu_backend, CpuBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random(rng: &mut StdRng, shape: TraversalPolicy) -> Collection {
    let values = (0..shape.total_size())
        .map(|_| rng.gen_range(-2.0..2.0))
        .collect();
    Collection::from_vec(shape, values).expect("values match shape")
}

fn assert_parity(node: &Node, inputs: &[Collection], config: CompileConfig) -> anyhow::Result<()> {
    let evaluator = Evaluator::with_config(Arc::new(CpuBackend::new()), config);
    let kernel = evaluator.evaluate(node, inputs)?.to_vec();
    let direct = node.evaluate_direct(inputs)?.to_vec();
    assert_eq!(kernel.len(), direct.len(), "{}", node.describe());
    for (k, d) in kernel.iter().zip(&direct) {
        assert!(
            (k - d).abs() <= 1e-9 * (1.0 + d.abs()),
            "{}: kernel {kernel:?} direct {direct:?}",
            node.describe()
        );
    }
    Ok(())
}

fn graphs() -> anyhow::Result<Vec<Node>> {
    let a = Node::argument(0, shape![3, 4]);
    let b = Node::argument(1, shape![4]);
    let rows = a.multiply(&b)?.traverse(1).sum()?;
    let matmul = a
        .expand(&shape![2])?
        .multiply(&Node::argument(2, shape![4, 2]).repeat(3)?)?
        .permute(&[0, 2, 1])?
        .traverse(2)
        .sum()?;
    Ok(vec![
        a.add(&b)?.exp()?,
        rows.clone(),
        rows.abs()?.sqrt()?,
        a.transpose()?.traverse(1).max()?,
        matmul,
        a.subset(shape![2, 2], &[1, 1])?.pad(shape![3, 4], &[0, 2])?,
        a.pad_axes(&[1, 1])?.traverse(1).sum()?,
        a.maximum(&b)?.minimum(&a.minus()?)?,
        a.less_than(&b, &a, &b.scale(3.0)?, true)?,
        a.exp()?.isolate().divide(&a.exp()?.add(&Node::constant(shape![1], 1.0))?)?,
        a.multiply(&a)?.sum_axis(0)?,
        a.multiply(&b)?.delta(&a)?,
        a.exp()?.traverse(1).sum()?.delta(&a)?,
    ])
}

#[test]
fn kernels_match_direct_evaluation() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let inputs = [
        random(&mut rng, shape![3, 4]),
        random(&mut rng, shape![4]),
        random(&mut rng, shape![4, 2]),
    ];
    for node in graphs()? {
        assert_parity(&node, &inputs, CompileConfig::default())?;
    }
    Ok(())
}

#[test]
fn kernels_match_direct_evaluation_with_looped_aggregates() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let inputs = [
        random(&mut rng, shape![3, 4]),
        random(&mut rng, shape![4]),
        random(&mut rng, shape![4, 2]),
    ];
    let config = CompileConfig::default()
        .with_isolation_count_threshold(1)
        .with_unique_offset(false);
    for node in graphs()? {
        assert_parity(&node, &inputs, config.clone())?;
    }
    Ok(())
}

#[test]
fn matmul_produces_row_by_column_sums() -> anyhow::Result<()> {
    let a = Node::argument(0, shape![2, 3]);
    let b = Node::argument(1, shape![3, 2]);
    let product = a
        .expand(&shape![2])?
        .multiply(&b.repeat(2)?)?
        .permute(&[0, 2, 1])?
        .traverse(2)
        .sum()?
        .reshape(&shape![2, 2])?;
    let evaluator = Evaluator::new(Arc::new(CpuBackend::new()));
    let out = evaluator.evaluate(
        &product,
        &[
            Collection::pack(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            Collection::pack(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]),
        ],
    )?;
    assert_eq!(out.to_vec(), vec![58.0, 64.0, 139.0, 154.0]);
    Ok(())
}

#[test]
fn execute_rejects_wrong_argument_count() -> anyhow::Result<()> {
    let node = Node::argument(0, shape![2]).exp()?;
    let program = compile(&node, &CompileConfig::default())?;
    let err = CpuBackend::new()
        .execute(&program, &[Collection::zeros(shape![2])])
        .expect_err("program binds two arrays");
    assert!(matches!(err, BackendError::Execution { .. }));
    Ok(())
}

#[test]
fn backend_registers_under_both_names() {
    register_cpu_backend();
    assert!(has_backend("cpu"));
    assert!(has_backend("ref-cpu"));
}
