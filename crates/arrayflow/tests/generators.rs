use std::sync::Arc;

use arrayflow::{shape, Collection, Evaluator, Node, NodeKind};
use arrayflow_backend_ref_cpu::CpuBackend;

fn cpu() -> Evaluator<CpuBackend> {
    Evaluator::new(Arc::new(CpuBackend::new()))
}

#[test]
fn arithmetic_sequence_counts_from_initial() -> anyhow::Result<()> {
    let seq = Node::arithmetic_sequence(shape![5], 10.0, 2.0);
    assert_eq!(cpu().evaluate(&seq, &[])?.to_vec(), vec![10.0, 12.0, 14.0, 16.0, 18.0]);
    assert_eq!(seq.evaluate_direct(&[])?.to_vec(), vec![10.0, 12.0, 14.0, 16.0, 18.0]);
    Ok(())
}

#[test]
fn scaling_a_sequence_folds_into_its_parameters() -> anyhow::Result<()> {
    let scaled = Node::arithmetic_sequence(shape![5], 10.0, 2.0).scale(5.0)?;
    assert!(matches!(
        scaled.kind(),
        NodeKind::ArithmeticSequence { initial, rate, .. } if *initial == 50.0 && *rate == 10.0
    ));
    assert_eq!(cpu().evaluate(&scaled, &[])?.to_vec(), vec![50.0, 60.0, 70.0, 80.0, 90.0]);
    Ok(())
}

#[test]
fn variable_sequence_follows_the_bound_length() -> anyhow::Result<()> {
    let x = Node::variable_argument(0, shape![1]);
    let seq = Node::variable_sequence(shape![1], 1.0, 1.0);
    let node = x.multiply(&seq)?;
    assert!(!node.is_fixed_count());
    let out = cpu().evaluate(&node, &[Collection::pack(&[2.0, 2.0, 2.0, 2.0])])?;
    assert_eq!(out.shape().dims(), &[4]);
    assert_eq!(out.to_vec(), vec![2.0, 4.0, 6.0, 8.0]);
    Ok(())
}

#[test]
fn pad_places_block_inside_zero_canvas() -> anyhow::Result<()> {
    let block = Node::from_values(shape![2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
    let padded = block.pad(shape![4, 4], &[1, 1])?;
    #[rustfmt::skip]
    let expected = vec![
        0.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 2.0, 0.0,
        0.0, 3.0, 4.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
    ];
    assert_eq!(cpu().evaluate(&padded, &[])?.to_vec(), expected);
    assert_eq!(padded.evaluate_direct(&[])?.to_vec(), expected);
    assert_eq!(block.pad_axes(&[1, 1])?.evaluate_direct(&[])?.to_vec(), expected);
    assert!(block.pad(shape![4, 4], &[3, 0]).is_err());
    Ok(())
}

#[test]
fn identity_is_one_on_the_diagonal() -> anyhow::Result<()> {
    let identity = Node::identity(&shape![3])?;
    assert_eq!(identity.shape().dims(), &[3, 3]);
    assert_eq!(
        cpu().evaluate(&identity, &[])?.to_vec(),
        vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
    );
    Ok(())
}

#[test]
fn constants_broadcast_against_arguments() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![2, 2]);
    let node = x
        .add(&Node::constant(shape![1], 1.5))?
        .multiply(&Node::epsilon(shape![1]).add(&Node::constant(shape![1], 1.0))?)?;
    let out = cpu().evaluate(&node, &[Collection::pack(&[0.0, 1.0, 2.0, 3.0])])?;
    let scale = 1.0 + f64::EPSILON;
    assert_eq!(
        out.to_vec(),
        vec![1.5 * scale, 2.5 * scale, 3.5 * scale, 4.5 * scale]
    );
    Ok(())
}

#[test]
fn repeat_and_expand_duplicate_elements() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![2]);
    let input = [Collection::pack(&[1.0, 2.0])];
    let repeated = x.repeat(3)?;
    assert_eq!(repeated.shape().dims(), &[3, 2]);
    assert_eq!(cpu().evaluate(&repeated, &input)?.to_vec(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    let expanded = x.expand(&shape![3])?;
    assert_eq!(expanded.shape().dims(), &[2, 3]);
    assert_eq!(cpu().evaluate(&expanded, &input)?.to_vec(), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    Ok(())
}

#[test]
fn selections_pick_per_element() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![4]);
    let y = Node::argument(1, shape![4]);
    let one = Node::constant(shape![1], 1.0);
    let zero = Node::zeros(shape![1]);
    let inputs = [
        Collection::pack(&[1.0, 5.0, 3.0, 0.0]),
        Collection::pack(&[2.0, 5.0, 1.0, 4.0]),
    ];
    let evaluator = cpu();
    let greater = x.greater_than(&y, &one, &zero, false)?;
    let at_least = x.greater_than(&y, &one, &zero, true)?;
    let equal = x.equals(&y, &x, &y.minus()?)?;
    let both = x.and(&y, &one, &zero)?;
    assert_eq!(evaluator.evaluate(&greater, &inputs)?.to_vec(), vec![0.0, 0.0, 1.0, 0.0]);
    assert_eq!(evaluator.evaluate(&at_least, &inputs)?.to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
    assert_eq!(evaluator.evaluate(&equal, &inputs)?.to_vec(), vec![-2.0, 5.0, -1.0, -4.0]);
    assert_eq!(evaluator.evaluate(&both, &inputs)?.to_vec(), vec![1.0, 1.0, 1.0, 0.0]);
    Ok(())
}

#[test]
fn zero_factor_does_not_mask_non_finite_inputs() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![2]);
    let masked = x.multiply(&Node::zeros(shape![2]))?;
    assert!(!masked.is_zero());
    let scaled = x.scale(0.0)?;

    let inputs = [Collection::pack(&[f64::INFINITY, f64::NAN])];
    for node in [&masked, &scaled] {
        let kernel = cpu().evaluate(node, &inputs)?.to_vec();
        let direct = node.evaluate_direct(&inputs)?.to_vec();
        assert!(kernel.iter().all(|v| v.is_nan()), "{kernel:?}");
        assert!(direct.iter().all(|v| v.is_nan()), "{direct:?}");
    }
    let finite = cpu().evaluate(&masked, &[Collection::pack(&[3.0, -1.0])])?.to_vec();
    assert!(finite.iter().all(|v| *v == 0.0));

    let generated = Node::arithmetic_sequence(shape![2], 1.0, 1.0).multiply(&Node::zeros(shape![2]))?;
    assert!(generated.is_zero());
    Ok(())
}

#[test]
fn arguments_and_data_are_read_in_place() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let data = Node::from_values(shape![3], vec![1.0, 2.0, 3.0])?;
    let sum = x.add(&data)?;
    assert!(x.is_source() && data.is_source());
    assert!(!sum.is_source() && !Node::zeros(shape![3]).is_source());

    let inputs = [Collection::pack(&[10.0, 20.0, 30.0])];
    assert_eq!(cpu().evaluate(&sum, &inputs)?.to_vec(), vec![11.0, 22.0, 33.0]);
    let d = sum.delta(&x)?;
    assert_eq!(d.evaluate_direct(&inputs)?.to_vec(), cpu().evaluate(&d, &inputs)?.to_vec());
    Ok(())
}
