use std::sync::Arc;

use arrayflow::backend::{create_backend, has_backend, list_backends};
use arrayflow::scope::{compile, KernelProgram};
use arrayflow::{
    shape, Collection, CompileConfig, Error, Evaluator, KernelBackend, MemoryError, Node,
};
use arrayflow_backend_ref_cpu::{register_cpu_backend, CpuBackend};

fn cpu() -> Evaluator<CpuBackend> {
    Evaluator::new(Arc::new(CpuBackend::new()))
}

fn doubled() -> anyhow::Result<Node> {
    Ok(Node::argument(0, shape![2]).scale(2.0)?)
}

#[test]
fn batch_rejects_outputs_from_different_roots() -> anyhow::Result<()> {
    let node = doubled()?;
    let inputs = vec![
        vec![Collection::pack(&[1.0, 2.0])],
        vec![Collection::pack(&[3.0, 4.0])],
    ];
    let outputs = [Collection::zeros(shape![2]), Collection::zeros(shape![2])];
    let err = cpu()
        .evaluate_batch(&node, &inputs, &outputs)
        .expect_err("outputs live in different buffers");
    assert!(matches!(err, Error::Memory(MemoryError::CrossRoot { .. })));
    assert_eq!(outputs[0].to_vec(), vec![0.0, 0.0]);
    Ok(())
}

#[test]
fn batch_rejects_gaps_between_outputs() -> anyhow::Result<()> {
    let node = doubled()?;
    let root = Collection::zeros(shape![6]);
    let outputs = [root.view(0, shape![2])?, root.view(3, shape![2])?];
    let inputs = vec![
        vec![Collection::pack(&[1.0, 2.0])],
        vec![Collection::pack(&[3.0, 4.0])],
    ];
    let err = cpu()
        .evaluate_batch(&node, &inputs, &outputs)
        .expect_err("outputs are not adjacent");
    assert!(matches!(
        err,
        Error::Memory(MemoryError::NonContiguous { expected: 2, found: 3 })
    ));
    Ok(())
}

#[test]
fn batch_fills_adjacent_views_of_one_root() -> anyhow::Result<()> {
    let node = doubled()?;
    let root = Collection::zeros(shape![4]);
    let outputs = [root.view(0, shape![2])?, root.view(2, shape![2])?];
    let inputs = vec![
        vec![Collection::pack(&[1.0, 2.0])],
        vec![Collection::pack(&[3.0, 4.0])],
    ];
    let evaluator = cpu();
    evaluator.evaluate_batch(&node, &inputs, &outputs)?;
    assert_eq!(root.to_vec(), vec![2.0, 4.0, 6.0, 8.0]);
    assert_eq!(evaluator.cached_programs(), 1);

    let err = evaluator
        .evaluate_batch(&node, &inputs[..1], &outputs)
        .expect_err("one input set per output");
    assert!(matches!(err, Error::Memory(MemoryError::LengthMismatch { .. })));
    Ok(())
}

#[test]
fn structurally_equal_nodes_share_a_compiled_kernel() -> anyhow::Result<()> {
    let evaluator = cpu();
    let first = evaluator.compile(&doubled()?)?;
    let second = evaluator.compile(&doubled()?)?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(evaluator.cached_programs(), 1);

    let other = Node::argument(0, shape![2]).exp()?;
    evaluator.compile(&other)?;
    assert_eq!(evaluator.cached_programs(), 2);
    Ok(())
}

#[test]
fn kernel_cache_evicts_least_recently_used() -> anyhow::Result<()> {
    let config = CompileConfig::default().with_kernel_cache_capacity(1);
    let evaluator = Evaluator::with_config(Arc::new(CpuBackend::new()), config);
    let a = evaluator.compile(&doubled()?)?;
    evaluator.compile(&Node::argument(0, shape![2]).exp()?)?;
    assert_eq!(evaluator.cached_programs(), 1);
    let again = evaluator.compile(&doubled()?)?;
    assert!(!Arc::ptr_eq(&a, &again));
    Ok(())
}

#[test]
fn input_problems_are_reported_before_execution() -> anyhow::Result<()> {
    let node = doubled()?;
    let evaluator = cpu();
    assert!(matches!(
        evaluator.evaluate(&node, &[]),
        Err(Error::Memory(MemoryError::MissingInput { position: 0 }))
    ));
    assert!(matches!(
        evaluator.evaluate(&node, &[Collection::pack(&[1.0, 2.0, 3.0])]),
        Err(Error::Memory(MemoryError::LengthMismatch { expected: 2, actual: 3 }))
    ));
    let output = Collection::zeros(shape![3]);
    assert!(matches!(
        evaluator.evaluate_into(&node, &[Collection::pack(&[1.0, 2.0])], &output),
        Err(Error::Memory(MemoryError::LengthMismatch { .. }))
    ));

    let variable = Node::variable_argument(0, shape![1]).exp()?;
    assert!(matches!(
        evaluator.evaluate(&variable, &[]),
        Err(Error::Memory(MemoryError::MissingInput { position: 0 }))
    ));
    Ok(())
}

#[test]
fn evaluate_into_writes_through_a_view() -> anyhow::Result<()> {
    let root = Collection::zeros(shape![5]);
    let window = root.view(2, shape![2])?;
    cpu().evaluate_into(&doubled()?, &[Collection::pack(&[0.5, 1.5])], &window)?;
    assert_eq!(root.to_vec(), vec![0.0, 0.0, 1.0, 3.0, 0.0]);
    Ok(())
}

#[test]
fn explicit_isolation_adds_a_scope() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let node = x.exp()?.isolate().add(&x)?;
    let program = compile(&node, &CompileConfig::default())?;
    assert_eq!(program.scope_count(), 2);
    assert_eq!(program.entry.required.len(), 1);

    let input = Collection::pack(&[0.0, 1.0, 2.0]);
    let out = cpu().evaluate(&node, &[input])?.to_vec();
    let expected: Vec<f64> = [0.0f64, 1.0, 2.0].iter().map(|v| v.exp() + v).collect();
    for (a, e) in out.iter().zip(&expected) {
        assert!((a - e).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn oversized_intermediates_are_isolated() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![4]);
    let node = x.exp()?.add(&x)?;
    let small = CompileConfig::default().with_max_kernel_elements(2);
    assert_eq!(compile(&node, &CompileConfig::default())?.scope_count(), 1);
    assert_eq!(compile(&node, &small)?.scope_count(), 2);
    Ok(())
}

#[test]
fn program_summary_and_json_describe_the_kernel() -> anyhow::Result<()> {
    let x = Node::argument(0, shape![3]);
    let node = x.multiply(&x)?.sum()?;
    let program = compile(&node, &CompileConfig::default())?;
    assert!(program.name.starts_with("kernel_"));

    let summary = program.summary();
    assert!(summary.contains(&program.name));
    assert!(summary.contains("input 0"));
    assert!(summary.contains("scope kernel"));

    let json = program.to_json()?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(value["name"], serde_json::Value::String(program.name.clone()));
    let restored: KernelProgram = serde_json::from_str(&json)?;
    assert_eq!(restored, program);
    Ok(())
}

#[test]
fn registered_cpu_backend_evaluates_through_the_trait_object() -> anyhow::Result<()> {
    register_cpu_backend();
    assert!(has_backend("cpu"));
    assert!(list_backends().contains(&"ref-cpu".to_string()));
    assert!(create_backend("nonexistent").is_none());

    let backend: Arc<dyn KernelBackend> = create_backend("cpu").expect("cpu backend registered");
    assert_eq!(backend.backend_name(), "cpu");
    let evaluator: Evaluator = Evaluator::new(backend);
    let out = evaluator.evaluate(&doubled()?, &[Collection::pack(&[1.0, -1.0])])?;
    assert_eq!(out.to_vec(), vec![2.0, -2.0]);
    Ok(())
}
