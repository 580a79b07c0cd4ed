use vapor::ir::{run_graph, GraphBuilder, Node, Observation, ENTRY_BLOCK_ID};
use vapor::PartialEscapePhase;

#[test]
fn scalarizes_a_wrapper_object_end_to_end() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(2);
    let obj = b.new_object(shape);
    let x = b.param(0);
    let y = b.param(1);
    b.store(obj, 0, x);
    b.store(obj, 1, y);
    let first = b.load(obj, 0);
    let second = b.load(obj, 1);
    let sum = b.binop(vapor::ir::Op::Add, first, second);
    b.ret(sum);
    let mut graph = b.build();

    let mut phase = PartialEscapePhase::new(true, false);
    let changed = phase.run(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(phase.metrics().allocations_virtualized, 1);
    let allocations = graph
        .node_ids()
        .filter(|id| graph.node(*id).is_allocation())
        .count();
    assert_eq!(allocations, 0);

    let observations = run_graph(&graph, &[20, 22], 1_000).unwrap();
    assert_eq!(observations, vec![Observation::Return("42".to_string())]);
}

#[test]
fn keeps_escaping_objects_observable() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let value = b.param(0);
    b.store(obj, 0, value);
    let cond = b.param(1);
    b.branch(cond);
    let escape = b.block();
    let quiet = b.block();
    let merge = b.block();
    b.edge(ENTRY_BLOCK_ID, escape);
    b.edge(ENTRY_BLOCK_ID, quiet);
    b.switch_to(escape);
    b.call(vec![obj]);
    b.edge(escape, merge);
    b.edge(quiet, merge);
    b.switch_to(merge);
    let loaded = b.load(obj, 0);
    b.ret(loaded);
    let mut graph = b.build();
    let original = graph.clone();

    let mut phase = PartialEscapePhase::new(true, false);
    phase.run(&mut graph).unwrap();

    for params in [[7, 0], [7, 1]] {
        let before = run_graph(&original, &params, 1_000).unwrap();
        let after = run_graph(&graph, &params, 1_000).unwrap();
        assert_eq!(before, after);
    }
}

#[test]
fn leaves_opaque_memory_alone_without_read_elimination() {
    let mut b = GraphBuilder::new();
    let base = b.param(0);
    let five = b.int(5);
    b.store(base, 0, five);
    let loaded = b.load(base, 0);
    b.ret(loaded);
    let mut graph = b.build();

    let mut phase = PartialEscapePhase::new(true, false);
    let changed = phase.run(&mut graph).unwrap();

    assert!(!changed);
    let loads = graph
        .node_ids()
        .filter(|id| matches!(graph.node(*id), Node::Load { .. }))
        .count();
    assert_eq!(loads, 1);
}
