use pretty_assertions::assert_eq;

use super::*;
use crate::ea::BailoutReason;
use crate::ir::{EntryKind, GraphBuilder};

#[test]
fn fully_virtual_allocation_disappears() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let five = b.int(5);
    b.store(obj, 0, five);
    let loaded = b.load(obj, 0);
    b.ret(loaded);
    let mut graph = b.build();
    let original = graph.clone();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| n.is_allocation()), 0);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Store { .. })), 0);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 0);
    assert_eq!(return_value(&graph), five);
    assert_same_observations(&original, &graph, &[]);
}

#[test]
fn unused_allocation_is_left_alone() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    b.new_object(shape);
    let zero = b.int(0);
    b.ret(zero);
    let mut graph = b.build();

    let changed = optimize(&mut graph).unwrap();

    // deleting the allocation alone pays for nothing, so the graph stays put
    assert!(!changed);
    assert_eq!(count_nodes(&graph, |n| n.is_allocation()), 1);
}

#[test]
fn escape_through_call_materializes() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let seven = b.int(7);
    b.store(obj, 0, seven);
    let call = b.call(vec![obj]);
    let loaded = b.load(obj, 0);
    b.ret(loaded);
    let mut graph = b.build();
    let original = graph.clone();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::New { .. })), 0);
    let mat = find_node(&graph, |n| matches!(n, Node::Materialize { .. }));
    match graph.node(mat) {
        Node::Materialize { entries, locks, .. } => {
            assert_eq!(entries, &vec![seven]);
            assert!(locks.is_empty());
        }
        _ => unreachable!(),
    }
    match graph.node(call) {
        Node::Call { args, .. } => assert_eq!(args, &vec![mat]),
        _ => unreachable!(),
    }
    // the load after the escape now reads the materialized object
    match graph.node(loaded) {
        Node::Load { object, .. } => assert_eq!(*object, mat),
        _ => unreachable!(),
    }
    assert_same_observations(&original, &graph, &[]);
}

#[test]
fn locking_a_virtual_object_is_free() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    b.monitor_enter(obj, 0);
    let one = b.int(1);
    b.store(obj, 0, one);
    b.monitor_exit(obj, 0);
    let loaded = b.load(obj, 0);
    b.ret(loaded);
    let mut graph = b.build();
    let original = graph.clone();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| n.is_allocation()), 0);
    assert_eq!(
        count_nodes(&graph, |n| matches!(
            n,
            Node::MonitorEnter { .. } | Node::MonitorExit { .. }
        )),
        0
    );
    assert_eq!(return_value(&graph), one);
    assert_same_observations(&original, &graph, &[]);
}

#[test]
fn materialized_object_keeps_its_locks() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    b.monitor_enter(obj, 0);
    let nine = b.int(9);
    b.store(obj, 0, nine);
    b.call(vec![obj]);
    let exit = b.monitor_exit(obj, 0);
    let zero = b.int(0);
    b.ret(zero);
    let mut graph = b.build();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    let mat = find_node(&graph, |n| matches!(n, Node::Materialize { .. }));
    match graph.node(mat) {
        Node::Materialize { entries, locks, .. } => {
            assert_eq!(entries, &vec![nine]);
            assert_eq!(locks, &vec![0]);
        }
        _ => unreachable!(),
    }
    // the exit past the escape point unlocks the real object
    match graph.node(exit) {
        Node::MonitorExit { object, .. } => assert_eq!(*object, mat),
        _ => unreachable!(),
    }
}

#[test]
fn escaping_an_ensured_object_bails_out() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object_ensured(shape);
    let one = b.int(1);
    b.store(obj, 0, one);
    b.call(vec![obj]);
    let zero = b.int(0);
    b.ret(zero);
    let mut graph = b.build();

    let result = optimize(&mut graph);

    assert!(matches!(
        result,
        Err(EaError::Bailout(BailoutReason::EnsureVirtualized { .. }))
    ));
}

#[test]
fn materializing_a_locked_array_bails_out() {
    let mut b = GraphBuilder::new();
    let shape = b.shape(vec![EntryKind::Int], true, true);
    let obj = b.new_object(shape);
    b.monitor_enter(obj, 0);
    b.call(vec![obj]);
    let zero = b.int(0);
    b.ret(zero);
    let mut graph = b.build();

    let result = optimize(&mut graph);

    assert!(matches!(
        result,
        Err(EaError::Bailout(BailoutReason::LockedArrayMaterialized { .. }))
    ));
}
