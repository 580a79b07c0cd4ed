use pretty_assertions::assert_eq;

use super::*;
use crate::ir::{GraphBuilder, ENTRY_BLOCK_ID};

#[test]
fn load_after_store_folds_to_the_stored_value() {
    let mut b = GraphBuilder::new();
    let base = b.param(0);
    let five = b.int(5);
    b.store(base, 0, five);
    let loaded = b.load(base, 0);
    b.ret(loaded);
    let mut graph = b.build();

    let changed = optimize_with_reads(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 0);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Store { .. })), 1);
    assert_eq!(return_value(&graph), five);
}

#[test]
fn storing_the_value_just_loaded_is_dropped() {
    let mut b = GraphBuilder::new();
    let base = b.param(0);
    let loaded = b.load(base, 0);
    b.store(base, 0, loaded);
    b.ret(loaded);
    let mut graph = b.build();

    let changed = optimize_with_reads(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Store { .. })), 0);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 1);
    assert_eq!(return_value(&graph), loaded);
}

#[test]
fn calls_clobber_the_read_cache() {
    let mut b = GraphBuilder::new();
    let base = b.param(0);
    let five = b.int(5);
    b.store(base, 0, five);
    let first = b.load(base, 0);
    b.call(vec![first]);
    let second = b.load(base, 0);
    b.ret(second);
    let mut graph = b.build();

    let changed = optimize_with_reads(&mut graph).unwrap();

    assert!(changed);
    // the first load folds, the one past the call must hit memory again
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 1);
    assert_eq!(return_value(&graph), second);
    match graph.node(second) {
        Node::Load { object, field, .. } => {
            assert_eq!(*object, base);
            assert_eq!(*field, 0);
        }
        _ => panic!("second load should survive the call"),
    }
}

#[test]
fn volatile_accesses_are_never_touched() {
    let mut b = GraphBuilder::new();
    let base = b.param(0);
    let five = b.int(5);
    b.store(base, 0, five);
    let first = b.load_volatile(base, 0);
    let second = b.load(base, 0);
    let sum = b.binop(crate::ir::Op::Add, first, second);
    b.ret(sum);
    let mut graph = b.build();

    let changed = optimize_with_reads(&mut graph).unwrap();

    // the volatile load kills the cache, so nothing folds at all
    assert!(!changed);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 2);
}

#[test]
fn a_store_to_a_field_kills_every_base() {
    let mut b = GraphBuilder::new();
    let first_base = b.param(0);
    let second_base = b.param(1);
    let one = b.int(1);
    let two = b.int(2);
    b.store(first_base, 0, one);
    // possibly the same object, so the cached field value must go
    b.store(second_base, 0, two);
    let loaded = b.load(first_base, 0);
    b.ret(loaded);
    let mut graph = b.build();

    let changed = optimize_with_reads(&mut graph).unwrap();

    assert!(!changed);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 1);
    assert_eq!(return_value(&graph), loaded);
}

#[test]
fn cached_values_merge_through_a_phi() {
    let mut b = GraphBuilder::new();
    let base = b.param(0);
    let cond = b.param(1);
    b.branch(cond);
    let left = b.block();
    let right = b.block();
    let merge = b.block();
    b.edge(ENTRY_BLOCK_ID, left);
    b.edge(ENTRY_BLOCK_ID, right);
    b.switch_to(left);
    let one = b.int(1);
    b.store(base, 0, one);
    b.edge(left, merge);
    b.switch_to(right);
    let two = b.int(2);
    b.store(base, 0, two);
    b.edge(right, merge);
    b.switch_to(merge);
    let loaded = b.load(base, 0);
    b.ret(loaded);
    let mut graph = b.build();

    let changed = optimize_with_reads(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| matches!(n, Node::Load { .. })), 0);
    let phi = return_value(&graph);
    match graph.node(phi) {
        Node::Phi { block, inputs } => {
            assert_eq!(*block, merge);
            assert_eq!(inputs, &vec![one, two]);
        }
        _ => panic!("merged cache value should be a phi"),
    }
}
