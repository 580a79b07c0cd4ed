use proptest::prelude::*;

use super::*;
use crate::ir::{GraphBuilder, ENTRY_BLOCK_ID};

/// One step of a generated program acting on a small set of objects.
#[derive(Debug, Clone)]
enum Action {
    Store { object: usize, field: usize, value: i64 },
    Load { object: usize, field: usize },
    Escape { object: usize },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..2usize, 0..2usize, -100..100i64)
            .prop_map(|(object, field, value)| Action::Store { object, field, value }),
        (0..2usize, 0..2usize).prop_map(|(object, field)| Action::Load { object, field }),
        (0..2usize).prop_map(|object| Action::Escape { object }),
    ]
}

fn emit(b: &mut GraphBuilder, objects: &[NodeId], action: &Action, last: &mut NodeId) {
    match action {
        Action::Store { object, field, value } => {
            let v = b.int(*value);
            b.store(objects[*object], *field, v);
        }
        Action::Load { object, field } => {
            *last = b.load(objects[*object], *field);
        }
        Action::Escape { object } => {
            b.call(vec![objects[*object]]);
        }
    }
}

fn build_straight_line(actions: &[Action]) -> Graph {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(2);
    let objects = vec![b.new_object(shape), b.new_object(shape)];
    let mut last = b.int(0);
    for action in actions {
        emit(&mut b, &objects, action, &mut last);
    }
    b.ret(last);
    b.build()
}

fn build_diamond(prefix: &[Action], left: &[Action], right: &[Action]) -> Graph {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(2);
    let objects = vec![b.new_object(shape), b.new_object(shape)];
    let mut last = b.int(0);
    for action in prefix {
        emit(&mut b, &objects, action, &mut last);
    }
    let cond = b.param(0);
    b.branch(cond);
    let then_block = b.block();
    let else_block = b.block();
    let merge = b.block();
    b.edge(ENTRY_BLOCK_ID, then_block);
    b.edge(ENTRY_BLOCK_ID, else_block);
    b.switch_to(then_block);
    for action in left {
        emit(&mut b, &objects, action, &mut last);
    }
    b.edge(then_block, merge);
    b.switch_to(else_block);
    for action in right {
        emit(&mut b, &objects, action, &mut last);
    }
    b.edge(else_block, merge);
    b.switch_to(merge);
    let result = b.load(objects[0], 0);
    b.ret(result);
    b.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn straight_line_programs_keep_their_behavior(
        actions in prop::collection::vec(action_strategy(), 0..12),
    ) {
        let graph = build_straight_line(&actions);
        let mut optimized = graph.clone();
        optimize(&mut optimized).unwrap();

        let before = run_graph(&graph, &[], 10_000).unwrap();
        let after = run_graph(&optimized, &[], 10_000).unwrap();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn branching_programs_keep_their_behavior(
        prefix in prop::collection::vec(action_strategy(), 0..4),
        left in prop::collection::vec(action_strategy(), 0..6),
        right in prop::collection::vec(action_strategy(), 0..6),
    ) {
        let graph = build_diamond(&prefix, &left, &right);
        let mut optimized = graph.clone();
        optimize(&mut optimized).unwrap();

        for params in [[0], [1]] {
            let before = run_graph(&graph, &params, 10_000).unwrap();
            let after = run_graph(&optimized, &params, 10_000).unwrap();
            prop_assert_eq!(before, after);
        }
    }

    #[test]
    fn read_elimination_keeps_behavior_on_virtual_objects(
        actions in prop::collection::vec(action_strategy(), 0..12),
    ) {
        let graph = build_straight_line(&actions);
        let mut optimized = graph.clone();
        optimize_with_reads(&mut optimized).unwrap();

        let before = run_graph(&graph, &[], 10_000).unwrap();
        let after = run_graph(&optimized, &[], 10_000).unwrap();
        prop_assert_eq!(before, after);
    }
}
