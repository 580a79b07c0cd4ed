use pretty_assertions::assert_eq;

use super::*;
use crate::ir::{EntryKind, GraphBuilder, MappingKind, ObjectMapping};

fn mapping_for<'a>(mappings: &'a [ObjectMapping], marker: NodeId) -> &'a MappingKind {
    &mappings
        .iter()
        .find(|m| m.object == marker)
        .expect("marker has no mapping")
        .kind
}

#[test]
fn deopt_state_rebuilds_nested_virtual_objects() {
    let mut b = GraphBuilder::new();
    let outer_shape = b.shape(vec![EntryKind::Ref], false, true);
    let inner_shape = b.int_shape(1);
    let outer = b.new_object(outer_shape);
    let inner = b.new_object(inner_shape);
    let five = b.int(5);
    b.store(inner, 0, five);
    b.store(outer, 0, inner);
    let fs = b.frame_state(vec![outer]);
    b.deopt(fs);
    let mut graph = b.build();
    let original = graph.clone();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| n.is_allocation()), 0);
    let (values, mappings) = match graph.node(fs) {
        Node::FrameState { values, mappings } => (values.clone(), mappings.clone()),
        _ => panic!("frame state should survive"),
    };
    assert_eq!(values.len(), 1);
    let outer_marker = values[0];
    assert!(matches!(
        graph.node(outer_marker),
        Node::VirtualObject { shape } if *shape == outer_shape
    ));
    // the outer object reaches the inner one, so both get mappings
    assert_eq!(mappings.len(), 2);
    let inner_marker = match mapping_for(&mappings, outer_marker) {
        MappingKind::Virtual(entries) => entries[0],
        MappingKind::Materialized(_) => panic!("outer object should still be virtual"),
    };
    assert!(matches!(
        graph.node(inner_marker),
        Node::VirtualObject { shape } if *shape == inner_shape
    ));
    match mapping_for(&mappings, inner_marker) {
        MappingKind::Virtual(entries) => assert_eq!(entries, &vec![five]),
        MappingKind::Materialized(_) => panic!("inner object should still be virtual"),
    }

    assert_same_observations(&original, &graph, &[]);
}

#[test]
fn lock_holders_appear_in_the_deopt_state() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    b.monitor_enter(obj, 0);
    let fs = b.frame_state(vec![]);
    b.deopt(fs);
    let mut graph = b.build();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    // the object is referenced by no frame value, but deoptimizing must
    // still relock it
    match graph.node(fs) {
        Node::FrameState { values, mappings } => {
            assert!(values.is_empty());
            assert_eq!(mappings.len(), 1);
            match &mappings[0].kind {
                MappingKind::Virtual(entries) => {
                    assert_eq!(entries, &vec![graph.zero_node()])
                }
                MappingKind::Materialized(_) => panic!("lock holder should still be virtual"),
            }
        }
        _ => panic!("frame state should survive"),
    }
}

#[test]
fn deopt_points_sharing_a_state_see_their_own_snapshots() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let one = b.int(1);
    b.store(obj, 0, one);
    let fs = b.frame_state(vec![obj]);
    let call = b.call_with_state(vec![], fs);
    let two = b.int(2);
    b.store(obj, 0, two);
    let deopt = b.deopt(fs);
    let mut graph = b.build();
    let original = graph.clone();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    assert_eq!(count_nodes(&graph, |n| n.is_allocation()), 0);

    // both points started on one shared state; a store separates them, so
    // each must end up with a private snapshot of its own heap
    let call_fs = graph.node(call).frame_state().expect("call keeps a state");
    let deopt_fs = graph.node(deopt).frame_state().expect("deopt keeps a state");
    assert_ne!(call_fs, deopt_fs);

    for (fs, expected) in [(call_fs, one), (deopt_fs, two)] {
        match graph.node(fs) {
            Node::FrameState { values, mappings } => {
                let marker = values[0];
                match mapping_for(mappings, marker) {
                    MappingKind::Virtual(entries) => assert_eq!(entries, &vec![expected]),
                    MappingKind::Materialized(_) => panic!("object should still be virtual"),
                }
            }
            _ => panic!("frame state should survive"),
        }
    }

    assert_same_observations(&original, &graph, &[]);
}

#[test]
fn escaped_object_maps_to_its_materialized_value() {
    let mut b = GraphBuilder::new();
    let shape = b.int_shape(1);
    let obj = b.new_object(shape);
    let two = b.int(2);
    b.store(obj, 0, two);
    b.call(vec![obj]);
    let fs = b.frame_state(vec![obj]);
    b.deopt(fs);
    let mut graph = b.build();
    let original = graph.clone();

    let changed = optimize(&mut graph).unwrap();

    assert!(changed);
    let mat = find_node(&graph, |n| matches!(n, Node::Materialize { .. }));
    match graph.node(fs) {
        Node::FrameState { values, mappings } => {
            // the frame still names the object through its marker, and the
            // mapping points at the real allocation
            let marker = values[0];
            assert!(matches!(graph.node(marker), Node::VirtualObject { .. }));
            match mapping_for(mappings, marker) {
                MappingKind::Materialized(value) => assert_eq!(*value, mat),
                MappingKind::Virtual(_) => panic!("escaped object should not map virtually"),
            }
        }
        _ => panic!("frame state should survive"),
    }

    assert_same_observations(&original, &graph, &[]);
}
