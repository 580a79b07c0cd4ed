use crate::ea::{EaError, PartialEscapePhase};
use crate::ir::{run_graph, Graph, Node, NodeId};

mod differential_tests;
mod frame_state_tests;
mod read_elim_tests;
mod virtualization_tests;

pub(self) fn optimize(graph: &mut Graph) -> Result<bool, EaError> {
    PartialEscapePhase::new(true, false).run(graph)
}

pub(self) fn optimize_with_reads(graph: &mut Graph) -> Result<bool, EaError> {
    PartialEscapePhase::new(true, true).run(graph)
}

pub(self) fn count_nodes(graph: &Graph, pred: fn(&Node) -> bool) -> usize {
    graph.node_ids().filter(|id| pred(graph.node(*id))).count()
}

pub(self) fn find_node(graph: &Graph, pred: fn(&Node) -> bool) -> NodeId {
    graph
        .node_ids()
        .find(|id| pred(graph.node(*id)))
        .expect("expected node is missing")
}

pub(self) fn return_value(graph: &Graph) -> NodeId {
    let ret = find_node(graph, |n| matches!(n, Node::Return { .. }));
    match graph.node(ret) {
        Node::Return { value } => *value,
        _ => unreachable!(),
    }
}

/// Runs both graphs in the reference interpreter and asserts they produce
/// the same observations.
pub(self) fn assert_same_observations(original: &Graph, optimized: &Graph, params: &[i64]) {
    let before = run_graph(original, params, 10_000).expect("original graph failed to run");
    let after = run_graph(optimized, params, 10_000).expect("optimized graph failed to run");
    assert_eq!(before, after);
}
