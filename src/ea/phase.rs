use rustc_hash::FxHashSet;

use crate::ea::closure::PartialEscapeClosure;
use crate::ea::error::{EaError, InternalError};
use crate::ea::metrics::Metrics;
use crate::ir::{Graph, MappingKind, Node, NodeId, NO_NODE};

/// Hitting the iteration bound is fine; each completed pass already applied
/// transactionally.
pub const PHASE_ITERATION_LIMIT: usize = 4;

/// The driver. Runs the closure over the graph and, if it found anything
/// worth doing, applies its effect log in one shot, verifies the result,
/// and cleans up. With `iterative` set the whole thing reruns until a pass
/// comes up empty, since applied rewrites expose new opportunities.
pub struct PartialEscapePhase {
    iterative: bool,
    read_elimination: bool,
    metrics: Metrics,
}

impl PartialEscapePhase {
    pub fn new(iterative: bool, read_elimination: bool) -> Self {
        Self {
            iterative,
            read_elimination,
            metrics: Metrics::default(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn run(&mut self, graph: &mut Graph) -> Result<bool, EaError> {
        let mut changed = false;

        for iteration in 0..PHASE_ITERATION_LIMIT {
            if !self.read_elimination && !graph.has_allocations() {
                break;
            }

            log::debug!("escape analysis pass {iteration}");

            let mut closure = PartialEscapeClosure::new(graph, self.read_elimination);
            closure.run(graph)?;
            self.metrics.absorb(closure.metrics());

            if !closure.has_changed() {
                break;
            }

            changed = true;
            closure.apply_effects(graph);
            verify_graph(graph)?;
            remove_dead_nodes(graph);
            canonicalize_phis(graph);

            if !self.iterative {
                break;
            }
        }

        self.metrics.log_debug();
        Ok(changed)
    }
}

/// Walks everything reachable from the schedule and checks that no live
/// node refers to a killed slot or an unfilled phi input, and that object
/// layouts line up with their shapes. Failing here is a bug in the effect
/// log, never a property of the input graph.
pub fn verify_graph(graph: &Graph) -> Result<(), EaError> {
    let mut reachable: FxHashSet<NodeId> = FxHashSet::default();
    let mut worklist: Vec<NodeId> = vec![];

    for block in graph.get_blocks().iter() {
        for id in block.get_nodes().iter() {
            if reachable.insert(*id) {
                worklist.push(*id);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        for input in graph.node(id).all_ids() {
            if input == NO_NODE || !graph.is_alive(input) {
                return Err(InternalError::DanglingInput { user: id, input }.into());
            }

            if reachable.insert(input) {
                worklist.push(input);
            }
        }

        match graph.node(id) {
            Node::Materialize { shape, entries, .. } => {
                let expected = graph.shape(*shape).entry_count();
                if entries.len() != expected {
                    return Err(InternalError::ShapeMismatch {
                        node: id,
                        entries: entries.len(),
                        expected,
                    }
                    .into());
                }
            }
            Node::FrameState { mappings, .. } => {
                for mapping in mappings.iter() {
                    let (Node::VirtualObject { shape }, MappingKind::Virtual(entries)) =
                        (graph.node(mapping.object), &mapping.kind)
                    else {
                        continue;
                    };

                    let expected = graph.shape(*shape).entry_count();
                    if entries.len() != expected {
                        return Err(InternalError::ShapeMismatch {
                            node: mapping.object,
                            entries: entries.len(),
                            expected,
                        }
                        .into());
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Kills every node the schedule can no longer reach. Scheduled nodes are
/// the roots; phis and other floating nodes live only through uses.
pub fn remove_dead_nodes(graph: &mut Graph) {
    let mut live: FxHashSet<NodeId> = FxHashSet::default();
    let mut worklist: Vec<NodeId> = vec![];

    live.insert(graph.zero_node());

    for block in graph.get_blocks().iter() {
        for id in block.get_nodes().iter() {
            if live.insert(*id) {
                worklist.push(*id);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        for input in graph.node(id).all_ids() {
            if live.insert(input) {
                worklist.push(input);
            }
        }
    }

    let dead: Vec<NodeId> = graph.node_ids().filter(|id| !live.contains(id)).collect();

    for id in dead {
        if let Node::Phi { block, .. } = graph.node(id) {
            let block = *block;
            graph[block].remove_phi(id);
        }

        graph.kill(id);
    }
}

/// Folds phis whose inputs (self-references aside) all agree into that one
/// value. Folding one can make another trivial, so this iterates.
pub fn canonicalize_phis(graph: &mut Graph) {
    loop {
        let mut folded = false;

        for block in 0..graph.block_count() {
            for phi in graph[block].get_phis().clone() {
                if !graph.is_alive(phi) {
                    continue;
                }

                let Node::Phi { inputs, .. } = graph.node(phi) else {
                    continue;
                };
                let inputs = inputs.clone();

                let mut unique: Option<NodeId> = None;
                let mut trivial = true;

                for input in inputs {
                    if input == phi {
                        continue;
                    }

                    match unique {
                        None => unique = Some(input),
                        Some(value) if value != input => {
                            trivial = false;
                            break;
                        }
                        Some(_) => {}
                    }
                }

                if trivial {
                    if let Some(value) = unique {
                        graph.replace_at_usages(phi, value);
                        graph[block].remove_phi(phi);
                        graph.kill(phi);
                        folded = true;
                    }
                }
            }
        }

        if !folded {
            break;
        }
    }
}
