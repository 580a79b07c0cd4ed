use crate::ir::{BlockId, Graph, Node, NodeId, ObjectMapping};

/// Where a deferred node insertion lands once applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Directly in front of an existing scheduled node.
    Before(NodeId),
    /// At the end of a block, in front of its terminator if it has one.
    BlockEnd(BlockId),
}

/// One deferred graph edit. The analysis never mutates the graph directly;
/// it queues effects and the driver replays them in traversal order after
/// the whole graph has been processed.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Insert a floating node. Phis additionally register with their block.
    AddFloating { id: NodeId, node: Node },
    /// Insert a scheduled node at `anchor`.
    InsertAt { id: NodeId, node: Node, anchor: Anchor },
    /// Unlink a scheduled node and kill its slot.
    DeleteNode { id: NodeId },
    /// Rewrite every use of `node` to `with`.
    ReplaceAtUsages { node: NodeId, with: NodeId },
    /// Rewrite the first input of `user` equal to `old`.
    ReplaceFirstInput { user: NodeId, old: NodeId, new: NodeId },
    /// Fill one phi input slot.
    SetPhiInput { phi: NodeId, index: usize, value: NodeId },
    /// Attach deopt metadata to a frame state.
    AddVirtualMapping { frame_state: NodeId, mapping: ObjectMapping },
}

impl Effect {
    pub fn apply(&self, graph: &mut Graph) {
        match self {
            Effect::AddFloating { id, node } => {
                graph.insert(*id, node.clone());

                if let Node::Phi { block, .. } = node {
                    graph[*block].push_phi(*id);
                }
            }
            Effect::InsertAt { id, node, anchor } => {
                graph.insert(*id, node.clone());

                match anchor {
                    Anchor::Before(before) => {
                        let block = graph
                            .block_of_node(*before)
                            .expect("anchor node is not scheduled");
                        graph[block].insert_node_before(*id, *before);
                    }
                    Anchor::BlockEnd(block) => {
                        let terminator = graph[*block]
                            .get_nodes()
                            .last()
                            .filter(|last| graph.node(**last).is_terminator())
                            .copied();

                        match terminator {
                            Some(terminator) => graph[*block].insert_node_before(*id, terminator),
                            None => graph[*block].push_node(*id),
                        }
                    }
                }
            }
            Effect::DeleteNode { id } => {
                if let Some(block) = graph.block_of_node(*id) {
                    graph[block].remove_node(*id);
                }

                graph.kill(*id);
            }
            Effect::ReplaceAtUsages { node, with } => {
                graph.replace_at_usages(*node, *with);
            }
            Effect::ReplaceFirstInput { user, old, new } => {
                graph.node_mut(*user).replace_first_id(*old, *new);
            }
            Effect::SetPhiInput { phi, index, value } => {
                match graph.node_mut(*phi) {
                    Node::Phi { inputs, .. } => inputs[*index] = *value,
                    node => debug_assert!(false, "SetPhiInput on non-phi: {node:?}"),
                }
            }
            Effect::AddVirtualMapping { frame_state, mapping } => {
                match graph.node_mut(*frame_state) {
                    Node::FrameState { mappings, .. } => mappings.push(mapping.clone()),
                    node => debug_assert!(false, "AddVirtualMapping on non-state: {node:?}"),
                }
            }
        }
    }
}

/// An ordered log of effects. Supports checkpoint and rollback so
/// speculative processing (loop iterations, merge rounds) can be undone
/// before anything reaches the graph.
#[derive(Debug, Default)]
pub struct EffectList {
    effects: Vec<Effect>,
}

impl EffectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Moves all of `other` onto the end of this list.
    pub fn append(&mut self, other: &mut EffectList) {
        self.effects.append(&mut other.effects);
    }

    /// Moves all of `other` in front of this list's existing effects.
    pub fn prepend(&mut self, other: &mut EffectList) {
        self.effects.splice(0..0, other.effects.drain(..));
    }

    pub fn checkpoint(&self) -> usize {
        self.effects.len()
    }

    pub fn backtrack(&mut self, checkpoint: usize) {
        debug_assert!(checkpoint <= self.effects.len());
        self.effects.truncate(checkpoint);
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.effects.iter()
    }

    pub fn apply_all(&self, graph: &mut Graph) {
        for effect in self.effects.iter() {
            effect.apply(graph);
        }
    }
}
