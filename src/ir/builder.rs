use super::block::BlockId;
use super::graph::{Graph, LoopData, LoopId, Shape, ENTRY_BLOCK_ID};
use super::node::{EntryKind, FieldId, LockId, Node, NodeId, Op, ShapeId};

/// Convenience layer for assembling graphs by hand. Value nodes (constants,
/// params, binops) float; memory and control nodes land in the block the
/// builder currently points at.
pub struct GraphBuilder {
    graph: Graph,
    current: BlockId,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            current: ENTRY_BLOCK_ID,
        }
    }

    pub fn build(self) -> Graph {
        self.graph
    }

    pub fn shape(&mut self, entry_kinds: Vec<EntryKind>, is_array: bool, has_identity: bool) -> ShapeId {
        self.graph.add_shape(Shape {
            entry_kinds,
            is_array,
            has_identity,
        })
    }

    pub fn int_shape(&mut self, entry_count: usize) -> ShapeId {
        self.shape(vec![EntryKind::Int; entry_count], false, true)
    }

    pub fn block(&mut self) -> BlockId {
        self.graph.add_block()
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Wires `from -> to`. On a branch target list and a merge's predecessor
    /// list alike, order of calls is order of slots.
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        self.graph.add_edge(from, to);
    }

    pub fn loop_info(
        &mut self,
        header: BlockId,
        members: Vec<BlockId>,
        ends: Vec<BlockId>,
        exits: Vec<BlockId>,
    ) -> LoopId {
        self.graph.add_loop(LoopData {
            header,
            members,
            ends,
            exits,
            parent: None,
        })
    }

    pub fn nested_loop_info(
        &mut self,
        header: BlockId,
        members: Vec<BlockId>,
        ends: Vec<BlockId>,
        exits: Vec<BlockId>,
        parent: LoopId,
    ) -> LoopId {
        self.graph.add_loop(LoopData {
            header,
            members,
            ends,
            exits,
            parent: Some(parent),
        })
    }

    pub fn int(&mut self, value: i64) -> NodeId {
        self.graph.add_node(Node::Const { value })
    }

    pub fn param(&mut self, index: usize) -> NodeId {
        self.graph.add_node(Node::Param { index })
    }

    pub fn binop(&mut self, op: Op, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.graph.add_node(Node::Binop { op, lhs, rhs })
    }

    pub fn new_object(&mut self, shape: ShapeId) -> NodeId {
        let id = self.graph.add_node(Node::New {
            shape,
            ensure_virtualized: false,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn new_object_ensured(&mut self, shape: ShapeId) -> NodeId {
        let id = self.graph.add_node(Node::New {
            shape,
            ensure_virtualized: true,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn load(&mut self, object: NodeId, field: FieldId) -> NodeId {
        let id = self.graph.add_node(Node::Load {
            object,
            field,
            volatile: false,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn load_volatile(&mut self, object: NodeId, field: FieldId) -> NodeId {
        let id = self.graph.add_node(Node::Load {
            object,
            field,
            volatile: true,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn store(&mut self, object: NodeId, field: FieldId, value: NodeId) -> NodeId {
        let id = self.graph.add_node(Node::Store {
            object,
            field,
            value,
            volatile: false,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn store_volatile(&mut self, object: NodeId, field: FieldId, value: NodeId) -> NodeId {
        let id = self.graph.add_node(Node::Store {
            object,
            field,
            value,
            volatile: true,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn monitor_enter(&mut self, object: NodeId, lock: LockId) -> NodeId {
        let id = self.graph.add_node(Node::MonitorEnter { object, lock });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn monitor_exit(&mut self, object: NodeId, lock: LockId) -> NodeId {
        let id = self.graph.add_node(Node::MonitorExit { object, lock });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn call(&mut self, args: Vec<NodeId>) -> NodeId {
        let id = self.graph.add_node(Node::Call {
            args,
            frame_state: None,
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn call_with_state(&mut self, args: Vec<NodeId>, frame_state: NodeId) -> NodeId {
        let id = self.graph.add_node(Node::Call {
            args,
            frame_state: Some(frame_state),
        });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn frame_state(&mut self, values: Vec<NodeId>) -> NodeId {
        self.graph.add_node(Node::FrameState {
            values,
            mappings: vec![],
        })
    }

    pub fn deopt(&mut self, frame_state: NodeId) -> NodeId {
        let id = self.graph.add_node(Node::Deopt { frame_state });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn ret(&mut self, value: NodeId) -> NodeId {
        let id = self.graph.add_node(Node::Return { value });
        self.graph[self.current].push_node(id);
        id
    }

    pub fn branch(&mut self, cond: NodeId) -> NodeId {
        let id = self.graph.add_node(Node::Branch { cond });
        self.graph[self.current].push_node(id);
        id
    }

    /// Phi for `block`; one input per predecessor, in predecessor order.
    pub fn phi(&mut self, block: BlockId, inputs: Vec<NodeId>) -> NodeId {
        let id = self.graph.add_node(Node::Phi { block, inputs });
        self.graph[block].push_phi(id);
        id
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
