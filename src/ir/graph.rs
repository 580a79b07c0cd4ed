use std::ops::{Index, IndexMut};

use super::block::{Block, BlockId};
use super::node::{EntryKind, Node, NodeId, ShapeId};

pub type LoopId = usize;

pub const ENTRY_BLOCK_ID: BlockId = 0;

/// Layout of one allocation site: per-field kinds plus the two properties
/// escape analysis cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub entry_kinds: Vec<EntryKind>,
    pub is_array: bool,
    pub has_identity: bool,
}

impl Shape {
    pub fn entry_count(&self) -> usize {
        self.entry_kinds.len()
    }
}

/// One natural loop. The header's predecessor list is expected to hold the
/// forward edge first, then the back edges in `ends` order.
#[derive(Debug, Clone)]
pub struct LoopData {
    pub header: BlockId,
    pub members: Vec<BlockId>,
    pub ends: Vec<BlockId>,
    pub exits: Vec<BlockId>,
    pub parent: Option<LoopId>,
}

/// Control flow graph over an arena of nodes. A node id is a slot index;
/// killed nodes leave a `None` hole so ids stay stable. Node 0 is always
/// the canonical zero constant, used as the default value of fresh fields.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    blocks: Vec<Block>,
    shapes: Vec<Shape>,
    loops: Vec<LoopData>,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: vec![],
            blocks: vec![Block::new(ENTRY_BLOCK_ID)],
            shapes: vec![],
            loops: vec![],
        };

        graph.add_node(Node::Const { value: 0 });
        graph
    }

    pub fn zero_node(&self) -> NodeId {
        0
    }

    pub fn node_bound(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        id < self.nodes.len() && self.nodes[id].is_some()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id].as_ref().expect("use of dead node")
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id].as_mut().expect("use of dead node")
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(node));
        id
    }

    /// Fills a slot that was handed out by a [`NodeIdSource`]. Grows the
    /// arena as needed.
    pub fn insert(&mut self, id: NodeId, node: Node) {
        if id >= self.nodes.len() {
            self.nodes.resize_with(id + 1, || None);
        }

        debug_assert!(self.nodes[id].is_none());
        self.nodes[id] = Some(node);
    }

    pub fn kill(&mut self, id: NodeId) {
        self.nodes[id] = None;
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(|id| self.nodes[*id].is_some())
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block::new(id));
        id
    }

    pub fn get_blocks(&self) -> &Vec<Block> {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_of_node(&self, id: NodeId) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|block| block.contains_node(id))
            .map(|block| block.get_id())
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].add_successor(to);
        self.blocks[to].add_predecessor(from);
    }

    pub fn add_shape(&mut self, shape: Shape) -> ShapeId {
        let id = self.shapes.len();
        self.shapes.push(shape);
        id
    }

    pub fn shape(&self, id: ShapeId) -> &Shape {
        &self.shapes[id]
    }

    pub fn add_loop(&mut self, data: LoopData) -> LoopId {
        let id = self.loops.len();
        self.loops.push(data);
        id
    }

    pub fn get_loops(&self) -> &Vec<LoopData> {
        &self.loops
    }

    pub fn get_loop(&self, id: LoopId) -> &LoopData {
        &self.loops[id]
    }

    pub fn loop_with_header(&self, block: BlockId) -> Option<LoopId> {
        self.loops.iter().position(|data| data.header == block)
    }

    pub fn has_allocations(&self) -> bool {
        self.nodes
            .iter()
            .flatten()
            .any(|node| node.is_allocation())
    }

    /// Rewrites every reference to `old` across the arena to point at `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        for (id, slot) in self.nodes.iter_mut().enumerate() {
            if id == old {
                continue;
            }

            if let Some(node) = slot {
                node.for_each_id_mut(|input| {
                    if *input == old {
                        *input = new;
                    }
                });
            }
        }
    }

    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = vec![];

        self.postorder_visit(ENTRY_BLOCK_ID, &mut visited, &mut order);
        order.reverse();
        order
    }

    fn postorder_visit(&self, block: BlockId, visited: &mut Vec<bool>, order: &mut Vec<BlockId>) {
        if visited[block] {
            return;
        }

        visited[block] = true;

        // visiting successors in reverse keeps fallthrough paths (and with
        // them loop bodies) contiguous in the final order
        for succ in self.blocks[block].get_successors().iter().rev() {
            self.postorder_visit(*succ, visited, order);
        }

        order.push(block);
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<BlockId> for Graph {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Self::Output {
        &self.blocks[id]
    }
}

impl IndexMut<BlockId> for Graph {
    fn index_mut(&mut self, id: BlockId) -> &mut Self::Output {
        &mut self.blocks[id]
    }
}

/// Hands out fresh node ids without touching the graph. Effects that create
/// nodes reserve their slot here and fill it in on apply.
#[derive(Debug)]
pub struct NodeIdSource {
    next: NodeId,
}

impl NodeIdSource {
    pub fn new(graph: &Graph) -> Self {
        Self {
            next: graph.node_bound(),
        }
    }

    pub fn reserve(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }
}
