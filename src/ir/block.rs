use super::node::NodeId;

pub type BlockId = usize;

#[derive(Debug, Clone)]
pub struct Block {
    id: BlockId,
    nodes: Vec<NodeId>,
    phis: Vec<NodeId>,
    predecessors: Vec<BlockId>,
    successors: Vec<BlockId>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            nodes: vec![],
            phis: vec![],
            predecessors: vec![],
            successors: vec![],
        }
    }

    pub fn get_id(&self) -> BlockId {
        self.id
    }

    pub fn get_nodes(&self) -> &Vec<NodeId> {
        &self.nodes
    }

    pub fn get_phis(&self) -> &Vec<NodeId> {
        &self.phis
    }

    pub fn get_predecessors(&self) -> &Vec<BlockId> {
        &self.predecessors
    }

    pub fn get_successors(&self) -> &Vec<BlockId> {
        &self.successors
    }

    pub fn push_node(&mut self, id: NodeId) {
        self.nodes.push(id);
    }

    pub fn push_phi(&mut self, id: NodeId) {
        self.phis.push(id);
    }

    pub fn add_predecessor(&mut self, block_id: BlockId) {
        self.predecessors.push(block_id);
    }

    pub fn add_successor(&mut self, block_id: BlockId) {
        self.successors.push(block_id);
    }

    pub fn remove_node(&mut self, id: NodeId) {
        self.nodes.retain(|n| *n != id);
    }

    pub fn remove_phi(&mut self, id: NodeId) {
        self.phis.retain(|n| *n != id);
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    /// Inserts `id` directly in front of `before` in the schedule.
    pub fn insert_node_before(&mut self, id: NodeId, before: NodeId) {
        match self.nodes.iter().position(|n| *n == before) {
            Some(pos) => self.nodes.insert(pos, id),
            None => self.nodes.push(id),
        }
    }
}
