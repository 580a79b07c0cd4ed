use super::block::BlockId;

pub type NodeId = usize;
pub type FieldId = usize;
pub type LockId = usize;
pub type ShapeId = usize;

// placeholder for phi inputs that are filled in by a later effect
pub const NO_NODE: NodeId = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Int,
    Ref,
}

/// Deopt metadata for one heap object: either a recipe to rebuild it
/// from entry values, or a pointer to its runtime instance.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingKind {
    Virtual(Vec<NodeId>),
    Materialized(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMapping {
    pub object: NodeId,
    pub kind: MappingKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const {
        value: i64,
    },
    Param {
        index: usize,
    },
    Binop {
        op: Op,
        lhs: NodeId,
        rhs: NodeId,
    },
    New {
        shape: ShapeId,
        ensure_virtualized: bool,
    },
    Load {
        object: NodeId,
        field: FieldId,
        volatile: bool,
    },
    Store {
        object: NodeId,
        field: FieldId,
        value: NodeId,
        volatile: bool,
    },
    MonitorEnter {
        object: NodeId,
        lock: LockId,
    },
    MonitorExit {
        object: NodeId,
        lock: LockId,
    },
    Call {
        args: Vec<NodeId>,
        frame_state: Option<NodeId>,
    },
    Deopt {
        frame_state: NodeId,
    },
    Return {
        value: NodeId,
    },
    Branch {
        cond: NodeId,
    },
    Phi {
        block: BlockId,
        inputs: Vec<NodeId>,
    },
    Proxy {
        value: NodeId,
        exit: BlockId,
    },
    FrameState {
        values: Vec<NodeId>,
        mappings: Vec<ObjectMapping>,
    },
    /// Floating marker standing for one virtualized allocation. Carries no
    /// computation, only identity for frame state mappings.
    VirtualObject {
        shape: ShapeId,
    },
    /// Allocation plus field initialization, produced when a virtual object
    /// has to exist on the heap after all.
    Materialize {
        shape: ShapeId,
        entries: Vec<NodeId>,
        locks: Vec<LockId>,
    },
}

impl Node {
    /// Data inputs that can leak an object reference. Frame state links are
    /// excluded, they get their own treatment.
    pub fn value_inputs(&self) -> Vec<NodeId> {
        match self {
            Node::Const { .. }
            | Node::Param { .. }
            | Node::New { .. }
            | Node::Deopt { .. }
            | Node::VirtualObject { .. } => vec![],
            Node::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            Node::Load { object, .. } => vec![*object],
            Node::Store { object, value, .. } => vec![*object, *value],
            Node::MonitorEnter { object, .. } => vec![*object],
            Node::MonitorExit { object, .. } => vec![*object],
            Node::Call { args, .. } => args.clone(),
            Node::Return { value } => vec![*value],
            Node::Branch { cond } => vec![*cond],
            Node::Phi { inputs, .. } => inputs.clone(),
            Node::Proxy { value, .. } => vec![*value],
            Node::FrameState { values, .. } => values.clone(),
            Node::Materialize { entries, .. } => entries.clone(),
        }
    }

    /// Every node id this node refers to, including frame state links and
    /// object mappings.
    pub fn all_ids(&self) -> Vec<NodeId> {
        let mut ids = self.value_inputs();

        match self {
            Node::Call { frame_state: Some(fs), .. } => ids.push(*fs),
            Node::Deopt { frame_state } => ids.push(*frame_state),
            Node::FrameState { mappings, .. } => {
                for mapping in mappings.iter() {
                    ids.push(mapping.object);
                    match &mapping.kind {
                        MappingKind::Virtual(entries) => ids.extend(entries.iter().copied()),
                        MappingKind::Materialized(value) => ids.push(*value),
                    }
                }
            }
            _ => {}
        }

        ids
    }

    pub fn for_each_id_mut(&mut self, mut f: impl FnMut(&mut NodeId)) {
        match self {
            Node::Const { .. }
            | Node::Param { .. }
            | Node::New { .. }
            | Node::VirtualObject { .. } => {}
            Node::Binop { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Node::Load { object, .. } => f(object),
            Node::Store { object, value, .. } => {
                f(object);
                f(value);
            }
            Node::MonitorEnter { object, .. } => f(object),
            Node::MonitorExit { object, .. } => f(object),
            Node::Call { args, frame_state } => {
                for arg in args.iter_mut() {
                    f(arg);
                }
                if let Some(fs) = frame_state {
                    f(fs);
                }
            }
            Node::Deopt { frame_state } => f(frame_state),
            Node::Return { value } => f(value),
            Node::Branch { cond } => f(cond),
            Node::Phi { inputs, .. } => {
                for input in inputs.iter_mut() {
                    f(input);
                }
            }
            Node::Proxy { value, .. } => f(value),
            Node::FrameState { values, mappings } => {
                for value in values.iter_mut() {
                    f(value);
                }
                for mapping in mappings.iter_mut() {
                    f(&mut mapping.object);
                    match &mut mapping.kind {
                        MappingKind::Virtual(entries) => {
                            for entry in entries.iter_mut() {
                                f(entry);
                            }
                        }
                        MappingKind::Materialized(value) => f(value),
                    }
                }
            }
            Node::Materialize { entries, .. } => {
                for entry in entries.iter_mut() {
                    f(entry);
                }
            }
        }
    }

    /// Replaces the first occurrence of `old` among this node's ids.
    /// Returns false if `old` was not found.
    pub fn replace_first_id(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut replaced = false;

        self.for_each_id_mut(|id| {
            if !replaced && *id == old {
                *id = new;
                replaced = true;
            }
        });

        replaced
    }

    pub fn is_allocation(&self) -> bool {
        matches!(self, Node::New { .. })
    }

    pub fn frame_state(&self) -> Option<NodeId> {
        match self {
            Node::Call { frame_state, .. } => *frame_state,
            Node::Deopt { frame_state } => Some(*frame_state),
            _ => None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Node::Branch { .. } | Node::Return { .. })
    }
}
