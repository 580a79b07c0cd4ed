use std::rc::Rc;

use crate::ir::{FieldId, LockId, NodeId, ShapeId, NO_NODE};

pub type ObjectId = usize;

/// One allocation the analysis is tracking. `node` is the floating marker
/// standing for this object in frame state mappings.
#[derive(Debug)]
pub struct VirtualObject {
    pub shape: ShapeId,
    pub node: NodeId,
    pub ensure_virtualized: bool,
}

#[derive(Debug, Default)]
pub struct ObjectTable {
    objects: Vec<VirtualObject>,
}

impl ObjectTable {
    pub fn register(&mut self, shape: ShapeId, node: NodeId, ensure_virtualized: bool) -> ObjectId {
        let id = self.objects.len();
        self.objects.push(VirtualObject {
            shape,
            node,
            ensure_virtualized,
        });
        id
    }

    pub fn get(&self, id: ObjectId) -> &VirtualObject {
        &self.objects[id]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Immutable list of held locks, outermost last. Cloning a block state
/// shares the list, so lock stacks cost nothing to copy.
#[derive(Debug, PartialEq, Eq)]
pub struct LockNode {
    pub lock: LockId,
    pub next: LockList,
}

pub type LockList = Option<Rc<LockNode>>;

pub fn push_lock(list: &LockList, lock: LockId) -> LockList {
    Some(Rc::new(LockNode {
        lock,
        next: list.clone(),
    }))
}

pub fn pop_lock(list: &LockList) -> Option<(LockId, LockList)> {
    list.as_ref().map(|node| (node.lock, node.next.clone()))
}

/// Held locks, innermost first.
pub fn lock_vec(list: &LockList) -> Vec<LockId> {
    let mut locks = vec![];
    let mut cursor = list.clone();

    while let Some(node) = cursor {
        locks.push(node.lock);
        cursor = node.next.clone();
    }

    locks
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Virtual,
    Materialized,
}

/// Per-branch knowledge about one object: while virtual, the values of its
/// entries; once escaped, the node computing its heap instance.
#[derive(Debug, Clone)]
pub struct ObjectState {
    object: ObjectId,
    state: EscapeState,
    entries: Vec<NodeId>,
    materialized_value: NodeId,
    locks: LockList,
    ensure_virtualized: bool,
}

impl ObjectState {
    pub fn new_virtual(object: ObjectId, entries: Vec<NodeId>, ensure_virtualized: bool) -> Self {
        Self {
            object,
            state: EscapeState::Virtual,
            entries,
            materialized_value: NO_NODE,
            locks: None,
            ensure_virtualized,
        }
    }

    pub fn new_materialized(object: ObjectId, value: NodeId) -> Self {
        Self {
            object,
            state: EscapeState::Materialized,
            entries: vec![],
            materialized_value: value,
            locks: None,
            ensure_virtualized: false,
        }
    }

    pub fn get_object(&self) -> ObjectId {
        self.object
    }

    pub fn is_virtual(&self) -> bool {
        self.state == EscapeState::Virtual
    }

    pub fn get_entries(&self) -> &Vec<NodeId> {
        debug_assert!(self.is_virtual());
        &self.entries
    }

    pub fn get_entry(&self, field: FieldId) -> NodeId {
        debug_assert!(self.is_virtual());
        self.entries[field]
    }

    pub fn set_entry(&mut self, field: FieldId, value: NodeId) {
        debug_assert!(self.is_virtual());
        self.entries[field] = value;
    }

    /// Transition to materialized. The entry values become meaningless and
    /// are dropped.
    pub fn escape(&mut self, materialized_value: NodeId) {
        debug_assert!(self.is_virtual());
        self.state = EscapeState::Materialized;
        self.materialized_value = materialized_value;
        self.entries.clear();
    }

    pub fn get_materialized_value(&self) -> NodeId {
        debug_assert!(!self.is_virtual());
        self.materialized_value
    }

    pub fn update_materialized_value(&mut self, value: NodeId) {
        debug_assert!(!self.is_virtual());
        self.materialized_value = value;
    }

    pub fn add_lock(&mut self, lock: LockId) {
        self.locks = push_lock(&self.locks, lock);
    }

    pub fn remove_lock(&mut self) -> Option<LockId> {
        let (lock, rest) = pop_lock(&self.locks)?;
        self.locks = rest;
        Some(lock)
    }

    pub fn has_locks(&self) -> bool {
        self.locks.is_some()
    }

    pub fn get_locks(&self) -> &LockList {
        &self.locks
    }

    pub fn set_locks(&mut self, locks: LockList) {
        self.locks = locks;
    }

    pub fn locks_equal(&self, other: &ObjectState) -> bool {
        self.locks == other.locks
    }

    pub fn ensure_virtualized(&self) -> bool {
        self.ensure_virtualized
    }
}

impl PartialEq for ObjectState {
    fn eq(&self, other: &Self) -> bool {
        self.object == other.object
            && self.state == other.state
            && self.entries == other.entries
            && self.materialized_value == other.materialized_value
            && self.locks == other.locks
            && self.ensure_virtualized == other.ensure_virtualized
    }
}
