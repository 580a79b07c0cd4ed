use crate::ea::effects::{Anchor, Effect, EffectList};
use crate::ea::error::EaError;
use crate::ea::metrics::Metrics;
use crate::ea::object::{ObjectId, ObjectState, ObjectTable};
use crate::ea::state::BlockState;
use crate::ir::{FieldId, Graph, LockId, Node, NodeId, NodeIdSource, ShapeId};

/// The seam between the driver and per-node semantics. A node that knows
/// how to take part in virtualization inspects the current state through
/// the tool and queues its own replacement.
pub trait Virtualize {
    fn can_be_virtualized(&self) -> bool;

    fn virtualize(&self, id: NodeId, tool: &mut VirtualizerTool) -> Result<(), EaError>;
}

pub struct VirtualizerTool<'a> {
    pub graph: &'a Graph,
    pub ids: &'a mut NodeIdSource,
    pub state: &'a mut BlockState,
    pub effects: &'a mut EffectList,
    pub objects: &'a mut ObjectTable,
    pub metrics: &'a mut Metrics,
    current: NodeId,
    deleted: bool,
}

impl<'a> VirtualizerTool<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: &'a Graph,
        ids: &'a mut NodeIdSource,
        state: &'a mut BlockState,
        effects: &'a mut EffectList,
        objects: &'a mut ObjectTable,
        metrics: &'a mut Metrics,
        current: NodeId,
    ) -> Self {
        Self {
            graph,
            ids,
            state,
            effects,
            objects,
            metrics,
            current,
            deleted: false,
        }
    }

    pub fn was_deleted(&self) -> bool {
        self.deleted
    }

    /// The tracked object behind `value`, if `value` is known to stand for
    /// one on this path.
    pub fn alias(&self, value: NodeId) -> Option<ObjectId> {
        self.state.object_for(value)
    }

    pub fn is_virtual(&self, object: ObjectId) -> bool {
        self.state.object_state(object).is_virtual()
    }

    /// Starts tracking a fresh allocation. Entries begin as the default
    /// value; the marker node materializes lazily through an effect.
    pub fn create_virtual_object(&mut self, shape: ShapeId, ensure_virtualized: bool) -> ObjectId {
        let marker = self.ids.reserve();
        let object = self.objects.register(shape, marker, ensure_virtualized);

        self.effects.add(Effect::AddFloating {
            id: marker,
            node: Node::VirtualObject { shape },
        });

        let entry_count = self.graph.shape(shape).entry_count();
        let entries = vec![self.graph.zero_node(); entry_count];
        self.state
            .add_object(ObjectState::new_virtual(object, entries, ensure_virtualized));

        object
    }

    pub fn mark_alias(&mut self, object: ObjectId, value: NodeId) {
        self.state.add_alias(value, object);
    }

    pub fn get_entry(&self, object: ObjectId, field: FieldId) -> NodeId {
        self.state.object_state(object).get_entry(field)
    }

    pub fn set_entry(&mut self, object: ObjectId, field: FieldId, value: NodeId) {
        let value = self.state.get_scalar_alias(value);
        self.state.object_state_mut(object).set_entry(field, value);
    }

    pub fn add_lock(&mut self, object: ObjectId, lock: LockId) {
        self.state.object_state_mut(object).add_lock(lock);
    }

    pub fn remove_lock(&mut self, object: ObjectId) -> Option<LockId> {
        self.state.object_state_mut(object).remove_lock()
    }

    /// Replaces the current node by `value` everywhere and unlinks it.
    pub fn replace_with(&mut self, value: NodeId) {
        let value = self.state.get_scalar_alias(value);

        self.effects.add(Effect::ReplaceAtUsages {
            node: self.current,
            with: value,
        });
        self.state.add_scalar_alias(self.current, value);
        self.delete();
    }

    pub fn delete(&mut self) {
        self.effects.add(Effect::DeleteNode { id: self.current });
        self.deleted = true;
    }

    /// Forces `object` onto the heap in front of the current node.
    pub fn materialize(&mut self, object: ObjectId) -> Result<NodeId, EaError> {
        self.state.materialize_at(
            Anchor::Before(self.current),
            object,
            self.objects,
            self.graph,
            self.ids,
            self.effects,
            self.metrics,
        )?;

        Ok(self.state.object_state(object).get_materialized_value())
    }
}

impl Virtualize for Node {
    fn can_be_virtualized(&self) -> bool {
        matches!(
            self,
            Node::New { .. }
                | Node::Load { volatile: false, .. }
                | Node::Store { volatile: false, .. }
                | Node::MonitorEnter { .. }
                | Node::MonitorExit { .. }
        )
    }

    fn virtualize(&self, id: NodeId, tool: &mut VirtualizerTool) -> Result<(), EaError> {
        match self {
            Node::New { shape, ensure_virtualized } => {
                let object = tool.create_virtual_object(*shape, *ensure_virtualized);
                tool.mark_alias(object, id);
                tool.metrics.allocations_virtualized += 1;
                tool.delete();
            }
            Node::Load { object, field, volatile: false } => {
                if let Some(object) = tool.alias(*object) {
                    if tool.is_virtual(object) {
                        let value = tool.get_entry(object, *field);
                        tool.replace_with(value);
                    }
                }
            }
            Node::Store { object, field, value, volatile: false } => {
                if let Some(object) = tool.alias(*object) {
                    if tool.is_virtual(object) {
                        tool.set_entry(object, *field, *value);
                        tool.delete();
                    }
                }
            }
            Node::MonitorEnter { object, lock } => {
                if let Some(object) = tool.alias(*object) {
                    if tool.is_virtual(object) {
                        tool.add_lock(object, *lock);
                        tool.delete();
                    }
                }
            }
            Node::MonitorExit { object, .. } => {
                if let Some(object) = tool.alias(*object) {
                    if tool.is_virtual(object) {
                        tool.remove_lock(object);
                        tool.delete();
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}
