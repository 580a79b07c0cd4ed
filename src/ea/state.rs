use rustc_hash::{FxHashMap, FxHashSet};

use crate::ea::effects::{Anchor, Effect, EffectList};
use crate::ea::error::{BailoutReason, EaError};
use crate::ea::metrics::Metrics;
use crate::ea::object::{lock_vec, ObjectId, ObjectState, ObjectTable};
use crate::ir::{FieldId, Graph, Node, NodeId, NodeIdSource};

/// Everything the analysis knows at one program point: the state of every
/// tracked object, which values stand for which object, which values were
/// folded away, and which loads are already available.
///
/// Object states are slotted by object id. An object discovered on one path
/// simply has no slot on paths that never saw it, and slot indices stay
/// stable across the whole analysis.
#[derive(Debug, Clone, Default)]
pub struct BlockState {
    object_states: Vec<Option<ObjectState>>,
    object_aliases: FxHashMap<NodeId, ObjectId>,
    scalar_aliases: FxHashMap<NodeId, NodeId>,
    read_cache: FxHashMap<(NodeId, FieldId), NodeId>,
}

impl BlockState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, state: ObjectState) {
        let object = state.get_object();

        if object >= self.object_states.len() {
            self.object_states.resize_with(object + 1, || None);
        }

        self.object_states[object] = Some(state);
    }

    pub fn has_object(&self, object: ObjectId) -> bool {
        self.object_state_opt(object).is_some()
    }

    pub fn object_state(&self, object: ObjectId) -> &ObjectState {
        self.object_states[object]
            .as_ref()
            .expect("object is not tracked in this state")
    }

    pub fn object_state_opt(&self, object: ObjectId) -> Option<&ObjectState> {
        self.object_states.get(object).and_then(|slot| slot.as_ref())
    }

    pub fn object_state_mut(&mut self, object: ObjectId) -> &mut ObjectState {
        self.object_states[object]
            .as_mut()
            .expect("object is not tracked in this state")
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.object_states.len()).filter(|id| self.object_states[*id].is_some())
    }

    pub fn add_alias(&mut self, value: NodeId, object: ObjectId) {
        self.object_aliases.insert(value, object);
    }

    /// The tracked object `value` stands for, if any. Scalar aliases are
    /// resolved first so a folded load of an object field still maps home.
    pub fn object_for(&self, value: NodeId) -> Option<ObjectId> {
        self.object_aliases.get(&self.get_scalar_alias(value)).copied()
    }

    pub fn add_scalar_alias(&mut self, alias: NodeId, value: NodeId) {
        self.scalar_aliases.insert(alias, value);
    }

    pub fn get_scalar_alias(&self, value: NodeId) -> NodeId {
        let mut current = value;

        while let Some(next) = self.scalar_aliases.get(&current) {
            current = *next;
        }

        current
    }

    pub fn add_read_cache(&mut self, object: NodeId, field: FieldId, value: NodeId) {
        let object = self.get_scalar_alias(object);
        let value = self.get_scalar_alias(value);
        self.read_cache.insert((object, field), value);
    }

    pub fn get_read_cache(&self, object: NodeId, field: FieldId) -> Option<NodeId> {
        let object = self.get_scalar_alias(object);
        self.read_cache.get(&(object, field)).copied()
    }

    /// A store to `field` may alias any base, so every cached read of that
    /// field is dropped.
    pub fn kill_read_cache_field(&mut self, field: FieldId) {
        self.read_cache.retain(|(_, f), _| *f != field);
    }

    pub fn kill_read_cache(&mut self) {
        self.read_cache.clear();
    }

    pub fn read_cache_entries(&self) -> Vec<((NodeId, FieldId), NodeId)> {
        let mut entries: Vec<_> = self
            .read_cache
            .iter()
            .map(|(key, value)| (*key, *value))
            .collect();

        entries.sort();
        entries
    }

    /// Intersection of the alias maps of all `states`. Starting point for a
    /// merged state; object states and the read cache are merged separately.
    pub fn meet_aliases(states: &[BlockState]) -> BlockState {
        let mut result = BlockState::new();

        for (value, object) in states[0].object_aliases.iter() {
            if states[1..]
                .iter()
                .all(|state| state.object_aliases.get(value) == Some(object))
            {
                result.object_aliases.insert(*value, *object);
            }
        }

        for (alias, value) in states[0].scalar_aliases.iter() {
            if states[1..]
                .iter()
                .all(|state| state.scalar_aliases.get(alias) == Some(value))
            {
                result.scalar_aliases.insert(*alias, *value);
            }
        }

        result
    }

    /// Loop convergence test: two states are equivalent when every object
    /// is in the same condition with the same values and the same loads are
    /// available. Alias maps follow from these, so they are not compared.
    pub fn equivalent_to(&self, other: &BlockState) -> bool {
        let slots = self.object_states.len().max(other.object_states.len());

        for object in 0..slots {
            if self.object_state_opt(object) != other.object_state_opt(object) {
                return false;
            }
        }

        self.read_cache == other.read_cache
    }

    /// Turns `object` (and transitively every virtual object it references)
    /// into real allocations at `anchor`. Cycles are broken by deferring the
    /// offending stores until all allocations in the group exist.
    #[allow(clippy::too_many_arguments)]
    pub fn materialize_at(
        &mut self,
        anchor: Anchor,
        object: ObjectId,
        objects: &ObjectTable,
        graph: &Graph,
        ids: &mut NodeIdSource,
        effects: &mut EffectList,
        metrics: &mut Metrics,
    ) -> Result<(), EaError> {
        let mut deferred = FxHashSet::default();
        let mut deferred_stores = EffectList::new();

        self.materialize_changed(
            anchor,
            object,
            objects,
            graph,
            ids,
            effects,
            &mut deferred,
            &mut deferred_stores,
            metrics,
        )?;

        effects.append(&mut deferred_stores);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn materialize_changed(
        &mut self,
        anchor: Anchor,
        object: ObjectId,
        objects: &ObjectTable,
        graph: &Graph,
        ids: &mut NodeIdSource,
        effects: &mut EffectList,
        deferred: &mut FxHashSet<ObjectId>,
        deferred_stores: &mut EffectList,
        metrics: &mut Metrics,
    ) -> Result<(), EaError> {
        let obj_state = self.object_state(object);
        let virtual_object = objects.get(object);
        let shape = graph.shape(virtual_object.shape);

        if obj_state.has_locks() && shape.is_array {
            return Err(BailoutReason::LockedArrayMaterialized { object }.into());
        }

        if obj_state.ensure_virtualized() {
            return Err(BailoutReason::EnsureVirtualized { object }.into());
        }

        log::trace!("materializing object {object} (marker n{})", virtual_object.node);

        let entries = obj_state.get_entries().clone();
        let locks = lock_vec(obj_state.get_locks());
        let materialized = ids.reserve();

        self.object_state_mut(object).escape(materialized);
        deferred.insert(object);

        let mut values = entries.clone();

        for (field, entry) in entries.iter().enumerate() {
            let Some(entry_object) = self.object_for(*entry) else {
                continue;
            };

            if self.object_state(entry_object).is_virtual() {
                self.materialize_changed(
                    anchor,
                    entry_object,
                    objects,
                    graph,
                    ids,
                    effects,
                    deferred,
                    deferred_stores,
                    metrics,
                )?;
            }

            let entry_value = self.object_state(entry_object).get_materialized_value();

            if deferred.contains(&entry_object) {
                // part of a cycle with this object; initialize the field once
                // both allocations exist
                deferred_stores.add(Effect::InsertAt {
                    id: ids.reserve(),
                    node: Node::Store {
                        object: materialized,
                        field,
                        value: entry_value,
                        volatile: false,
                    },
                    anchor,
                });
                values[field] = graph.zero_node();
            } else {
                values[field] = entry_value;
            }
        }

        deferred.remove(&object);

        effects.add(Effect::InsertAt {
            id: materialized,
            node: Node::Materialize {
                shape: virtual_object.shape,
                entries: values,
                locks,
            },
            anchor,
        });

        metrics.materializations += 1;
        Ok(())
    }
}
