use rustc_hash::FxHashMap;

use crate::ea::effects::{Anchor, Effect, EffectList};
use crate::ea::error::EaError;
use crate::ea::metrics::{MaterializeCause, Metrics};
use crate::ea::object::{ObjectId, ObjectState, ObjectTable};
use crate::ea::state::BlockState;
use crate::ir::{BlockId, EntryKind, FieldId, Graph, Node, NodeId, NodeIdSource, ShapeId, NO_NODE};

/// Materializes `object` in `state` unless it already escaped there, and
/// hands back the node holding its heap instance.
#[allow(clippy::too_many_arguments)]
pub(crate) fn ensure_materialized(
    state: &mut BlockState,
    object: ObjectId,
    anchor: Anchor,
    objects: &ObjectTable,
    graph: &Graph,
    ids: &mut NodeIdSource,
    effects: &mut EffectList,
    metrics: &mut Metrics,
    cause: MaterializeCause,
) -> Result<NodeId, EaError> {
    if state.object_state(object).is_virtual() {
        metrics.count_materialization_cause(cause);
        state.materialize_at(anchor, object, objects, graph, ids, effects, metrics)?;
    }

    Ok(state.object_state(object).get_materialized_value())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PhiKey {
    Object(ObjectId),
    ReadCache(NodeId, FieldId),
}

/// Combines the states arriving over a merge's predecessors into one state.
///
/// Created phis are cached by what they merge, so re-running the same merge
/// (another round after a materialization, or another pass over a loop body)
/// lands on the same node ids. Loop convergence depends on that: the merged
/// state is compared by node identity.
pub struct MergeProcessor {
    block: BlockId,
    pub merge_effects: EffectList,
    pub after_merge_effects: EffectList,
    pub new_state: BlockState,
    cached_phis: FxHashMap<PhiKey, NodeId>,
    value_phis: FxHashMap<ObjectId, Vec<Option<NodeId>>>,
    value_object_phis: FxHashMap<NodeId, Vec<Option<NodeId>>>,
    value_object_virtuals: FxHashMap<NodeId, ObjectId>,
}

impl MergeProcessor {
    pub fn new(block: BlockId) -> Self {
        Self {
            block,
            merge_effects: EffectList::new(),
            after_merge_effects: EffectList::new(),
            new_state: BlockState::new(),
            cached_phis: FxHashMap::default(),
            value_phis: FxHashMap::default(),
            value_object_phis: FxHashMap::default(),
            value_object_virtuals: FxHashMap::default(),
        }
    }

    pub fn take_new_state(&mut self) -> BlockState {
        std::mem::take(&mut self.new_state)
    }

    fn cached_phi(&mut self, key: PhiKey, ids: &mut NodeIdSource) -> NodeId {
        *self.cached_phis.entry(key).or_insert_with(|| ids.reserve())
    }

    /// Runs the merge. Materializing an object in a predecessor invalidates
    /// values other objects may already have merged, so the whole merge
    /// restarts (with its effects discarded) until no new materialization
    /// happens. Predecessor states are mutated in place by those
    /// materializations.
    pub fn merge(
        &mut self,
        graph: &Graph,
        ids: &mut NodeIdSource,
        objects: &mut ObjectTable,
        metrics: &mut Metrics,
        block_effects: &mut FxHashMap<BlockId, EffectList>,
        states: &mut [BlockState],
    ) -> Result<(), EaError> {
        let preds = graph[self.block].get_predecessors().clone();
        debug_assert_eq!(preds.len(), states.len());

        // only objects every predecessor knows can survive the merge
        let mut intersection: Vec<ObjectId> = states[0].object_ids().collect();
        intersection.retain(|object| states[1..].iter().all(|state| state.has_object(*object)));

        loop {
            self.merge_effects.clear();
            self.after_merge_effects.clear();
            self.new_state = BlockState::meet_aliases(states);

            let mut restart = false;

            for object in intersection.iter() {
                restart |= self.merge_object(
                    *object,
                    &preds,
                    states,
                    graph,
                    ids,
                    objects,
                    metrics,
                    block_effects,
                )?;
            }

            for phi in graph[self.block].get_phis().clone() {
                restart |= self.process_phi(
                    phi,
                    &preds,
                    states,
                    graph,
                    ids,
                    objects,
                    metrics,
                    block_effects,
                )?;
            }

            if !restart {
                break;
            }

            log::trace!("a merge at block{} materialized, restarting it", self.block);
        }

        self.merge_read_cache(graph, ids, states);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_object(
        &mut self,
        object: ObjectId,
        preds: &[BlockId],
        states: &mut [BlockState],
        graph: &Graph,
        ids: &mut NodeIdSource,
        objects: &ObjectTable,
        metrics: &mut Metrics,
        block_effects: &mut FxHashMap<BlockId, EffectList>,
    ) -> Result<bool, EaError> {
        let virtual_count = states
            .iter()
            .filter(|state| state.object_state(object).is_virtual())
            .count();
        let locks_match = states[1..]
            .iter()
            .all(|state| state.object_state(object).locks_equal(states[0].object_state(object)));

        if virtual_count < states.len() || !locks_match {
            return self.merge_materialized(object, preds, states, graph, ids, objects, metrics, block_effects);
        }

        if states[1..]
            .iter()
            .all(|state| state.object_state(object) == states[0].object_state(object))
        {
            // same on every path, share it outright
            let shared = states[0].object_state(object).clone();
            self.new_state.add_object(shared);
            return Ok(false);
        }

        // still virtual everywhere; differing entries merge through phis
        let entry_count = states[0].object_state(object).get_entries().len();
        let locks = states[0].object_state(object).get_locks().clone();
        let ensure = states
            .iter()
            .any(|state| state.object_state(object).ensure_virtualized());
        let mut values = states[0].object_state(object).get_entries().clone();
        let mut restart = false;

        {
            let phis = self
                .value_phis
                .entry(object)
                .or_insert_with(|| vec![None; entry_count]);

            // an entry that diverged once keeps its phi in later rounds
            for index in 0..entry_count {
                if phis[index].is_none() {
                    let first = states[0].object_state(object).get_entry(index);
                    let diverges = states[1..]
                        .iter()
                        .any(|state| state.object_state(object).get_entry(index) != first);
                    if diverges {
                        phis[index] = Some(ids.reserve());
                    }
                }
            }
        }

        let phis = self.value_phis[&object].clone();

        'entries: for index in 0..entry_count {
            let Some(phi) = phis[index] else {
                continue;
            };

            self.merge_effects.add(Effect::AddFloating {
                id: phi,
                node: Node::Phi {
                    block: self.block,
                    inputs: vec![NO_NODE; states.len()],
                },
            });

            for (i, state) in states.iter_mut().enumerate() {
                if !state.object_state(object).is_virtual() {
                    // a field materialization below just escaped this very
                    // object in some predecessor; the restart redoes it all
                    break 'entries;
                }

                let mut value = state.object_state(object).get_entry(index);

                if let Some(value_object) = state.object_for(value) {
                    if state.object_state(value_object).is_virtual() {
                        restart = true;
                    }

                    value = ensure_materialized(
                        state,
                        value_object,
                        Anchor::BlockEnd(preds[i]),
                        objects,
                        graph,
                        ids,
                        block_effects.get_mut(&preds[i]).expect("predecessor has no effect list"),
                        metrics,
                        MaterializeCause::Merge,
                    )?;
                    // the materialization can transitively escape `object`
                    // itself; the restart will then redo this merge
                    if state.object_state(object).is_virtual() {
                        state.object_state_mut(object).set_entry(index, value);
                    }
                }

                self.after_merge_effects.add(Effect::SetPhiInput {
                    phi,
                    index: i,
                    value,
                });
            }

            values[index] = phi;
        }

        let mut merged = ObjectState::new_virtual(object, values, ensure);
        merged.set_locks(locks);
        self.new_state.add_object(merged);
        Ok(restart)
    }

    /// Some predecessor escaped the object (or the lock stacks disagree);
    /// all of them have to. A phi picks the heap instance per path unless
    /// every path already agrees on one.
    #[allow(clippy::too_many_arguments)]
    fn merge_materialized(
        &mut self,
        object: ObjectId,
        preds: &[BlockId],
        states: &mut [BlockState],
        graph: &Graph,
        ids: &mut NodeIdSource,
        objects: &ObjectTable,
        metrics: &mut Metrics,
        block_effects: &mut FxHashMap<BlockId, EffectList>,
    ) -> Result<bool, EaError> {
        let all_materialized = states
            .iter()
            .all(|state| !state.object_state(object).is_virtual());

        if all_materialized {
            let first = states[0].object_state(object).get_materialized_value();
            if states[1..]
                .iter()
                .all(|state| state.object_state(object).get_materialized_value() == first)
            {
                self.new_state.add_object(ObjectState::new_materialized(object, first));
                return Ok(false);
            }
        }

        let phi = self.cached_phi(PhiKey::Object(object), ids);
        self.merge_effects.add(Effect::AddFloating {
            id: phi,
            node: Node::Phi {
                block: self.block,
                inputs: vec![NO_NODE; states.len()],
            },
        });

        let mut restart = false;

        for (i, state) in states.iter_mut().enumerate() {
            if state.object_state(object).is_virtual() {
                restart = true;
            }

            let value = ensure_materialized(
                state,
                object,
                Anchor::BlockEnd(preds[i]),
                objects,
                graph,
                ids,
                block_effects.get_mut(&preds[i]).expect("predecessor has no effect list"),
                metrics,
                MaterializeCause::Merge,
            )?;

            self.after_merge_effects.add(Effect::SetPhiInput {
                phi,
                index: i,
                value,
            });
        }

        self.new_state.add_object(ObjectState::new_materialized(object, phi));
        Ok(restart)
    }

    /// Phis over object references. If every input is the same virtual
    /// object the phi is just another alias. If the inputs are distinct but
    /// identity-free objects of one shape with scalar entries, the merge
    /// result stays virtual behind per-entry phis. Anything else escapes.
    #[allow(clippy::too_many_arguments)]
    fn process_phi(
        &mut self,
        phi: NodeId,
        preds: &[BlockId],
        states: &mut [BlockState],
        graph: &Graph,
        ids: &mut NodeIdSource,
        objects: &mut ObjectTable,
        metrics: &mut Metrics,
        block_effects: &mut FxHashMap<BlockId, EffectList>,
    ) -> Result<bool, EaError> {
        let Node::Phi { inputs, .. } = graph.node(phi).clone() else {
            return Ok(false);
        };
        debug_assert_eq!(inputs.len(), states.len());

        let mut input_objects: Vec<Option<ObjectId>> = vec![];
        let mut virtual_count = 0;
        let mut any_object = false;
        let mut lock_free = true;

        for (i, state) in states.iter().enumerate() {
            let object = state.object_for(inputs[i]);
            input_objects.push(object);

            if let Some(object) = object {
                any_object = true;
                let object_state = state.object_state(object);

                if object_state.is_virtual() {
                    virtual_count += 1;
                    lock_free &= !object_state.has_locks();
                } else {
                    self.after_merge_effects.add(Effect::SetPhiInput {
                        phi,
                        index: i,
                        value: object_state.get_materialized_value(),
                    });
                }
            }
        }

        if !any_object {
            return Ok(false);
        }

        let all_virtual =
            virtual_count == states.len() && input_objects.iter().all(|object| object.is_some());

        if all_virtual {
            let first = input_objects[0].expect("checked above");

            if input_objects[1..].iter().all(|object| *object == Some(first)) {
                self.new_state.add_alias(phi, first);
                return Ok(false);
            }

            let first_shape = objects.get(first).shape;
            let same_shape = input_objects[1..]
                .iter()
                .all(|object| objects.get(object.expect("checked above")).shape == first_shape);

            if same_shape && lock_free && self.can_revirtualize(graph, first_shape) {
                self.revirtualize_phi(phi, first_shape, &inputs, states, graph, ids, objects);
                return Ok(false);
            }
        }

        // mixed inputs: every object flowing in has to exist on the heap
        let mut restart = false;

        for (i, state) in states.iter_mut().enumerate() {
            let Some(object) = input_objects[i] else {
                continue;
            };

            if state.object_state(object).is_virtual() {
                restart = true;

                let value = ensure_materialized(
                    state,
                    object,
                    Anchor::BlockEnd(preds[i]),
                    objects,
                    graph,
                    ids,
                    block_effects.get_mut(&preds[i]).expect("predecessor has no effect list"),
                    metrics,
                    MaterializeCause::Phi,
                )?;

                self.after_merge_effects.add(Effect::SetPhiInput {
                    phi,
                    index: i,
                    value,
                });
            }
        }

        Ok(restart)
    }

    fn can_revirtualize(&self, graph: &Graph, shape: ShapeId) -> bool {
        let shape = graph.shape(shape);

        !shape.has_identity && shape.entry_kinds.iter().all(|kind| *kind == EntryKind::Int)
    }

    #[allow(clippy::too_many_arguments)]
    fn revirtualize_phi(
        &mut self,
        phi: NodeId,
        shape: ShapeId,
        inputs: &[NodeId],
        states: &[BlockState],
        graph: &Graph,
        ids: &mut NodeIdSource,
        objects: &mut ObjectTable,
    ) {
        let object = match self.value_object_virtuals.get(&phi) {
            Some(object) => *object,
            None => {
                let marker = ids.reserve();
                let object = objects.register(shape, marker, false);
                self.value_object_virtuals.insert(phi, object);
                object
            }
        };
        let marker = objects.get(object).node;

        self.merge_effects.add(Effect::AddFloating {
            id: marker,
            node: Node::VirtualObject { shape },
        });

        let entry_count = graph.shape(shape).entry_count();

        {
            let entry_phis = self
                .value_object_phis
                .entry(phi)
                .or_insert_with(|| vec![None; entry_count]);
            for slot in entry_phis.iter_mut() {
                if slot.is_none() {
                    *slot = Some(ids.reserve());
                }
            }
        }

        let entry_phis = self.value_object_phis[&phi].clone();
        let mut entries = vec![];

        for (index, entry_phi) in entry_phis.into_iter().enumerate() {
            let entry_phi = entry_phi.expect("filled above");

            self.merge_effects.add(Effect::AddFloating {
                id: entry_phi,
                node: Node::Phi {
                    block: self.block,
                    inputs: vec![NO_NODE; states.len()],
                },
            });

            for (i, state) in states.iter().enumerate() {
                let input_object = state.object_for(inputs[i]).expect("all inputs are virtual");
                self.after_merge_effects.add(Effect::SetPhiInput {
                    phi: entry_phi,
                    index: i,
                    value: state.object_state(input_object).get_entry(index),
                });
            }

            entries.push(entry_phi);
        }

        self.new_state
            .add_object(ObjectState::new_virtual(object, entries, false));
        self.new_state.add_alias(phi, object);
        self.new_state.add_alias(marker, object);
    }

    /// Cached reads survive the merge when available on every path; when
    /// the values differ a phi carries the merged read. Reads keyed by a
    /// phi base merge through the phi's per-predecessor inputs.
    fn merge_read_cache(&mut self, graph: &Graph, ids: &mut NodeIdSource, states: &[BlockState]) {
        for ((object, field), value) in states[0].read_cache_entries() {
            let mut on_every_path = true;
            let mut same_value = true;

            for state in states[1..].iter() {
                match state.get_read_cache(object, field) {
                    None => {
                        on_every_path = false;
                        break;
                    }
                    Some(other) if other != value => same_value = false,
                    Some(_) => {}
                }
            }

            if !on_every_path {
                continue;
            }

            if same_value {
                self.new_state.add_read_cache(object, field, value);
            } else {
                let phi = self.cached_phi(PhiKey::ReadCache(object, field), ids);
                self.merge_effects.add(Effect::AddFloating {
                    id: phi,
                    node: Node::Phi {
                        block: self.block,
                        inputs: vec![NO_NODE; states.len()],
                    },
                });

                for (i, state) in states.iter().enumerate() {
                    self.after_merge_effects.add(Effect::SetPhiInput {
                        phi,
                        index: i,
                        value: state.get_read_cache(object, field).expect("checked above"),
                    });
                }

                self.new_state.add_read_cache(object, field, phi);
            }
        }

        for phi in graph[self.block].get_phis().clone() {
            let Node::Phi { inputs, .. } = graph.node(phi).clone() else {
                continue;
            };

            for ((object, field), _) in states[0].read_cache_entries() {
                if object != states[0].get_scalar_alias(inputs[0]) {
                    continue;
                }

                let mut values = vec![];
                for (i, state) in states.iter().enumerate() {
                    match state.get_read_cache(inputs[i], field) {
                        Some(value) => values.push(value),
                        None => {
                            values.clear();
                            break;
                        }
                    }
                }

                if values.is_empty() {
                    continue;
                }

                let merged = self.cached_phi(PhiKey::ReadCache(phi, field), ids);
                self.merge_effects.add(Effect::AddFloating {
                    id: merged,
                    node: Node::Phi {
                        block: self.block,
                        inputs: vec![NO_NODE; states.len()],
                    },
                });

                for (i, value) in values.into_iter().enumerate() {
                    self.after_merge_effects.add(Effect::SetPhiInput {
                        phi: merged,
                        index: i,
                        value,
                    });
                }

                self.new_state.add_read_cache(phi, field, merged);
            }
        }
    }
}
