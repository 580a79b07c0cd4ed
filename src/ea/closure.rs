use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ea::effects::{Anchor, Effect, EffectList};
use crate::ea::error::{BailoutReason, EaError};
use crate::ea::merge::{ensure_materialized, MergeProcessor};
use crate::ea::metrics::{MaterializeCause, Metrics};
use crate::ea::object::{ObjectId, ObjectTable};
use crate::ea::state::BlockState;
use crate::ea::virtualize::{Virtualize, VirtualizerTool};
use crate::ir::{
    BlockId, Graph, LoopId, MappingKind, Node, NodeId, NodeIdSource, ObjectMapping, ENTRY_BLOCK_ID,
};

pub const LOOP_RETRY_LIMIT: usize = 10;

/// One full walk over the graph. Carries a [`BlockState`] along every path,
/// consults each node through [`Virtualize`], and accumulates per-block
/// effect lists that [`apply_effects`](Self::apply_effects) later replays.
pub struct PartialEscapeClosure {
    read_elimination: bool,
    changed: bool,
    loop_retry_limit: usize,
    ids: NodeIdSource,
    objects: ObjectTable,
    block_effects: FxHashMap<BlockId, EffectList>,
    frame_state_uses: FxHashMap<NodeId, usize>,
    loop_merge_effects: FxHashMap<LoopId, EffectList>,
    merge_processors: FxHashMap<BlockId, MergeProcessor>,
    metrics: Metrics,
}

impl PartialEscapeClosure {
    pub fn new(graph: &Graph, read_elimination: bool) -> Self {
        let mut block_effects = FxHashMap::default();
        let mut frame_state_uses: FxHashMap<NodeId, usize> = FxHashMap::default();
        for block in graph.get_blocks().iter() {
            block_effects.insert(block.get_id(), EffectList::new());

            for id in block.get_nodes().iter() {
                if let Some(fs) = graph.node(*id).frame_state() {
                    *frame_state_uses.entry(fs).or_insert(0) += 1;
                }
            }
        }

        Self {
            read_elimination,
            changed: false,
            loop_retry_limit: LOOP_RETRY_LIMIT,
            ids: NodeIdSource::new(graph),
            objects: ObjectTable::default(),
            block_effects,
            frame_state_uses,
            loop_merge_effects: FxHashMap::default(),
            merge_processors: FxHashMap::default(),
            metrics: Metrics::default(),
        }
    }

    pub fn set_loop_retry_limit(&mut self, limit: usize) {
        self.loop_retry_limit = limit;
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn run(&mut self, graph: &Graph) -> Result<(), EaError> {
        self.iterate(graph, ENTRY_BLOCK_ID, BlockState::new(), None)?;
        Ok(())
    }

    /// Walks the region starting at `start`, bounded by `boundary` (loop
    /// bodies pass their member set). Merges fire once all predecessor end
    /// states exist. Returns the state at the end of every processed block.
    fn iterate(
        &mut self,
        graph: &Graph,
        start: BlockId,
        initial_state: BlockState,
        boundary: Option<&FxHashSet<BlockId>>,
    ) -> Result<FxHashMap<BlockId, BlockState>, EaError> {
        let mut end_states: FxHashMap<BlockId, BlockState> = FxHashMap::default();
        // keyed by exit block; two exits can share one in-loop predecessor
        let mut loop_exit_states: FxHashMap<BlockId, BlockState> = FxHashMap::default();
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        let mut current = start;
        let mut state = initial_state;

        'outer: loop {
            state = self.process_block(graph, current, state)?;

            let successors = graph[current].get_successors().clone();

            // straight-line fast path keeps the state moving without a clone
            if successors.len() == 1 {
                let succ = successors[0];
                let inside = boundary.map_or(true, |b| b.contains(&succ));

                if inside
                    && graph.loop_with_header(succ).is_none()
                    && graph[succ].get_predecessors().len() == 1
                {
                    current = succ;
                    continue 'outer;
                }
            }

            end_states.insert(current, state);

            for succ in successors {
                if let Some(boundary) = boundary {
                    if !boundary.contains(&succ) {
                        // leaving the region; the caller picks up the end state
                        continue;
                    }
                }

                if let Some(lp) = graph.loop_with_header(succ) {
                    if graph.get_loop(lp).members.contains(&current) {
                        // back edge; the body walk stops here
                        continue;
                    }

                    let entry = end_states[&current].clone();
                    let exit_states = self.process_loop(graph, lp, entry)?;

                    let exits = graph.get_loop(lp).exits.clone();
                    for (exit, exit_state) in exits.into_iter().zip(exit_states) {
                        loop_exit_states.insert(exit, exit_state);
                        queue.push_back(exit);
                    }
                    continue;
                }

                let preds = graph[succ].get_predecessors();
                if preds.len() > 1 {
                    // the last arriving predecessor schedules the merge
                    if preds.iter().all(|pred| end_states.contains_key(pred)) {
                        queue.push_back(succ);
                    }
                } else {
                    queue.push_back(succ);
                }
            }

            let Some(next) = queue.pop_front() else {
                break 'outer;
            };

            let preds = graph[next].get_predecessors().clone();

            if preds.len() > 1 {
                let mut states: Vec<BlockState> = preds
                    .iter()
                    .map(|pred| end_states[pred].clone())
                    .collect();

                let merged = self.merge_block(graph, next, &mut states)?;

                // merge materializations mutate predecessor states; write
                // them back for any other merge consuming the same ends
                for (pred, pred_state) in preds.iter().zip(states) {
                    end_states.insert(*pred, pred_state);
                }

                state = merged;
            } else {
                state = match loop_exit_states.remove(&next) {
                    Some(exit_state) => exit_state,
                    None => end_states[&preds[0]].clone(),
                };
            }

            current = next;
        }

        Ok(end_states)
    }

    fn merge_block(
        &mut self,
        graph: &Graph,
        block: BlockId,
        states: &mut [BlockState],
    ) -> Result<BlockState, EaError> {
        let mut processor = self
            .merge_processors
            .remove(&block)
            .unwrap_or_else(|| MergeProcessor::new(block));

        processor.merge(
            graph,
            &mut self.ids,
            &mut self.objects,
            &mut self.metrics,
            &mut self.block_effects,
            states,
        )?;

        let effects = self
            .block_effects
            .get_mut(&block)
            .expect("block has no effect list");
        effects.append(&mut processor.merge_effects);
        effects.append(&mut processor.after_merge_effects);

        let new_state = processor.take_new_state();
        self.merge_processors.insert(block, processor);
        Ok(new_state)
    }

    /// Iterates the loop body until the state flowing over the back edges
    /// merges into the same state the body started from. Each extra round
    /// first discards the effects the previous round queued for the loop's
    /// blocks. On convergence the header merge effects move to the front of
    /// the header's list, the back-edge phi inputs wait until the whole loop
    /// has applied, and every exit gets its state proxied out.
    fn process_loop(
        &mut self,
        graph: &Graph,
        lp: LoopId,
        initial_state: BlockState,
    ) -> Result<Vec<BlockState>, EaError> {
        let header = graph.get_loop(lp).header;
        let members: FxHashSet<BlockId> = graph.get_loop(lp).members.iter().copied().collect();
        let ends = graph.get_loop(lp).ends.clone();
        let exits = graph.get_loop(lp).exits.clone();
        let preds = graph[header].get_predecessors().clone();

        // the header's forward edge comes first, then one edge per loop end
        if preds.len() != ends.len() + 1 || preds[1..] != ends[..] {
            return Err(BailoutReason::IllFormedLoop { header }.into());
        }

        let mut processor = self
            .merge_processors
            .remove(&header)
            .unwrap_or_else(|| MergeProcessor::new(header));
        let mut entry_state = initial_state;
        let mut last_merged = entry_state.clone();

        for round in 0..self.loop_retry_limit {
            let end_states = self.iterate(graph, header, last_merged.clone(), Some(&members))?;

            let mut states = vec![entry_state];
            for end in ends.iter() {
                states.push(
                    end_states
                        .get(end)
                        .ok_or(BailoutReason::IllFormedLoop { header })?
                        .clone(),
                );
            }

            processor.merge(
                graph,
                &mut self.ids,
                &mut self.objects,
                &mut self.metrics,
                &mut self.block_effects,
                &mut states,
            )?;

            // materializations forced into the entry predecessor persist
            entry_state = states.swap_remove(0);

            if processor.new_state.equivalent_to(&last_merged) {
                log::trace!("loop at block{header} stabilized after {} rounds", round + 1);

                self.block_effects
                    .get_mut(&header)
                    .expect("block has no effect list")
                    .prepend(&mut processor.merge_effects);

                let mut after = EffectList::new();
                after.append(&mut processor.after_merge_effects);
                self.loop_merge_effects.insert(lp, after);

                let mut exit_states = vec![];
                for exit in exits {
                    let pred = graph[exit].get_predecessors()[0];
                    let mut exit_state = end_states
                        .get(&pred)
                        .ok_or(BailoutReason::IllFormedLoop { header })?
                        .clone();
                    self.process_loop_exit(exit, &entry_state, &mut exit_state);
                    exit_states.push(exit_state);
                }

                self.merge_processors.insert(header, processor);
                return Ok(exit_states);
            }

            last_merged = processor.take_new_state();

            for member in members.iter() {
                self.block_effects
                    .get_mut(member)
                    .expect("block has no effect list")
                    .clear();
            }
        }

        Err(BailoutReason::LoopRetryLimit {
            header,
            limit: self.loop_retry_limit,
        }
        .into())
    }

    /// Values computed inside the loop leave it behind proxies pinned to the
    /// exit, so later passes know they are loop-variant. Object entries, heap
    /// instances and cached reads all get the same treatment; values the loop
    /// never changed pass through untouched.
    fn process_loop_exit(&mut self, exit: BlockId, entry_state: &BlockState, exit_state: &mut BlockState) {
        let effects = self
            .block_effects
            .get_mut(&exit)
            .expect("block has no effect list");

        let object_ids: Vec<ObjectId> = exit_state.object_ids().collect();

        for object in object_ids {
            if exit_state.object_state(object).is_virtual() {
                let entries = exit_state.object_state(object).get_entries().clone();

                for (index, value) in entries.into_iter().enumerate() {
                    if exit_state.object_for(value).is_some() {
                        // a reference to another tracked object, nothing to pin
                        continue;
                    }

                    let loop_variant = match entry_state.object_state_opt(object) {
                        Some(initial) if initial.is_virtual() => initial.get_entry(index) != value,
                        _ => true,
                    };

                    if loop_variant {
                        let proxy = self.ids.reserve();
                        effects.add(Effect::AddFloating {
                            id: proxy,
                            node: Node::Proxy { value, exit },
                        });
                        exit_state.object_state_mut(object).set_entry(index, proxy);
                    }
                }
            } else {
                let was_virtual = entry_state
                    .object_state_opt(object)
                    .map_or(true, |initial| initial.is_virtual());

                if was_virtual {
                    let value = exit_state.object_state(object).get_materialized_value();
                    let proxy = self.ids.reserve();
                    effects.add(Effect::AddFloating {
                        id: proxy,
                        node: Node::Proxy { value, exit },
                    });
                    exit_state
                        .object_state_mut(object)
                        .update_materialized_value(proxy);
                }
            }
        }

        for ((object, field), value) in exit_state.read_cache_entries() {
            if entry_state.get_read_cache(object, field) != Some(value) {
                let proxy = self.ids.reserve();
                effects.add(Effect::AddFloating {
                    id: proxy,
                    node: Node::Proxy { value, exit },
                });
                exit_state.add_read_cache(object, field, proxy);
            }
        }
    }

    fn process_block(
        &mut self,
        graph: &Graph,
        block: BlockId,
        mut state: BlockState,
    ) -> Result<BlockState, EaError> {
        let mut effects = self.block_effects.remove(&block).unwrap_or_default();
        let node_ids = graph[block].get_nodes().clone();

        for id in node_ids {
            let deleted = self.process_node(graph, id, &mut state, &mut effects)?;

            if self.read_elimination && !deleted {
                self.process_read(graph, id, &mut state, &mut effects);
            }
        }

        self.block_effects.insert(block, effects);
        Ok(state)
    }

    fn process_node(
        &mut self,
        graph: &Graph,
        id: NodeId,
        state: &mut BlockState,
        effects: &mut EffectList,
    ) -> Result<bool, EaError> {
        let node = graph.node(id).clone();

        if node.can_be_virtualized() {
            let mut tool = VirtualizerTool::new(
                graph,
                &mut self.ids,
                state,
                effects,
                &mut self.objects,
                &mut self.metrics,
                id,
            );

            node.virtualize(id, &mut tool)?;

            if tool.was_deleted() {
                if !node.is_allocation() {
                    // folding an access is a win in itself; virtualizing a
                    // lone allocation only pays off alongside one
                    self.changed = true;
                }
                return Ok(true);
            }
        }

        if let Some(fs) = node.frame_state() {
            self.process_frame_state(graph, id, fs, state, effects);
        }

        // any remaining input that names a tracked object is an escape
        for input in node.value_inputs() {
            let Some(object) = state.object_for(input) else {
                continue;
            };

            let value = ensure_materialized(
                state,
                object,
                Anchor::Before(id),
                &self.objects,
                graph,
                &mut self.ids,
                effects,
                &mut self.metrics,
                MaterializeCause::UnhandledInput,
            )?;

            effects.add(Effect::ReplaceFirstInput {
                user: id,
                old: input,
                new: value,
            });
        }

        Ok(false)
    }

    /// A frame state describes the deopt snapshot at this point. Virtual
    /// objects it can see (directly, through other virtual objects, or by
    /// holding a lock) are recorded as mappings so deopt can rebuild them.
    /// A state shared between several deopt points is split into a private
    /// copy per point first; the snapshots diverge as the heap evolves
    /// between the points.
    fn process_frame_state(
        &mut self,
        graph: &Graph,
        user: NodeId,
        fs: NodeId,
        state: &mut BlockState,
        effects: &mut EffectList,
    ) {
        let Node::FrameState { values, .. } = graph.node(fs).clone() else {
            return;
        };

        let mut reachable: Vec<ObjectId> = vec![];
        let mut seen: FxHashSet<ObjectId> = FxHashSet::default();
        let mut replaced_values: Vec<(NodeId, NodeId)> = vec![];

        for value in values {
            if let Some(object) = state.object_for(value) {
                replaced_values.push((value, self.objects.get(object).node));

                if seen.insert(object) {
                    reachable.push(object);
                }
            }
        }

        for object in state.object_ids().collect::<Vec<_>>() {
            let object_state = state.object_state(object);
            if object_state.is_virtual() && object_state.has_locks() && seen.insert(object) {
                reachable.push(object);
            }
        }

        if reachable.is_empty() {
            return;
        }

        let fs = if self.frame_state_uses.get(&fs).copied().unwrap_or(0) > 1 {
            let copy = self.ids.reserve();
            effects.add(Effect::AddFloating {
                id: copy,
                node: graph.node(fs).clone(),
            });
            effects.add(Effect::ReplaceFirstInput {
                user,
                old: fs,
                new: copy,
            });
            copy
        } else {
            fs
        };

        for (value, marker) in replaced_values {
            effects.add(Effect::ReplaceFirstInput {
                user: fs,
                old: value,
                new: marker,
            });
        }

        let mut index = 0;
        while index < reachable.len() {
            let object = reachable[index];
            index += 1;

            if !state.object_state(object).is_virtual() {
                continue;
            }

            for entry in state.object_state(object).get_entries().clone() {
                if let Some(entry_object) = state.object_for(entry) {
                    if seen.insert(entry_object) {
                        reachable.push(entry_object);
                    }
                }
            }
        }

        for object in reachable {
            let object_state = state.object_state(object);

            let kind = if object_state.is_virtual() {
                let entries = object_state
                    .get_entries()
                    .iter()
                    .map(|entry| match state.object_for(*entry) {
                        Some(entry_object) => {
                            let entry_state = state.object_state(entry_object);
                            if entry_state.is_virtual() {
                                self.objects.get(entry_object).node
                            } else {
                                entry_state.get_materialized_value()
                            }
                        }
                        None => state.get_scalar_alias(*entry),
                    })
                    .collect();

                MappingKind::Virtual(entries)
            } else {
                MappingKind::Materialized(object_state.get_materialized_value())
            };

            effects.add(Effect::AddVirtualMapping {
                frame_state: fs,
                mapping: ObjectMapping {
                    object: self.objects.get(object).node,
                    kind,
                },
            });
        }
    }

    /// Flow-sensitive load elimination over non-virtual memory. Runs behind
    /// the virtualizer: accesses it folded never get here.
    fn process_read(
        &mut self,
        graph: &Graph,
        id: NodeId,
        state: &mut BlockState,
        effects: &mut EffectList,
    ) {
        match graph.node(id).clone() {
            Node::Load { volatile: true, .. } | Node::Store { volatile: true, .. } => {
                state.kill_read_cache();
            }
            Node::Load { object, field, .. } => match state.get_read_cache(object, field) {
                Some(cached) => {
                    self.metrics.loads_eliminated += 1;
                    effects.add(Effect::ReplaceAtUsages { node: id, with: cached });
                    state.add_scalar_alias(id, cached);
                    effects.add(Effect::DeleteNode { id });
                    self.changed = true;
                }
                None => {
                    self.metrics.loads_not_eliminated += 1;
                    state.add_read_cache(object, field, id);
                }
            },
            Node::Store { object, field, value, .. } => {
                self.metrics.stores_recorded += 1;

                let cached = state.get_read_cache(object, field);
                let value = state.get_scalar_alias(value);

                // the stored field may alias any other base
                state.kill_read_cache_field(field);
                state.add_read_cache(object, field, value);

                if cached == Some(value) {
                    // writes back what the field already holds
                    effects.add(Effect::DeleteNode { id });
                    self.changed = true;
                }
            }
            Node::Call { .. }
            | Node::Deopt { .. }
            | Node::MonitorEnter { .. }
            | Node::MonitorExit { .. } => {
                state.kill_read_cache();
            }
            _ => {}
        }
    }

    /// Replays every queued effect in control flow order. Loop back-edge phi
    /// inputs wait until the loop's entire body has applied, since they name
    /// nodes the body inserts.
    pub fn apply_effects(&mut self, graph: &mut Graph) {
        for step in self.apply_order(graph) {
            match step {
                ApplyStep::Block(block) => {
                    if let Some(effects) = self.block_effects.get(&block) {
                        effects.apply_all(graph);
                    }
                }
                ApplyStep::LoopEnd(lp) => {
                    if let Some(effects) = self.loop_merge_effects.get(&lp) {
                        effects.apply_all(graph);
                    }
                }
            }
        }
    }

    fn apply_order(&self, graph: &Graph) -> Vec<ApplyStep> {
        let loops = graph.get_loops();
        let innermost = |block: BlockId| -> Option<LoopId> {
            loops
                .iter()
                .enumerate()
                .filter(|(_, data)| data.members.contains(&block))
                .min_by_key(|(_, data)| data.members.len())
                .map(|(lp, _)| lp)
        };

        let mut steps = vec![];
        let mut active: Vec<LoopId> = vec![];
        let mut closed: FxHashSet<LoopId> = FxHashSet::default();

        for block in graph.reverse_postorder() {
            // outermost-first chain of loops containing this block
            let mut chain = vec![];
            let mut cursor = innermost(block);
            while let Some(lp) = cursor {
                chain.push(lp);
                cursor = loops[lp].parent;
            }
            chain.reverse();

            while let Some(top) = active.last().copied() {
                if chain.contains(&top) {
                    break;
                }
                steps.push(ApplyStep::LoopEnd(top));
                closed.insert(top);
                active.pop();
            }

            for lp in chain {
                if !active.contains(&lp) && !closed.contains(&lp) {
                    active.push(lp);
                }
            }

            steps.push(ApplyStep::Block(block));
        }

        while let Some(top) = active.pop() {
            steps.push(ApplyStep::LoopEnd(top));
        }

        steps
    }
}

enum ApplyStep {
    Block(BlockId),
    LoopEnd(LoopId),
}
