use rustc_hash::FxHashMap;
use thiserror::Error;

use super::block::BlockId;
use super::graph::{Graph, ENTRY_BLOCK_ID};
use super::node::{MappingKind, Node, NodeId, Op, ShapeId};

/// A reference interpreter over scheduled graphs. It exists to pin down
/// observable behavior: two graphs are interchangeable iff they produce the
/// same observation list for the same inputs.
///
/// Observations render heap values structurally, with back references for
/// shared or cyclic objects, so a graph that keeps an object virtual and one
/// that allocates it for real compare equal.

#[derive(Debug, Error, PartialEq, Eq)]
#[error("evaluation failed: {0}")]
pub struct EvalError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Call(Vec<String>),
    Deopt(Vec<String>),
    Return(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Int(i64),
    Ref(usize),
}

#[derive(Debug)]
struct HeapObject {
    shape: ShapeId,
    fields: Vec<Value>,
}

pub fn run_graph(graph: &Graph, params: &[i64], fuel: usize) -> Result<Vec<Observation>, EvalError> {
    let machine = Machine {
        graph,
        params,
        env: FxHashMap::default(),
        heap: vec![],
        observations: vec![],
    };

    machine.run(fuel)
}

struct Machine<'a> {
    graph: &'a Graph,
    params: &'a [i64],
    env: FxHashMap<NodeId, Value>,
    heap: Vec<HeapObject>,
    observations: Vec<Observation>,
}

impl<'a> Machine<'a> {
    fn run(mut self, mut fuel: usize) -> Result<Vec<Observation>, EvalError> {
        let mut current: BlockId = ENTRY_BLOCK_ID;
        let mut prev: Option<BlockId> = None;

        loop {
            if fuel == 0 {
                return Err(EvalError("out of fuel".into()));
            }
            fuel -= 1;

            if let Some(prev) = prev {
                self.transfer_phis(current, prev)?;
            }

            let mut next: Option<BlockId> = None;
            let node_ids = self.graph[current].get_nodes().clone();

            for id in node_ids {
                match self.graph.node(id).clone() {
                    Node::New { shape, .. } => {
                        let count = self.graph.shape(shape).entry_count();
                        let object = self.alloc(shape, vec![Value::Int(0); count]);
                        self.env.insert(id, object);
                    }
                    Node::Materialize { shape, entries, .. } => {
                        let mut fields = vec![];
                        for entry in entries {
                            fields.push(self.eval(entry)?);
                        }
                        let object = self.alloc(shape, fields);
                        self.env.insert(id, object);
                    }
                    Node::Load { object, field, .. } => {
                        let object = self.eval_ref(object)?;
                        let value = self.heap[object].fields[field];
                        self.env.insert(id, value);
                    }
                    Node::Store { object, field, value, .. } => {
                        let object = self.eval_ref(object)?;
                        let value = self.eval(value)?;
                        self.heap[object].fields[field] = value;
                    }
                    Node::MonitorEnter { object, .. } | Node::MonitorExit { object, .. } => {
                        self.eval(object)?;
                    }
                    Node::Call { args, frame_state } => {
                        let mut renderer = Renderer::new(&self);
                        let mut rendered = vec![];
                        for arg in args.iter() {
                            let value = self.eval(*arg)?;
                            rendered.push(renderer.render(value));
                        }
                        self.observations.push(Observation::Call(rendered));

                        if let Some(fs) = frame_state {
                            let rendered = self.render_frame_state(fs)?;
                            self.observations.push(Observation::Deopt(rendered));
                        }

                        self.env.insert(id, Value::Int(0));
                    }
                    Node::Deopt { frame_state } => {
                        let rendered = self.render_frame_state(frame_state)?;
                        self.observations.push(Observation::Deopt(rendered));
                        return Ok(self.observations);
                    }
                    Node::Return { value } => {
                        let value = self.eval(value)?;
                        let rendered = Renderer::new(&self).render(value);
                        self.observations.push(Observation::Return(rendered));
                        return Ok(self.observations);
                    }
                    Node::Branch { cond } => {
                        let cond = self.eval_int(cond)?;
                        let successors = self.graph[current].get_successors();
                        next = Some(if cond != 0 { successors[0] } else { successors[1] });
                    }
                    node => {
                        return Err(EvalError(format!("unexpected node in schedule: {node:?}")));
                    }
                }
            }

            prev = Some(current);
            current = match next {
                Some(block) => block,
                None => match self.graph[current].get_successors().first() {
                    Some(block) => *block,
                    None => return Err(EvalError(format!("block{current} has no successor"))),
                },
            };
        }
    }

    fn transfer_phis(&mut self, block: BlockId, prev: BlockId) -> Result<(), EvalError> {
        let index = self.graph[block]
            .get_predecessors()
            .iter()
            .position(|p| *p == prev)
            .ok_or_else(|| EvalError(format!("block{prev} is not a predecessor of block{block}")))?;

        let mut transfers = vec![];
        for phi in self.graph[block].get_phis().iter() {
            let Node::Phi { inputs, .. } = self.graph.node(*phi) else {
                return Err(EvalError(format!("phi list of block{block} holds non-phi n{phi}")));
            };
            transfers.push((*phi, self.eval(inputs[index])?));
        }

        for (phi, value) in transfers {
            self.env.insert(phi, value);
        }

        Ok(())
    }

    fn alloc(&mut self, shape: ShapeId, fields: Vec<Value>) -> Value {
        let id = self.heap.len();
        self.heap.push(HeapObject { shape, fields });
        Value::Ref(id)
    }

    fn eval(&self, id: NodeId) -> Result<Value, EvalError> {
        if let Some(value) = self.env.get(&id) {
            return Ok(*value);
        }

        match self.graph.node(id) {
            Node::Const { value } => Ok(Value::Int(*value)),
            Node::Param { index } => match self.params.get(*index) {
                Some(value) => Ok(Value::Int(*value)),
                None => Err(EvalError(format!("missing parameter {index}"))),
            },
            Node::Binop { op, lhs, rhs } => {
                let lhs = self.eval_int(*lhs)?;
                let rhs = self.eval_int(*rhs)?;
                Ok(Value::Int(match op {
                    Op::Add => lhs.wrapping_add(rhs),
                    Op::Sub => lhs.wrapping_sub(rhs),
                    Op::Mul => lhs.wrapping_mul(rhs),
                }))
            }
            Node::Proxy { value, .. } => self.eval(*value),
            node => Err(EvalError(format!("no value for n{id}: {node:?}"))),
        }
    }

    fn eval_int(&self, id: NodeId) -> Result<i64, EvalError> {
        match self.eval(id)? {
            Value::Int(value) => Ok(value),
            Value::Ref(_) => Err(EvalError(format!("n{id} is a reference, expected an integer"))),
        }
    }

    fn eval_ref(&self, id: NodeId) -> Result<usize, EvalError> {
        match self.eval(id)? {
            Value::Ref(object) => Ok(object),
            Value::Int(_) => Err(EvalError(format!("n{id} is not a reference"))),
        }
    }

    fn render_frame_state(&self, fs: NodeId) -> Result<Vec<String>, EvalError> {
        let Node::FrameState { values, mappings } = self.graph.node(fs) else {
            return Err(EvalError(format!("n{fs} is not a frame state")));
        };

        let mut renderer = Renderer::new(self);
        let mut rendered = vec![];

        for value in values.iter() {
            if let Some(Node::VirtualObject { .. }) = self.graph.try_node(*value) {
                rendered.push(renderer.render_virtual(*value, mappings)?);
            } else {
                rendered.push(renderer.render(self.eval(*value)?));
            }
        }

        Ok(rendered)
    }
}

#[derive(Hash, PartialEq, Eq)]
enum RenderKey {
    Heap(usize),
    Virtual(NodeId),
}

/// Renders values structurally. Labels are assigned in traversal order, so
/// the text is independent of heap slot numbering and node ids.
struct Renderer<'a, 'b> {
    machine: &'a Machine<'b>,
    labels: FxHashMap<RenderKey, usize>,
}

impl<'a, 'b> Renderer<'a, 'b> {
    fn new(machine: &'a Machine<'b>) -> Self {
        Self {
            machine,
            labels: FxHashMap::default(),
        }
    }

    fn render(&mut self, value: Value) -> String {
        match value {
            Value::Int(value) => format!("{value}"),
            Value::Ref(object) => {
                if let Some(label) = self.labels.get(&RenderKey::Heap(object)) {
                    return format!("@{label}");
                }

                let label = self.labels.len();
                self.labels.insert(RenderKey::Heap(object), label);

                let shape = self.machine.heap[object].shape;
                let fields: Vec<String> = self.machine.heap[object]
                    .fields
                    .clone()
                    .into_iter()
                    .map(|field| self.render(field))
                    .collect();

                format!("o{label}:s{shape}[{}]", fields.join(", "))
            }
        }
    }

    fn render_virtual(
        &mut self,
        object: NodeId,
        mappings: &[super::node::ObjectMapping],
    ) -> Result<String, EvalError> {
        if let Some(label) = self.labels.get(&RenderKey::Virtual(object)) {
            return Ok(format!("@{label}"));
        }

        let mapping = mappings
            .iter()
            .find(|mapping| mapping.object == object)
            .ok_or_else(|| EvalError(format!("virtual n{object} has no mapping")))?;

        match &mapping.kind {
            MappingKind::Materialized(value) => Ok(self.render(self.machine.eval(*value)?)),
            MappingKind::Virtual(entries) => {
                let label = self.labels.len();
                self.labels.insert(RenderKey::Virtual(object), label);

                let Node::VirtualObject { shape } = self.machine.graph.node(object) else {
                    return Err(EvalError(format!("n{object} is not a virtual object")));
                };

                let mut rendered = vec![];
                for entry in entries.iter() {
                    if let Some(Node::VirtualObject { .. }) = self.machine.graph.try_node(*entry) {
                        rendered.push(self.render_virtual(*entry, mappings)?);
                    } else {
                        rendered.push(self.render(self.machine.eval(*entry)?));
                    }
                }

                Ok(format!("o{label}:s{shape}[{}]", rendered.join(", ")))
            }
        }
    }
}
