use super::graph::Graph;
use super::node::{MappingKind, Node, NodeId, Op, NO_NODE};

pub fn graph_to_string(graph: &Graph) -> String {
    let printer = GraphPrinter::new(graph);

    printer.print()
}

struct GraphPrinter<'a> {
    graph: &'a Graph,
    result: String,
}

impl<'a> GraphPrinter<'a> {
    fn new(graph: &'a Graph) -> Self {
        Self {
            graph,
            result: String::new(),
        }
    }

    fn print(mut self) -> String {
        for block in self.graph.get_blocks().iter() {
            self.result.push_str(&format!(
                "block{}: preds={:?} succs={:?}\n",
                block.get_id(),
                block.get_predecessors(),
                block.get_successors()
            ));

            for phi in block.get_phis().iter() {
                self.print_node(*phi);
            }

            for node in block.get_nodes().iter() {
                self.print_node(*node);
            }
        }

        self.result
    }

    fn print_node(&mut self, id: NodeId) {
        let Some(node) = self.graph.try_node(id) else {
            self.result.push_str(&format!("  n{id} = <dead>\n"));
            return;
        };

        let text = match node {
            Node::Const { value } => format!("const {value}"),
            Node::Param { index } => format!("param {index}"),
            Node::Binop { op, lhs, rhs } => {
                let op = match op {
                    Op::Add => "add",
                    Op::Sub => "sub",
                    Op::Mul => "mul",
                };
                format!("{op} {}, {}", self.value(*lhs), self.value(*rhs))
            }
            Node::New { shape, ensure_virtualized } => {
                if *ensure_virtualized {
                    format!("new shape{shape} (ensure virtualized)")
                } else {
                    format!("new shape{shape}")
                }
            }
            Node::Load { object, field, volatile } => {
                let tag = if *volatile { " volatile" } else { "" };
                format!("load{tag} {}.f{field}", self.value(*object))
            }
            Node::Store { object, field, value, volatile } => {
                let tag = if *volatile { " volatile" } else { "" };
                format!("store{tag} {}.f{field} = {}", self.value(*object), self.value(*value))
            }
            Node::MonitorEnter { object, lock } => {
                format!("monitor_enter {} lock{lock}", self.value(*object))
            }
            Node::MonitorExit { object, lock } => {
                format!("monitor_exit {} lock{lock}", self.value(*object))
            }
            Node::Call { args, frame_state } => {
                let args: Vec<String> = args.iter().map(|arg| self.value(*arg)).collect();
                match frame_state {
                    Some(fs) => format!("call({}) state=n{fs}", args.join(", ")),
                    None => format!("call({})", args.join(", ")),
                }
            }
            Node::Deopt { frame_state } => format!("deopt state=n{frame_state}"),
            Node::Return { value } => format!("return {}", self.value(*value)),
            Node::Branch { cond } => format!("branch {}", self.value(*cond)),
            Node::Phi { inputs, .. } => {
                let inputs: Vec<String> = inputs.iter().map(|input| self.value(*input)).collect();
                format!("phi({})", inputs.join(", "))
            }
            Node::Proxy { value, exit } => format!("proxy {} at block{exit}", self.value(*value)),
            Node::FrameState { values, mappings } => {
                let values: Vec<String> = values.iter().map(|value| self.value(*value)).collect();
                let mappings: Vec<String> = mappings
                    .iter()
                    .map(|mapping| match &mapping.kind {
                        MappingKind::Virtual(entries) => {
                            let entries: Vec<String> =
                                entries.iter().map(|entry| self.value(*entry)).collect();
                            format!("n{} -> virtual[{}]", mapping.object, entries.join(", "))
                        }
                        MappingKind::Materialized(value) => {
                            format!("n{} -> {}", mapping.object, self.value(*value))
                        }
                    })
                    .collect();
                format!("frame_state [{}] {{{}}}", values.join(", "), mappings.join("; "))
            }
            Node::VirtualObject { shape } => format!("virtual shape{shape}"),
            Node::Materialize { shape, entries, locks } => {
                let entries: Vec<String> = entries.iter().map(|entry| self.value(*entry)).collect();
                if locks.is_empty() {
                    format!("materialize shape{shape} [{}]", entries.join(", "))
                } else {
                    format!("materialize shape{shape} [{}] locks={locks:?}", entries.join(", "))
                }
            }
        };

        self.result.push_str(&format!("  n{id} = {text}\n"));
    }

    fn value(&self, id: NodeId) -> String {
        if id == NO_NODE {
            return "_".into();
        }

        match self.graph.try_node(id) {
            Some(Node::Const { value }) => format!("{value}"),
            _ => format!("n{id}"),
        }
    }
}
