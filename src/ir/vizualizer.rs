use graphviz_rust::{
    cmd::{CommandArg, Format},
    dot_generator::*,
    dot_structures::{self, *},
    exec,
    printer::{DotPrinter, PrinterContext},
};

// the dot macros expand to `Graph::DiGraph`, so the IR graph
// has to come in under another name
use super::graph::Graph as IrGraph;

pub fn cfg_to_svg(graph: &IrGraph, name: &str) {
    let g = build_dot(graph, name);

    let svg_name = format!("{}.svg", name);
    exec(
        g,
        &mut PrinterContext::default(),
        vec![CommandArg::Format(Format::Svg), CommandArg::Output(svg_name)],
    )
    .unwrap();
}

pub fn cfg_to_dot(graph: &IrGraph, name: &str) -> String {
    let g = build_dot(graph, name);

    g.print(&mut PrinterContext::default())
}

fn build_dot(graph: &IrGraph, name: &str) -> dot_structures::Graph {
    let mut g = graph!(strict di id!(name));

    for block in graph.get_blocks().iter() {
        let id = block.get_id();
        let label = format!("\"block{} ({} nodes)\"", id, block.get_nodes().len());

        g.add_stmt(stmt!(node!(id; attr!("shape", "box"), attr!("label", label))));

        for successor in block.get_successors().iter() {
            g.add_stmt(stmt!(edge!(node_id!(id) => node_id!(successor))));
        }
    }

    g
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, ENTRY_BLOCK_ID};

    #[test]
    fn dot_output_lists_blocks_and_edges() {
        let mut b = GraphBuilder::new();
        let exit = b.block();
        b.edge(ENTRY_BLOCK_ID, exit);
        let zero = b.int(0);
        b.switch_to(exit);
        b.ret(zero);
        let graph = b.build();

        let dot = cfg_to_dot(&graph, "cfg");

        assert!(dot.contains("digraph cfg"));
        assert!(dot.contains("->"));
    }
}
