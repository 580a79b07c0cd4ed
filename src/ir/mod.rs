mod block;
mod builder;
mod graph;
mod interp;
mod node;
mod printer;
mod vizualizer;

pub use block::{Block, BlockId};
pub use builder::GraphBuilder;
pub use graph::{Graph, LoopData, LoopId, NodeIdSource, Shape, ENTRY_BLOCK_ID};
pub use interp::{run_graph, EvalError, Observation};
pub use node::{
    EntryKind, FieldId, LockId, MappingKind, Node, NodeId, ObjectMapping, Op, ShapeId, NO_NODE,
};
pub use printer::graph_to_string;
pub use vizualizer::{cfg_to_dot, cfg_to_svg};
