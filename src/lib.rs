pub mod ea;
pub mod ir;

pub use ea::{EaError, PartialEscapePhase};
pub use ir::{Graph, GraphBuilder};
