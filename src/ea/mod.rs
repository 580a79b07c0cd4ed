mod closure;
mod effects;
mod error;
mod merge;
mod metrics;
mod object;
mod state;
mod virtualize;

pub mod phase;

#[cfg(test)]
mod tests;

pub use closure::{PartialEscapeClosure, LOOP_RETRY_LIMIT};
pub use effects::{Anchor, Effect, EffectList};
pub use error::{BailoutReason, EaError, InternalError};
pub use merge::MergeProcessor;
pub use metrics::{MaterializeCause, Metrics};
pub use object::{ObjectId, ObjectState, ObjectTable, VirtualObject};
pub use phase::{PartialEscapePhase, PHASE_ITERATION_LIMIT};
pub use state::BlockState;
pub use virtualize::{Virtualize, VirtualizerTool};
