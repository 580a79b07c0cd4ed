use thiserror::Error;

use crate::ea::object::ObjectId;
use crate::ir::{BlockId, NodeId};

/// Failures fall in two classes. A bailout means the analysis gave up on
/// this graph; the caller keeps the unmodified input and moves on. An
/// internal error means the analysis produced an inconsistent graph and
/// indicates a bug, not a property of the input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EaError {
    #[error("bailout: {0}")]
    Bailout(#[from] BailoutReason),
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BailoutReason {
    #[error("array object {object} would materialize while holding a lock")]
    LockedArrayMaterialized { object: ObjectId },
    #[error("object {object} is marked ensure-virtualized but has to materialize")]
    EnsureVirtualized { object: ObjectId },
    #[error("loop at block{header} did not stabilize within {limit} iterations")]
    LoopRetryLimit { header: BlockId, limit: usize },
    #[error("loop metadata at block{header} does not line up with the schedule")]
    IllFormedLoop { header: BlockId },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternalError {
    #[error("node n{user} holds dangling input n{input}")]
    DanglingInput { user: NodeId, input: NodeId },
    #[error("node n{node} has {entries} entries, its shape expects {expected}")]
    ShapeMismatch {
        node: NodeId,
        entries: usize,
        expected: usize,
    },
}
