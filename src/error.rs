use thiserror::Error;

use crate::burst::{BurstId, MemOp, ReqId};
use crate::timeq::Time;

/// Every failure the simulator can raise. All of them are fatal to the run; admission refusal by
/// the timing model is not an error and never shows up here.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("burst length {length} is not a multiple of the {word_bytes}-byte word width")]
    Alignment { length: usize, word_bytes: usize },

    #[error("no status entry for burst {0}; burst was lost or duplicated")]
    UnknownBurst(BurstId),

    #[error("no status entry for basic request {0}")]
    UnknownRequest(ReqId),

    #[error("basic request {0} completed more than once")]
    DuplicateCompletion(ReqId),

    #[error("operation {0} cannot be issued as a burst")]
    UnsupportedOp(MemOp),

    #[error("invalid burst {id}: {reason}")]
    InvalidBurst { id: BurstId, reason: String },

    #[error("access of {len} bytes @ {addr:#x} exceeds backing store of {capacity} bytes")]
    OutOfBounds { addr: u64, len: usize, capacity: usize },

    #[error("write stream needs {needed} buffered bytes but holds only {available}")]
    BufferUnderflow { needed: usize, available: usize },

    #[error("simulation did not finish within {0} ns")]
    Timeout(Time),
}

pub type Result<T> = std::result::Result<T, SimError>;

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }
}
