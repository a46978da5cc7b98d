//! Trace-replay harness for the segfit allocator.
//!
//! Loads JSON trace fixtures, replays them against [`segfit_core::Heap`],
//! sweeps allocator properties at checkpoints, and emits JSONL structured
//! logs plus a digest-stamped run report.

pub mod replay;
pub mod report;
pub mod structured_log;
pub mod trace;

pub use replay::{ReplayOptions, Replayer};
pub use report::ReplayReport;
pub use structured_log::{LogEmitter, LogEntry};
pub use trace::{TraceFixture, TraceOp};

use segfit_core::{CheckViolation, HeapError};

/// Everything that can go wrong while loading or replaying a trace.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed trace json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("op {index}: heap rejected the request: {source}")]
    Heap {
        index: usize,
        #[source]
        source: HeapError,
    },

    #[error("op {index}: id {id} is not bound to a live block")]
    UnknownId { index: usize, id: u32 },

    #[error("op {index}: id {id} is already bound to a live block")]
    DuplicateId { index: usize, id: u32 },

    #[error("op {index}: property violated: {detail}")]
    Property { index: usize, detail: String },

    #[error("op {index}: heap structure corrupted: {source}")]
    Corruption {
        index: usize,
        #[source]
        source: CheckViolation,
    },
}
