//! Error taxonomy for heap operations.
//!
//! Two of the three variants are caller-visible failures (`OutOfMemory`,
//! `SizeOverflow`); `ClientMisuse` is the hardened rejection of pointers
//! that do not name a live allocated block. Structural corruption is not
//! represented here: the validator treats it as fatal (see [`crate::check`]).

use thiserror::Error;

/// A failed heap operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The arena could not be extended far enough to satisfy the request.
    /// Never retried internally.
    #[error("out of memory: requested {requested} more bytes, arena at {heap_bytes}/{limit}")]
    OutOfMemory {
        /// Bytes the arena was asked to grow by.
        requested: usize,
        /// Current arena size in bytes.
        heap_bytes: usize,
        /// Configured arena byte limit.
        limit: usize,
    },

    /// A release/reallocate/payload argument that is not a live allocated
    /// block: out of arena bounds, misaligned, or with tags that do not
    /// describe an allocated block. The heap is left untouched.
    #[error("client misuse at offset {ptr:#x}: {reason}")]
    ClientMisuse {
        /// The offending payload offset.
        ptr: usize,
        /// What the check found.
        reason: &'static str,
    },

    /// `allocate_zeroed` element count times element size overflowed.
    #[error("allocation size overflow: {count} * {size}")]
    SizeOverflow {
        /// Element count.
        count: usize,
        /// Element size in bytes.
        size: usize,
    },
}
