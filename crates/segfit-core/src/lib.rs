//! # segfit-core
//!
//! A segregated-fit dynamic memory allocator over a single contiguous,
//! growable arena.
//!
//! Blocks carry boundary tags (matching header and footer words), free
//! blocks are indexed in 32 size-class buckets of size-sorted explicit
//! lists, lookup is a bounded first-fit, and adjacent free blocks are
//! coalesced on release. The arena is an owned byte buffer and every
//! block is addressed by arena-relative offset; no `unsafe` code is
//! permitted at the crate level.
//!
//! The allocator is single-threaded by contract: callers sharing a
//! [`Heap`] across threads must serialize every entry point externally.
//!
//! ```
//! use segfit_core::Heap;
//!
//! let mut heap = Heap::new()?;
//! let ptr = heap.allocate(100)?.unwrap();
//! heap.payload_mut(ptr)?[..5].copy_from_slice(b"hello");
//! let ptr = heap.reallocate(ptr, 200)?.unwrap();
//! assert_eq!(&heap.payload(ptr)?[..5], b"hello");
//! heap.release(ptr)?;
//! heap.validate("after release");
//! # Ok::<(), segfit_core::HeapError>(())
//! ```

#![deny(unsafe_code)]

pub mod arena;
pub mod check;
pub mod error;
pub mod free_index;
pub mod heap;
pub mod layout;

pub use arena::Arena;
pub use check::CheckViolation;
pub use error::HeapError;
pub use free_index::{FreeIndex, NUM_CLASSES, PROBE_CAP};
pub use heap::{GROWTH_INCREMENT, Heap, HeapConfig, HeapStats, LifecycleRecord, LogLevel};
