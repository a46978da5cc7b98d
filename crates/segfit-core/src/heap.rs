//! The allocator itself.
//!
//! [`Heap`] orchestrates the arena, the boundary-tag layout, and the
//! segregated free-list index into the four public operations: allocate,
//! release, reallocate, and zero-fill allocate. It also carries the
//! accounting counters and the structured lifecycle log that every
//! operation snapshots into.
//!
//! Single-threaded by contract: every method takes `&mut self` and there
//! is no internal synchronization. Callers sharing a heap across threads
//! must serialize every entry point externally.

use crate::arena::Arena;
use crate::error::HeapError;
use crate::free_index::{self, FreeIndex, NUM_CLASSES};
use crate::layout::{self, ALIGNMENT, BASE, FIRST_BLOCK, MAX_BLOCK, MIN_BLOCK, OVERHEAD};

/// Bytes the arena grows by when a small request finds no fit.
pub const GROWTH_INCREMENT: usize = 512;

/// Construction-time heap options.
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Hard cap on total arena bytes; exceeding it is the out-of-memory
    /// condition.
    pub arena_limit: usize,
    /// Minimum bytes per arena extension.
    pub growth_increment: usize,
    /// Whether operations push lifecycle records.
    pub record_lifecycle: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            arena_limit: usize::MAX,
            growth_increment: GROWTH_INCREMENT,
            record_lifecycle: true,
        }
    }
}

/// Lifecycle record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Severity level.
    pub level: LogLevel,
    /// Operation (`allocate`, `release`, `reallocate`, `allocate_zeroed`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `extend`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Size-class bucket involved in the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live allocated block count.
    pub live_blocks: usize,
    /// Snapshot: live allocated block bytes (tags included).
    pub live_block_bytes: usize,
    /// Snapshot: total arena bytes.
    pub heap_bytes: usize,
}

/// Point-in-time heap accounting summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Total bytes obtained from the arena.
    pub heap_bytes: usize,
    /// Fixed sentinel overhead (padding + prologue + epilogue header).
    pub base_bytes: usize,
    /// Live allocated blocks.
    pub live_blocks: usize,
    /// Bytes in live allocated blocks, tags included.
    pub live_block_bytes: usize,
    /// Indexed free blocks.
    pub free_blocks: usize,
    /// Bytes in indexed free blocks, tags included, summed by walking
    /// every bucket.
    pub free_block_bytes: usize,
    /// Arena extensions performed.
    pub extends: u64,
    /// Placements that split a block.
    pub splits: u64,
    /// find_fit successes.
    pub fit_hits: u64,
    /// find_fit misses (arena had to grow).
    pub fit_misses: u64,
    /// Coalesce outcomes: neither neighbor free.
    pub coalesce_none: u64,
    /// Coalesce outcomes: following block absorbed.
    pub coalesce_forward: u64,
    /// Coalesce outcomes: merged into the preceding block.
    pub coalesce_backward: u64,
    /// Coalesce outcomes: both neighbors merged.
    pub coalesce_both: u64,
}

/// Segregated-fit heap over a growable arena.
pub struct Heap {
    pub(crate) arena: Arena,
    pub(crate) index: FreeIndex,
    config: HeapConfig,
    live_blocks: usize,
    live_block_bytes: usize,
    fit_hits: u64,
    fit_misses: u64,
    extends: u64,
    splits: u64,
    coalesces: [u64; 4],
    next_decision_id: u64,
    lifecycle: Vec<LifecycleRecord>,
}

impl Heap {
    /// Creates a heap with default configuration.
    pub fn new() -> Result<Self, HeapError> {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap, installs the sentinels, and seeds it with one
    /// free block of the growth increment.
    pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
        let mut arena = Arena::with_limit(config.arena_limit);
        arena.bootstrap()?;
        let bp = arena.extend(config.growth_increment)?;
        let mut index = FreeIndex::new();
        index.insert(&mut arena, bp);
        let mut heap = Self {
            arena,
            index,
            config,
            live_blocks: 0,
            live_block_bytes: 0,
            fit_hits: 0,
            fit_misses: 0,
            extends: 1,
            splits: 0,
            coalesces: [0; 4],
            next_decision_id: 1,
            lifecycle: Vec::new(),
        };
        heap.record(
            LogLevel::Debug,
            "init",
            "bootstrap",
            Some(bp),
            Some(heap.config.growth_increment),
            None,
            "success",
            String::new(),
        );
        Ok(heap)
    }

    /// Allocates `size` payload bytes.
    ///
    /// Size 0 is a defined no-op returning `Ok(None)`. The returned
    /// payload offset is always 8-aligned.
    pub fn allocate(&mut self, size: usize) -> Result<Option<usize>, HeapError> {
        if size == 0 {
            self.record(
                LogLevel::Trace,
                "allocate",
                "zero_size",
                None,
                Some(0),
                None,
                "noop",
                String::new(),
            );
            return Ok(None);
        }

        let asize = self.adjusted(size)?;
        let class = free_index::class_of(asize);

        if let Some(bp) = self.index.find_fit(&self.arena, asize) {
            self.fit_hits += 1;
            self.place(bp, asize, true);
            let placed = layout::size_of(&self.arena, bp);
            self.live_blocks += 1;
            self.live_block_bytes += placed;
            self.record(
                LogLevel::Trace,
                "allocate",
                "alloc",
                Some(bp),
                Some(size),
                Some(class),
                "success",
                format!("path=fit asize={asize} placed={placed}"),
            );
            return Ok(Some(bp));
        }
        self.fit_misses += 1;

        let grow = asize.max(self.config.growth_increment);
        let fresh = match self.arena.extend(grow) {
            Ok(bp) => bp,
            Err(err) => {
                self.record(
                    LogLevel::Warn,
                    "allocate",
                    "alloc",
                    None,
                    Some(size),
                    Some(class),
                    "oom",
                    format!("grow={grow}"),
                );
                return Err(err);
            }
        };
        self.extends += 1;
        let bp = self.absorb_free_predecessor(fresh);
        self.place(bp, asize, false);
        let placed = layout::size_of(&self.arena, bp);
        self.live_blocks += 1;
        self.live_block_bytes += placed;
        self.record(
            LogLevel::Trace,
            "allocate",
            "alloc",
            Some(bp),
            Some(size),
            Some(class),
            "success",
            format!("path=extend grow={grow} placed={placed}"),
        );
        Ok(Some(bp))
    }

    /// Releases the block at payload offset `ptr`.
    ///
    /// 0 is the null offset and a no-op. Offsets that do not name a live
    /// allocated block are rejected with `ClientMisuse`, leaving the heap
    /// untouched.
    pub fn release(&mut self, ptr: usize) -> Result<(), HeapError> {
        if ptr == 0 {
            self.record(
                LogLevel::Trace,
                "release",
                "null",
                Some(0),
                None,
                None,
                "noop",
                String::new(),
            );
            return Ok(());
        }
        let size = match self.check_allocated(ptr) {
            Ok(size) => size,
            Err(err) => {
                self.record(
                    LogLevel::Warn,
                    "release",
                    "misuse",
                    Some(ptr),
                    None,
                    None,
                    "rejected",
                    err.to_string(),
                );
                return Err(err);
            }
        };

        layout::write_tags(&mut self.arena, ptr, size, false);
        self.live_blocks -= 1;
        self.live_block_bytes -= size;
        let merged = self.coalesce_and_index(ptr);
        self.record(
            LogLevel::Trace,
            "release",
            "free",
            Some(ptr),
            Some(size),
            Some(free_index::class_of(size)),
            "success",
            format!("merged_at={merged:#x}"),
        );
        Ok(())
    }

    /// Resizes the block at `ptr` to `new_size` payload bytes.
    ///
    /// `new_size == 0` behaves as release and returns `Ok(None)`;
    /// `ptr == 0` behaves as allocate. Otherwise a fresh block is always
    /// allocated, `min(old payload, new_size)` bytes are copied, and the
    /// original is released; no in-place resize is attempted. On failure
    /// the original block is left untouched.
    pub fn reallocate(&mut self, ptr: usize, new_size: usize) -> Result<Option<usize>, HeapError> {
        if new_size == 0 {
            self.release(ptr)?;
            self.record(
                LogLevel::Trace,
                "reallocate",
                "zero_as_release",
                Some(ptr),
                Some(0),
                None,
                "freed",
                String::new(),
            );
            return Ok(None);
        }
        if ptr == 0 {
            let out = self.allocate(new_size)?;
            self.record(
                LogLevel::Trace,
                "reallocate",
                "null_as_allocate",
                out,
                Some(new_size),
                None,
                "success",
                String::new(),
            );
            return Ok(out);
        }

        let old_size = match self.check_allocated(ptr) {
            Ok(size) => size,
            Err(err) => {
                self.record(
                    LogLevel::Warn,
                    "reallocate",
                    "misuse",
                    Some(ptr),
                    Some(new_size),
                    None,
                    "rejected",
                    err.to_string(),
                );
                return Err(err);
            }
        };

        // On OutOfMemory the `?` leaves the original block live.
        let new_ptr = match self.allocate(new_size)? {
            Some(bp) => bp,
            None => return Ok(None), // new_size > 0; not reached
        };
        let copied = (old_size - OVERHEAD).min(new_size);
        self.arena.copy(ptr, new_ptr, copied);
        self.release(ptr)?;
        self.record(
            LogLevel::Trace,
            "reallocate",
            "move",
            Some(new_ptr),
            Some(new_size),
            Some(free_index::class_of(layout::size_of(&self.arena, new_ptr))),
            "success",
            format!("old_ptr={ptr:#x} copied={copied}"),
        );
        Ok(Some(new_ptr))
    }

    /// Allocates `count * size` zero-filled bytes.
    ///
    /// The multiplication is overflow-checked and rejected with
    /// `SizeOverflow`.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<Option<usize>, HeapError> {
        let total = match count.checked_mul(size) {
            Some(total) => total,
            None => {
                let err = HeapError::SizeOverflow { count, size };
                self.record(
                    LogLevel::Warn,
                    "allocate_zeroed",
                    "overflow",
                    None,
                    None,
                    None,
                    "rejected",
                    format!("count={count} size={size}"),
                );
                return Err(err);
            }
        };
        let out = self.allocate(total)?;
        if let Some(bp) = out {
            self.arena.bytes_mut(bp, total).fill(0);
        }
        self.record(
            LogLevel::Trace,
            "allocate_zeroed",
            "calloc",
            out,
            Some(total),
            None,
            if out.is_some() { "success" } else { "noop" },
            format!("count={count} elem_size={size}"),
        );
        Ok(out)
    }

    /// Borrows the payload of the live allocated block at `ptr`.
    ///
    /// The slice spans the block's full payload capacity, which may
    /// exceed the requested size by alignment padding.
    pub fn payload(&self, ptr: usize) -> Result<&[u8], HeapError> {
        let size = self.check_allocated(ptr)?;
        Ok(self.arena.bytes(ptr, size - OVERHEAD))
    }

    /// Mutably borrows the payload of the live allocated block at `ptr`.
    pub fn payload_mut(&mut self, ptr: usize) -> Result<&mut [u8], HeapError> {
        let size = self.check_allocated(ptr)?;
        Ok(self.arena.bytes_mut(ptr, size - OVERHEAD))
    }

    /// Point-in-time accounting summary. Free bytes are summed by
    /// walking every bucket, so the conservation property is observable
    /// rather than derived.
    pub fn stats(&self) -> HeapStats {
        let free_block_bytes = (0..NUM_CLASSES)
            .map(|class| {
                self.index
                    .bucket_sizes(&self.arena, class)
                    .into_iter()
                    .sum::<usize>()
            })
            .sum();
        HeapStats {
            heap_bytes: self.arena.len(),
            base_bytes: BASE,
            live_blocks: self.live_blocks,
            live_block_bytes: self.live_block_bytes,
            free_blocks: self.index.len(),
            free_block_bytes,
            extends: self.extends,
            splits: self.splits,
            fit_hits: self.fit_hits,
            fit_misses: self.fit_misses,
            coalesce_none: self.coalesces[0],
            coalesce_forward: self.coalesces[1],
            coalesce_backward: self.coalesces[2],
            coalesce_both: self.coalesces[3],
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The lifecycle records accumulated so far.
    pub fn lifecycle(&self) -> &[LifecycleRecord] {
        &self.lifecycle
    }

    /// Drains the accumulated lifecycle records.
    pub fn drain_lifecycle(&mut self) -> Vec<LifecycleRecord> {
        std::mem::take(&mut self.lifecycle)
    }

    /// Request size -> block size: payload rounded up to 8, plus tag
    /// overhead, floored at the minimum block size.
    fn adjusted(&self, size: usize) -> Result<usize, HeapError> {
        let oom = HeapError::OutOfMemory {
            requested: size,
            heap_bytes: self.arena.len(),
            limit: self.config.arena_limit,
        };
        let padded = size.checked_add(ALIGNMENT - 1).ok_or(oom)? & !(ALIGNMENT - 1);
        let asize = padded.checked_add(OVERHEAD).ok_or(oom)?.max(MIN_BLOCK);
        if asize > MAX_BLOCK {
            return Err(oom);
        }
        Ok(asize)
    }

    /// Hardened liveness check: `ptr` must be an in-bounds, 8-aligned
    /// payload offset whose tags describe an allocated block. Returns the
    /// block size.
    fn check_allocated(&self, ptr: usize) -> Result<usize, HeapError> {
        let (_, high) = self.arena.bounds();
        if ptr < FIRST_BLOCK || ptr >= high {
            return Err(HeapError::ClientMisuse {
                ptr,
                reason: "offset outside arena",
            });
        }
        if ptr % ALIGNMENT != 0 {
            return Err(HeapError::ClientMisuse {
                ptr,
                reason: "misaligned offset",
            });
        }
        let (size, allocated) = layout::unpack(self.arena.read_word(layout::header(ptr)));
        if !allocated {
            return Err(HeapError::ClientMisuse {
                ptr,
                reason: "block is not allocated",
            });
        }
        let end = ptr.checked_add(size);
        if size < MIN_BLOCK || end.is_none_or(|end| end > high) {
            return Err(HeapError::ClientMisuse {
                ptr,
                reason: "header does not describe a block",
            });
        }
        if self.arena.read_word(ptr + size - OVERHEAD) != layout::pack(size, true) {
            return Err(HeapError::ClientMisuse {
                ptr,
                reason: "header and footer disagree",
            });
        }
        Ok(size)
    }

    /// Carves `asize` bytes out of the free block at `bp`, splitting off
    /// the tail as a new free block when it can stand on its own;
    /// otherwise the whole block is consumed as padding. `indexed` says
    /// whether `bp` currently sits in a bucket.
    fn place(&mut self, bp: usize, asize: usize, indexed: bool) {
        if indexed {
            self.index.remove(&mut self.arena, bp);
        }
        let csize = layout::size_of(&self.arena, bp);
        debug_assert!(csize >= asize);
        if csize - asize >= MIN_BLOCK {
            layout::write_tags(&mut self.arena, bp, asize, true);
            let rest = bp + asize;
            layout::write_tags(&mut self.arena, rest, csize - asize, false);
            self.index.insert(&mut self.arena, rest);
            self.splits += 1;
        } else {
            layout::write_tags(&mut self.arena, bp, csize, true);
        }
    }

    /// Merges a freshly extended block with an immediately preceding free
    /// block, if any. The result is not indexed; the caller places it.
    fn absorb_free_predecessor(&mut self, bp: usize) -> usize {
        if layout::prev_allocated(&self.arena, bp) {
            return bp;
        }
        let prev = layout::prev_block(&self.arena, bp);
        self.index.remove(&mut self.arena, prev);
        let merged = layout::size_of(&self.arena, prev) + layout::size_of(&self.arena, bp);
        layout::write_tags(&mut self.arena, prev, merged, false);
        prev
    }

    /// Four-case coalescing of the free block at `bp` with its physical
    /// neighbors, followed by a single bucket insertion of the result.
    /// The sentinels guarantee both neighbors exist.
    fn coalesce_and_index(&mut self, bp: usize) -> usize {
        let prev_free = !layout::prev_allocated(&self.arena, bp);
        let next = layout::next_block(&self.arena, bp);
        let next_free = !layout::is_allocated(&self.arena, next);
        let mut bp = bp;
        let mut size = layout::size_of(&self.arena, bp);

        match (prev_free, next_free) {
            (false, false) => {
                self.coalesces[0] += 1;
            }
            (false, true) => {
                self.index.remove(&mut self.arena, next);
                size += layout::size_of(&self.arena, next);
                self.coalesces[1] += 1;
            }
            (true, false) => {
                let prev = layout::prev_block(&self.arena, bp);
                self.index.remove(&mut self.arena, prev);
                size += layout::size_of(&self.arena, prev);
                bp = prev;
                self.coalesces[2] += 1;
            }
            (true, true) => {
                let prev = layout::prev_block(&self.arena, bp);
                self.index.remove(&mut self.arena, prev);
                self.index.remove(&mut self.arena, next);
                size += layout::size_of(&self.arena, prev) + layout::size_of(&self.arena, next);
                bp = prev;
                self.coalesces[3] += 1;
            }
        }

        layout::write_tags(&mut self.arena, bp, size, false);
        self.index.insert(&mut self.arena, bp);
        bp
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        level: LogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if !self.config.record_lifecycle {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        let trace_id = format!("segfit::{symbol}::{decision_id:016x}");
        self.lifecycle.push(LifecycleRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            class,
            outcome,
            details: details.into(),
            live_blocks: self.live_blocks,
            live_block_bytes: self.live_block_bytes,
            heap_bytes: self.arena.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserved(heap: &Heap) {
        let stats = heap.stats();
        assert_eq!(
            stats.heap_bytes,
            stats.base_bytes + stats.live_block_bytes + stats.free_block_bytes,
            "conservation violated: {stats:?}"
        );
    }

    #[test]
    fn test_new_heap_seeded() {
        let heap = Heap::new().unwrap();
        let stats = heap.stats();
        assert_eq!(stats.heap_bytes, BASE + GROWTH_INCREMENT);
        assert_eq!(stats.live_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_block_bytes, GROWTH_INCREMENT);
        assert_conserved(&heap);
        heap.verify().unwrap();
    }

    #[test]
    fn test_allocate_basic_alignment() {
        let mut heap = Heap::new().unwrap();
        for size in [1, 7, 8, 13, 100, 1000] {
            let bp = heap.allocate(size).unwrap().unwrap();
            assert_eq!(bp % ALIGNMENT, 0, "payload offset {bp} misaligned");
        }
        assert_conserved(&heap);
        heap.verify().unwrap();
    }

    #[test]
    fn test_allocate_zero_is_noop() {
        // Scenario D: allocate(0) returns null with no heap or index
        // mutation.
        let mut heap = Heap::new().unwrap();
        let before = heap.stats();
        assert_eq!(heap.allocate(0).unwrap(), None);
        assert_eq!(heap.stats(), before);
        heap.verify().unwrap();
    }

    #[test]
    fn test_release_null_is_noop() {
        let mut heap = Heap::new().unwrap();
        let before = heap.stats();
        heap.release(0).unwrap();
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn test_payload_round_trip() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(64).unwrap().unwrap();
        let pattern: Vec<u8> = (0..64).map(|i| (i * 7 + 3) as u8).collect();
        heap.payload_mut(bp).unwrap()[..64].copy_from_slice(&pattern);
        assert_eq!(&heap.payload(bp).unwrap()[..64], &pattern[..]);
    }

    #[test]
    fn test_payloads_disjoint() {
        let mut heap = Heap::new().unwrap();
        let mut ranges = Vec::new();
        for size in [16, 24, 100, 200, 48] {
            let bp = heap.allocate(size).unwrap().unwrap();
            let len = heap.payload(bp).unwrap().len();
            ranges.push((bp, bp + len));
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap: {pair:?}");
        }
    }

    #[test]
    fn test_scenario_a_freed_small_block_not_reused() {
        // Ten 16-byte blocks, release the 5th (a 24-byte block), then ask
        // for 40 bytes: the freed block is too small to serve it.
        let mut heap = Heap::new().unwrap();
        let blocks: Vec<usize> = (0..10)
            .map(|_| heap.allocate(16).unwrap().unwrap())
            .collect();
        heap.release(blocks[4]).unwrap();
        let big = heap.allocate(40).unwrap().unwrap();
        assert_ne!(big, blocks[4]);
        heap.verify().unwrap();
        assert_conserved(&heap);
    }

    #[test]
    fn test_scenario_b_adjacent_releases_coalesce() {
        // Two 100-byte blocks fill 224 of the initial 512-byte chunk.
        // Releasing A then B merges A, B, and the 288-byte tail into one
        // free block spanning the whole chunk.
        let mut heap = Heap::new().unwrap();
        let a = heap.allocate(100).unwrap().unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        assert_eq!(b, a + 112);

        heap.release(a).unwrap();
        heap.release(b).unwrap();

        let stats = heap.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_block_bytes, GROWTH_INCREMENT);
        assert_eq!(
            heap.index.head(free_index::class_of(GROWTH_INCREMENT)),
            Some(a)
        );
        assert_eq!(stats.coalesce_none, 1); // releasing A
        assert_eq!(stats.coalesce_both, 1); // releasing B
        heap.verify().unwrap();
    }

    #[test]
    fn test_coalesce_forward_and_backward_cases() {
        let mut heap = Heap::new().unwrap();
        let a = heap.allocate(100).unwrap().unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        let c = heap.allocate(100).unwrap().unwrap();

        heap.release(b).unwrap(); // neither neighbor free
        heap.release(a).unwrap(); // following (b) free
        heap.release(c).unwrap(); // preceding merged block and tail free

        let stats = heap.stats();
        assert_eq!(stats.coalesce_none, 1);
        assert_eq!(stats.coalesce_forward, 1);
        assert_eq!(stats.coalesce_both, 1);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_block_bytes, GROWTH_INCREMENT);
        heap.verify().unwrap();
    }

    #[test]
    fn test_coalesce_backward_case() {
        let mut heap = Heap::new().unwrap();
        let a = heap.allocate(100).unwrap().unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        let c = heap.allocate(100).unwrap().unwrap();
        // Pin the tail so releasing b sees only its predecessor free.
        let _pin = heap.allocate(176 - OVERHEAD).unwrap().unwrap();

        heap.release(a).unwrap();
        heap.release(b).unwrap(); // preceding free, following (c) allocated
        let stats = heap.stats();
        assert_eq!(stats.coalesce_backward, 1);
        assert_eq!(heap.index.bucket_sizes(&heap.arena, free_index::class_of(224)), vec![224]);
        let _ = c;
        heap.verify().unwrap();
    }

    #[test]
    fn test_scenario_c_reallocate_zero_is_release() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(100).unwrap().unwrap();
        let out = heap.reallocate(bp, 0).unwrap();
        assert_eq!(out, None);
        assert_eq!(heap.stats().live_blocks, 0);
        assert_eq!(heap.stats().free_blocks, 1);
        heap.verify().unwrap();
    }

    #[test]
    fn test_reallocate_null_is_allocate() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.reallocate(0, 64).unwrap().unwrap();
        assert_eq!(heap.stats().live_blocks, 1);
        assert_eq!(heap.payload(bp).unwrap().len(), 64);
    }

    #[test]
    fn test_reallocate_always_moves_and_copies() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(40).unwrap().unwrap();
        heap.payload_mut(bp).unwrap()[..40].copy_from_slice(&[0xAB; 40]);

        // Grow: all 40 bytes survive.
        let grown = heap.reallocate(bp, 100).unwrap().unwrap();
        assert_ne!(grown, bp);
        assert_eq!(&heap.payload(grown).unwrap()[..40], &[0xAB; 40]);

        // Shrink: the first 8 bytes survive.
        let shrunk = heap.reallocate(grown, 8).unwrap().unwrap();
        assert_ne!(shrunk, grown);
        assert_eq!(&heap.payload(shrunk).unwrap()[..8], &[0xAB; 8]);
        assert_eq!(heap.stats().live_blocks, 1);
        heap.verify().unwrap();
    }

    #[test]
    fn test_reallocate_oom_leaves_original() {
        let config = HeapConfig {
            arena_limit: BASE + GROWTH_INCREMENT,
            ..HeapConfig::default()
        };
        let mut heap = Heap::with_config(config).unwrap();
        let bp = heap.allocate(100).unwrap().unwrap();
        heap.payload_mut(bp).unwrap()[..4].copy_from_slice(b"live");

        let err = heap.reallocate(bp, 4096).unwrap_err();
        assert!(matches!(err, HeapError::OutOfMemory { .. }));
        assert_eq!(heap.stats().live_blocks, 1);
        assert_eq!(&heap.payload(bp).unwrap()[..4], b"live");
        heap.verify().unwrap();
    }

    #[test]
    fn test_allocate_zeroed() {
        let mut heap = Heap::new().unwrap();
        // Dirty the heap first so the zero fill is observable.
        let bp = heap.allocate(120).unwrap().unwrap();
        heap.payload_mut(bp).unwrap().fill(0xFF);
        heap.release(bp).unwrap();

        let zeroed = heap.allocate_zeroed(10, 12).unwrap().unwrap();
        assert!(heap.payload(zeroed).unwrap()[..120].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_zeroed_overflow() {
        let mut heap = Heap::new().unwrap();
        let err = heap.allocate_zeroed(usize::MAX, 2).unwrap_err();
        assert_eq!(
            err,
            HeapError::SizeOverflow {
                count: usize::MAX,
                size: 2
            }
        );
    }

    #[test]
    fn test_allocate_zeroed_zero_total() {
        let mut heap = Heap::new().unwrap();
        assert_eq!(heap.allocate_zeroed(0, 64).unwrap(), None);
        assert_eq!(heap.allocate_zeroed(64, 0).unwrap(), None);
    }

    #[test]
    fn test_out_of_memory_propagates() {
        let config = HeapConfig {
            arena_limit: BASE + GROWTH_INCREMENT,
            ..HeapConfig::default()
        };
        let mut heap = Heap::with_config(config).unwrap();
        // Fits in the seeded chunk.
        assert!(heap.allocate(400).unwrap().is_some());
        // Needs an extension the limit forbids.
        let err = heap.allocate(4096).unwrap_err();
        assert!(matches!(err, HeapError::OutOfMemory { .. }));
        // The heap stays usable.
        assert!(heap.allocate(32).unwrap().is_some());
        heap.verify().unwrap();
    }

    #[test]
    fn test_release_rejects_misaligned() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(64).unwrap().unwrap();
        let err = heap.release(bp + 4).unwrap_err();
        assert_eq!(
            err,
            HeapError::ClientMisuse {
                ptr: bp + 4,
                reason: "misaligned offset"
            }
        );
        heap.release(bp).unwrap();
    }

    #[test]
    fn test_release_rejects_out_of_bounds() {
        let mut heap = Heap::new().unwrap();
        let err = heap.release(1 << 20).unwrap_err();
        assert!(matches!(err, HeapError::ClientMisuse { .. }));
    }

    #[test]
    fn test_release_rejects_double_free() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(64).unwrap().unwrap();
        heap.release(bp).unwrap();
        let err = heap.release(bp).unwrap_err();
        assert_eq!(
            err,
            HeapError::ClientMisuse {
                ptr: bp,
                reason: "block is not allocated"
            }
        );
        heap.verify().unwrap();
    }

    #[test]
    fn test_bucket_ranges_hold_for_all_free_blocks() {
        let mut heap = Heap::new().unwrap();
        let blocks: Vec<usize> = [16, 100, 300, 1000, 50, 700]
            .iter()
            .map(|&s| heap.allocate(s).unwrap().unwrap())
            .collect();
        for &bp in blocks.iter().step_by(2) {
            heap.release(bp).unwrap();
        }
        for class in 0..NUM_CLASSES {
            let (low, high) = free_index::class_range(class);
            for size in heap.index.bucket_sizes(&heap.arena, class) {
                assert!(size >= low);
                if let Some(high) = high {
                    assert!(size <= high);
                }
            }
        }
    }

    #[test]
    fn test_lifecycle_records() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(64).unwrap().unwrap();
        heap.release(bp).unwrap();
        let _ = heap.release(bp); // rejected

        let records = heap.drain_lifecycle();
        assert!(records.iter().all(|r| r.decision_id > 0));
        assert!(records.iter().all(|r| r.trace_id.starts_with("segfit::")));
        assert!(
            records
                .iter()
                .any(|r| r.symbol == "allocate" && r.outcome == "success")
        );
        assert!(
            records
                .iter()
                .any(|r| r.level == LogLevel::Warn && r.event == "misuse")
        );
        assert!(heap.lifecycle().is_empty());
    }

    #[test]
    fn test_lifecycle_disabled() {
        let config = HeapConfig {
            record_lifecycle: false,
            ..HeapConfig::default()
        };
        let mut heap = Heap::with_config(config).unwrap();
        let bp = heap.allocate(64).unwrap().unwrap();
        heap.release(bp).unwrap();
        assert!(heap.lifecycle().is_empty());
    }

    #[test]
    fn test_accounting_invariant_under_deterministic_trace() {
        fn lcg(state: &mut u64) -> u64 {
            *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            *state
        }

        let mut heap = Heap::new().unwrap();
        let mut live: Vec<(usize, usize)> = Vec::new(); // (ptr, requested)
        let mut rng = 0xA5A5_5A5A_DEAD_BEEFu64;

        for step in 0..1500 {
            let r = lcg(&mut rng);
            match r % 3 {
                0 => {
                    let size = ((r >> 8) as usize % 2048).max(1);
                    let bp = heap.allocate(size).unwrap().unwrap();
                    live.push((bp, size));
                }
                1 if !live.is_empty() => {
                    let idx = (r as usize) % live.len();
                    let (bp, _) = live.swap_remove(idx);
                    heap.release(bp).unwrap();
                }
                2 if !live.is_empty() => {
                    let idx = (r as usize) % live.len();
                    let (bp, _) = live[idx];
                    let new_size = ((r >> 16) as usize) % 2048;
                    let next = heap.reallocate(bp, new_size).unwrap();
                    match next {
                        Some(new_bp) => live[idx] = (new_bp, new_size),
                        None => {
                            live.swap_remove(idx);
                        }
                    }
                }
                _ => {}
            }

            assert_eq!(heap.stats().live_blocks, live.len());
            assert_conserved(&heap);
            if step % 100 == 0 {
                heap.verify().unwrap();
            }
        }
        heap.verify().unwrap();
    }
}
