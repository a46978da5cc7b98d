//! Trace execution engine.
//!
//! Replays a [`TraceFixture`] against a fresh heap while verifying the
//! allocator's observable properties: payload alignment, deterministic
//! byte-pattern integrity for every live block, pairwise payload
//! disjointness, byte conservation, and structural validity. Property
//! sweeps run at a configurable checkpoint cadence and always at the end
//! of the trace.

use std::collections::HashMap;

use segfit_core::{Heap, HeapConfig};

use crate::report::ReplayReport;
use crate::trace::{TraceFixture, TraceOp};
use crate::HarnessError;

/// Replay tuning knobs.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Run a full property sweep every this many ops.
    pub checkpoint_every: usize,
    /// Heap configuration for the replayed allocator.
    pub heap: HeapConfig,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: 64,
            heap: HeapConfig::default(),
        }
    }
}

/// A block the trace currently holds.
#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    ptr: usize,
    /// Requested (pattern-filled) size, which may be below the block's
    /// payload capacity.
    size: usize,
}

/// Replays one fixture against one heap.
pub struct Replayer {
    heap: Heap,
    live: HashMap<u32, LiveBlock>,
    options: ReplayOptions,
    ops_executed: usize,
    checkpoints: usize,
}

/// Deterministic fill byte for offset `i` of the block bound to `id`.
fn pattern_byte(id: u32, i: usize) -> u8 {
    (id as usize)
        .wrapping_mul(31)
        .wrapping_add(i.wrapping_mul(7))
        .wrapping_add(0x5A) as u8
}

impl Replayer {
    /// Creates a replayer with a fresh heap.
    pub fn new(options: ReplayOptions) -> Result<Self, HarnessError> {
        let heap = Heap::with_config(options.heap.clone())
            .map_err(|source| HarnessError::Heap { index: 0, source })?;
        Ok(Self {
            heap,
            live: HashMap::new(),
            options,
            ops_executed: 0,
            checkpoints: 0,
        })
    }

    /// Runs the whole fixture and returns its report.
    pub fn run(&mut self, fixture: &TraceFixture) -> Result<ReplayReport, HarnessError> {
        for (index, &op) in fixture.ops.iter().enumerate() {
            self.apply(index, op)?;
            self.ops_executed += 1;
            if self.options.checkpoint_every > 0
                && self.ops_executed % self.options.checkpoint_every == 0
            {
                self.sweep(index)?;
            }
        }
        self.sweep(fixture.ops.len().saturating_sub(1))?;
        Ok(ReplayReport {
            fixture: fixture.name.clone(),
            ops_executed: self.ops_executed,
            checkpoints: self.checkpoints,
            trace_sha256: None,
            live_blocks: self.live.len(),
            heap_bytes: self.heap.stats().heap_bytes,
            free_blocks: self.heap.stats().free_blocks,
            passed: true,
        })
    }

    /// The replayed heap, for post-run inspection.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable heap access, mainly for draining lifecycle records.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    fn apply(&mut self, index: usize, op: TraceOp) -> Result<(), HarnessError> {
        match op {
            TraceOp::Alloc { id, size } => {
                self.check_unbound(index, id)?;
                let out = self
                    .heap
                    .allocate(size)
                    .map_err(|source| HarnessError::Heap { index, source })?;
                if let Some(ptr) = out {
                    self.fill(index, id, ptr, size)?;
                    self.live.insert(id, LiveBlock { ptr, size });
                }
            }
            TraceOp::Free { id } => {
                let block = self
                    .live
                    .remove(&id)
                    .ok_or(HarnessError::UnknownId { index, id })?;
                self.heap
                    .release(block.ptr)
                    .map_err(|source| HarnessError::Heap { index, source })?;
            }
            TraceOp::Realloc { id, size } => {
                let block = *self
                    .live
                    .get(&id)
                    .ok_or(HarnessError::UnknownId { index, id })?;
                let out = self
                    .heap
                    .reallocate(block.ptr, size)
                    .map_err(|source| HarnessError::Heap { index, source })?;
                match out {
                    None => {
                        self.live.remove(&id);
                    }
                    Some(ptr) => {
                        // The common prefix must survive the move.
                        let keep = block.size.min(size);
                        self.check_pattern(index, id, ptr, keep)?;
                        self.fill(index, id, ptr, size)?;
                        self.live.insert(id, LiveBlock { ptr, size });
                    }
                }
            }
            TraceOp::Calloc { id, count, size } => {
                self.check_unbound(index, id)?;
                let total = count.saturating_mul(size);
                let out = self
                    .heap
                    .allocate_zeroed(count, size)
                    .map_err(|source| HarnessError::Heap { index, source })?;
                if let Some(ptr) = out {
                    let payload = self
                        .heap
                        .payload(ptr)
                        .map_err(|source| HarnessError::Heap { index, source })?;
                    if payload[..total].iter().any(|&b| b != 0) {
                        return Err(HarnessError::Property {
                            index,
                            detail: format!("calloc id {id} returned non-zero bytes"),
                        });
                    }
                    self.fill(index, id, ptr, total)?;
                    self.live.insert(id, LiveBlock { ptr, size: total });
                }
            }
        }
        Ok(())
    }

    fn check_unbound(&self, index: usize, id: u32) -> Result<(), HarnessError> {
        if self.live.contains_key(&id) {
            return Err(HarnessError::DuplicateId { index, id });
        }
        Ok(())
    }

    fn fill(&mut self, index: usize, id: u32, ptr: usize, size: usize) -> Result<(), HarnessError> {
        if ptr % 8 != 0 {
            return Err(HarnessError::Property {
                index,
                detail: format!("payload offset {ptr:#x} is not 8-aligned"),
            });
        }
        let payload = self
            .heap
            .payload_mut(ptr)
            .map_err(|source| HarnessError::Heap { index, source })?;
        for (i, byte) in payload[..size].iter_mut().enumerate() {
            *byte = pattern_byte(id, i);
        }
        Ok(())
    }

    fn check_pattern(
        &self,
        index: usize,
        id: u32,
        ptr: usize,
        size: usize,
    ) -> Result<(), HarnessError> {
        let payload = self
            .heap
            .payload(ptr)
            .map_err(|source| HarnessError::Heap { index, source })?;
        for (i, &byte) in payload[..size].iter().enumerate() {
            if byte != pattern_byte(id, i) {
                return Err(HarnessError::Property {
                    index,
                    detail: format!("pattern mismatch for id {id} at byte {i}"),
                });
            }
        }
        Ok(())
    }

    /// Full property sweep: per-block pattern integrity and alignment,
    /// pairwise payload disjointness, byte conservation, and the
    /// structural validator.
    fn sweep(&mut self, index: usize) -> Result<(), HarnessError> {
        self.checkpoints += 1;

        let mut ranges = Vec::with_capacity(self.live.len());
        for (&id, &block) in &self.live {
            if block.ptr % 8 != 0 {
                return Err(HarnessError::Property {
                    index,
                    detail: format!("live id {id} at misaligned offset {:#x}", block.ptr),
                });
            }
            self.check_pattern(index, id, block.ptr, block.size)?;
            let capacity = self
                .heap
                .payload(block.ptr)
                .map_err(|source| HarnessError::Heap { index, source })?
                .len();
            ranges.push((block.ptr, block.ptr + capacity));
        }
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(HarnessError::Property {
                    index,
                    detail: format!("payload ranges overlap: {pair:?}"),
                });
            }
        }

        let stats = self.heap.stats();
        if stats.heap_bytes != stats.base_bytes + stats.live_block_bytes + stats.free_block_bytes {
            return Err(HarnessError::Property {
                index,
                detail: format!("byte conservation violated: {stats:?}"),
            });
        }

        self.heap
            .verify()
            .map_err(|source| HarnessError::Corruption { index, source })?;
        Ok(())
    }
}
