//! Structural heap validation.
//!
//! [`Heap::verify`] walks the full block chain from prologue to epilogue
//! and every bucket's free list, read-only, and reports the first
//! structural violation found. [`Heap::validate`] is the checkpoint form:
//! corruption is unrecoverable by design, so it panics with the report
//! instead of returning.

use thiserror::Error;

use crate::free_index::{NUM_CLASSES, class_range};
use crate::heap::Heap;
use crate::layout::{
    self, ALIGNMENT, FIRST_BLOCK, MIN_BLOCK, OVERHEAD, PROLOGUE, pack, unpack,
};

/// A structural inconsistency found while walking the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CheckViolation {
    /// The prologue sentinel tags were overwritten.
    #[error("bad prologue tags")]
    BadPrologue,
    /// The block chain did not end in an allocated zero-size epilogue at
    /// the arena top.
    #[error("bad epilogue at offset {at:#x}")]
    BadEpilogue { at: usize },
    /// A block offset or extent escapes the arena bounds.
    #[error("block at {bp:#x} escapes arena bounds")]
    OutOfBounds { bp: usize },
    /// A block offset is not 8-aligned.
    #[error("block at {bp:#x} is misaligned")]
    Misaligned { bp: usize },
    /// A block's header and footer disagree.
    #[error("block at {bp:#x}: header and footer disagree")]
    TagMismatch { bp: usize },
    /// A bucket node is not marked free.
    #[error("bucket {class}: node at {bp:#x} is not marked free")]
    IndexedButAllocated { class: usize, bp: usize },
    /// A bucket node's size falls outside its bucket's declared range.
    #[error("bucket {class}: node at {bp:#x} has size {size} outside the class range")]
    WrongBucket { class: usize, bp: usize, size: usize },
    /// A node's successor does not point back at it.
    #[error("bucket {class}: successor of {bp:#x} does not point back")]
    BrokenBacklink { class: usize, bp: usize },
    /// A bucket's list contains a cycle.
    #[error("bucket {class}: free list cycle")]
    Cycle { class: usize },
    /// Free blocks seen by the heap walk and nodes reachable from the
    /// bucket heads disagree.
    #[error("free membership mismatch: heap walk found {walked}, buckets hold {indexed}")]
    FreeCountMismatch { walked: usize, indexed: usize },
}

impl Heap {
    /// Checkpoint validation: panics with the violation report if the
    /// heap structure is corrupt.
    pub fn validate(&self, checkpoint: &str) {
        if let Err(violation) = self.verify() {
            panic!("heap corruption at {checkpoint}: {violation}");
        }
    }

    /// Walks the heap and the free lists, reporting the first structural
    /// violation found.
    pub fn verify(&self) -> Result<(), CheckViolation> {
        let (_, high) = self.arena.bounds();

        // Prologue sentinel.
        let prologue_tag = pack(OVERHEAD, true);
        if self.arena.read_word(layout::header(PROLOGUE)) != prologue_tag
            || self.arena.read_word(PROLOGUE) != prologue_tag
        {
            return Err(CheckViolation::BadPrologue);
        }

        // Full block chain, prologue to epilogue.
        let mut walked_free = 0;
        let mut bp = FIRST_BLOCK;
        loop {
            if bp > high {
                return Err(CheckViolation::OutOfBounds { bp });
            }
            if bp % ALIGNMENT != 0 {
                return Err(CheckViolation::Misaligned { bp });
            }
            let (size, allocated) = unpack(self.arena.read_word(layout::header(bp)));
            if size == 0 {
                // Epilogue: allocated, zero-size, at the very top.
                if !allocated || bp != high {
                    return Err(CheckViolation::BadEpilogue { at: bp });
                }
                break;
            }
            if size < MIN_BLOCK || bp + size > high {
                return Err(CheckViolation::OutOfBounds { bp });
            }
            if self.arena.read_word(bp + size - OVERHEAD) != pack(size, allocated) {
                return Err(CheckViolation::TagMismatch { bp });
            }
            if !allocated {
                walked_free += 1;
            }
            bp += size;
        }

        // Bucket lists.
        let mut indexed = 0;
        for class in 0..NUM_CLASSES {
            self.check_bucket_cycle(class)?;
            indexed += self.check_bucket_nodes(class, high)?;
        }
        if walked_free != indexed {
            return Err(CheckViolation::FreeCountMismatch {
                walked: walked_free,
                indexed,
            });
        }
        Ok(())
    }

    /// Tortoise-and-hare cycle detection over one bucket's list.
    fn check_bucket_cycle(&self, class: usize) -> Result<(), CheckViolation> {
        let step = |node: Option<usize>| -> Option<usize> {
            // Out-of-bounds nodes end the walk here; the node walk
            // reports them.
            node.filter(|&bp| self.node_in_bounds(bp))
                .and_then(|bp| layout::succ_of(&self.arena, bp))
        };
        let mut tortoise = self.index.head(class);
        let mut hare = step(self.index.head(class));
        while let (Some(t), Some(h)) = (tortoise, hare) {
            if t == h {
                return Err(CheckViolation::Cycle { class });
            }
            tortoise = step(tortoise);
            hare = step(step(hare));
        }
        Ok(())
    }

    /// Per-node bucket checks; returns the node count.
    fn check_bucket_nodes(&self, class: usize, high: usize) -> Result<usize, CheckViolation> {
        let (low, upper) = class_range(class);
        let mut count = 0;
        let mut cur = self.index.head(class);
        while let Some(bp) = cur {
            if !self.node_in_bounds(bp) {
                return Err(CheckViolation::OutOfBounds { bp });
            }
            if bp % ALIGNMENT != 0 {
                return Err(CheckViolation::Misaligned { bp });
            }
            let (size, allocated) = unpack(self.arena.read_word(layout::header(bp)));
            if allocated {
                return Err(CheckViolation::IndexedButAllocated { class, bp });
            }
            if size < MIN_BLOCK || bp + size > high {
                return Err(CheckViolation::OutOfBounds { bp });
            }
            if self.arena.read_word(bp + size - OVERHEAD) != pack(size, false) {
                return Err(CheckViolation::TagMismatch { bp });
            }
            if size < low || upper.is_some_and(|upper| size > upper) {
                return Err(CheckViolation::WrongBucket { class, bp, size });
            }
            let succ = layout::succ_of(&self.arena, bp);
            if let Some(succ) = succ {
                if self.node_in_bounds(succ)
                    && layout::pred_of(&self.arena, succ) != Some(bp)
                {
                    return Err(CheckViolation::BrokenBacklink { class, bp });
                }
            }
            count += 1;
            cur = succ;
        }
        Ok(count)
    }

    fn node_in_bounds(&self, bp: usize) -> bool {
        let (_, high) = self.arena.bounds();
        bp >= FIRST_BLOCK && bp % ALIGNMENT == 0 && bp + MIN_BLOCK <= high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    /// Heap with two equal-size free blocks that are not physically
    /// adjacent: released around live spacers so they stay unmerged.
    fn heap_with_two_free_blocks() -> (Heap, usize, usize) {
        let mut heap = Heap::new().unwrap();
        let a = heap.allocate(100).unwrap().unwrap();
        let b = heap.allocate(100).unwrap().unwrap();
        let c = heap.allocate(100).unwrap().unwrap();
        // Consume the tail exactly so releasing c coalesces with nothing.
        let _pin = heap.allocate(168).unwrap().unwrap();
        heap.release(a).unwrap();
        heap.release(c).unwrap();
        let _ = b;
        (heap, a, c)
    }

    #[test]
    fn test_clean_heap_passes() {
        let mut heap = Heap::new().unwrap();
        let blocks: Vec<usize> = (0..8)
            .map(|i| heap.allocate(i * 40 + 1).unwrap().unwrap())
            .collect();
        for &bp in blocks.iter().step_by(2) {
            heap.release(bp).unwrap();
        }
        heap.verify().unwrap();
        heap.validate("after mixed ops");
    }

    #[test]
    fn test_detects_footer_mismatch() {
        let mut heap = Heap::new().unwrap();
        let bp = heap.allocate(64).unwrap().unwrap();
        let size = layout::size_of(&heap.arena, bp);
        heap.arena.write_word(bp + size - OVERHEAD, pack(size, false));
        assert_eq!(heap.verify(), Err(CheckViolation::TagMismatch { bp }));
    }

    #[test]
    fn test_detects_bad_prologue() {
        let heap_result = Heap::new();
        let mut heap = heap_result.unwrap();
        heap.arena.write_word(PROLOGUE, pack(OVERHEAD, false));
        assert_eq!(heap.verify(), Err(CheckViolation::BadPrologue));
    }

    #[test]
    fn test_detects_bad_epilogue() {
        let mut heap = Heap::new().unwrap();
        let top = heap.arena.len();
        heap.arena.write_word(top - layout::WORD, pack(0, false));
        assert_eq!(heap.verify(), Err(CheckViolation::BadEpilogue { at: top }));
    }

    #[test]
    fn test_detects_broken_backlink() {
        let (mut heap, a, c) = heap_with_two_free_blocks();
        // a heads the bucket, c follows; break c's back link.
        layout::set_pred(&mut heap.arena, c, None);
        assert_eq!(
            heap.verify(),
            Err(CheckViolation::BrokenBacklink {
                class: crate::free_index::class_of(112),
                bp: a
            })
        );
    }

    #[test]
    fn test_detects_cycle() {
        let (mut heap, a, c) = heap_with_two_free_blocks();
        layout::set_succ(&mut heap.arena, c, Some(a));
        assert_eq!(
            heap.verify(),
            Err(CheckViolation::Cycle {
                class: crate::free_index::class_of(112)
            })
        );
    }

    #[test]
    fn test_detects_wrong_bucket() {
        let (mut heap, a, _) = heap_with_two_free_blocks();
        let class = crate::free_index::class_of(112);
        heap.index.heads[class + 2] = heap.index.heads[class].take();
        assert_eq!(
            heap.verify(),
            Err(CheckViolation::WrongBucket {
                class: class + 2,
                bp: a,
                size: 112
            })
        );
    }

    #[test]
    fn test_detects_unindexed_free_block() {
        let (mut heap, _, _) = heap_with_two_free_blocks();
        let class = crate::free_index::class_of(112);
        heap.index.heads[class] = None;
        assert_eq!(
            heap.verify(),
            Err(CheckViolation::FreeCountMismatch {
                walked: 2,
                indexed: 0
            })
        );
    }

    #[test]
    #[should_panic(expected = "heap corruption at checkpoint")]
    fn test_validate_panics_on_corruption() {
        let mut heap = Heap::new().unwrap();
        let top = heap.arena.len();
        heap.arena.write_word(top - layout::WORD, pack(0, false));
        heap.validate("checkpoint");
    }

    #[test]
    fn test_verify_ignores_lifecycle_config() {
        let heap = Heap::with_config(HeapConfig {
            record_lifecycle: false,
            ..HeapConfig::default()
        })
        .unwrap();
        heap.verify().unwrap();
    }
}
