//! Size-class segregated free lists.
//!
//! Free blocks are partitioned into 32 buckets by power-of-two size
//! ranges: bucket `i` (0-based) covers sizes in `[2^i, 2^(i+1) - 1]`, and
//! the last bucket is a catch-all for everything at or above `2^31`. Each
//! bucket heads an explicit doubly linked list, kept sorted by ascending
//! block size, whose links live inside the free blocks' own payloads
//! (see [`crate::layout`]).
//!
//! Lookup is a bounded first-fit: at most [`PROBE_CAP`] nodes of the home
//! bucket are examined before falling through to the head of the next
//! non-empty bucket. The fall-through needs no size check: a request homed
//! in bucket `i` is strictly below `2^(i+1)`, and every block in a higher
//! bucket is at least that large.

use crate::arena::Arena;
use crate::layout;

/// Number of size-class buckets.
pub const NUM_CLASSES: usize = 32;

/// Maximum nodes probed in the home bucket before falling through.
pub const PROBE_CAP: usize = 3;

/// Returns the bucket index whose range contains `size`.
pub fn class_of(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let log2 = (usize::BITS - 1 - size.leading_zeros()) as usize;
    log2.min(NUM_CLASSES - 1)
}

/// The inclusive size range covered by bucket `class`;
/// `None` upper bound for the catch-all.
pub fn class_range(class: usize) -> (usize, Option<usize>) {
    let low = 1usize << class;
    if class < NUM_CLASSES - 1 {
        (low, Some((1usize << (class + 1)) - 1))
    } else {
        (low, None)
    }
}

/// The 32 bucket heads, indexed by size class.
///
/// Head and link values are arena-relative payload offsets. All methods
/// take the arena explicitly; nothing here depends on hidden call order.
#[derive(Debug)]
pub struct FreeIndex {
    pub(crate) heads: [Option<usize>; NUM_CLASSES],
    len: usize,
}

impl FreeIndex {
    /// Creates an index with every bucket empty.
    pub fn new() -> Self {
        Self {
            heads: [None; NUM_CLASSES],
            len: 0,
        }
    }

    /// Number of indexed free blocks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no free block is indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Head of bucket `class`, if any.
    pub fn head(&self, class: usize) -> Option<usize> {
        self.heads[class]
    }

    /// Head of the first non-empty bucket strictly above `class`.
    fn next_head(&self, class: usize) -> Option<usize> {
        self.heads[class + 1..].iter().copied().flatten().next()
    }

    /// Bounded first-fit lookup for a block of at least `asize` bytes.
    pub fn find_fit(&self, arena: &Arena, asize: usize) -> Option<usize> {
        let home = class_of(asize);
        let mut probes = 0;
        let mut cur = self.heads[home];
        while let Some(bp) = cur {
            if layout::size_of(arena, bp) >= asize {
                return Some(bp);
            }
            probes += 1;
            if probes == PROBE_CAP {
                break;
            }
            cur = layout::succ_of(arena, bp);
        }
        // Every block in a higher bucket exceeds asize by construction of
        // the bucket ranges, so its head is taken without scanning.
        self.next_head(home)
    }

    /// Inserts the free block at `bp` into its home bucket, keeping the
    /// list sorted by ascending size.
    pub fn insert(&mut self, arena: &mut Arena, bp: usize) {
        let size = layout::size_of(arena, bp);
        debug_assert!(!layout::is_allocated(arena, bp));
        let class = class_of(size);
        self.len += 1;

        let Some(head) = self.heads[class] else {
            // Empty bucket.
            layout::set_pred(arena, bp, None);
            layout::set_succ(arena, bp, None);
            self.heads[class] = Some(bp);
            return;
        };

        if size < layout::size_of(arena, head) {
            // Before the current head.
            layout::set_pred(arena, bp, None);
            layout::set_succ(arena, bp, Some(head));
            layout::set_pred(arena, head, Some(bp));
            self.heads[class] = Some(bp);
            return;
        }

        // After the last node not larger than the block: covers both the
        // single-element bucket and the middle/end of a longer list.
        let mut cur = head;
        loop {
            match layout::succ_of(arena, cur) {
                Some(next) if layout::size_of(arena, next) <= size => cur = next,
                next => {
                    layout::set_pred(arena, bp, Some(cur));
                    layout::set_succ(arena, bp, next);
                    layout::set_succ(arena, cur, Some(bp));
                    if let Some(next) = next {
                        layout::set_pred(arena, next, Some(bp));
                    }
                    return;
                }
            }
        }
    }

    /// Unlinks the free block at `bp` using its own stored links,
    /// promoting its successor if it headed the bucket.
    pub fn remove(&mut self, arena: &mut Arena, bp: usize) {
        let pred = layout::pred_of(arena, bp);
        let succ = layout::succ_of(arena, bp);
        match pred {
            Some(pred) => layout::set_succ(arena, pred, succ),
            None => {
                let class = class_of(layout::size_of(arena, bp));
                debug_assert_eq!(self.heads[class], Some(bp));
                self.heads[class] = succ;
            }
        }
        if let Some(succ) = succ {
            layout::set_pred(arena, succ, pred);
        }
        self.len -= 1;
    }

    /// Sizes of the blocks in bucket `class`, head first. Test/validator aid.
    pub fn bucket_sizes(&self, arena: &Arena, class: usize) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut cur = self.heads[class];
        while let Some(bp) = cur {
            sizes.push(layout::size_of(arena, bp));
            cur = layout::succ_of(arena, bp);
        }
        sizes
    }
}

impl Default for FreeIndex {
    fn default() -> Self {
        Self::new()
    }
}
