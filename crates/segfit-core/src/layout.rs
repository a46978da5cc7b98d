//! Boundary-tag block layout.
//!
//! Every block carries a 4-byte header immediately before its payload and
//! an identical 4-byte footer at its end, each packing (size, allocated)
//! into one word. The footer exists so a block's physical predecessor can
//! be located by reading the word just before the header, whether or not
//! that predecessor is free. Free blocks additionally overlay two 8-byte
//! link words (bucket-list predecessor and successor, stored as
//! arena-relative payload offsets with 0 meaning none) at the start of
//! their payload, which is why [`MIN_BLOCK`] is 24.
//!
//! All navigation here is offset arithmetic over the arena buffer; there
//! are no pointers to reinterpret.

use crate::arena::Arena;

/// Tag word size in bytes (header or footer).
pub const WORD: usize = 4;

/// Payload alignment; block sizes are multiples of this.
pub const ALIGNMENT: usize = 8;

/// Per-block metadata overhead: one header plus one footer.
pub const OVERHEAD: usize = 2 * WORD;

/// One free-list link word (an offset stored as little-endian u64).
pub const LINK: usize = 8;

/// Minimum block size: header + footer + two link words.
pub const MIN_BLOCK: usize = OVERHEAD + 2 * LINK;

/// Bytes the heap base occupies before the first real block:
/// 4 bytes of padding, the 8-byte prologue sentinel, and the initial
/// epilogue header.
pub const BASE: usize = 16;

/// Payload offset of the prologue sentinel block.
pub const PROLOGUE: usize = 8;

/// Payload offset of the first real block.
pub const FIRST_BLOCK: usize = 16;

/// Largest block size a 4-byte tag can encode (8-aligned).
pub const MAX_BLOCK: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
pub fn align_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Packs a block size and its allocated flag into one tag word.
///
/// Sizes are 8-aligned, so the low three bits are free for the flag.
pub fn pack(size: usize, allocated: bool) -> u32 {
    debug_assert!(size <= MAX_BLOCK && size % ALIGNMENT == 0);
    size as u32 | allocated as u32
}

/// Splits a tag word back into (size, allocated).
pub fn unpack(tag: u32) -> (usize, bool) {
    ((tag & !0x7) as usize, tag & 0x1 != 0)
}

/// Header offset of the block whose payload starts at `bp`.
pub fn header(bp: usize) -> usize {
    bp - WORD
}

/// Size of the block at payload offset `bp`, from its header.
pub fn size_of(arena: &Arena, bp: usize) -> usize {
    unpack(arena.read_word(header(bp))).0
}

/// Allocated flag of the block at payload offset `bp`, from its header.
pub fn is_allocated(arena: &Arena, bp: usize) -> bool {
    unpack(arena.read_word(header(bp))).1
}

/// Footer offset of the block at payload offset `bp`.
pub fn footer(arena: &Arena, bp: usize) -> usize {
    bp + size_of(arena, bp) - OVERHEAD
}

/// Writes matching header and footer tags for the block at `bp`.
pub fn write_tags(arena: &mut Arena, bp: usize, size: usize, allocated: bool) {
    let tag = pack(size, allocated);
    arena.write_word(header(bp), tag);
    arena.write_word(bp + size - OVERHEAD, tag);
}

/// Payload offset of the physically following block.
pub fn next_block(arena: &Arena, bp: usize) -> usize {
    bp + size_of(arena, bp)
}

/// Payload offset of the physically preceding block, located through the
/// footer word sitting directly before this block's header.
pub fn prev_block(arena: &Arena, bp: usize) -> usize {
    let (prev_size, _) = unpack(arena.read_word(bp - OVERHEAD));
    bp - prev_size
}

/// Allocated flag of the physically preceding block, read from its footer.
pub fn prev_allocated(arena: &Arena, bp: usize) -> bool {
    unpack(arena.read_word(bp - OVERHEAD)).1
}

/// Bucket-list predecessor link of the free block at `bp`.
pub fn pred_of(arena: &Arena, bp: usize) -> Option<usize> {
    match arena.read_link(bp) {
        0 => None,
        off => Some(off),
    }
}

/// Bucket-list successor link of the free block at `bp`.
pub fn succ_of(arena: &Arena, bp: usize) -> Option<usize> {
    match arena.read_link(bp + LINK) {
        0 => None,
        off => Some(off),
    }
}

/// Stores the bucket-list predecessor link of the free block at `bp`.
pub fn set_pred(arena: &mut Arena, bp: usize, pred: Option<usize>) {
    arena.write_link(bp, pred.unwrap_or(0));
}

/// Stores the bucket-list successor link of the free block at `bp`.
pub fn set_succ(arena: &mut Arena, bp: usize, succ: Option<usize>) {
    arena.write_link(bp + LINK, succ.unwrap_or(0));
}
