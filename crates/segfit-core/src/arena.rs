//! The growable memory arena.
//!
//! Owns the contiguous byte region the allocator manages. The region only
//! ever grows; block metadata and payloads are addressed by byte offset
//! into it, so there is no pointer arithmetic anywhere in the crate.
//!
//! [`Arena::extend`] is the "ask for more memory" primitive: it grows the
//! buffer and installs the boundary tags that turn the fresh region into
//! one free block, rewriting the previous epilogue header as that block's
//! header and placing a new epilogue at the top.

use crate::error::HeapError;
use crate::layout::{self, ALIGNMENT, BASE, OVERHEAD, PROLOGUE, WORD};

/// A contiguous, growable memory region with an optional byte limit.
///
/// The limit models the exhaustion of the underlying growth primitive:
/// a grow request that would push the buffer past it fails with
/// [`HeapError::OutOfMemory`] and is never retried.
#[derive(Debug)]
pub struct Arena {
    buf: Vec<u8>,
    limit: usize,
}

impl Arena {
    /// Creates an empty arena with no practical byte limit.
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Creates an empty arena that refuses to grow past `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Current arena size in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True before [`Arena::bootstrap`] has run.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Configured byte limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The (low, high) offset bounds of the region, for in-range checks.
    pub fn bounds(&self) -> (usize, usize) {
        (0, self.buf.len())
    }

    /// Grows the buffer by `bytes` zeroed bytes, respecting the limit.
    pub(crate) fn grow(&mut self, bytes: usize) -> Result<(), HeapError> {
        let new_len = self
            .buf
            .len()
            .checked_add(bytes)
            .filter(|&n| n <= self.limit)
            .ok_or(HeapError::OutOfMemory {
                requested: bytes,
                heap_bytes: self.buf.len(),
                limit: self.limit,
            })?;
        self.buf.resize(new_len, 0);
        Ok(())
    }

    /// Reads the little-endian tag word at `off`.
    pub fn read_word(&self, off: usize) -> u32 {
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.buf[off..off + WORD]);
        u32::from_le_bytes(word)
    }

    /// Writes the little-endian tag word at `off`.
    pub fn write_word(&mut self, off: usize, value: u32) {
        self.buf[off..off + WORD].copy_from_slice(&value.to_le_bytes());
    }

    /// Reads the little-endian link word at `off`.
    pub fn read_link(&self, off: usize) -> usize {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.buf[off..off + 8]);
        u64::from_le_bytes(word) as usize
    }

    /// Writes the little-endian link word at `off`.
    pub fn write_link(&mut self, off: usize, value: usize) {
        self.buf[off..off + 8].copy_from_slice(&(value as u64).to_le_bytes());
    }

    /// Borrows `len` bytes starting at `off`.
    pub fn bytes(&self, off: usize, len: usize) -> &[u8] {
        &self.buf[off..off + len]
    }

    /// Mutably borrows `len` bytes starting at `off`.
    pub fn bytes_mut(&mut self, off: usize, len: usize) -> &mut [u8] {
        &mut self.buf[off..off + len]
    }

    /// Copies `len` bytes from `src` to `dst` within the region.
    pub fn copy(&mut self, src: usize, dst: usize, len: usize) {
        self.buf.copy_within(src..src + len, dst);
    }

    /// Installs the fixed heap base: alignment padding, the allocated
    /// prologue sentinel, and the initial zero-size epilogue header.
    pub(crate) fn bootstrap(&mut self) -> Result<(), HeapError> {
        self.grow(BASE)?;
        self.write_word(0, 0);
        self.write_word(WORD, layout::pack(OVERHEAD, true));
        self.write_word(PROLOGUE, layout::pack(OVERHEAD, true));
        self.write_word(PROLOGUE + WORD, layout::pack(0, true));
        Ok(())
    }

    /// Extends the region by at least `bytes` (rounded up to 8) and
    /// returns the payload offset of the fresh free block.
    ///
    /// The previous epilogue header becomes the new block's header; a new
    /// epilogue header is written at the top. The caller is responsible
    /// for coalescing and indexing the block.
    pub fn extend(&mut self, bytes: usize) -> Result<usize, HeapError> {
        let size = layout::align_up(bytes);
        if size == 0 || size > layout::MAX_BLOCK {
            return Err(HeapError::OutOfMemory {
                requested: bytes,
                heap_bytes: self.buf.len(),
                limit: self.limit,
            });
        }
        self.grow(size)?;

        // Old epilogue header sits one word below the old top; its offset
        // is the new block's header, so the payload begins at the old top.
        let bp = self.buf.len() - size;
        layout::write_tags(self, bp, size, false);
        self.write_word(bp + size - WORD, layout::pack(0, true));
        Ok(bp)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}
