//! Arena blocks.
//!
//! A [`Block`] is one contiguous buffer obtained from the system allocator
//! with a high-water `used` offset. Blocks never move or grow; an arena that
//! runs out of room appends a new one.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{ArenaError, Result};

/// Alignment of every block's base address.
///
/// Requests with a larger alignment are still honored; they just pay for it
/// in padding.
pub const BLOCK_ALIGNMENT: usize = 16;

/// A fixed-size buffer with bump allocation.
///
/// # Safety
///
/// - The buffer is allocated in [`Block::new`] and released only in `Drop`
/// - `used` never exceeds the buffer size, so every pointer handed out by
///   [`Block::bump`] is in bounds
#[derive(Debug)]
pub struct Block {
    /// Start of the buffer.
    base: NonNull<u8>,
    /// Layout the buffer was allocated with.
    layout: Layout,
    /// Bytes in use from the start of the buffer.
    used: usize,
}

// SAFETY: the block exclusively owns its buffer; nothing else aliases it.
unsafe impl Send for Block {}

impl Block {
    /// Allocates a block of exactly `size` bytes.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::ZeroSized`] when `size` is zero
    /// - [`ArenaError::InvalidLayout`] when `size` cannot be described by a
    ///   [`Layout`]
    /// - [`ArenaError::OutOfMemory`] when the system allocator fails
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(ArenaError::ZeroSized);
        }
        let layout = Layout::from_size_align(size, BLOCK_ALIGNMENT).map_err(|_| {
            ArenaError::InvalidLayout {
                size,
                align: BLOCK_ALIGNMENT,
            }
        })?;

        // SAFETY: layout has a non-zero size (checked above).
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base).ok_or(ArenaError::OutOfMemory { size })?;

        Ok(Self {
            base,
            layout,
            used: 0,
        })
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Bytes in use.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes left after the high-water mark.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.size() - self.used
    }

    /// Moves the high-water mark back to `offset`.
    pub(crate) fn rewind(&mut self, offset: usize) {
        debug_assert!(offset <= self.size(), "rewind past the end of a block");
        self.used = offset.min(self.size());
    }

    /// Offset at which an allocation aligned to `align` would start.
    fn aligned_offset(&self, align: usize) -> Option<usize> {
        let addr = self.base.addr().get().checked_add(self.used)?;
        let padding = addr.checked_next_multiple_of(align)? - addr;
        self.used.checked_add(padding)
    }

    /// Carves `size` bytes aligned to `align` out of the free space.
    ///
    /// Returns `None` when the request does not fit; the block is unchanged
    /// in that case.
    #[inline]
    pub(crate) fn bump(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let start = self.aligned_offset(align)?;
        let end = start.checked_add(size)?;
        if end > self.size() {
            return None;
        }
        self.used = end;

        // SAFETY: start <= end <= size, so the pointer stays inside the
        // buffer allocated for this block.
        Some(unsafe { self.base.add(start) })
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: base was allocated with exactly this layout in `new`.
        unsafe {
            alloc::dealloc(self.base.as_ptr(), self.layout);
        }
    }
}
