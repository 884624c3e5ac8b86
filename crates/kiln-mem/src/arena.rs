//! Block-chained bump arena.
//!
//! An [`Arena`] owns an ordered list of [`Block`]s. The last block is the
//! current one; allocations bump its `used` offset, and a request that does
//! not fit appends a fresh block. Memory is released only in bulk: by
//! [`Arena::reset`], by [`Arena::free`], by closing a temporary region (see
//! [`Arena::temp_begin`]), or by dropping the arena.
//!
//! # Examples
//!
//! ```
//! use kiln_mem::Arena;
//!
//! let mut arena = Arena::new(0).unwrap(); // 1 MiB blocks
//!
//! let a = arena.alloc_value(42u32).unwrap();
//! let b = arena.alloc_value(100u64).unwrap();
//!
//! unsafe {
//!     assert_eq!(*a.as_ptr(), 42);
//!     assert_eq!(*b.as_ptr(), 100);
//! }
//!
//! arena.reset();
//! assert_eq!(arena.stats().used_size, 0);
//! ```
//!
//! # Pointer validity
//!
//! Pointers returned by the allocation methods stay valid until the arena is
//! reset, freed or dropped, or until a temporary region opened before the
//! allocation is closed. The arena never moves an allocation. Values placed
//! with [`Arena::alloc_value`] are never dropped.

use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};

use kiln_log::{error, trace};

use crate::block::Block;
use crate::config::{ArenaConfig, DEFAULT_ALIGNMENT, MAX_TEMP_MARKERS};
use crate::error::{ArenaError, Result};
use crate::temp::Snapshot;

/// Arena usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Sum of all live block sizes, in bytes.
    pub total_size: usize,
    /// Sum of all live blocks' high-water marks, padding included.
    pub used_size: usize,
    /// Number of live blocks.
    pub block_count: usize,
}

/// A point in an arena's allocation history: a block and an offset in it.
///
/// The position of an arena is the end of its most recent allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaPosition {
    /// Index of the block in the arena's chain.
    pub block: usize,
    /// High-water mark of that block.
    pub offset: usize,
}

/// Single-owner bump allocator over a chain of blocks.
///
/// `Arena` is `Send` but not `Sync`; share it across threads only with
/// external synchronization.
pub struct Arena {
    /// Live blocks; the last one is the current block.
    pub(crate) blocks: Vec<Block>,
    /// Minimum size of every new block.
    pub(crate) block_size: usize,
    /// Sum of all live block sizes.
    pub(crate) total_allocated: usize,
    /// Open temporary regions, oldest first.
    pub(crate) markers: Vec<Snapshot>,
    /// Id handed to the next temporary region.
    pub(crate) next_marker_id: u64,
}

impl Arena {
    /// Creates an arena whose blocks are at least `block_size` bytes.
    ///
    /// `0` selects the 1 MiB default. The first block is allocated
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ArenaError::OutOfMemory`] or [`ArenaError::InvalidLayout`]
    /// when the first block cannot be allocated.
    pub fn new(block_size: usize) -> Result<Self> {
        Self::with_config(&ArenaConfig::new(block_size))
    }

    /// Creates an arena from a config.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::new`].
    pub fn with_config(config: &ArenaConfig) -> Result<Self> {
        let block_size = config.resolved_block_size();
        let first = Block::new(block_size).inspect_err(|err| {
            error!("failed to allocate first arena block: {err}");
        })?;

        Ok(Self {
            blocks: vec![first],
            block_size,
            total_allocated: block_size,
            markers: Vec::with_capacity(MAX_TEMP_MARKERS),
            next_marker_id: 0,
        })
    }

    /// Minimum size of new blocks.
    #[inline]
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sum of all live block sizes. Same as `stats().total_size`, in O(1).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.total_allocated
    }

    /// Number of live blocks.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether [`Arena::free`] has released this arena.
    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Current allocation frontier, `None` once the arena is freed.
    #[must_use]
    pub fn position(&self) -> Option<ArenaPosition> {
        let block = self.blocks.len().checked_sub(1)?;
        Some(ArenaPosition {
            block,
            offset: self.blocks[block].used(),
        })
    }

    /// Allocates `size` bytes aligned to [`DEFAULT_ALIGNMENT`].
    ///
    /// The memory is uninitialized.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc_aligned`].
    #[inline]
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.alloc_aligned(size, DEFAULT_ALIGNMENT)
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// When the current block is too small a new block of
    /// `max(block_size, size + align - 1)` bytes is appended and the
    /// allocation is served from it. The memory is uninitialized.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::ZeroSized`] when `size` is zero
    /// - [`ArenaError::InvalidAlignment`] when `align` is not a power of two
    ///   (debug builds panic instead)
    /// - [`ArenaError::Released`] after [`Arena::free`]
    /// - [`ArenaError::OutOfMemory`] / [`ArenaError::InvalidLayout`] when a
    ///   new block is needed and cannot be allocated
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(ArenaError::ZeroSized);
        }
        debug_assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        if !align.is_power_of_two() {
            return Err(ArenaError::InvalidAlignment { align });
        }

        let current = self.blocks.last_mut().ok_or(ArenaError::Released)?;
        if let Some(ptr) = current.bump(size, align) {
            return Ok(ptr);
        }

        let min_size = size
            .checked_add(align - 1)
            .ok_or(ArenaError::InvalidLayout { size, align })?;
        let block = self.grow(min_size)?;
        block.bump(size, align).ok_or(ArenaError::OutOfMemory { size })
    }

    /// Allocates `size` zeroed bytes aligned to [`DEFAULT_ALIGNMENT`].
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc_aligned`].
    pub fn calloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        let ptr = self.alloc(size)?;
        // SAFETY: ptr points to `size` freshly allocated, writable bytes.
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Ok(ptr)
    }

    /// Moves `value` into the arena.
    ///
    /// The value is never dropped by the arena. Zero-sized values take no
    /// space and get a dangling, well-aligned pointer.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc_aligned`].
    pub fn alloc_value<T>(&mut self, value: T) -> Result<NonNull<T>> {
        let ptr = match mem::size_of::<T>() {
            0 => NonNull::dangling(),
            size => self.alloc_aligned(size, mem::align_of::<T>())?.cast::<T>(),
        };
        // SAFETY: ptr is aligned for T and valid for size_of::<T>() bytes.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Copies a slice into the arena.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc_aligned`].
    pub fn alloc_slice_copy<T: Copy>(&mut self, src: &[T]) -> Result<NonNull<[T]>> {
        let size = mem::size_of_val(src);
        if size == 0 {
            return Ok(NonNull::slice_from_raw_parts(NonNull::dangling(), src.len()));
        }

        let ptr = self.alloc_aligned(size, mem::align_of::<T>())?.cast::<T>();
        // SAFETY: the destination is fresh arena memory of `size` bytes, so it
        // cannot overlap `src`.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len()) };
        Ok(NonNull::slice_from_raw_parts(ptr, src.len()))
    }

    /// Copies a string into the arena.
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc_aligned`].
    pub fn alloc_str(&mut self, s: &str) -> Result<NonNull<str>> {
        let bytes = self.alloc_slice_copy(s.as_bytes())?;
        // SAFETY: the bytes were copied verbatim from a `str`.
        Ok(unsafe { NonNull::new_unchecked(bytes.as_ptr() as *mut str) })
    }

    /// Formats into the arena.
    ///
    /// ```
    /// use kiln_mem::Arena;
    ///
    /// let mut arena = Arena::new(4096).unwrap();
    /// let s = arena.alloc_fmt(format_args!("block {}", 3)).unwrap();
    /// assert_eq!(unsafe { s.as_ref() }, "block 3");
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Arena::alloc_aligned`].
    pub fn alloc_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<NonNull<str>> {
        match args.as_str() {
            Some(s) => self.alloc_str(s),
            None => self.alloc_str(&args.to_string()),
        }
    }

    /// Releases everything allocated so far while keeping the first block.
    ///
    /// All open temporary regions are discarded and every block after the
    /// first is returned to the system. A freed arena stays freed.
    pub fn reset(&mut self) {
        if !self.markers.is_empty() {
            self.report_open_markers("reset");
            self.markers.clear();
        }
        if self.blocks.is_empty() {
            return;
        }

        let released = self.blocks.len() - 1;
        self.blocks.truncate(1);
        let first = &mut self.blocks[0];
        first.rewind(0);
        self.total_allocated = first.size();
        trace!("arena reset, {released} extra blocks released");
    }

    /// Returns every block to the system.
    ///
    /// The arena is unusable afterwards: allocations and region operations
    /// return [`ArenaError::Released`] and [`Arena::stats`] reports zeros.
    pub fn free(&mut self) {
        if !self.markers.is_empty() {
            self.report_open_markers("free");
            self.markers.clear();
        }
        self.blocks.clear();
        self.total_allocated = 0;
    }

    /// Walks the block chain and sums sizes and usage.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.blocks.iter().fold(ArenaStats::default(), |mut stats, block| {
            stats.total_size += block.size();
            stats.used_size += block.used();
            stats.block_count += 1;
            stats
        })
    }

    /// Appends a block of at least `min_size` bytes and makes it current.
    #[cold]
    fn grow(&mut self, min_size: usize) -> Result<&mut Block> {
        let size = self.block_size.max(min_size);
        let block = Block::new(size).inspect_err(|err| {
            error!("failed to grow arena by {size} bytes: {err}");
        })?;

        self.total_allocated += size;
        self.blocks.push(block);
        trace!(
            "arena grew to {} blocks ({} bytes)",
            self.blocks.len(),
            self.total_allocated
        );

        // The block was pushed just above.
        self.blocks.last_mut().ok_or(ArenaError::Released)
    }

    /// Frees every block after `position.block` and rewinds that block to
    /// `position.offset`.
    pub(crate) fn truncate_to(&mut self, position: ArenaPosition) {
        debug_assert!(
            position.block < self.blocks.len(),
            "snapshot names a block that is no longer live"
        );

        let mut released = 0;
        for block in self.blocks.drain(position.block + 1..) {
            self.total_allocated -= block.size();
            released += 1;
        }
        if let Some(block) = self.blocks.get_mut(position.block) {
            block.rewind(position.offset);
        }
        if released > 0 {
            trace!("released {released} blocks back to block {}", position.block);
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if !self.markers.is_empty() {
            self.report_open_markers("drop");
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("block_size", &self.block_size)
            .field("total_allocated", &self.total_allocated)
            .field("blocks", &self.blocks.len())
            .field("open_markers", &self.markers.len())
            .finish()
    }
}
