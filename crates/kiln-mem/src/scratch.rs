//! Scoped temporary regions.
//!
//! A [`ScratchArena`] borrows an arena for the length of one temporary region
//! and closes the region when it goes out of scope, whichever way the scope
//! is left. Because the handle holds the arena's only mutable borrow, inner
//! scopes (opened through [`ScratchArena::scratch`]) always end before outer
//! ones.
//!
//! ```
//! use kiln_mem::Arena;
//!
//! let mut arena = Arena::new(4096).unwrap();
//!
//! {
//!     let mut scratch = arena.scratch().unwrap();
//!     let buf = scratch.alloc(256).unwrap();
//!     unsafe { buf.as_ptr().write_bytes(0, 256) };
//! }
//!
//! assert_eq!(arena.stats().used_size, 0);
//! ```

use std::fmt;
use std::ptr::NonNull;

use kiln_log::warn;

use crate::arena::{Arena, ArenaStats};
use crate::error::Result;
use crate::temp::TempMarker;

/// RAII handle over one temporary region of an [`Arena`].
pub struct ScratchArena<'a> {
    arena: &'a mut Arena,
    marker: TempMarker,
    active: bool,
}

impl<'a> ScratchArena<'a> {
    /// Opens a region on `arena`.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::temp_begin`].
    pub fn begin(arena: &'a mut Arena) -> Result<Self> {
        let marker = arena.temp_begin()?;
        Ok(Self {
            arena,
            marker,
            active: true,
        })
    }

    /// Marker of the region this handle owns.
    #[inline]
    #[must_use]
    pub fn marker(&self) -> TempMarker {
        self.marker
    }

    /// Statistics of the underlying arena.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// See [`Arena::alloc`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    #[inline]
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.arena.alloc(size)
    }

    /// See [`Arena::alloc_aligned`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    #[inline]
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.arena.alloc_aligned(size, align)
    }

    /// See [`Arena::calloc`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn calloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.arena.calloc(size)
    }

    /// See [`Arena::alloc_value`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn alloc_value<T>(&mut self, value: T) -> Result<NonNull<T>> {
        self.arena.alloc_value(value)
    }

    /// See [`Arena::alloc_slice_copy`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn alloc_slice_copy<T: Copy>(&mut self, src: &[T]) -> Result<NonNull<[T]>> {
        self.arena.alloc_slice_copy(src)
    }

    /// See [`Arena::alloc_str`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn alloc_str(&mut self, s: &str) -> Result<NonNull<str>> {
        self.arena.alloc_str(s)
    }

    /// See [`Arena::alloc_fmt`].
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn alloc_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<NonNull<str>> {
        self.arena.alloc_fmt(args)
    }

    /// Opens an inner scope on the same arena.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::temp_begin`].
    pub fn scratch(&mut self) -> Result<ScratchArena<'_>> {
        ScratchArena::begin(self.arena)
    }

    /// Closes the region now and reports the outcome.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::temp_end`].
    pub fn end(mut self) -> Result<()> {
        self.active = false;
        self.arena.temp_end(self.marker)
    }
}

impl Drop for ScratchArena<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.arena.temp_end(self.marker) {
            warn!("scratch region {} not released: {err}", self.marker.index());
        }
    }
}

impl fmt::Debug for ScratchArena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchArena")
            .field("marker", &self.marker)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Arena {
    /// Opens a scratch scope on this arena.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::temp_begin`].
    pub fn scratch(&mut self) -> Result<ScratchArena<'_>> {
        ScratchArena::begin(self)
    }

    /// Runs `f` inside a scratch scope and closes it afterwards.
    ///
    /// ```
    /// use kiln_mem::Arena;
    ///
    /// let mut arena = Arena::new(4096).unwrap();
    /// let len = arena
    ///     .with_scratch(|s| {
    ///         let text = s.alloc_fmt(format_args!("{}+{}", 1, 2)).unwrap();
    ///         unsafe { text.as_ref().len() }
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(len, 3);
    /// assert_eq!(arena.stats().used_size, 0);
    /// ```
    ///
    /// # Errors
    ///
    /// Fails when the scope cannot be opened or closed.
    pub fn with_scratch<R>(&mut self, f: impl FnOnce(&mut ScratchArena<'_>) -> R) -> Result<R> {
        let mut scratch = self.scratch()?;
        let value = f(&mut scratch);
        scratch.end()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArenaError;

    fn fill(scratch: &mut ScratchArena<'_>, fail_after: usize) -> Result<()> {
        for i in 0..10 {
            if i == fail_after {
                return Err(ArenaError::ZeroSized);
            }
            scratch.alloc(100)?;
        }
        Ok(())
    }

    #[test]
    fn test_scope_releases_on_drop() {
        let mut arena = Arena::new(512).unwrap();
        arena.alloc(24).unwrap();

        {
            let mut scratch = arena.scratch().unwrap();
            for _ in 0..20 {
                scratch.alloc(64).unwrap();
            }
        }

        assert_eq!(arena.stats().used_size, 24);
        assert_eq!(arena.block_count(), 1);
        assert_eq!(arena.open_markers(), 0);
    }

    #[test]
    fn test_scope_releases_on_early_return() {
        let mut arena = Arena::new(512).unwrap();
        {
            let mut scratch = arena.scratch().unwrap();
            assert!(fill(&mut scratch, 3).is_err());
        }
        assert_eq!(arena.stats().used_size, 0);
    }

    #[test]
    fn test_scope_releases_on_panic() {
        let mut arena = Arena::new(512).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut scratch = arena.scratch().unwrap();
            scratch.alloc(128).unwrap();
            panic!("boom");
        }));

        assert!(result.is_err());
        assert_eq!(arena.stats().used_size, 0);
        assert_eq!(arena.open_markers(), 0);
    }

    #[test]
    fn test_nested_scopes() {
        let mut arena = Arena::new(1024).unwrap();
        let mut outer = arena.scratch().unwrap();
        outer.alloc(32).unwrap();

        {
            let mut inner = outer.scratch().unwrap();
            inner.alloc(256).unwrap();
            assert_eq!(inner.marker().index(), 1);
            assert!(inner.stats().used_size >= 288);
        }

        assert_eq!(outer.stats().used_size, 32);
        outer.end().unwrap();
        assert_eq!(arena.stats().used_size, 0);
    }

    #[test]
    fn test_explicit_end() {
        let mut arena = Arena::new(256).unwrap();
        let mut scratch = arena.scratch().unwrap();
        scratch.calloc(16).unwrap();
        scratch.end().unwrap();
        assert_eq!(arena.open_markers(), 0);
    }

    #[test]
    fn test_with_scratch_returns_value() {
        let mut arena = Arena::new(256).unwrap();
        let sum = arena
            .with_scratch(|s| {
                let values = s.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
                unsafe { values.as_ref().iter().sum::<u32>() }
            })
            .unwrap();

        assert_eq!(sum, 6);
        assert_eq!(arena.stats().used_size, 0);
    }

    #[test]
    fn test_scratch_on_freed_arena() {
        let mut arena = Arena::new(256).unwrap();
        arena.free();
        assert_eq!(arena.scratch().unwrap_err(), ArenaError::Released);
    }
}
