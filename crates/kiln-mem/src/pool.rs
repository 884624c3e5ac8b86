//! Pooled scratch regions.
//!
//! A [`ScratchPool`] owns a dedicated temp [`Arena`] and keeps a small LIFO
//! cache of idle temporary regions. Releasing a scratch region rewinds the
//! arena to where the region began, so its memory is reclaimed at scope
//! exit, and parks the still-open marker in the cache. The next acquire
//! takes the parked marker back and rebases it to the arena's current
//! frontier.
//!
//! # Rebasing
//!
//! A parked region is closed one of two ways when it is picked up again:
//!
//! - **ended** when nothing was allocated in the temp arena since it was
//!   parked
//! - **committed** otherwise, so temp allocations made in the meantime
//!   survive
//!
//! Either way a fresh region then begins at the current frontier.
//!
//! # Example
//!
//! ```
//! use kiln_mem::ScratchPool;
//!
//! let mut pool = ScratchPool::new(64 * 1024).unwrap();
//!
//! for _ in 0..3 {
//!     let mut scratch = pool.get().unwrap();
//!     scratch.alloc(512).unwrap();
//! } // each handle parks its region here
//!
//! let stats = pool.stats();
//! assert_eq!(stats.misses, 1);
//! assert_eq!(stats.hits, 2);
//! ```

use std::fmt;
use std::ptr::NonNull;

use kiln_log::{debug, warn};

use crate::arena::{Arena, ArenaPosition, ArenaStats};
use crate::config::{ArenaConfig, SCRATCH_POOL_CAPACITY};
use crate::error::{ArenaError, Result};
use crate::temp::TempMarker;

/// An idle region and the frontier at the time it was parked.
#[derive(Debug, Clone, Copy)]
struct CachedScratch {
    marker: TempMarker,
    frontier: ArenaPosition,
}

/// Temp arena plus a bounded cache of idle scratch regions.
///
/// When acquiring:
/// 1. If the cache has a region, pop and rebase it (hit)
/// 2. If the cache is empty, open a new region (miss)
///
/// When releasing:
/// 1. If the cache is below capacity, rewind and park the region
/// 2. If the cache is full, close the region right away (overflow)
///
/// Releasing a region retires every idle region opened above it, and an
/// acquire always takes the most recently parked one. Under LIFO use the
/// cache therefore holds at most one region; [`SCRATCH_POOL_CAPACITY`] is an
/// upper bound that is never reached, and only a capacity of zero makes
/// releases overflow.
pub struct ScratchPool {
    /// Backing temp arena.
    arena: Arena,

    /// Idle regions, most recently parked last.
    cached: Vec<CachedScratch>,

    /// Maximum number of idle regions kept.
    capacity: usize,

    /// Acquires served from the cache.
    hits: usize,

    /// Acquires that opened a new region.
    misses: usize,

    /// Releases closed immediately because the cache was full.
    overflows: usize,
}

impl ScratchPool {
    /// Creates a pool over a new temp arena (`0` for the default block size).
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::new`].
    pub fn new(block_size: usize) -> Result<Self> {
        Self::with_config(&ArenaConfig::new(block_size))
    }

    /// Creates a pool over a new temp arena built from `config`.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::with_config`].
    pub fn with_config(config: &ArenaConfig) -> Result<Self> {
        Ok(Self::from_arena(Arena::with_config(config)?))
    }

    /// Creates a pool that takes ownership of `arena`.
    #[must_use]
    pub fn from_arena(arena: Arena) -> Self {
        Self::with_capacity(arena, SCRATCH_POOL_CAPACITY)
    }

    /// Creates a pool that parks at most `capacity` idle regions.
    ///
    /// `capacity` is clamped to [`SCRATCH_POOL_CAPACITY`]. A capacity of zero
    /// closes every region as soon as it is released.
    #[must_use]
    pub fn with_capacity(arena: Arena, capacity: usize) -> Self {
        let capacity = capacity.min(SCRATCH_POOL_CAPACITY);
        Self {
            arena,
            cached: Vec::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
            overflows: 0,
        }
    }

    /// The backing temp arena.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Maximum number of idle regions kept.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes a region from the cache, or opens a new one.
    ///
    /// The returned marker is the topmost open region of the temp arena.
    /// Prefer [`ScratchPool::get`], which releases automatically.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::temp_begin`] or [`Arena::temp_end`].
    pub fn acquire(&mut self) -> Result<TempMarker> {
        let Some(entry) = self.cached.pop() else {
            self.misses += 1;
            return self.arena.temp_begin();
        };

        self.hits += 1;
        self.retire(entry)?;
        let marker = self.arena.temp_begin()?;
        debug!(
            "scratch region {} reused ({} idle)",
            marker.index,
            self.cached.len()
        );
        Ok(marker)
    }

    /// Hands a region back to the pool.
    ///
    /// Idle regions opened after `marker` are retired first. The region is
    /// then parked, or closed right away if the cache is full.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidMarker`] when the region is not open or is
    ///   already parked
    /// - [`ArenaError::MarkerOutOfOrder`] when a region opened after it is
    ///   still in use
    pub fn release(&mut self, marker: TempMarker) -> Result<()> {
        if !self.arena.is_open(marker) || self.cached.iter().any(|e| e.marker == marker) {
            warn!("scratch region {} released twice or never acquired", marker.index);
            return Err(ArenaError::InvalidMarker {
                index: marker.index,
            });
        }

        while self
            .cached
            .last()
            .is_some_and(|entry| entry.marker.index > marker.index)
        {
            if let Some(entry) = self.cached.pop() {
                self.retire(entry)?;
            }
        }

        let open = self.arena.open_markers();
        if marker.index + 1 != open {
            warn!(
                "scratch region {} released while {open} regions are open",
                marker.index
            );
            return Err(ArenaError::MarkerOutOfOrder {
                index: marker.index,
                open,
            });
        }

        if self.cached.len() < self.capacity {
            self.arena.temp_rewind(marker)?;
            let frontier = self.arena.position().ok_or(ArenaError::Released)?;
            self.cached.push(CachedScratch { marker, frontier });
            debug!(
                "scratch region {} parked ({} idle)",
                marker.index,
                self.cached.len()
            );
            Ok(())
        } else {
            self.overflows += 1;
            debug!("scratch cache full, closing region {}", marker.index);
            self.arena.temp_end(marker)
        }
    }

    /// Acquires a region wrapped in a handle that releases it on drop.
    ///
    /// # Errors
    ///
    /// Fails like [`ScratchPool::acquire`].
    pub fn get(&mut self) -> Result<PooledScratch<'_>> {
        let marker = self.acquire()?;
        Ok(PooledScratch {
            pool: self,
            marker,
            active: true,
        })
    }

    /// Runs `f` inside a pooled scratch scope.
    ///
    /// # Errors
    ///
    /// Fails when the scope cannot be acquired or released.
    pub fn with_scratch<R>(&mut self, f: impl FnOnce(&mut PooledScratch<'_>) -> R) -> Result<R> {
        let mut scratch = self.get()?;
        let value = f(&mut scratch);
        scratch.end()?;
        Ok(value)
    }

    /// Allocates from the temp arena outside any scratch scope.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc`].
    #[inline]
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.arena.alloc(size)
    }

    /// Aligned allocation from the temp arena outside any scratch scope.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    #[inline]
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.arena.alloc_aligned(size, align)
    }

    /// Zeroed allocation from the temp arena outside any scratch scope.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::calloc`].
    pub fn calloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.arena.calloc(size)
    }

    /// Closes every idle region.
    pub fn clear(&mut self) {
        while let Some(entry) = self.cached.pop() {
            if let Err(err) = self.retire(entry) {
                warn!("idle scratch region {} not closed: {err}", entry.marker.index);
            }
        }
    }

    /// Forgets every idle region and resets the temp arena.
    pub fn reset(&mut self) {
        self.cached.clear();
        self.arena.reset();
    }

    /// Returns pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            cached: self.cached.len(),
            hits: self.hits,
            misses: self.misses,
            overflows: self.overflows,
        }
    }

    /// Statistics of the temp arena.
    #[must_use]
    pub fn arena_stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Closes a parked region. Its own memory was reclaimed when it was
    /// parked; allocations made since then are kept.
    fn retire(&mut self, entry: CachedScratch) -> Result<()> {
        if self.arena.position() == Some(entry.frontier) {
            self.arena.temp_end(entry.marker)
        } else {
            self.arena.temp_commit(entry.marker)
        }
    }
}

impl Drop for ScratchPool {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchPool")
            .field("arena", &self.arena)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Scratch pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Idle regions currently parked.
    pub cached: usize,

    /// Acquires served from the cache.
    pub hits: usize,

    /// Acquires that opened a new region.
    pub misses: usize,

    /// Releases closed immediately because the cache was full.
    pub overflows: usize,
}

impl PoolStats {
    /// Fraction of acquires served from the cache, `None` before the first.
    #[must_use]
    pub fn hit_rate(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        if total == 0 {
            None
        } else {
            #[allow(clippy::cast_precision_loss)]
            Some(self.hits as f64 / total as f64)
        }
    }
}

/// RAII handle over one pooled scratch region.
///
/// Hands the region back to its pool when dropped.
pub struct PooledScratch<'p> {
    pool: &'p mut ScratchPool,
    marker: TempMarker,
    active: bool,
}

impl PooledScratch<'_> {
    /// Marker of the region this handle owns.
    #[inline]
    #[must_use]
    pub fn marker(&self) -> TempMarker {
        self.marker
    }

    /// Statistics of the temp arena.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.pool.arena.stats()
    }

    /// # Errors
    ///
    /// Fails like [`Arena::alloc`].
    #[inline]
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.pool.arena.alloc(size)
    }

    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    #[inline]
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.pool.arena.alloc_aligned(size, align)
    }

    /// # Errors
    ///
    /// Fails like [`Arena::calloc`].
    pub fn calloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.pool.arena.calloc(size)
    }

    /// # Errors
    ///
    /// Fails like [`Arena::alloc_value`].
    pub fn alloc_value<T>(&mut self, value: T) -> Result<NonNull<T>> {
        self.pool.arena.alloc_value(value)
    }

    /// # Errors
    ///
    /// Fails like [`Arena::alloc_slice_copy`].
    pub fn alloc_slice_copy<T: Copy>(&mut self, src: &[T]) -> Result<NonNull<[T]>> {
        self.pool.arena.alloc_slice_copy(src)
    }

    /// # Errors
    ///
    /// Fails like [`Arena::alloc_str`].
    pub fn alloc_str(&mut self, s: &str) -> Result<NonNull<str>> {
        self.pool.arena.alloc_str(s)
    }

    /// # Errors
    ///
    /// Fails like [`Arena::alloc_fmt`].
    pub fn alloc_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<NonNull<str>> {
        self.pool.arena.alloc_fmt(args)
    }

    /// Opens an inner pooled scope.
    ///
    /// # Errors
    ///
    /// Fails like [`ScratchPool::acquire`].
    pub fn nested(&mut self) -> Result<PooledScratch<'_>> {
        self.pool.get()
    }

    /// Hands the region back now and reports the outcome.
    ///
    /// # Errors
    ///
    /// Fails like [`ScratchPool::release`].
    pub fn end(mut self) -> Result<()> {
        self.active = false;
        self.pool.release(self.marker)
    }
}

impl Drop for PooledScratch<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.pool.release(self.marker) {
            warn!("pooled scratch {} not released: {err}", self.marker.index);
        }
    }
}

impl fmt::Debug for PooledScratch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledScratch")
            .field("marker", &self.marker)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuses_addresses() {
        let mut pool = ScratchPool::new(4096).unwrap();
        let mut seen = Vec::new();

        for _ in 0..20 {
            let mut scratch = pool.get().unwrap();
            let ptr = scratch.alloc(64).unwrap();
            unsafe { ptr.as_ptr().write_bytes(0xCC, 64) };
            seen.push(ptr);
        }

        assert!(seen.windows(2).any(|w| w[0] == w[1]));
        assert_eq!(pool.arena().block_count(), 1);
    }

    #[test]
    fn test_pool_stats() {
        let mut pool = ScratchPool::new(4096).unwrap();
        assert_eq!(pool.stats().hit_rate(), None);

        for _ in 0..4 {
            pool.with_scratch(|s| s.alloc(32).map(|_| ())).unwrap().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.hit_rate(), Some(0.75));
    }

    #[test]
    fn test_interim_allocations_survive_rebase() {
        let mut pool = ScratchPool::new(4096).unwrap();
        pool.with_scratch(|s| s.alloc(128).map(|_| ())).unwrap().unwrap();

        let kept = pool.alloc(8).unwrap().cast::<u64>();
        unsafe { kept.as_ptr().write(0xFEED) };

        pool.with_scratch(|s| {
            let p = s.alloc(64).unwrap();
            unsafe { p.as_ptr().write_bytes(0, 64) };
        })
        .unwrap();

        assert_eq!(unsafe { *kept.as_ptr() }, 0xFEED);
        assert_eq!(pool.arena_stats().used_size, 8);
    }

    #[test]
    fn test_nested_pooled_scopes() {
        let mut pool = ScratchPool::new(4096).unwrap();
        {
            let mut outer = pool.get().unwrap();
            outer.alloc(16).unwrap();
            {
                let mut inner = outer.nested().unwrap();
                inner.alloc(32).unwrap();
                assert_eq!(inner.marker().index(), 1);
            }
            outer.alloc(16).unwrap();
        }

        assert_eq!(pool.stats().cached, 1);
        assert_eq!(pool.arena().open_markers(), 1);

        pool.clear();
        assert_eq!(pool.stats().cached, 0);
        assert_eq!(pool.arena().open_markers(), 0);
        assert_eq!(pool.arena_stats().used_size, 0);
    }

    #[test]
    fn test_out_of_order_release_is_refused() {
        let mut pool = ScratchPool::new(1024).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        assert_eq!(
            pool.release(a).unwrap_err(),
            ArenaError::MarkerOutOfOrder { index: 0, open: 2 }
        );

        pool.release(b).unwrap();
        pool.release(a).unwrap();
        assert_eq!(pool.stats().cached, 1);
    }

    #[test]
    fn test_double_release_is_refused() {
        let mut pool = ScratchPool::new(1024).unwrap();
        let marker = pool.acquire().unwrap();
        pool.release(marker).unwrap();

        assert_eq!(
            pool.release(marker).unwrap_err(),
            ArenaError::InvalidMarker { index: 0 }
        );
    }

    #[test]
    fn test_zero_capacity_closes_immediately() {
        let arena = Arena::new(1024).unwrap();
        let mut pool = ScratchPool::with_capacity(arena, 0);

        for _ in 0..3 {
            let mut scratch = pool.get().unwrap();
            scratch.alloc(100).unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.overflows, 3);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.cached, 0);
        assert_eq!(pool.arena().open_markers(), 0);
        assert_eq!(pool.arena_stats().used_size, 0);
    }

    #[test]
    fn test_capacity_is_clamped() {
        let arena = Arena::new(1024).unwrap();
        let pool = ScratchPool::with_capacity(arena, 100);
        assert_eq!(pool.capacity(), SCRATCH_POOL_CAPACITY);
    }

    #[test]
    fn test_reset_forgets_cache() {
        let mut pool = ScratchPool::new(256).unwrap();
        for _ in 0..2 {
            let mut scratch = pool.get().unwrap();
            scratch.alloc(512).unwrap();
        }
        pool.alloc(512).unwrap();
        assert!(pool.arena().block_count() > 1);
        assert_eq!(pool.stats().cached, 1);

        pool.reset();
        assert_eq!(pool.stats().cached, 0);
        assert_eq!(pool.arena().open_markers(), 0);
        assert_eq!(pool.arena().block_count(), 1);
    }

    #[test]
    fn test_scratch_memory_reclaimed_between_temp_allocations() {
        let mut pool = ScratchPool::new(64 * 1024).unwrap();

        for i in 0..20 {
            {
                let mut scratch = pool.get().unwrap();
                scratch.alloc(32 * 1024).unwrap();
            }
            pool.alloc(8).unwrap();
            assert_eq!(pool.arena_stats().used_size, 8 * (i + 1));
        }

        assert!(pool.arena_stats().used_size < 64 * 1024);
        assert_eq!(pool.arena().block_count(), 1);
        assert_eq!(pool.stats().hits, 19);
    }

    #[test]
    fn test_cache_holds_one_region_under_lifo_use() {
        let mut pool = ScratchPool::new(4096).unwrap();
        let markers: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        for marker in markers.into_iter().rev() {
            pool.release(marker).unwrap();
            assert_eq!(pool.stats().cached, 1);
        }

        assert_eq!(pool.stats().overflows, 0);
        assert_eq!(pool.arena().open_markers(), 1);
    }
}
