//! Temporary regions: a bounded stack of saved arena frontiers.
//!
//! [`Arena::temp_begin`] records where the arena currently ends and hands back
//! a [`TempMarker`]. [`Arena::temp_end`] rewinds the arena to that point,
//! releasing every block appended in between. Regions nest and must be closed
//! in LIFO order; closing any other open region is refused.
//!
//! ```
//! use kiln_mem::Arena;
//!
//! let mut arena = Arena::new(4096).unwrap();
//! arena.alloc(100).unwrap();
//!
//! let marker = arena.temp_begin().unwrap();
//! arena.alloc(200).unwrap();
//! arena.temp_end(marker).unwrap();
//!
//! assert_eq!(arena.stats().used_size, 100);
//! ```

use kiln_log::{Level, debug, log, warn};

use crate::arena::{Arena, ArenaPosition};
use crate::config::MAX_TEMP_MARKERS;
use crate::error::{ArenaError, Result};

/// Handle to an open temporary region.
///
/// A marker is only meaningful for the arena that issued it. Once its region
/// is closed the marker goes stale and every further use is refused with
/// [`ArenaError::InvalidMarker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempMarker {
    pub(crate) index: usize,
    pub(crate) id: u64,
}

impl TempMarker {
    /// Depth of the region in its arena's marker stack (0 is outermost).
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.index
    }
}

/// Saved frontier of an open region.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub(crate) position: ArenaPosition,
    pub(crate) id: u64,
    #[cfg(feature = "marker-backtrace")]
    pub(crate) origin: backtrace::Backtrace,
}

impl Arena {
    /// Opens a temporary region at the current frontier.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::MarkerStackFull`] when [`MAX_TEMP_MARKERS`] regions
    ///   are already open
    /// - [`ArenaError::Released`] after [`Arena::free`]
    pub fn temp_begin(&mut self) -> Result<TempMarker> {
        let position = self.position().ok_or(ArenaError::Released)?;
        if self.markers.len() >= MAX_TEMP_MARKERS {
            warn!("temp_begin refused: {MAX_TEMP_MARKERS} regions already open");
            return Err(ArenaError::MarkerStackFull {
                capacity: MAX_TEMP_MARKERS,
            });
        }

        let index = self.markers.len();
        let id = self.next_marker_id;
        self.next_marker_id += 1;
        self.markers.push(Snapshot {
            position,
            id,
            #[cfg(feature = "marker-backtrace")]
            origin: backtrace::Backtrace::new_unresolved(),
        });

        debug!(
            "region {index} opened at block {} offset {}",
            position.block, position.offset
        );
        Ok(TempMarker { index, id })
    }

    /// Closes the topmost region and rewinds the arena to where it began.
    ///
    /// Blocks appended inside the region are returned to the system and the
    /// block that was current at `temp_begin` becomes current again.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::InvalidMarker`] when the marker's region is not open
    /// - [`ArenaError::MarkerOutOfOrder`] when a region opened after it is
    ///   still open
    /// - [`ArenaError::Released`] after [`Arena::free`]
    ///
    /// The arena is untouched on error.
    pub fn temp_end(&mut self, marker: TempMarker) -> Result<()> {
        let snapshot = self.pop_marker(marker)?;
        self.truncate_to(snapshot.position);
        debug!("region {} closed", marker.index);
        Ok(())
    }

    /// Closes the topmost region but keeps everything allocated inside it.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::temp_end`].
    pub fn temp_commit(&mut self, marker: TempMarker) -> Result<()> {
        self.pop_marker(marker)?;
        debug!("region {} committed", marker.index);
        Ok(())
    }

    /// Whether `marker` names a region that is still open.
    #[must_use]
    pub fn is_open(&self, marker: TempMarker) -> bool {
        self.markers
            .get(marker.index)
            .is_some_and(|snapshot| snapshot.id == marker.id)
    }

    /// Number of open temporary regions.
    #[inline]
    #[must_use]
    pub fn open_markers(&self) -> usize {
        self.markers.len()
    }

    /// Rewinds the arena to where the topmost region began but leaves the
    /// region open.
    pub(crate) fn temp_rewind(&mut self, marker: TempMarker) -> Result<()> {
        self.check_topmost(marker)?;
        if let Some(position) = self.markers.last().map(|snapshot| snapshot.position) {
            self.truncate_to(position);
        }
        debug!("region {} rewound", marker.index);
        Ok(())
    }

    /// Validates `marker` as the topmost open region and pops it.
    fn pop_marker(&mut self, marker: TempMarker) -> Result<Snapshot> {
        self.check_topmost(marker)?;
        self.markers.pop().ok_or(ArenaError::InvalidMarker {
            index: marker.index,
        })
    }

    fn check_topmost(&self, marker: TempMarker) -> Result<()> {
        if self.is_released() {
            return Err(ArenaError::Released);
        }
        if !self.is_open(marker) {
            warn!("region {} is not open", marker.index);
            return Err(ArenaError::InvalidMarker {
                index: marker.index,
            });
        }

        let open = self.markers.len();
        if marker.index + 1 != open {
            warn!(
                "region {} closed out of order ({open} regions open)",
                marker.index
            );
            return Err(ArenaError::MarkerOutOfOrder {
                index: marker.index,
                open,
            });
        }
        Ok(())
    }

    /// Logs every open region before the stack is discarded.
    pub(crate) fn report_open_markers(&self, event: &str) {
        let level = if event == "drop" {
            Level::Warn
        } else {
            Level::Debug
        };
        log!(level: level, "{} regions still open at {event}", self.markers.len());

        #[cfg(feature = "marker-backtrace")]
        self.report_origins(level);
    }

    #[cfg(feature = "marker-backtrace")]
    fn report_origins(&self, level: Level) {
        for (index, snapshot) in self.markers.iter().enumerate() {
            let mut origin = snapshot.origin.clone();
            origin.resolve();
            log!(level: level, "region {index} opened at:\n{origin:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_earlier_bytes() {
        let mut arena = Arena::new(256).unwrap();
        let kept = arena.alloc(32).unwrap();
        unsafe { kept.as_ptr().write_bytes(0x5A, 32) };
        let before = arena.stats();

        let marker = arena.temp_begin().unwrap();
        for _ in 0..20 {
            arena.alloc(64).unwrap();
        }
        assert!(arena.block_count() > 1);
        arena.temp_end(marker).unwrap();

        assert_eq!(arena.stats(), before);
        let bytes = unsafe { std::slice::from_raw_parts(kept.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_nested_regions() {
        let mut arena = Arena::new(1024).unwrap();
        let outer = arena.temp_begin().unwrap();
        arena.alloc(16).unwrap();
        let after_outer = arena.stats().used_size;

        let inner = arena.temp_begin().unwrap();
        arena.alloc(64).unwrap();
        arena.temp_end(inner).unwrap();
        assert_eq!(arena.stats().used_size, after_outer);

        arena.temp_end(outer).unwrap();
        assert_eq!(arena.stats().used_size, 0);
    }

    #[test]
    fn test_marker_stack_capacity() {
        let mut arena = Arena::new(64).unwrap();
        let markers: Vec<_> = (0..MAX_TEMP_MARKERS)
            .map(|_| arena.temp_begin().unwrap())
            .collect();

        assert_eq!(
            arena.temp_begin().unwrap_err(),
            ArenaError::MarkerStackFull { capacity: 32 }
        );

        for marker in markers.into_iter().rev() {
            arena.temp_end(marker).unwrap();
        }
        assert_eq!(arena.open_markers(), 0);
    }

    #[test]
    fn test_out_of_order_end_is_refused() {
        let mut arena = Arena::new(256).unwrap();
        let outer = arena.temp_begin().unwrap();
        arena.alloc(8).unwrap();
        let inner = arena.temp_begin().unwrap();
        arena.alloc(8).unwrap();
        let used = arena.stats().used_size;

        assert_eq!(
            arena.temp_end(outer).unwrap_err(),
            ArenaError::MarkerOutOfOrder { index: 0, open: 2 }
        );
        assert_eq!(arena.stats().used_size, used);
        assert_eq!(arena.open_markers(), 2);

        arena.temp_end(inner).unwrap();
        arena.temp_end(outer).unwrap();
    }

    #[test]
    fn test_stale_marker_is_refused() {
        let mut arena = Arena::new(256).unwrap();
        let first = arena.temp_begin().unwrap();
        arena.temp_end(first).unwrap();

        assert_eq!(
            arena.temp_end(first).unwrap_err(),
            ArenaError::InvalidMarker { index: 0 }
        );

        // A new region reuses slot 0 but not the id.
        let second = arena.temp_begin().unwrap();
        assert_eq!(second.index(), first.index());
        assert!(!arena.is_open(first));
        assert!(arena.is_open(second));
        arena.temp_end(second).unwrap();
    }

    #[test]
    fn test_commit_keeps_allocations() {
        let mut arena = Arena::new(256).unwrap();
        let marker = arena.temp_begin().unwrap();
        arena.alloc(40).unwrap();
        arena.temp_commit(marker).unwrap();

        assert_eq!(arena.stats().used_size, 40);
        assert_eq!(arena.open_markers(), 0);
        assert!(!arena.is_open(marker));
    }

    #[test]
    fn test_reset_discards_open_regions() {
        let mut arena = Arena::new(256).unwrap();
        let marker = arena.temp_begin().unwrap();
        arena.reset();

        assert_eq!(arena.open_markers(), 0);
        assert_eq!(
            arena.temp_end(marker).unwrap_err(),
            ArenaError::InvalidMarker { index: 0 }
        );
    }

    #[test]
    fn test_regions_on_freed_arena() {
        let mut arena = Arena::new(256).unwrap();
        let marker = arena.temp_begin().unwrap();
        arena.free();

        assert_eq!(arena.temp_begin().unwrap_err(), ArenaError::Released);
        assert_eq!(arena.temp_end(marker).unwrap_err(), ArenaError::Released);
    }

    #[test]
    fn test_rewind_keeps_region_open() {
        let mut arena = Arena::new(256).unwrap();
        arena.alloc(8).unwrap();
        let marker = arena.temp_begin().unwrap();
        arena.alloc(1024).unwrap();
        assert_eq!(arena.block_count(), 2);

        arena.temp_rewind(marker).unwrap();
        assert_eq!(arena.stats().used_size, 8);
        assert_eq!(arena.block_count(), 1);
        assert!(arena.is_open(marker));

        let inner = arena.temp_begin().unwrap();
        assert_eq!(
            arena.temp_rewind(marker).unwrap_err(),
            ArenaError::MarkerOutOfOrder { index: 0, open: 2 }
        );
        arena.temp_end(inner).unwrap();
        arena.temp_end(marker).unwrap();
        assert_eq!(arena.open_markers(), 0);
    }
}
