//! Error type for arena operations.

use std::fmt;

/// Errors that can occur while allocating from an arena or managing its
/// temporary regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// The system allocator could not provide a block.
    OutOfMemory {
        /// Size of the block that was requested, in bytes.
        size: usize,
    },

    /// The requested size and alignment do not form a valid layout.
    InvalidLayout {
        /// The requested size.
        size: usize,
        /// The requested alignment.
        align: usize,
    },

    /// Alignment is not a power of two.
    InvalidAlignment {
        /// The requested alignment.
        align: usize,
    },

    /// Zero-byte allocations are not served.
    ZeroSized,

    /// The arena has been freed and owns no blocks.
    Released,

    /// Every temporary marker slot is in use.
    MarkerStackFull {
        /// Maximum number of concurrently open regions.
        capacity: usize,
    },

    /// The marker does not name an open region (out of range or already
    /// closed).
    InvalidMarker {
        /// Stack index carried by the marker.
        index: usize,
    },

    /// The marker names an open region that is not the most recently opened
    /// one.
    MarkerOutOfOrder {
        /// Stack index carried by the marker.
        index: usize,
        /// Number of regions currently open.
        open: usize,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaError::OutOfMemory { size } => {
                write!(f, "Out of memory: failed to allocate a {size} byte block")
            }
            ArenaError::InvalidLayout { size, align } => {
                write!(
                    f,
                    "Invalid layout: {size} bytes aligned to {align} is not representable"
                )
            }
            ArenaError::InvalidAlignment { align } => {
                write!(f, "Invalid alignment: {align} is not a power of two")
            }
            ArenaError::ZeroSized => write!(f, "Zero-sized allocation"),
            ArenaError::Released => write!(f, "Arena has been freed"),
            ArenaError::MarkerStackFull { capacity } => {
                write!(
                    f,
                    "Marker stack full: {capacity} temporary regions already open"
                )
            }
            ArenaError::InvalidMarker { index } => {
                write!(f, "Invalid marker: region {index} is not open")
            }
            ArenaError::MarkerOutOfOrder { index, open } => {
                write!(
                    f,
                    "Marker out of order: region {index} closed while {open} regions are open"
                )
            }
        }
    }
}

impl std::error::Error for ArenaError {}

/// Result type for arena operations.
pub type Result<T> = std::result::Result<T, ArenaError>;
