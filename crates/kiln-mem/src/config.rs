//! Arena configuration parameters.

/// Default size of an arena block (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Alignment used by [`Arena::alloc`](crate::Arena::alloc).
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Maximum number of temporary regions open at once on one arena.
pub const MAX_TEMP_MARKERS: usize = 32;

/// Maximum number of idle scratch regions a [`ScratchPool`](crate::ScratchPool)
/// keeps for reuse.
pub const SCRATCH_POOL_CAPACITY: usize = 8;

/// Configuration for an [`Arena`](crate::Arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaConfig {
    /// Size of the first block and the minimum size of every later block.
    ///
    /// `0` selects [`DEFAULT_BLOCK_SIZE`]. Requests larger than this get a
    /// block of their own size.
    pub block_size: usize,
}

impl ArenaConfig {
    /// Creates a config with the given block size (`0` for the default).
    #[must_use]
    pub const fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Block size after applying the default.
    #[must_use]
    pub const fn resolved_block_size(&self) -> usize {
        if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_selects_default() {
        assert_eq!(ArenaConfig::default().resolved_block_size(), 1024 * 1024);
        assert_eq!(ArenaConfig::new(0).resolved_block_size(), DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn explicit_size_is_kept() {
        assert_eq!(ArenaConfig::new(4096).resolved_block_size(), 4096);
        assert_eq!(ArenaConfig::new(1).resolved_block_size(), 1);
    }
}
