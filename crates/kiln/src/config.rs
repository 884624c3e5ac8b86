//! Context configuration.

use kiln_mem::ArenaConfig;

/// Maximum number of extension types a registry accepts.
pub const MAX_EXTENSION_TYPES: usize = 32;

/// Size of the last-error message buffer, in bytes.
pub const ERROR_MESSAGE_CAPACITY: usize = 256;

/// Arena settings for a new [`Context`](crate::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextConfig {
    /// Global arena, used only when the context owns it.
    pub global: ArenaConfig,
    /// Temp arena behind the scratch pool.
    pub temp: ArenaConfig,
}

impl ContextConfig {
    /// Both arenas with the default 1 MiB blocks.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            global: ArenaConfig::new(0),
            temp: ArenaConfig::new(0),
        }
    }
}
