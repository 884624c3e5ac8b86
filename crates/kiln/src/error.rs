//! Error types for the `kiln` runtime.
//!
//! Allocation and region failures come from `kiln-mem` and are wrapped in
//! [`Error::Arena`]; the remaining variants belong to the extension registry.

use std::fmt;

use kiln_mem::ArenaError;

/// Errors that can occur in the `kiln` runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An arena, region or scratch pool operation failed.
    Arena(ArenaError),

    /// The extension registry already holds its maximum number of types.
    ExtensionRegistryFull {
        /// Maximum number of extension types.
        capacity: usize,
    },

    /// The extension type is already registered.
    ExtensionAlreadyRegistered {
        /// Name of the extension.
        name: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Arena(err) => write!(f, "Arena error: {err}"),
            Error::ExtensionRegistryFull { capacity } => {
                write!(
                    f,
                    "Extension registry full: {capacity} extension types already registered"
                )
            }
            Error::ExtensionAlreadyRegistered { name } => {
                write!(f, "Extension '{name}' is already registered")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Arena(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ArenaError> for Error {
    fn from(err: ArenaError) -> Self {
        Error::Arena(err)
    }
}

/// Result type for `kiln` operations.
pub type Result<T> = std::result::Result<T, Error>;
