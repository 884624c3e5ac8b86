//! `kiln` runtime contexts
//!
//! This crate builds the per-thread runtime layer on top of `kiln-mem`:
//!
//! - **Contexts**: a global arena (owned or borrowed), a scratch pool over an
//!   owned temp arena, typed extension payloads and a last-error record
//!   ([`Context`])
//! - **Extensions**: an append-only registry of payload types instantiated
//!   in every new context ([`ExtensionRegistry`])
//! - **Current context**: a thread-local slot for reaching the active
//!   context from deep call stacks ([`current`])
//!
//! # Example
//!
//! ```
//! use kiln::{Context, current};
//!
//! let mut ctx = Context::create(None).unwrap();
//!
//! let total = ctx
//!     .with_scratch(|scratch| {
//!         let values = scratch.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
//!         unsafe { values.as_ref().iter().sum::<u32>() }
//!     })
//!     .unwrap();
//! assert_eq!(total, 6);
//!
//! ctx.enter(|| {
//!     assert!(current::has_current());
//! });
//! ```

pub mod config;
pub mod context;
pub mod current;
pub mod error;
pub mod extension;
pub mod last_error;

pub use config::{ContextConfig, ERROR_MESSAGE_CAPACITY, MAX_EXTENSION_TYPES};
pub use context::{Context, ContextBuilder, ContextId};
pub use error::{Error, Result};
pub use extension::{Extension, ExtensionDescriptor, ExtensionId, ExtensionRegistry};
pub use last_error::LastError;

pub use kiln_mem::{
    Arena, ArenaConfig, ArenaError, ArenaStats, PoolStats, PooledScratch, ScratchArena,
    ScratchPool, TempMarker,
};
