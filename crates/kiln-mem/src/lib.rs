//! `kiln` memory management primitives
//!
//! This crate provides the allocation layer of the `kiln` runtime:
//!
//! - **Arenas**: block-chained bump allocation with bulk reset ([`Arena`])
//! - **Temporary regions**: a bounded LIFO stack of saved frontiers
//!   ([`Arena::temp_begin`] / [`Arena::temp_end`])
//! - **Scratch arenas**: RAII scopes over a temporary region ([`ScratchArena`])
//! - **Scratch pools**: a temp arena with a cache of idle regions for cheap,
//!   frequent scratch scopes ([`ScratchPool`])
//!
//! Allocation failures are reported as [`ArenaError`] values; nothing here
//! panics on exhaustion.
//!
//! Enable the `marker-backtrace` feature to record where each temporary region
//! was opened and log regions still open at reset or drop.

pub mod arena;
pub mod block;
pub mod config;
pub mod error;
pub mod pool;
pub mod scratch;
pub mod temp;

pub use arena::{Arena, ArenaPosition, ArenaStats};
pub use block::{BLOCK_ALIGNMENT, Block};
pub use config::{
    ArenaConfig, DEFAULT_ALIGNMENT, DEFAULT_BLOCK_SIZE, MAX_TEMP_MARKERS, SCRATCH_POOL_CAPACITY,
};
pub use error::{ArenaError, Result};
pub use pool::{PoolStats, PooledScratch, ScratchPool};
pub use scratch::ScratchArena;
pub use temp::TempMarker;
