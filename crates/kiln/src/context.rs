//! Runtime contexts.
//!
//! A [`Context`] bundles everything one thread of work needs from the
//! runtime:
//!
//! - a **global arena** for long-lived data, either owned by the context or
//!   borrowed from the caller
//! - a **scratch pool** and the temp arena behind it, always owned
//! - one payload per registered [extension](crate::Extension)
//! - a **last-error** record
//!
//! # Teardown order
//!
//! Dropping a context first clears the thread-local current slot if it names
//! this context, then finalizes every extension in registration order, then
//! frees the temp arena, and last frees the global arena if it is owned. A
//! borrowed global arena is left untouched.
//!
//! # Example
//!
//! ```
//! use kiln::{Context, set_error};
//!
//! let mut ctx = Context::create(None).unwrap();
//!
//! let value = ctx.alloc(64).unwrap();
//! unsafe { value.as_ptr().write_bytes(0, 64) };
//!
//! ctx.with_scratch(|scratch| {
//!     scratch.alloc(4096).unwrap();
//! })
//! .unwrap();
//!
//! set_error!(ctx, 2, "missing key {:?}", "width");
//! assert_eq!(ctx.error(), "missing key \"width\"");
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use kiln_log::debug;
use kiln_mem::{Arena, PooledScratch, ScratchPool};

use crate::config::ContextConfig;
use crate::current;
use crate::error::Result;
use crate::extension::{Extension, ExtensionId, ExtensionRegistry, ExtensionSlot};
use crate::last_error::LastError;

/// Process-unique identifier of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Global arena of a context.
enum GlobalArena<'g> {
    Owned(Arena),
    Borrowed(&'g mut Arena),
}

impl GlobalArena<'_> {
    fn get(&self) -> &Arena {
        match self {
            GlobalArena::Owned(arena) => arena,
            GlobalArena::Borrowed(arena) => arena,
        }
    }

    fn get_mut(&mut self) -> &mut Arena {
        match self {
            GlobalArena::Owned(arena) => arena,
            GlobalArena::Borrowed(arena) => arena,
        }
    }
}

/// Per-thread runtime state: arenas, scratch pool, extensions, last error.
///
/// A context is neither `Send` nor `Sync`. See the [module docs](self) for
/// what it owns and the order it is torn down in.
pub struct Context<'g> {
    id: ContextId,
    extensions: Vec<ExtensionSlot>,
    scratch_pool: ScratchPool,
    global_arena: GlobalArena<'g>,
    last_error: LastError,
}

impl<'g> Context<'g> {
    /// Creates a context with default arenas and the global extension
    /// registry.
    ///
    /// With `Some(arena)` the context borrows that arena as its global arena
    /// and leaves it alive on destruction; with `None` it owns a fresh 1 MiB
    /// arena.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Arena`](crate::Error::Arena) when an arena cannot be
    /// allocated. Nothing built so far is leaked.
    pub fn create(global_arena: Option<&'g mut Arena>) -> Result<Self> {
        let builder = ContextBuilder::new();
        match global_arena {
            Some(arena) => builder.global_arena(arena).build(),
            None => builder.build(),
        }
    }

    /// Starts a [`ContextBuilder`].
    #[must_use]
    pub fn builder() -> ContextBuilder<'g> {
        ContextBuilder::new()
    }

    /// Destroys the context. Same as dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    /// Identifier of this context.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The global arena.
    #[must_use]
    pub fn global_arena(&self) -> &Arena {
        self.global_arena.get()
    }

    /// The global arena, mutably, for collaborators that allocate from it.
    pub fn global_arena_mut(&mut self) -> &mut Arena {
        self.global_arena.get_mut()
    }

    /// Whether the global arena is released with the context.
    #[must_use]
    pub fn owns_global_arena(&self) -> bool {
        matches!(self.global_arena, GlobalArena::Owned(_))
    }

    /// The temp arena behind the scratch pool.
    #[must_use]
    pub fn temp_arena(&self) -> &Arena {
        self.scratch_pool.arena()
    }

    /// The scratch pool.
    #[must_use]
    pub fn scratch_pool(&self) -> &ScratchPool {
        &self.scratch_pool
    }

    /// The scratch pool, mutably.
    pub fn scratch_pool_mut(&mut self) -> &mut ScratchPool {
        &mut self.scratch_pool
    }

    /// Allocates from the global arena.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc`].
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        Ok(self.global_arena.get_mut().alloc(size)?)
    }

    /// Aligned allocation from the global arena.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        Ok(self.global_arena.get_mut().alloc_aligned(size, align)?)
    }

    /// Allocates from the temp arena outside any scratch scope.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc`].
    pub fn temp_alloc(&mut self, size: usize) -> Result<NonNull<u8>> {
        Ok(self.scratch_pool.alloc(size)?)
    }

    /// Aligned allocation from the temp arena outside any scratch scope.
    ///
    /// # Errors
    ///
    /// Fails like [`Arena::alloc_aligned`].
    pub fn temp_alloc_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>> {
        Ok(self.scratch_pool.alloc_aligned(size, align)?)
    }

    /// Opens a pooled scratch scope on the temp arena.
    ///
    /// The scope ends when the handle is dropped or
    /// [`PooledScratch::end`] is called.
    ///
    /// # Errors
    ///
    /// Fails like [`ScratchPool::acquire`].
    pub fn scratch_begin(&mut self) -> Result<PooledScratch<'_>> {
        Ok(self.scratch_pool.get()?)
    }

    /// Runs `f` inside a pooled scratch scope.
    ///
    /// # Errors
    ///
    /// Fails when the scope cannot be opened or closed.
    pub fn with_scratch<R>(&mut self, f: impl FnOnce(&mut PooledScratch<'_>) -> R) -> Result<R> {
        Ok(self.scratch_pool.with_scratch(f)?)
    }

    /// Records an error, replacing the previous one.
    ///
    /// The [`set_error!`](crate::set_error) macro builds the arguments.
    pub fn set_error(&mut self, code: i32, args: fmt::Arguments<'_>) {
        self.last_error.set(code, args);
        debug!("context {} error {code}: {}", self.id, self.last_error.message());
    }

    /// Message of the last error, empty if none.
    #[must_use]
    pub fn error(&self) -> &str {
        self.last_error.message()
    }

    /// Code of the last error, 0 if none.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        self.last_error.code()
    }

    /// The full last-error record.
    #[must_use]
    pub fn last_error(&self) -> &LastError {
        &self.last_error
    }

    /// Resets the last error to code 0 and an empty message.
    pub fn clear_error(&mut self) {
        self.last_error.clear();
    }

    /// Payload in slot `index`, `None` for an unused slot.
    pub fn extension_slot(&mut self, index: usize) -> Option<&mut (dyn Any + 'static)> {
        self.extensions.get_mut(index).map(ExtensionSlot::payload_mut)
    }

    /// Typed payload for a registered extension.
    ///
    /// Returns `None` when the id comes from a different registry or the type
    /// was registered after this context was created.
    pub fn extension<E: Extension>(&mut self, id: ExtensionId<E>) -> Option<&mut E> {
        self.extension_slot(id.index())?.downcast_mut::<E>()
    }

    /// Typed payload found by type rather than by id.
    pub fn extension_of<E: Extension>(&mut self) -> Option<&mut E> {
        let type_id = TypeId::of::<E>();
        self.extensions
            .iter_mut()
            .find(|slot| ExtensionSlot::type_id(slot) == type_id)?
            .payload_mut()
            .downcast_mut::<E>()
    }

    /// Number of extension payloads this context carries.
    #[must_use]
    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }
}

impl Drop for Context<'_> {
    fn drop(&mut self) {
        current::release(self.id);
        self.extensions.clear();
        debug!(
            "context {} destroyed ({} global arena)",
            self.id,
            if self.owns_global_arena() {
                "owned"
            } else {
                "borrowed"
            }
        );
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("owns_global_arena", &self.owns_global_arena())
            .field("extensions", &self.extensions.len())
            .field("scratch_pool", &self.scratch_pool)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Context`].
///
/// ```
/// use kiln::{Arena, Context, ExtensionRegistry};
///
/// let mut shared = Arena::new(0).unwrap();
/// let registry = ExtensionRegistry::new();
///
/// let ctx = Context::builder()
///     .global_arena(&mut shared)
///     .temp_block_size(64 * 1024)
///     .registry(&registry)
///     .build()
///     .unwrap();
///
/// assert!(!ctx.owns_global_arena());
/// ```
#[must_use]
pub struct ContextBuilder<'g> {
    global_arena: Option<&'g mut Arena>,
    config: ContextConfig,
    registry: Option<&'g ExtensionRegistry>,
}

impl<'g> ContextBuilder<'g> {
    /// Default arenas and the global registry.
    pub fn new() -> Self {
        Self {
            global_arena: None,
            config: ContextConfig::new(),
            registry: None,
        }
    }

    /// Borrow `arena` as the global arena instead of creating one.
    pub fn global_arena(mut self, arena: &'g mut Arena) -> Self {
        self.global_arena = Some(arena);
        self
    }

    /// Block size of an owned global arena (`0` for the default).
    pub fn global_block_size(mut self, block_size: usize) -> Self {
        self.config.global.block_size = block_size;
        self
    }

    /// Block size of the temp arena (`0` for the default).
    pub fn temp_block_size(mut self, block_size: usize) -> Self {
        self.config.temp.block_size = block_size;
        self
    }

    /// Replaces both arena configs.
    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Instantiate extensions from `registry` instead of the global one.
    pub fn registry(mut self, registry: &'g ExtensionRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Arena`](crate::Error::Arena) when an arena cannot be
    /// allocated. Everything built so far is released.
    pub fn build(self) -> Result<Context<'g>> {
        let global_arena = match self.global_arena {
            Some(arena) => GlobalArena::Borrowed(arena),
            None => GlobalArena::Owned(Arena::with_config(&self.config.global)?),
        };
        let scratch_pool = ScratchPool::with_config(&self.config.temp)?;

        let registry = self.registry.unwrap_or_else(|| ExtensionRegistry::global());
        let extensions: Vec<ExtensionSlot> = registry
            .snapshot()
            .iter()
            .map(ExtensionSlot::instantiate)
            .collect();

        let context = Context {
            id: ContextId::next(),
            extensions,
            scratch_pool,
            global_arena,
            last_error: LastError::new(),
        };
        debug!(
            "context {} created with {} extensions",
            context.id,
            context.extensions.len()
        );
        Ok(context)
    }
}

impl Default for ContextBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Records an error on a context with `format!`-style arguments.
///
/// ```
/// use kiln::{Context, set_error};
///
/// let mut ctx = Context::create(None).unwrap();
/// set_error!(ctx, 42, "boom: {}", 42);
/// assert_eq!(ctx.error_code(), 42);
/// assert_eq!(ctx.error(), "boom: 42");
/// ```
#[macro_export]
macro_rules! set_error {
    ($ctx:expr, $code:expr, $($arg:tt)*) => {
        $ctx.set_error($code, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_mem::DEFAULT_BLOCK_SIZE;

    fn empty_registry() -> ExtensionRegistry {
        ExtensionRegistry::new()
    }

    #[test]
    fn test_owned_context_defaults() {
        let registry = empty_registry();
        let ctx = Context::builder().registry(&registry).build().unwrap();

        assert!(ctx.owns_global_arena());
        assert_eq!(ctx.global_arena().capacity(), DEFAULT_BLOCK_SIZE);
        assert_eq!(ctx.temp_arena().capacity(), DEFAULT_BLOCK_SIZE);
        assert_eq!(ctx.error_code(), 0);
        assert_eq!(ctx.error(), "");
        assert_eq!(ctx.extension_count(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = empty_registry();
        let a = Context::builder().registry(&registry).build().unwrap();
        let b = Context::builder().registry(&registry).build().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_alloc_routes_to_the_right_arena() {
        let registry = empty_registry();
        let mut ctx = Context::builder()
            .registry(&registry)
            .global_block_size(4096)
            .temp_block_size(8192)
            .build()
            .unwrap();

        ctx.alloc(100).unwrap();
        ctx.temp_alloc_aligned(50, 16).unwrap();

        assert_eq!(ctx.global_arena().stats().used_size, 100);
        assert_eq!(ctx.global_arena().block_size(), 4096);
        assert_eq!(ctx.temp_arena().stats().used_size, 50);
        assert_eq!(ctx.temp_arena().block_size(), 8192);
    }

    #[test]
    fn test_error_channel_overwrites() {
        let registry = empty_registry();
        let mut ctx = Context::builder().registry(&registry).build().unwrap();

        set_error!(ctx, 42, "boom: {}", 42);
        assert_eq!(ctx.error_code(), 42);
        assert_eq!(ctx.error(), "boom: 42");

        set_error!(ctx, 0, "ok");
        assert_eq!(ctx.error_code(), 0);
        assert_eq!(ctx.error(), "ok");

        ctx.clear_error();
        assert!(!ctx.last_error().is_set());
    }

    #[test]
    fn test_scratch_scope_returns_to_pool() {
        let registry = empty_registry();
        let mut ctx = Context::builder().registry(&registry).build().unwrap();

        {
            let mut scratch = ctx.scratch_begin().unwrap();
            scratch.alloc(256).unwrap();
        }
        ctx.with_scratch(|s| s.alloc(256).map(|_| ()))
            .unwrap()
            .unwrap();

        let stats = ctx.scratch_pool().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_failed_build_reports_arena_error() {
        let registry = empty_registry();
        let err = Context::builder()
            .registry(&registry)
            .temp_block_size(usize::MAX)
            .build()
            .unwrap_err();
        assert!(matches!(err, crate::Error::Arena(_)));
    }

    #[test]
    fn test_slot_out_of_range() {
        let registry = empty_registry();
        let mut ctx = Context::builder().registry(&registry).build().unwrap();
        assert!(ctx.extension_slot(0).is_none());
        assert!(ctx.extension_slot(31).is_none());
    }
}
