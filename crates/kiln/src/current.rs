//! Thread-local current context.
//!
//! Each thread has one slot naming the context that code deep in a call
//! stack can reach without having it passed down. The slot never owns the
//! context: [`Context::enter`] installs a context for the duration of a
//! closure, and [`with_current`] lends it out to code running inside that
//! closure.
//!
//! `enter` holds the context's exclusive borrow while it is installed, so a
//! context can never be dropped while the slot names it. Clearing the slot on
//! context destruction is a fallback the borrow checker already makes
//! unreachable through this API.
//!
//! ```
//! use kiln::{Context, current};
//!
//! fn deep_helper() -> Option<usize> {
//!     current::with_current(|ctx| {
//!         ctx.alloc(32).unwrap();
//!         ctx.global_arena().stats().used_size
//!     })
//! }
//!
//! let mut ctx = Context::create(None).unwrap();
//! assert_eq!(deep_helper(), None);
//!
//! let used = ctx.enter(deep_helper);
//! assert_eq!(used, Some(32));
//! assert!(!current::has_current());
//! ```

use std::cell::Cell;
use std::ptr::NonNull;

use crate::context::{Context, ContextId};

#[derive(Clone, Copy)]
struct Installed {
    id: ContextId,
    context: NonNull<Context<'static>>,
}

thread_local! {
    static CURRENT: Cell<Option<Installed>> = const { Cell::new(None) };
}

/// Puts the saved slot value back when dropped, on unwind too.
struct Restore(Option<Installed>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0;
        // The slot is gone during thread teardown; nothing to restore then.
        let _ = CURRENT.try_with(|slot| slot.set(previous));
    }
}

impl Context<'_> {
    /// Runs `f` with this context installed as the thread's current one.
    ///
    /// The previously installed context (if any) is restored afterwards,
    /// also when `f` panics. Inside `f` the context is reachable only
    /// through [`with_current`].
    pub fn enter<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let installed = Installed {
            id: self.id(),
            context: NonNull::from(&mut *self).cast::<Context<'static>>(),
        };
        let previous = CURRENT.with(|slot| slot.replace(Some(installed)));
        let _restore = Restore(previous);
        f()
    }
}

/// Runs `f` with the thread's current context.
///
/// Returns `None` when no context is installed. While `f` runs the slot is
/// empty, so a nested `with_current` also returns `None`.
pub fn with_current<R>(f: impl FnOnce(&mut Context<'_>) -> R) -> Option<R> {
    let installed = CURRENT.try_with(Cell::take).ok().flatten()?;
    let _restore = Restore(Some(installed));

    // SAFETY: `Context::enter` holds the context's exclusive borrow for as
    // long as its pointer can be in the slot, and the slot is empty while
    // this reference exists, so it is the only live access.
    let context = unsafe { &mut *installed.context.as_ptr() };
    Some(f(context))
}

/// Id of the thread's current context.
#[must_use]
pub fn current_id() -> Option<ContextId> {
    CURRENT
        .try_with(|slot| slot.get().map(|installed| installed.id))
        .ok()
        .flatten()
}

/// Whether the thread has a current context.
#[must_use]
pub fn has_current() -> bool {
    current_id().is_some()
}

/// Clears the slot if it names `id`.
pub(crate) fn release(id: ContextId) {
    let _ = CURRENT.try_with(|slot| {
        if slot.get().is_some_and(|installed| installed.id == id) {
            slot.set(None);
        }
    });
}
