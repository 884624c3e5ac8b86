//! Typed context extensions.
//!
//! An extension is a payload type that every [`Context`](crate::Context)
//! carries one instance of. Types are registered once in an
//! [`ExtensionRegistry`]; each context created afterwards gets a fresh
//! payload per registered type, built with `Default` and then
//! [`Extension::initialize`]. When the context is destroyed each payload's
//! [`Extension::finalize`] runs, in registration order.
//!
//! # Example
//!
//! ```
//! use kiln::{Context, Extension, ExtensionRegistry};
//!
//! #[derive(Default)]
//! struct Counter {
//!     hits: u32,
//! }
//!
//! impl Extension for Counter {
//!     const NAME: &'static str = "counter";
//! }
//!
//! let registry = ExtensionRegistry::new();
//! let id = registry.register::<Counter>().unwrap();
//!
//! let mut ctx = Context::builder().registry(&registry).build().unwrap();
//! ctx.extension(id).unwrap().hits += 1;
//! assert_eq!(ctx.extension_of::<Counter>().unwrap().hits, 1);
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fxhash::FxHashMap;
use kiln_log::{info, warn};

use crate::config::MAX_EXTENSION_TYPES;
use crate::error::{Error, Result};

/// A payload type attached to every context.
pub trait Extension: Any + Default {
    /// Name used for lookups and diagnostics.
    const NAME: &'static str;

    /// Runs once on the fresh payload when a context is created.
    fn initialize(&mut self) {}

    /// Runs once when the owning context is destroyed.
    fn finalize(&mut self) {}
}

/// Type-erased description of an extension.
///
/// `create` must return a payload whose type id is `type_id`; `finalize` is
/// called with that payload when the context goes away.
#[derive(Clone, Copy)]
pub struct ExtensionDescriptor {
    /// Name used for lookups and diagnostics.
    pub name: &'static str,
    /// Type of the payload produced by `create`.
    pub type_id: TypeId,
    /// Size of the payload in bytes.
    pub payload_size: usize,
    /// Builds and initializes a payload.
    pub create: fn() -> Box<dyn Any>,
    /// Finalizes a payload before it is dropped.
    pub finalize: fn(&mut (dyn Any + 'static)),
}

impl ExtensionDescriptor {
    /// Descriptor for an [`Extension`] type.
    #[must_use]
    pub fn of<E: Extension>() -> Self {
        Self {
            name: E::NAME,
            type_id: TypeId::of::<E>(),
            payload_size: size_of::<E>(),
            create: create_payload::<E>,
            finalize: finalize_payload::<E>,
        }
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("name", &self.name)
            .field("payload_size", &self.payload_size)
            .finish_non_exhaustive()
    }
}

fn create_payload<E: Extension>() -> Box<dyn Any> {
    let mut payload = E::default();
    payload.initialize();
    Box::new(payload)
}

fn finalize_payload<E: Extension>(payload: &mut (dyn Any + 'static)) {
    if let Some(payload) = payload.downcast_mut::<E>() {
        payload.finalize();
    }
}

/// Stable index of a registered extension type.
pub struct ExtensionId<E> {
    index: usize,
    _marker: PhantomData<fn() -> E>,
}

impl<E> ExtensionId<E> {
    const fn new(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// Slot index in every context created from the same registry.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

impl<E> Clone for ExtensionId<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for ExtensionId<E> {}

impl<E> PartialEq for ExtensionId<E> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<E> Eq for ExtensionId<E> {}

impl<E> fmt::Debug for ExtensionId<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtensionId").field(&self.index).finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    descriptors: Vec<ExtensionDescriptor>,
    by_type: FxHashMap<TypeId, usize>,
    by_name: FxHashMap<&'static str, usize>,
}

/// Append-only table of extension types.
///
/// Registration order fixes each type's slot index. A registry holds at most
/// [`MAX_EXTENSION_TYPES`] types and accepts each type once. Contexts only
/// see the types registered before they were created.
pub struct ExtensionRegistry {
    inner: RwLock<RegistryInner>,
}

static GLOBAL: OnceLock<ExtensionRegistry> = OnceLock::new();

impl ExtensionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// The process-wide registry used by contexts built without an explicit
    /// one.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }

    /// Registers `E` and returns its id.
    ///
    /// # Errors
    ///
    /// - [`Error::ExtensionAlreadyRegistered`] when `E` is already present
    /// - [`Error::ExtensionRegistryFull`] when the registry is full
    pub fn register<E: Extension>(&self) -> Result<ExtensionId<E>> {
        let index = self.register_descriptor(ExtensionDescriptor::of::<E>())?;
        Ok(ExtensionId::new(index))
    }

    /// Registers a type-erased descriptor and returns its slot index.
    ///
    /// # Errors
    ///
    /// Same as [`ExtensionRegistry::register`].
    pub fn register_descriptor(&self, descriptor: ExtensionDescriptor) -> Result<usize> {
        let mut inner = self.write();
        if inner.by_type.contains_key(&descriptor.type_id) {
            warn!("extension '{}' registered twice", descriptor.name);
            return Err(Error::ExtensionAlreadyRegistered {
                name: descriptor.name,
            });
        }
        if inner.descriptors.len() >= MAX_EXTENSION_TYPES {
            warn!(
                "extension '{}' refused: registry is full",
                descriptor.name
            );
            return Err(Error::ExtensionRegistryFull {
                capacity: MAX_EXTENSION_TYPES,
            });
        }

        let index = inner.descriptors.len();
        inner.descriptors.push(descriptor);
        inner.by_type.insert(descriptor.type_id, index);
        inner.by_name.entry(descriptor.name).or_insert(index);

        info!(
            "extension '{}' registered at slot {index} ({} bytes)",
            descriptor.name, descriptor.payload_size
        );
        Ok(index)
    }

    /// Id of `E`, if registered.
    #[must_use]
    pub fn id_of<E: Extension>(&self) -> Option<ExtensionId<E>> {
        self.read()
            .by_type
            .get(&TypeId::of::<E>())
            .map(|&index| ExtensionId::new(index))
    }

    /// Slot index of the first extension registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.read().by_name.get(name).copied()
    }

    /// Descriptor at `index`.
    #[must_use]
    pub fn descriptor(&self, index: usize) -> Option<ExtensionDescriptor> {
        self.read().descriptors.get(index).copied()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().descriptors.len()
    }

    /// Whether no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every descriptor in registration order.
    pub(crate) fn snapshot(&self) -> Vec<ExtensionDescriptor> {
        self.read().descriptors.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.read().descriptors.iter()).finish()
    }
}

/// One context's instance of an extension.
pub(crate) struct ExtensionSlot {
    payload: Box<dyn Any>,
    type_id: TypeId,
    finalize: fn(&mut (dyn Any + 'static)),
}

impl ExtensionSlot {
    pub(crate) fn instantiate(descriptor: &ExtensionDescriptor) -> Self {
        Self {
            payload: (descriptor.create)(),
            type_id: descriptor.type_id,
            finalize: descriptor.finalize,
        }
    }

    #[inline]
    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub(crate) fn payload_mut(&mut self) -> &mut (dyn Any + 'static) {
        self.payload.as_mut()
    }
}

impl Drop for ExtensionSlot {
    fn drop(&mut self) {
        (self.finalize)(self.payload.as_mut());
    }
}
