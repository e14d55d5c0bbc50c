//! Mixin declarations.
//!
//! A mixin is an ordinary Rust type that can be attached to objects at
//! runtime. It becomes usable once it is registered in a [`Domain`] through
//! a [`MixinBuilder`], which records its size, alignment, lifecycle
//! operations and the messages it implements.
//!
//! # Example
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Mixin, MixinBuilder};
//!
//! #[derive(Default, Clone)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! impl Mixin for Position {
//!     const NAME: &'static str = "position";
//! }
//!
//! let domain = Domain::new("doc", DomainConfig::default());
//! let describe = domain.register_multicast::<(), String>("describe").unwrap();
//!
//! let id = MixinBuilder::<Position>::new()
//!     .implements(&describe, |p: &Position, ()| format!("({}, {})", p.x, p.y))
//!     .default_constructible()
//!     .copyable()
//!     .register(&domain)
//!     .unwrap();
//!
//! let info = domain.mixin_info(id).unwrap();
//! assert_eq!(info.name(), "position");
//! assert_eq!(info.size(), std::mem::size_of::<Position>());
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Result;
use crate::runtime::allocator::DomainAllocator;
use crate::runtime::domain::Domain;
use crate::runtime::message::{Handler, MessageHandle, MessageId, MessageInfo};

/// A type that can be composed into objects.
///
/// `NAME` is the mixin's stable key under
/// [`IdentityStrategy::Name`](crate::IdentityStrategy::Name). It must be the
/// same in every module that registers the type.
pub trait Mixin: Send + Sync + 'static {
    const NAME: &'static str;
}

/// Dense mixin identifier, unique within a domain while the mixin is
/// registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MixinId(pub(crate) u32);

impl MixinId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MixinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type-erased lifecycle operations of a mixin.
#[derive(Clone, Copy)]
pub(crate) struct MixinVTable {
    pub(crate) drop_in_place: unsafe fn(*mut u8),
    pub(crate) construct_default: Option<unsafe fn(*mut u8)>,
    pub(crate) clone_into: Option<unsafe fn(*const u8, *mut u8)>,
}

unsafe fn drop_mixin<T>(ptr: *mut u8) {
    // SAFETY: caller passes a pointer to a live, initialized T.
    unsafe { ptr::drop_in_place(ptr.cast::<T>()) }
}

unsafe fn construct_default<T: Default>(ptr: *mut u8) {
    // SAFETY: caller passes uninitialized storage sized and aligned for T.
    unsafe { ptr.cast::<T>().write(T::default()) }
}

unsafe fn clone_mixin<T: Clone>(src: *const u8, dst: *mut u8) {
    // SAFETY: src is a live T, dst is uninitialized storage for T.
    unsafe { dst.cast::<T>().write((*src.cast::<T>()).clone()) }
}

/// One message implemented by a mixin.
pub(crate) struct Binding {
    pub(crate) message: Arc<MessageInfo>,
    pub(crate) handler: Arc<dyn Any + Send + Sync>,
    pub(crate) exclusive: bool,
}

/// Registered description of a mixin.
pub struct MixinInfo {
    pub(crate) id: MixinId,
    pub(crate) name: Box<str>,
    pub(crate) type_name: &'static str,
    pub(crate) size: usize,
    pub(crate) alignment: usize,
    pub(crate) vtable: MixinVTable,
    pub(crate) allocator: Option<Arc<dyn DomainAllocator>>,
    pub(crate) bindings: Box<[Binding]>,
    pub(crate) live: AtomicUsize,
}

impl MixinInfo {
    #[must_use]
    pub fn id(&self) -> MixinId {
        self.id
    }

    /// Stable key the mixin was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type path of the mixin.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[must_use]
    pub fn is_default_constructible(&self) -> bool {
        self.vtable.construct_default.is_some()
    }

    #[must_use]
    pub fn is_copyable(&self) -> bool {
        self.vtable.clone_into.is_some()
    }

    /// Whether instances use a dedicated allocator instead of their object's.
    #[must_use]
    pub fn has_allocator(&self) -> bool {
        self.allocator.is_some()
    }

    /// Ids of the messages this mixin implements.
    pub fn messages(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.bindings.iter().map(|b| b.message.id)
    }

    #[must_use]
    pub fn implements(&self, message: MessageId) -> bool {
        self.bindings.iter().any(|b| b.message.id == message)
    }

    /// Number of instances alive across all objects.
    #[must_use]
    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Sorted message ids, for shape comparison.
    pub(crate) fn message_set(&self) -> Vec<MessageId> {
        let mut ids: Vec<_> = self.messages().collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for MixinInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixinInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("messages", &self.bindings.len())
            .field("live", &self.live_instances())
            .finish()
    }
}

/// Everything the domain needs to register a mixin.
pub(crate) struct MixinDecl {
    pub(crate) key: &'static str,
    pub(crate) type_name: &'static str,
    pub(crate) size: usize,
    pub(crate) alignment: usize,
    pub(crate) vtable: MixinVTable,
    pub(crate) allocator: Option<Arc<dyn DomainAllocator>>,
    pub(crate) bindings: Vec<Binding>,
}

/// Builder for registering a mixin type.
///
/// Binding the same message twice keeps the last handler.
pub struct MixinBuilder<T: Mixin> {
    bindings: Vec<Binding>,
    construct_default: Option<unsafe fn(*mut u8)>,
    clone_into: Option<unsafe fn(*const u8, *mut u8)>,
    allocator: Option<Arc<dyn DomainAllocator>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Mixin> MixinBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        MixinBuilder {
            bindings: Vec::new(),
            construct_default: None,
            clone_into: None,
            allocator: None,
            _marker: PhantomData,
        }
    }

    /// Implements `message` with a handler that reads the mixin.
    #[must_use]
    pub fn implements<M, F>(self, message: &M, f: F) -> Self
    where
        M: MessageHandle,
        F: Fn(&T, M::Args) -> M::Output + Send + Sync + 'static,
    {
        let handler: Handler<M::Args, M::Output> = Handler::Shared(Box::new(move |ptr: *const u8, args: M::Args| {
            // SAFETY: dispatch only passes pointers to live instances of T.
            let mixin = unsafe { &*ptr.cast::<T>() };
            f(mixin, args)
        }));
        self.bind(message.info(), Arc::new(handler), false)
    }

    /// Implements `message` with a handler that mutates the mixin. Such a
    /// message can only be called through a mutably borrowed object.
    #[must_use]
    pub fn implements_mut<M, F>(self, message: &M, f: F) -> Self
    where
        M: MessageHandle,
        F: Fn(&mut T, M::Args) -> M::Output + Send + Sync + 'static,
    {
        let handler: Handler<M::Args, M::Output> = Handler::Exclusive(Box::new(move |ptr: *mut u8, args: M::Args| {
            // SAFETY: dispatch only passes pointers to live instances of T
            // while the object is exclusively borrowed.
            let mixin = unsafe { &mut *ptr.cast::<T>() };
            f(mixin, args)
        }));
        self.bind(message.info(), Arc::new(handler), true)
    }

    /// Allows adding the mixin by name, using `T::default()`.
    #[must_use]
    pub fn default_constructible(mut self) -> Self
    where
        T: Default,
    {
        self.construct_default = Some(construct_default::<T>);
        self
    }

    /// Allows objects containing the mixin to be copied.
    #[must_use]
    pub fn copyable(mut self) -> Self
    where
        T: Clone,
    {
        self.clone_into = Some(clone_mixin::<T>);
        self
    }

    /// Allocates instances of this mixin with `allocator` instead of the
    /// owning object's allocator.
    #[must_use]
    pub fn allocator(mut self, allocator: Arc<dyn DomainAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// Registers the mixin in `domain`.
    ///
    /// Registering the same type again with the same shape returns the
    /// existing id.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateRegistration`](crate::Error::DuplicateRegistration)
    ///   if the key is taken by a different shape
    /// - [`Error::AmbiguousUnicast`](crate::Error::AmbiguousUnicast) if a bound
    ///   unicast message already has an implementer
    /// - [`Error::UnknownMessage`](crate::Error::UnknownMessage) if a bound
    ///   message belongs to another domain
    /// - [`Error::TooManyMixins`](crate::Error::TooManyMixins) at capacity
    pub fn register(self, domain: &Domain) -> Result<MixinId> {
        domain.register_mixin(MixinDecl {
            key: domain.key_of::<T>(),
            type_name: std::any::type_name::<T>(),
            size: size_of::<T>(),
            alignment: align_of::<T>(),
            vtable: MixinVTable {
                drop_in_place: drop_mixin::<T>,
                construct_default: self.construct_default,
                clone_into: self.clone_into,
            },
            allocator: self.allocator,
            bindings: self.bindings,
        })
    }

    fn bind(
        mut self,
        message: &Arc<MessageInfo>,
        handler: Arc<dyn Any + Send + Sync>,
        exclusive: bool,
    ) -> Self {
        self.bindings.retain(|b| b.message.id != message.id);
        self.bindings.push(Binding {
            message: Arc::clone(message),
            handler,
            exclusive,
        });
        self
    }
}

impl<T: Mixin> Default for MixinBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainConfig;

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Tag(u16);
    impl Mixin for Tag {
        const NAME: &'static str = "tag";
    }

    #[test]
    fn test_vtable_roundtrip() {
        let mut src = std::mem::MaybeUninit::<Tag>::uninit();
        let mut dst = std::mem::MaybeUninit::<Tag>::uninit();
        unsafe {
            construct_default::<Tag>(src.as_mut_ptr().cast());
            src.as_mut_ptr().as_mut().unwrap().0 = 9;
            clone_mixin::<Tag>(src.as_ptr().cast(), dst.as_mut_ptr().cast());
            assert_eq!(dst.assume_init_ref(), &Tag(9));
            drop_mixin::<Tag>(src.as_mut_ptr().cast());
            drop_mixin::<Tag>(dst.as_mut_ptr().cast());
        }
    }

    #[test]
    fn test_builder_records_capabilities() {
        let domain = Domain::new("mixin-tests", DomainConfig::default());
        let ping = domain.register_multicast::<(), ()>("ping").unwrap();
        let id = MixinBuilder::<Tag>::new()
            .implements(&ping, |_: &Tag, ()| ())
            .implements(&ping, |_: &Tag, ()| ())
            .default_constructible()
            .register(&domain)
            .unwrap();

        let info = domain.mixin_info(id).unwrap();
        assert!(info.is_default_constructible());
        assert!(!info.is_copyable());
        assert!(!info.has_allocator());
        assert_eq!(info.messages().collect::<Vec<_>>(), vec![ping.id()]);
        assert_eq!(info.type_name(), std::any::type_name::<Tag>());
        assert_eq!(info.live_instances(), 0);
    }
}
