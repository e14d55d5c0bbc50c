//! Objects and their storage.
//!
//! An [`Object`] starts empty and gains or loses mixins through mutations.
//! Its current state is an immutable *composition*: the object type plus a
//! mixin data array with one entry per mixin. A mutation builds a complete
//! new composition and swaps it in, so readers always see either the old or
//! the new state, never a mix.
//!
//! # Memory layout
//!
//! ```text
//! Object ──► ObjectCore (boxed, never moves)
//!              │
//!              └─ state ──► Composition
//!                             ├─ type ──► ObjectType (shared, cached)
//!                             └─ data ──► [MixinData; n]
//!                                            └─ slot ──► buffer: | pad | &ObjectCore | mixin |
//! ```
//!
//! Each mixin lives in its own buffer, preceded by a back-reference to its
//! object. A mixin that survives a mutation keeps its buffer: mutations
//! never move existing instances.
//!
//! # Example
//!
//! ```rust
//! use amalgam::{Domain, DomainConfig, Mixin, MixinBuilder, Object};
//!
//! #[derive(Default, Clone)]
//! struct Name(String);
//! impl Mixin for Name {
//!     const NAME: &'static str = "name";
//! }
//!
//! let domain = Domain::new("doc", DomainConfig::default());
//! MixinBuilder::<Name>::new().copyable().register(&domain).unwrap();
//!
//! let mut object = Object::new(&domain);
//! object.mutate().add_value(Name("crate".into())).apply().unwrap();
//!
//! assert!(object.has::<Name>());
//! assert_eq!(object.get::<Name>().unwrap().0, "crate");
//!
//! let copy = object.try_clone().unwrap();
//! assert_eq!(copy.get::<Name>().unwrap().0, "crate");
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use amalgam_log::{error, trace, warn};
use amalgam_mem::{BACK_REFERENCE_SIZE, is_valid_placement};
use arc_swap::{ArcSwap, Guard};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::runtime::allocator::{DomainAllocator, MIXIN_DATA_ALIGN, MixinBuffer};
use crate::runtime::domain::{Domain, log_backtrace};
use crate::runtime::message::MessageHandle;
use crate::runtime::mixin::{Mixin, MixinId, MixinInfo};
use crate::runtime::mutation::{Init, Mutation, Target};
use crate::runtime::object_type::ObjectType;

// ============================================================================
// Mixin slots
// ============================================================================

/// How a new mixin instance gets its value.
pub(crate) enum Ready {
    Default(unsafe fn(*mut u8)),
    Value(Box<dyn FnOnce(*mut u8) + Send>),
    Clone(unsafe fn(*const u8, *mut u8), Arc<MixinSlot>),
}

impl Ready {
    pub(crate) fn prepare(init: Init, info: &MixinInfo) -> Result<Self> {
        match init {
            Init::Default => info
                .vtable
                .construct_default
                .map(Ready::Default)
                .ok_or_else(|| Error::MissingConstructor {
                    mixin: info.name().to_string(),
                }),
            Init::Value(write) => Ok(Ready::Value(write)),
            Init::CloneOf(source) => match info.vtable.clone_into {
                Some(clone) => Ok(Ready::Clone(clone, source)),
                None => Err(Error::NotCopyable {
                    mixin: info.name().to_string(),
                }),
            },
        }
    }

    /// # Safety
    ///
    /// `dst` must be uninitialized storage sized and aligned for the mixin
    /// this was prepared for.
    unsafe fn construct(self, dst: *mut u8) {
        // SAFETY: forwarded caller contract; clone sources are live slots of
        // the same mixin.
        unsafe {
            match self {
                Ready::Default(construct) => construct(dst),
                Ready::Value(write) => write(dst),
                Ready::Clone(clone, source) => clone(source.mixin_ptr().cast_const(), dst),
            }
        }
    }
}

/// Releases a buffer whose mixin was never constructed.
struct PendingBuffer<'a> {
    allocator: &'a dyn DomainAllocator,
    buffer: MixinBuffer,
    info: &'a MixinInfo,
    owner: &'a ObjectCore,
}

impl Drop for PendingBuffer<'_> {
    fn drop(&mut self) {
        // SAFETY: the buffer came from alloc_mixin with these parameters and
        // holds no live value.
        unsafe {
            self.allocator.dealloc_mixin(
                self.buffer,
                self.info.id,
                self.info.size,
                self.info.alignment,
                self.owner,
            );
        }
    }
}

/// One constructed mixin instance and the buffer holding it.
pub(crate) struct MixinSlot {
    info: Arc<MixinInfo>,
    allocator: Arc<dyn DomainAllocator>,
    buffer: MixinBuffer,
    owner: NonNull<ObjectCore>,
}

// SAFETY: mixins are Send + Sync, and the owner pointer is only used to hand
// the object back to its allocator, which is Send + Sync as well.
unsafe impl Send for MixinSlot {}
unsafe impl Sync for MixinSlot {}

impl MixinSlot {
    /// Allocates and constructs an instance of `info` for `owner`.
    pub(crate) fn create(
        info: &Arc<MixinInfo>,
        allocator: Arc<dyn DomainAllocator>,
        owner: &ObjectCore,
        ready: Ready,
    ) -> Result<Arc<Self>> {
        let buffer = allocator
            .alloc_mixin(info.id, info.size, info.alignment, owner)
            .map_err(|_| Error::AllocationFailure {
                mixin: info.name().to_string(),
                size: info.size,
                alignment: info.alignment,
            })?;

        let pending = PendingBuffer {
            allocator: &*allocator,
            buffer,
            info,
            owner,
        };

        if !is_valid_placement(buffer.ptr.as_ptr(), buffer.offset, info.alignment) {
            return Err(Error::MisalignedStorage {
                mixin: info.name().to_string(),
                offset: buffer.offset,
                alignment: info.alignment,
            });
        }

        let mixin = buffer.mixin_ptr();
        // SAFETY: the placement check guarantees BACK_REFERENCE_SIZE bytes
        // before the instance inside the buffer, and room for the instance.
        unsafe {
            mixin
                .sub(BACK_REFERENCE_SIZE)
                .cast::<*const ObjectCore>()
                .write_unaligned(owner);
            ready.construct(mixin);
        }
        std::mem::forget(pending);

        info.live.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(MixinSlot {
            info: Arc::clone(info),
            allocator,
            buffer,
            owner: NonNull::from(owner),
        }))
    }

    #[inline]
    pub(crate) fn mixin_ptr(&self) -> *mut u8 {
        self.buffer.mixin_ptr()
    }

    pub(crate) fn info(&self) -> &Arc<MixinInfo> {
        &self.info
    }
}

impl Drop for MixinSlot {
    fn drop(&mut self) {
        let info = &*self.info;
        // SAFETY: the instance was constructed in `create` and is dropped once.
        // Slots never outlive their object, so `owner` is still valid.
        unsafe {
            (info.vtable.drop_in_place)(self.buffer.mixin_ptr());
            self.allocator.dealloc_mixin(
                self.buffer,
                info.id,
                info.size,
                info.alignment,
                self.owner.as_ref(),
            );
        }
        info.live.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Compositions
// ============================================================================

/// One entry of a mixin data array.
pub(crate) struct MixinData {
    id: MixinId,
    slot: Arc<MixinSlot>,
}

impl MixinData {
    pub(crate) fn id(&self) -> MixinId {
        self.id
    }

    pub(crate) fn slot(&self) -> &Arc<MixinSlot> {
        &self.slot
    }
}

struct DataArray {
    ptr: NonNull<MixinData>,
    allocator: Arc<dyn DomainAllocator>,
    owner: NonNull<ObjectCore>,
}

/// An object's full state: its type and its mixin data array.
pub(crate) struct Composition {
    ty: Arc<ObjectType>,
    data: Option<DataArray>,
    len: usize,
}

// SAFETY: the array is written once before the composition is shared and
// only read afterwards; its entries are Send + Sync.
unsafe impl Send for Composition {}
unsafe impl Sync for Composition {}

impl Composition {
    pub(crate) fn empty(ty: Arc<ObjectType>) -> Self {
        ty.attach();
        Composition { ty, data: None, len: 0 }
    }

    /// Builds a composition over `slots`, which must match `ty` in order.
    ///
    /// The slots are moved into the composition on success and left in
    /// place on failure.
    pub(crate) fn assemble(
        ty: Arc<ObjectType>,
        slots: &mut Vec<Arc<MixinSlot>>,
        allocator: &Arc<dyn DomainAllocator>,
        owner: &ObjectCore,
    ) -> Result<Self> {
        if slots.is_empty() {
            return Ok(Self::empty(ty));
        }

        let count = slots.len();
        let raw = allocator
            .alloc_mixin_data(count, owner)
            .map_err(|_| Error::MixinDataAllocationFailure { count })?;
        if raw.as_ptr().align_offset(MIXIN_DATA_ALIGN) != 0 {
            // SAFETY: returned by alloc_mixin_data(count) just above.
            unsafe { allocator.dealloc_mixin_data(raw, count, owner) };
            return Err(Error::MixinDataAllocationFailure { count });
        }

        let entries = raw.cast::<MixinData>();
        for (index, slot) in slots.drain(..).enumerate() {
            // SAFETY: the array has room for `count` entries, each written once.
            unsafe {
                entries.as_ptr().add(index).write(MixinData {
                    id: slot.info.id,
                    slot,
                });
            }
        }

        ty.attach();
        Ok(Composition {
            ty,
            data: Some(DataArray {
                ptr: entries,
                allocator: Arc::clone(allocator),
                owner: NonNull::from(owner),
            }),
            len: count,
        })
    }

    #[inline]
    pub(crate) fn ty(&self) -> &Arc<ObjectType> {
        &self.ty
    }

    #[inline]
    pub(crate) fn entries(&self) -> &[MixinData] {
        match &self.data {
            // SAFETY: `len` entries were initialized in `assemble`.
            Some(data) => unsafe { std::slice::from_raw_parts(data.ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    #[inline]
    pub(crate) fn slot(&self, position: usize) -> &Arc<MixinSlot> {
        self.entries()[position].slot()
    }

    #[inline]
    pub(crate) fn mixin_ptr(&self, position: usize) -> *mut u8 {
        self.slot(position).mixin_ptr()
    }
}

impl Drop for Composition {
    fn drop(&mut self) {
        self.ty.detach();
        if let Some(data) = self.data.take() {
            // SAFETY: entries were initialized in `assemble` and are dropped
            // once; the array is released with the parameters it was
            // allocated with, while its owner is still alive.
            unsafe {
                ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data.ptr.as_ptr(), self.len));
                data.allocator
                    .dealloc_mixin_data(data.ptr.cast(), self.len, data.owner.as_ref());
            }
        }
    }
}

// ============================================================================
// Objects
// ============================================================================

/// The part of an object mixins can refer back to.
///
/// [`Object`] dereferences to it; message calls and [`object_of`] work with
/// `&ObjectCore`. Only shared references to it are ever handed out, so it
/// cannot be moved out of its allocation.
pub struct ObjectCore {
    domain: Domain,
    allocator: Arc<dyn DomainAllocator>,
    state: ArcSwap<Composition>,
    mutation_lock: Mutex<()>,
    allocated: AtomicBool,
    tearing_down: AtomicBool,
}

/// A runtime-composed object.
///
/// The object owns a heap-allocated [`ObjectCore`] that its mixins point
/// back to. Moving or swapping `Object`s is fine; the cores stay put:
///
/// ```compile_fail
/// use amalgam::{Domain, DomainConfig, Object};
///
/// let domain = Domain::new("doc", DomainConfig::default());
/// let mut a = Object::new(&domain);
/// let mut b = Object::new(&domain);
/// std::mem::swap(&mut *a, &mut *b);
/// ```
pub struct Object {
    core: NonNull<ObjectCore>,
}

// SAFETY: `Object` uniquely owns its core, which is Send + Sync.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// Creates an empty object using the domain's default allocator.
    #[must_use]
    pub fn new(domain: &Domain) -> Self {
        Self::with_allocator(domain, Arc::clone(domain.allocator()))
    }

    /// Creates an empty object with its own allocator.
    #[must_use]
    pub fn with_allocator(domain: &Domain, allocator: Arc<dyn DomainAllocator>) -> Self {
        domain.counters().object_created();
        let core = Box::new(ObjectCore {
            domain: domain.clone(),
            allocator,
            state: ArcSwap::from_pointee(Composition::empty(domain.empty_type())),
            mutation_lock: Mutex::new(()),
            allocated: AtomicBool::new(false),
            tearing_down: AtomicBool::new(false),
        });
        Object {
            core: NonNull::from(Box::leak(core)),
        }
    }

    /// Replaces the allocator used for this object's future allocations.
    ///
    /// # Errors
    ///
    /// [`Error::AllocatorSwitch`] in strict mode if the current allocator
    /// already allocated storage for this object. Outside strict mode the
    /// switch is logged and allowed; storage stays with the allocator that
    /// provided it.
    pub fn set_allocator(&mut self, allocator: Arc<dyn DomainAllocator>) -> Result<()> {
        let core = &**self;
        if core.allocated.load(Ordering::Acquire) && core.allocator.has_allocated() {
            if core.domain.config().strict_allocators {
                error!("object allocator replaced after it already allocated");
                log_backtrace();
                return Err(Error::AllocatorSwitch);
            }
            warn!("object allocator replaced after it already allocated");
        }
        // SAFETY: `&mut self` excludes every other reference to the core, and
        // only this field is written, in place.
        unsafe { (*self.core.as_ptr()).allocator = allocator };
        Ok(())
    }

    /// Exclusive access to the object's `T`, if it has one.
    #[must_use]
    pub fn get_mut<T: Mixin>(&mut self) -> Option<&mut T> {
        let info = self.domain.mixin_of::<T>()?;
        let state = self.state();
        let position = state.ty().position(info.id)?;
        let ptr = state.mixin_ptr(position).cast::<T>();
        drop(state);
        // SAFETY: the object is exclusively borrowed, so its composition and
        // the instance cannot change or be shared for the returned lifetime.
        Some(unsafe { &mut *ptr })
    }

    /// Starts a mutation of this object.
    pub fn mutate(&mut self) -> Mutation<'_> {
        Mutation::new(self)
    }

    /// Removes every mixin.
    pub fn clear(&mut self) -> Result<()> {
        self.mutate().clear().apply()
    }
}

impl Deref for Object {
    type Target = ObjectCore;

    #[inline]
    fn deref(&self) -> &ObjectCore {
        // SAFETY: the core lives until `Object::drop` frees it.
        unsafe { self.core.as_ref() }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        let core: &ObjectCore = self;
        core.tearing_down.store(true, Ordering::Release);
        // Mixin destructors run here, while the object is still whole, and
        // see an empty object if they look back at it.
        let old = core
            .state
            .swap(Arc::new(Composition::empty(core.domain.empty_type())));
        drop(old);
        core.domain.counters().object_destroyed();
        // SAFETY: allocated with `Box` in `with_allocator`; no mixin refers
        // back to the core any more.
        drop(unsafe { Box::from_raw(self.core.as_ptr()) });
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl ObjectCore {
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn DomainAllocator> {
        &self.allocator
    }

    /// Whether the object currently contains `T`.
    #[must_use]
    pub fn has<T: Mixin>(&self) -> bool {
        self.domain
            .mixin_of::<T>()
            .is_some_and(|info| self.state().ty().has(info.id))
    }

    #[must_use]
    pub fn has_id(&self, id: MixinId) -> bool {
        self.state().ty().has(id)
    }

    #[must_use]
    pub fn has_named(&self, name: &str) -> bool {
        self.domain
            .mixin_id(name)
            .is_some_and(|id| self.state().ty().has(id))
    }

    /// Shared access to the object's `T`, if it has one.
    ///
    /// The reference keeps the instance alive even if a concurrent mutation
    /// removes or replaces it.
    #[must_use]
    pub fn get<T: Mixin>(&self) -> Option<MixinRef<'_, T>> {
        let info = self.domain.mixin_of::<T>()?;
        let state = self.state();
        let position = state.ty().position(info.id)?;
        Some(MixinRef {
            slot: Arc::clone(state.slot(position)),
            _marker: PhantomData,
        })
    }

    #[must_use]
    pub fn mixin_count(&self) -> usize {
        self.state().entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mixin_count() == 0
    }

    /// Ids of the object's mixins in composition order.
    #[must_use]
    pub fn mixin_ids(&self) -> Vec<MixinId> {
        self.state().entries().iter().map(MixinData::id).collect()
    }

    /// Names of the object's mixins in composition order.
    #[must_use]
    pub fn mixin_names(&self) -> Vec<String> {
        self.state()
            .ty()
            .mixins()
            .map(|info| info.name().to_string())
            .collect()
    }

    /// The object's current type.
    #[must_use]
    pub fn object_type(&self) -> Arc<ObjectType> {
        Arc::clone(self.state().ty())
    }

    /// Whether any mixin of the object implements `message`.
    #[must_use]
    pub fn implements<M: MessageHandle>(&self, message: &M) -> bool {
        self.implementer_count(message) > 0
    }

    /// Number of mixins implementing `message`. Zero for messages of other
    /// domains.
    #[must_use]
    pub fn implementer_count<M: MessageHandle>(&self, message: &M) -> usize {
        if message.info().domain != self.domain.serial() {
            return 0;
        }
        self.state().ty().implementer_count(message.id())
    }

    /// Starts a mutation through a shared reference.
    ///
    /// Concurrent mutations of the same object are serialized; readers keep
    /// seeing the previous composition until the new one is committed.
    ///
    /// # Errors
    ///
    /// [`Error::ThreadSafeMutationsDisabled`] unless the domain enables
    /// thread-safe mutations.
    pub fn mutate_shared(&self) -> Result<Mutation<'_>> {
        if !self.domain.config().thread_safe_mutations {
            return Err(self.domain.fail(Error::ThreadSafeMutationsDisabled));
        }
        Ok(Mutation::new(self))
    }

    /// Creates a deep copy of the object, cloning each mixin.
    ///
    /// # Errors
    ///
    /// [`Error::CopyDisabled`] if the domain disables implicit copies, and
    /// [`Error::NotCopyable`] if any mixin was registered without copy
    /// support. Allocation errors are reported as for mutations.
    pub fn try_clone(&self) -> Result<Object> {
        if !self.domain.config().implicit_copy {
            return Err(self.domain.fail(Error::CopyDisabled));
        }

        let copy = Object::with_allocator(&self.domain, Arc::clone(&self.allocator));
        let state = self.state_full();
        let mut mutation = Mutation::new(&copy);
        for entry in state.entries() {
            mutation = mutation.push_add(
                Target::Info(Arc::clone(entry.slot().info())),
                Init::CloneOf(Arc::clone(entry.slot())),
            );
        }
        mutation.apply()?;
        Ok(copy)
    }

    // ------------------------------------------------------------------------
    // Internal state access
    // ------------------------------------------------------------------------

    #[inline]
    pub(crate) fn state(&self) -> Guard<Arc<Composition>> {
        self.state.load()
    }

    pub(crate) fn state_full(&self) -> Arc<Composition> {
        self.state.load_full()
    }

    pub(crate) fn lock_mutations(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock.lock()
    }

    pub(crate) fn is_tearing_down(&self) -> bool {
        self.tearing_down.load(Ordering::Acquire)
    }

    /// Installs `next` and returns the composition it replaced.
    pub(crate) fn commit(&self, next: Composition) -> Arc<Composition> {
        if !next.entries().is_empty() {
            self.allocated.store(true, Ordering::Release);
        }
        trace!(
            "object {:p}: committed {:?}",
            self,
            next.ty().mixins().map(MixinInfo::name).collect::<Vec<_>>()
        );
        self.state.swap(Arc::new(next))
    }
}

impl fmt::Debug for ObjectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("domain", &self.domain.name())
            .field("mixins", &self.mixin_names())
            .finish()
    }
}

/// Shared reference to a mixin inside an object.
pub struct MixinRef<'a, T> {
    slot: Arc<MixinSlot>,
    _marker: PhantomData<(&'a ObjectCore, &'a T)>,
}

impl<T> Deref for MixinRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the slot holds a live T (checked by type name when the
        // reference was created) and is kept alive by this reference.
        unsafe { &*self.slot.mixin_ptr().cast::<T>() }
    }
}

impl<T: fmt::Debug> fmt::Debug for MixinRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Returns the object that owns `mixin`.
///
/// # Safety
///
/// `mixin` must be an instance stored in an object: a reference obtained
/// from [`ObjectCore::get`], or the receiver of a message handler. It must
/// not be called while the object is mutably borrowed, for example from a
/// handler registered with `implements_mut`.
///
/// # Example
///
/// ```rust
/// use amalgam::{object_of, Domain, DomainConfig, Mixin, MixinBuilder, Object};
///
/// #[derive(Default)]
/// struct Part;
/// impl Mixin for Part {
///     const NAME: &'static str = "part";
/// }
///
/// let domain = Domain::new("doc", DomainConfig::default());
/// MixinBuilder::<Part>::new().register(&domain).unwrap();
///
/// let mut object = Object::new(&domain);
/// object.mutate().add::<Part>().apply().unwrap();
///
/// let part = object.get::<Part>().unwrap();
/// let owner = unsafe { object_of(&*part) };
/// assert!(std::ptr::eq(owner, &*object));
/// ```
pub unsafe fn object_of<T: Mixin>(mixin: &T) -> &ObjectCore {
    let ptr = (mixin as *const T).cast::<u8>();
    // SAFETY: the caller guarantees `mixin` sits in a buffer written by
    // `MixinSlot::create`, which stores the owner just before the instance.
    unsafe {
        &*ptr
            .sub(BACK_REFERENCE_SIZE)
            .cast::<*const ObjectCore>()
            .read_unaligned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DomainConfig, MixinBuilder};
    use std::sync::atomic::AtomicUsize;

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default, Clone)]
    struct Tracked(u32);
    impl Mixin for Tracked {
        const NAME: &'static str = "tracked";
    }
    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[repr(align(64))]
    #[derive(Default)]
    struct Wide([u8; 3]);
    impl Mixin for Wide {
        const NAME: &'static str = "wide";
    }

    fn domain() -> Domain {
        let domain = Domain::new("object-tests", DomainConfig::default());
        MixinBuilder::<Tracked>::new()
            .default_constructible()
            .copyable()
            .register(&domain)
            .unwrap();
        MixinBuilder::<Wide>::new().register(&domain).unwrap();
        domain
    }

    #[test]
    fn test_new_object_is_empty() {
        let domain = domain();
        let object = Object::new(&domain);
        assert!(object.is_empty());
        assert!(!object.has::<Tracked>());
        assert!(object.get::<Tracked>().is_none());
        assert!(object.object_type().is_empty());
    }

    #[test]
    fn test_over_aligned_mixin_placement() {
        let domain = domain();
        let mut object = Object::new(&domain);
        object.mutate().add::<Wide>().apply().unwrap();

        let wide = object.get::<Wide>().unwrap();
        assert_eq!((&*wide as *const Wide as usize) % 64, 0);
        assert!(std::ptr::eq(unsafe { object_of(&*wide) }, &*object));
    }

    #[test]
    fn test_get_mut_and_drop_count() {
        let before = DROPS.load(Ordering::SeqCst);
        {
            let domain = domain();
            let mut object = Object::new(&domain);
            object.mutate().add_value(Tracked(1)).apply().unwrap();
            object.get_mut::<Tracked>().unwrap().0 = 5;
            assert_eq!(object.get::<Tracked>().unwrap().0, 5);
            assert_eq!(domain.mixin_of::<Tracked>().unwrap().live_instances(), 1);
        }
        assert!(DROPS.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn test_back_reference_survives_object_move() {
        let domain = domain();
        let mut object = Object::new(&domain);
        object.mutate().add::<Tracked>().apply().unwrap();

        let moved = object;
        let tracked = moved.get::<Tracked>().unwrap();
        assert!(std::ptr::eq(unsafe { object_of(&*tracked) }, &*moved));
    }

    #[test]
    fn test_mixin_ref_outlives_removal() {
        let domain = Domain::new(
            "object-ref-tests",
            DomainConfig::default().with_thread_safe_mutations(true),
        );
        MixinBuilder::<Tracked>::new().register(&domain).unwrap();

        let object = Object::new(&domain);
        object.mutate_shared().unwrap().add_value(Tracked(9)).apply().unwrap();

        let held = object.get::<Tracked>().unwrap();
        object.mutate_shared().unwrap().remove::<Tracked>().apply().unwrap();

        assert!(!object.has::<Tracked>());
        assert_eq!(held.0, 9);
    }

    #[test]
    fn test_set_allocator_strict() {
        let domain = Domain::new(
            "object-alloc-tests",
            DomainConfig::default().with_strict_allocators(true),
        );
        MixinBuilder::<Tracked>::new().register(&domain).unwrap();

        let mut object = Object::new(&domain);
        let arena: Arc<dyn DomainAllocator> =
            Arc::new(crate::runtime::allocator::ArenaAllocator::new(0));
        object.set_allocator(Arc::clone(&arena)).unwrap();

        object.mutate().add::<Tracked>().apply().unwrap();
        assert_eq!(
            object.set_allocator(Arc::clone(domain.allocator())),
            Err(Error::AllocatorSwitch)
        );
    }

    #[test]
    fn test_swapped_objects_keep_their_back_references() {
        let domain = domain();
        let mut a = Object::new(&domain);
        let mut b = Object::new(&domain);
        a.mutate().add_value(Tracked(1)).apply().unwrap();
        b.mutate().add_value(Tracked(2)).apply().unwrap();

        std::mem::swap(&mut a, &mut b);
        for object in [&a, &b] {
            let tracked = object.get::<Tracked>().unwrap();
            assert!(std::ptr::eq(unsafe { object_of(&*tracked) }, &**object));
        }
        assert_eq!(a.get::<Tracked>().unwrap().0, 2);

        drop(a);
        assert_eq!(b.get::<Tracked>().unwrap().0, 1);
        b.clear().unwrap();
        assert_eq!(domain.mixin_of::<Tracked>().unwrap().live_instances(), 0);
    }
}
