//! Allocator protocol for object storage.
//!
//! An object needs two kinds of memory: one *mixin data array* holding an
//! entry per mixin, and one *mixin buffer* per mixin instance. A
//! [`DomainAllocator`] provides both. Every operation receives the owning
//! object so an allocator can pool per object or per type.
//!
//! A mixin buffer carries a pointer-sized back-reference slot in front of
//! the instance (see [`amalgam_mem::layout`]). Allocators return the buffer
//! together with the offset of the instance inside it; the runtime checks
//! the placement before it constructs anything there.
//!
//! # Built-in allocators
//!
//! - [`DefaultAllocator`]: the global heap, used when nothing else is set
//! - [`ArenaAllocator`]: bump allocation from an [`amalgam_mem::Arena`]
//! - [`MixinOnly`]: adapts a [`MixinAllocator`], which only provides mixin
//!   buffers, by taking data arrays from the heap
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use amalgam::{ArenaAllocator, Domain, DomainConfig, Object};
//!
//! let domain = Domain::new("arena-demo", DomainConfig::default());
//! let arena = Arc::new(ArenaAllocator::new(64 * 1024));
//! let object = Object::with_allocator(&domain, arena.clone());
//!
//! assert_eq!(object.mixin_count(), 0);
//! assert_eq!(arena.stats().live_allocations, 0);
//! ```

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use amalgam_mem::{Arena, ArenaStats, BACK_REFERENCE_SIZE, calculate_mem_size_for_mixin, calculate_mixin_offset};

use crate::runtime::mixin::MixinId;
use crate::runtime::object::{MixinData, ObjectCore};

/// Size in bytes of one entry in a mixin data array.
pub const MIXIN_DATA_SIZE: usize = size_of::<MixinData>();

/// Alignment required of a mixin data array.
pub const MIXIN_DATA_ALIGN: usize = align_of::<MixinData>();

/// Error returned by allocators that could not provide memory.
///
/// The runtime turns it into a full [`Error`](crate::Error) naming the
/// mixin or array that was being allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("allocator could not provide memory")
    }
}

impl std::error::Error for AllocError {}

/// A mixin buffer and the offset of the instance inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixinBuffer {
    /// Start of the buffer as returned by the allocator.
    pub ptr: NonNull<u8>,
    /// Distance from `ptr` to the mixin instance.
    pub offset: usize,
}

impl MixinBuffer {
    /// Buffer for `ptr` with the offset the layout rules pick for `alignment`.
    #[must_use]
    pub fn place(ptr: NonNull<u8>, alignment: usize) -> Self {
        MixinBuffer {
            ptr,
            offset: calculate_mixin_offset(ptr.as_ptr(), alignment),
        }
    }

    /// Address of the mixin instance.
    #[inline]
    #[must_use]
    pub fn mixin_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().wrapping_add(self.offset)
    }
}

/// Memory provider for objects and their mixins.
///
/// # Safety
///
/// Implementors must guarantee that:
///
/// - `alloc_mixin_data` returns memory valid for `count * MIXIN_DATA_SIZE`
///   bytes and aligned to [`MIXIN_DATA_ALIGN`]
/// - `alloc_mixin` returns a buffer valid for at least
///   [`calculate_mem_size_for_mixin`]`(size, alignment)` bytes, with an
///   offset that leaves room for the back-reference and aligns the instance
/// - memory stays valid and unaliased until the matching dealloc call
pub unsafe trait DomainAllocator: Send + Sync {
    /// Allocates a mixin data array of `count` entries for `owner`.
    fn alloc_mixin_data(&self, count: usize, owner: &ObjectCore) -> Result<NonNull<u8>, AllocError>;

    /// Releases an array from [`alloc_mixin_data`](Self::alloc_mixin_data).
    ///
    /// # Safety
    ///
    /// `ptr` and `count` must come from a previous `alloc_mixin_data` call on
    /// this allocator, and the array must not be used afterwards.
    unsafe fn dealloc_mixin_data(&self, ptr: NonNull<u8>, count: usize, owner: &ObjectCore);

    /// Allocates a buffer for one instance of mixin `id`.
    fn alloc_mixin(
        &self,
        id: MixinId,
        size: usize,
        alignment: usize,
        owner: &ObjectCore,
    ) -> Result<MixinBuffer, AllocError>;

    /// Releases a buffer from [`alloc_mixin`](Self::alloc_mixin).
    ///
    /// # Safety
    ///
    /// `buffer`, `id`, `size` and `alignment` must be exactly what the
    /// matching `alloc_mixin` call used and returned.
    unsafe fn dealloc_mixin(
        &self,
        buffer: MixinBuffer,
        id: MixinId,
        size: usize,
        alignment: usize,
        owner: &ObjectCore,
    );

    /// Whether this allocator has ever handed out memory.
    ///
    /// Used to detect an allocator being replaced mid-life.
    fn has_allocated(&self) -> bool {
        false
    }
}

/// Allocator that only provides mixin buffers.
///
/// Wrap it in [`MixinOnly`] to use it where a [`DomainAllocator`] is
/// expected.
///
/// # Safety
///
/// Same buffer guarantees as [`DomainAllocator::alloc_mixin`].
pub unsafe trait MixinAllocator: Send + Sync {
    fn alloc_mixin(
        &self,
        id: MixinId,
        size: usize,
        alignment: usize,
        owner: &ObjectCore,
    ) -> Result<MixinBuffer, AllocError>;

    /// # Safety
    ///
    /// See [`DomainAllocator::dealloc_mixin`].
    unsafe fn dealloc_mixin(
        &self,
        buffer: MixinBuffer,
        id: MixinId,
        size: usize,
        alignment: usize,
        owner: &ObjectCore,
    );

    fn has_allocated(&self) -> bool {
        false
    }
}

/// Heap layout for mixin buffers: pointer aligned, so the back-reference slot
/// itself is aligned for every mixin whose alignment is at most a pointer.
fn mixin_layout(size: usize, alignment: usize) -> Result<Layout, AllocError> {
    Layout::from_size_align(calculate_mem_size_for_mixin(size, alignment), BACK_REFERENCE_SIZE)
        .map_err(|_| AllocError)
}

fn data_layout(count: usize) -> Result<Layout, AllocError> {
    Layout::array::<MixinData>(count).map_err(|_| AllocError)
}

/// Allocator backed by the global heap.
#[derive(Debug, Default)]
pub struct DefaultAllocator {
    has_allocated: AtomicBool,
}

impl DefaultAllocator {
    #[must_use]
    pub const fn new() -> Self {
        DefaultAllocator {
            has_allocated: AtomicBool::new(false),
        }
    }

    fn heap_alloc(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError);
        }
        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError)?;
        self.has_allocated.store(true, Ordering::Relaxed);
        Ok(ptr)
    }
}

// SAFETY: layouts come from `data_layout`/`mixin_layout`, which satisfy the
// size and alignment contract, and dealloc recomputes the same layouts.
unsafe impl DomainAllocator for DefaultAllocator {
    fn alloc_mixin_data(&self, count: usize, _owner: &ObjectCore) -> Result<NonNull<u8>, AllocError> {
        self.heap_alloc(data_layout(count)?)
    }

    unsafe fn dealloc_mixin_data(&self, ptr: NonNull<u8>, count: usize, _owner: &ObjectCore) {
        if let Ok(layout) = data_layout(count) {
            // SAFETY: caller guarantees ptr came from alloc_mixin_data(count).
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }

    fn alloc_mixin(
        &self,
        _id: MixinId,
        size: usize,
        alignment: usize,
        _owner: &ObjectCore,
    ) -> Result<MixinBuffer, AllocError> {
        let ptr = self.heap_alloc(mixin_layout(size, alignment)?)?;
        Ok(MixinBuffer::place(ptr, alignment))
    }

    unsafe fn dealloc_mixin(
        &self,
        buffer: MixinBuffer,
        _id: MixinId,
        size: usize,
        alignment: usize,
        _owner: &ObjectCore,
    ) {
        if let Ok(layout) = mixin_layout(size, alignment) {
            // SAFETY: caller guarantees the buffer came from alloc_mixin with
            // the same size and alignment.
            unsafe { alloc::dealloc(buffer.ptr.as_ptr(), layout) };
        }
    }

    fn has_allocated(&self) -> bool {
        self.has_allocated.load(Ordering::Relaxed)
    }
}

/// Pooling allocator over a bump [`Arena`].
///
/// Freed memory is accounted for but only reclaimed when the allocator is
/// dropped, so it suits many short-lived objects with a shared lifetime.
/// The arena must outlive every object that uses it, which holding the
/// allocator in an `Arc` guarantees.
#[derive(Debug)]
pub struct ArenaAllocator {
    arena: Arena,
    has_allocated: AtomicBool,
}

impl ArenaAllocator {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        ArenaAllocator {
            arena: Arena::new(chunk_size),
            has_allocated: AtomicBool::new(false),
        }
    }

    /// Bookkeeping of the underlying arena.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    fn bump(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.arena.alloc_bytes(size, align).ok_or(AllocError)?;
        self.has_allocated.store(true, Ordering::Relaxed);
        Ok(ptr)
    }
}

// SAFETY: the arena hands out disjoint ranges of the requested size and
// alignment, and keeps them alive until the allocator is dropped.
unsafe impl DomainAllocator for ArenaAllocator {
    fn alloc_mixin_data(&self, count: usize, _owner: &ObjectCore) -> Result<NonNull<u8>, AllocError> {
        let layout = data_layout(count)?;
        self.bump(layout.size(), layout.align())
    }

    unsafe fn dealloc_mixin_data(&self, _ptr: NonNull<u8>, count: usize, _owner: &ObjectCore) {
        self.arena.release(count * MIXIN_DATA_SIZE);
    }

    fn alloc_mixin(
        &self,
        _id: MixinId,
        size: usize,
        alignment: usize,
        _owner: &ObjectCore,
    ) -> Result<MixinBuffer, AllocError> {
        let ptr = self.bump(calculate_mem_size_for_mixin(size, alignment), BACK_REFERENCE_SIZE)?;
        Ok(MixinBuffer::place(ptr, alignment))
    }

    unsafe fn dealloc_mixin(
        &self,
        _buffer: MixinBuffer,
        _id: MixinId,
        size: usize,
        alignment: usize,
        _owner: &ObjectCore,
    ) {
        self.arena.release(calculate_mem_size_for_mixin(size, alignment));
    }

    fn has_allocated(&self) -> bool {
        self.has_allocated.load(Ordering::Relaxed)
    }
}

/// Adapts a [`MixinAllocator`] into a [`DomainAllocator`].
///
/// Mixin buffers come from the wrapped allocator; data arrays come from a
/// private [`DefaultAllocator`].
#[derive(Debug, Default)]
pub struct MixinOnly<A> {
    inner: A,
    arrays: DefaultAllocator,
}

impl<A: MixinAllocator> MixinOnly<A> {
    #[must_use]
    pub const fn new(inner: A) -> Self {
        MixinOnly {
            inner,
            arrays: DefaultAllocator::new(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

// SAFETY: both halves uphold their own halves of the contract.
unsafe impl<A: MixinAllocator> DomainAllocator for MixinOnly<A> {
    fn alloc_mixin_data(&self, count: usize, owner: &ObjectCore) -> Result<NonNull<u8>, AllocError> {
        self.arrays.alloc_mixin_data(count, owner)
    }

    unsafe fn dealloc_mixin_data(&self, ptr: NonNull<u8>, count: usize, owner: &ObjectCore) {
        // SAFETY: forwarded caller contract.
        unsafe { self.arrays.dealloc_mixin_data(ptr, count, owner) }
    }

    fn alloc_mixin(
        &self,
        id: MixinId,
        size: usize,
        alignment: usize,
        owner: &ObjectCore,
    ) -> Result<MixinBuffer, AllocError> {
        self.inner.alloc_mixin(id, size, alignment, owner)
    }

    unsafe fn dealloc_mixin(
        &self,
        buffer: MixinBuffer,
        id: MixinId,
        size: usize,
        alignment: usize,
        owner: &ObjectCore,
    ) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.dealloc_mixin(buffer, id, size, alignment, owner) }
    }

    fn has_allocated(&self) -> bool {
        self.inner.has_allocated() || self.arrays.has_allocated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amalgam_mem::is_valid_placement;

    #[test]
    fn test_mixin_buffer_place() {
        let mut storage = [0u64; 8];
        let ptr = NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap();
        let buffer = MixinBuffer::place(ptr, 16);

        assert!(is_valid_placement(ptr.as_ptr(), buffer.offset, 16));
        assert_eq!(buffer.mixin_ptr() as usize % 16, 0);
    }

    #[test]
    fn test_mixin_layout_is_pointer_aligned() {
        let layout = mixin_layout(24, 8).unwrap();
        assert_eq!(layout.align(), BACK_REFERENCE_SIZE);
        assert_eq!(layout.size(), calculate_mem_size_for_mixin(24, 8));
    }

    #[test]
    fn test_data_layout_matches_entry_size() {
        let layout = data_layout(5).unwrap();
        assert_eq!(layout.size(), 5 * MIXIN_DATA_SIZE);
        assert_eq!(layout.align(), MIXIN_DATA_ALIGN);
    }

    #[test]
    fn test_alloc_error_display() {
        assert_eq!(AllocError.to_string(), "allocator could not provide memory");
    }
}
