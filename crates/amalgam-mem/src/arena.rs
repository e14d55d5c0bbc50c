//! Chunked bump arena for pooled mixin storage.
//!
//! The arena hands out raw byte ranges from large chunks using an atomic bump
//! pointer, so several threads can allocate from it at once. Individual
//! ranges are never returned to the chunk: [`Arena::release`] only updates the
//! bookkeeping. All chunks are freed together when the arena is dropped.
//!
//! # Example
//!
//! ```
//! use amalgam_mem::arena::Arena;
//!
//! let arena = Arena::new(16 * 1024);
//! let a = arena.alloc_bytes(24, 8).unwrap();
//! let b = arena.alloc_bytes(100, 64).unwrap();
//!
//! assert_eq!(b.as_ptr() as usize % 64, 0);
//! assert_ne!(a, b);
//!
//! arena.release(24);
//! assert_eq!(arena.stats().live_allocations, 1);
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Base alignment of every chunk.
const CHUNK_ALIGNMENT: usize = 16;

/// Minimum chunk size (8 KiB).
pub const MIN_CHUNK_SIZE: usize = 8192;

/// Maximum size a chunk grows to on its own (1 MiB). Larger requests get a
/// dedicated chunk.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Snapshot of arena bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaStats {
    /// Bytes handed out so far, including released ranges.
    pub total_allocated: usize,
    /// Ranges handed out and not yet released.
    pub live_allocations: usize,
    /// Number of chunks owned by the arena.
    pub chunk_count: usize,
    /// Combined capacity of all chunks.
    pub total_capacity: usize,
    /// Bytes released by callers but still held by their chunks.
    pub reclaimable: usize,
}

/// One contiguous block with an atomic bump pointer.
struct Chunk {
    start: NonNull<u8>,
    ptr: AtomicPtr<u8>,
    end: usize,
    capacity: usize,
}

impl Chunk {
    fn new(size: usize) -> Option<Box<Self>> {
        let layout = Layout::from_size_align(size, CHUNK_ALIGNMENT).ok()?;

        // SAFETY: layout has a non-zero size (callers never go below MIN_CHUNK_SIZE).
        let start = NonNull::new(unsafe { alloc::alloc(layout) })?;

        Some(Box::new(Chunk {
            start,
            ptr: AtomicPtr::new(start.as_ptr()),
            end: start.addr().get() + size,
            capacity: size,
        }))
    }

    #[inline]
    fn try_alloc(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        loop {
            let current = self.ptr.load(Ordering::Acquire);
            let aligned = current.addr().checked_add(align - 1)? & !(align - 1);
            let new_addr = aligned.checked_add(size)?;

            if new_addr > self.end {
                return None;
            }

            // with_addr keeps the chunk's provenance on the new pointer.
            if self
                .ptr
                .compare_exchange_weak(
                    current,
                    current.with_addr(new_addr),
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return NonNull::new(current.with_addr(aligned));
            }
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: the same layout was accepted in Chunk::new.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity, CHUNK_ALIGNMENT);
            alloc::dealloc(self.start.as_ptr(), layout);
        }
    }
}

/// Thread-safe chunked bump arena.
pub struct Arena {
    chunks: Mutex<Vec<Box<Chunk>>>,
    current: AtomicPtr<Chunk>,
    chunk_size: usize,
    total_allocated: AtomicUsize,
    released: AtomicUsize,
    live: AtomicUsize,
}

// SAFETY: chunks are only mutated under the mutex, the bump pointers are
// atomic, and handed-out ranges are owned by their callers.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Creates an arena whose chunks start at `chunk_size` bytes, rounded up
    /// to a power of two and clamped to at least [`MIN_CHUNK_SIZE`].
    ///
    /// No memory is reserved until the first allocation.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Arena {
            chunks: Mutex::new(Vec::new()),
            current: AtomicPtr::new(std::ptr::null_mut()),
            chunk_size: chunk_size.max(MIN_CHUNK_SIZE).next_power_of_two(),
            total_allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Allocates `size` bytes aligned to `align`.
    ///
    /// Returns `None` if `align` is not a power of two or the system allocator
    /// refuses a new chunk.
    pub fn alloc_bytes(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !align.is_power_of_two() {
            return None;
        }
        let size = size.max(1);

        loop {
            let current = self.current.load(Ordering::Acquire);

            if !current.is_null() {
                // SAFETY: `current` points into a Box owned by `self.chunks`,
                // which only grows while the arena is alive.
                let chunk = unsafe { &*current };
                if let Some(ptr) = chunk.try_alloc(size, align) {
                    self.total_allocated.fetch_add(size, Ordering::Relaxed);
                    self.live.fetch_add(1, Ordering::Relaxed);
                    return Some(ptr);
                }
            }

            self.grow(size, align, current)?;
        }
    }

    /// Marks one range of `size` bytes as no longer in use.
    ///
    /// The bytes stay reserved until the arena is dropped.
    pub fn release(&self, size: usize) {
        self.released.fetch_add(size.max(1), Ordering::Relaxed);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns current bookkeeping.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let chunks = self.chunks.lock();
        ArenaStats {
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            live_allocations: self.live.load(Ordering::Relaxed),
            chunk_count: chunks.len(),
            total_capacity: chunks.iter().map(|c| c.capacity).sum(),
            reclaimable: self.released.load(Ordering::Relaxed),
        }
    }

    #[cold]
    fn grow(&self, size: usize, align: usize, seen: *mut Chunk) -> Option<()> {
        let mut chunks = self.chunks.lock();

        // Another thread may have installed a fresh chunk while we waited.
        if self.current.load(Ordering::Acquire) != seen {
            return Some(());
        }

        let wanted = size.checked_add(align)?;
        let grown = match chunks.last() {
            Some(last) => (last.capacity * 2).min(MAX_CHUNK_SIZE),
            None => self.chunk_size,
        };
        let chunk = Chunk::new(grown.max(wanted.next_power_of_two()))?;

        let ptr = (&*chunk as *const Chunk).cast_mut();
        chunks.push(chunk);
        self.current.store(ptr, Ordering::Release);
        Some(())
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("chunk_size", &self.chunk_size)
            .field("stats", &self.stats())
            .finish()
    }
}
