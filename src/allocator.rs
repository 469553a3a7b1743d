// =============================================================================
// Allocator capability: the four operations a Slice needs from memory
// =============================================================================

use std::alloc::{self as std_alloc, Layout};
use std::cell::Cell;
use std::fmt;
use std::ptr::{self, NonNull};

use thiserror::Error;
use tracing::{trace, warn};

/// Alignment of every block handed out by the allocators in this module.
/// Matches `max_align_t` on mainstream 64-bit targets.
pub const ALIGN: usize = 16;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("allocator could not provide {size} bytes")]
pub struct AllocError {
    pub size: usize,
}

impl AllocError {
    pub fn new(size: usize) -> Self {
        AllocError { size }
    }
}

/// Memory provider used by [`Slice`](crate::Slice) for every allocation,
/// growth and release of an owned buffer.
///
/// Blocks are aligned to [`ALIGN`]. A failed `reallocate` leaves the original
/// block valid and owned by the caller.
pub trait Allocator: fmt::Debug {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError>;

    fn allocate_zeroed(&self, count: usize, elem_size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Resizes a block, preserving `min(old_size, new_size)` bytes.
    ///
    /// # Safety
    /// `ptr` must come from this allocator and currently span `old_size` bytes.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError>;

    /// # Safety
    /// `ptr` must come from this allocator, span `size` bytes, and not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

fn zeroed_size(count: usize, elem_size: usize) -> Result<usize, AllocError> {
    count
        .checked_mul(elem_size)
        .ok_or(AllocError::new(usize::MAX))
}

fn refused(size: usize, allocator: &str) -> AllocError {
    warn!(size, allocator, "allocation refused");
    AllocError::new(size)
}

// =============================================================================
// Heap: the process-wide default
// =============================================================================

/// The standard process heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

static HEAP: Heap = Heap;

/// The allocator slices use when none is injected.
pub fn default_allocator() -> &'static dyn Allocator {
    &HEAP
}

impl Heap {
    fn layout(size: usize) -> Result<Layout, AllocError> {
        if size == 0 {
            return Err(AllocError::new(0));
        }
        Layout::from_size_align(size, ALIGN).map_err(|_| AllocError::new(size))
    }
}

impl Allocator for Heap {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { std_alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| refused(size, "heap"))
    }

    fn allocate_zeroed(&self, count: usize, elem_size: usize) -> Result<NonNull<u8>, AllocError> {
        let size = zeroed_size(count, elem_size)?;
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size
        let ptr = unsafe { std_alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| refused(size, "heap"))
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let old_layout = Self::layout(old_size)?;
        // Validates new_size against isize::MAX once rounded to ALIGN.
        Self::layout(new_size)?;
        // SAFETY: the caller guarantees ptr was allocated here with old_layout
        let new_ptr = unsafe { std_alloc::realloc(ptr.as_ptr(), old_layout, new_size) };
        NonNull::new(new_ptr).ok_or_else(|| refused(new_size, "heap"))
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(layout) = Self::layout(size) {
            // SAFETY: the caller guarantees ptr was allocated here with this size
            unsafe { std_alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

// =============================================================================
// Arena: fixed-capacity bump allocator
// =============================================================================

/// A bump allocator over one fixed region.
///
/// The topmost block (the one ending at the bump offset) can grow, shrink and
/// be released in place. Releasing it rolls the offset back, which makes the
/// block below it topmost, so blocks released in LIFO order are all
/// reclaimed. Releasing any other block only drops the live count; its bytes
/// come back on [`reset`](Arena::reset).
pub struct Arena {
    base: NonNull<u8>,
    capacity: usize,
    offset: Cell<usize>,
    live: Cell<usize>,
}

impl Arena {
    pub fn new(capacity: usize) -> Result<Self, AllocError> {
        let capacity = align_up(capacity).ok_or(AllocError::new(capacity))?;
        let layout = Heap::layout(capacity)?;
        // SAFETY: layout has a non-zero size
        let base = NonNull::new(unsafe { std_alloc::alloc(layout) })
            .ok_or_else(|| refused(capacity, "arena"))?;

        Ok(Arena {
            base,
            capacity,
            offset: Cell::new(0),
            live: Cell::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.offset.get()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    /// Blocks handed out and not yet released.
    pub fn live_blocks(&self) -> usize {
        self.live.get()
    }

    /// Reclaims the whole region. Requires that no slice still borrows the arena.
    pub fn reset(&mut self) {
        self.offset.set(0);
        self.live.set(0);
    }

    fn start_of(&self, ptr: NonNull<u8>) -> usize {
        ptr.as_ptr() as usize - self.base.as_ptr() as usize
    }

    /// No block can start between the end of the topmost block and the
    /// aligned offset, so comparing aligned ends identifies it.
    fn is_topmost(&self, start: usize, size: usize) -> bool {
        let end = start.checked_add(size).and_then(align_up);
        end.is_some() && end == align_up(self.offset.get())
    }

    fn bump(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::new(0));
        }
        let start = align_up(self.offset.get()).ok_or(AllocError::new(size))?;
        let end = match start.checked_add(size) {
            Some(end) if end <= self.capacity => end,
            _ => return Err(refused(size, "arena")),
        };

        trace!(start, size, capacity = self.capacity, "arena bump");
        self.offset.set(end);
        self.live.set(self.live.get() + 1);
        // SAFETY: start + size <= capacity, so the block lies inside the region
        Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
    }
}

fn align_up(n: usize) -> Option<usize> {
    n.checked_add(ALIGN - 1).map(|n| n & !(ALIGN - 1))
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("used", &self.offset.get())
            .field("live_blocks", &self.live.get())
            .finish()
    }
}

impl Allocator for Arena {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.bump(size)
    }

    fn allocate_zeroed(&self, count: usize, elem_size: usize) -> Result<NonNull<u8>, AllocError> {
        let size = zeroed_size(count, elem_size)?;
        let ptr = self.bump(size)?;
        // SAFETY: the block was just carved out of the region with this size
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if new_size == 0 {
            return Err(AllocError::new(0));
        }

        let start = self.start_of(ptr);
        if self.is_topmost(start, old_size) {
            return match start.checked_add(new_size) {
                Some(end) if end <= self.capacity => {
                    self.offset.set(end);
                    Ok(ptr)
                }
                _ => Err(refused(new_size, "arena")),
            };
        }

        let new_ptr = self.bump(new_size)?;
        // SAFETY: both blocks live in the region and never overlap
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
        }
        // The old block is abandoned, so it no longer counts as live.
        self.live.set(self.live.get() - 1);
        Ok(new_ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        let start = self.start_of(ptr);
        self.live.set(self.live.get().saturating_sub(1));
        if self.is_topmost(start, size) {
            trace!(start, size, "arena rollback");
            self.offset.set(start);
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if let Ok(layout) = Heap::layout(self.capacity) {
            // SAFETY: base was allocated in Arena::new with this layout
            unsafe { std_alloc::dealloc(self.base.as_ptr(), layout) }
        }
    }
}
