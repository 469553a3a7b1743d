use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice::ChunksExact;

use bytemuck::Pod;
use tracing::debug;

use crate::allocator::{default_allocator, Allocator};
use crate::error::{Result, SliceError};
use crate::fault;
use crate::view::{View, ViewMut};

/// Below this capacity `grow` doubles; at or above it, capacity grows by a quarter.
pub const GROWTH_THRESHOLD: usize = 256;

// =============================================================================
// Bounds and shape checks shared by slices and views
// =============================================================================

/// Valid indices are `0..length`. With `strict-bounds` a violation halts
/// through the fault reporter instead of returning `OutOfBounds`.
#[track_caller]
pub(crate) fn check_index(index: usize, length: usize) -> Result<()> {
    if index < length {
        return Ok(());
    }
    if cfg!(feature = "strict-bounds") {
        fault::report(
            "Slice",
            "index < length",
            format_args!(
                "tried to perform out-of-bound access at index {index} of slice length {length}"
            ),
        );
    }
    Err(SliceError::OutOfBounds { index, length })
}

pub(crate) fn check_item(item: &[u8], element_size: usize) -> Result<()> {
    if item.len() != element_size {
        return Err(SliceError::invalid(format!(
            "item is {} bytes but the element size is {}",
            item.len(),
            element_size
        )));
    }
    Ok(())
}

pub(crate) fn check_value_size<T>(element_size: usize) -> Result<()> {
    if mem::size_of::<T>() != element_size {
        return Err(SliceError::invalid(format!(
            "{} is {} bytes but the element size is {}",
            std::any::type_name::<T>(),
            mem::size_of::<T>(),
            element_size
        )));
    }
    Ok(())
}

pub(crate) fn check_window(capacity: usize, start: usize, length: usize) -> Result<()> {
    if start >= capacity {
        return Err(SliceError::invalid(format!(
            "window start {start} must be below the source capacity {capacity}"
        )));
    }
    if length > capacity - start {
        return Err(SliceError::invalid(format!(
            "window of length {length} at {start} does not fit in capacity {capacity}"
        )));
    }
    Ok(())
}

/// Length after adding `additional`, provided it stays within `capacity`.
pub(crate) fn checked_len(length: usize, additional: usize, capacity: usize) -> Result<usize> {
    match length.checked_add(additional) {
        Some(requested) if requested <= capacity => Ok(requested),
        Some(requested) => Err(SliceError::overflow(requested, capacity)),
        None => Err(SliceError::overflow(usize::MAX, capacity)),
    }
}

fn validate_shape(length: usize, capacity: usize, element_size: usize) -> Result<()> {
    if capacity == 0 {
        return Err(SliceError::invalid("capacity cannot be zero"));
    }
    if element_size == 0 {
        return Err(SliceError::invalid("element size cannot be zero"));
    }
    if length > capacity {
        return Err(SliceError::invalid(format!(
            "length {length} cannot exceed capacity {capacity}"
        )));
    }
    Ok(())
}

fn byte_size(capacity: usize, element_size: usize) -> Result<usize> {
    let limit = isize::MAX as usize;
    match capacity.checked_mul(element_size) {
        Some(bytes) if bytes <= limit => Ok(bytes),
        _ => Err(SliceError::overflow(capacity, limit / element_size)),
    }
}

// =============================================================================
// Element access traits: the seam shared by Slice, View and ViewMut
// =============================================================================

/// Read access to a run of fixed-size elements.
pub trait Elements {
    fn element_size(&self) -> usize;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    /// Bytes of the `len()` valid elements.
    fn as_bytes(&self) -> &[u8];

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    fn usable_capacity(&self) -> usize {
        self.capacity() - self.len()
    }

    #[track_caller]
    fn get(&self, index: usize) -> Result<&[u8]> {
        check_index(index, self.len())?;
        let size = self.element_size();
        Ok(&self.as_bytes()[index * size..(index + 1) * size])
    }

    #[track_caller]
    fn get_last(&self) -> Result<&[u8]> {
        self.get(self.len().saturating_sub(1))
    }

    /// Reads element `index` as a `T` whose size must equal the element size.
    #[track_caller]
    fn get_value<T: Pod>(&self, index: usize) -> Result<T> {
        check_value_size::<T>(self.element_size())?;
        Ok(bytemuck::pod_read_unaligned(self.get(index)?))
    }

    fn iter(&self) -> ChunksExact<'_, u8> {
        self.as_bytes().chunks_exact(self.element_size())
    }

    /// Calls `callback(element, index)` in index order until it returns false.
    fn range<F>(&self, mut callback: F)
    where
        F: FnMut(&[u8], usize) -> bool,
    {
        for (index, element) in self.iter().enumerate() {
            if !callback(element, index) {
                break;
            }
        }
    }

    fn to_vec<T: Pod>(&self) -> Result<Vec<T>> {
        check_value_size::<T>(self.element_size())?;
        Ok(self.iter().map(bytemuck::pod_read_unaligned).collect())
    }
}

/// Write access to a run of fixed-size elements whose storage comes from an
/// allocator living for `'a`.
pub trait ElementsMut<'a>: Elements {
    fn as_bytes_mut(&mut self) -> &mut [u8];

    fn allocator(&self) -> &'a dyn Allocator;

    #[track_caller]
    fn set(&mut self, index: usize, item: &[u8]) -> Result<()> {
        let size = self.element_size();
        check_item(item, size)?;
        check_index(index, self.len())?;
        self.as_bytes_mut()[index * size..(index + 1) * size].copy_from_slice(item);
        Ok(())
    }

    #[track_caller]
    fn set_value<T: Pod>(&mut self, index: usize, value: T) -> Result<()> {
        check_value_size::<T>(self.element_size())?;
        self.set(index, bytemuck::bytes_of(&value))
    }

    /// Copies `min(self.len(), src.len())` elements from the start of `src` to
    /// the start of `self` and returns that count. Lengths are unchanged.
    fn copy_from<S>(&mut self, src: &S) -> Result<usize>
    where
        S: Elements + ?Sized,
    {
        if self.element_size() != src.element_size() {
            return Err(SliceError::invalid(format!(
                "cannot copy elements of size {} into elements of size {}",
                src.element_size(),
                self.element_size()
            )));
        }

        let count = self.len().min(src.len());
        let bytes = count * self.element_size();
        self.as_bytes_mut()[..bytes].copy_from_slice(&src.as_bytes()[..bytes]);
        Ok(count)
    }
}

// =============================================================================
// Slice: owning growable buffer
// =============================================================================

/// A growable buffer of fixed-size elements that owns its storage.
///
/// The backing buffer always spans `capacity * element_size` initialised bytes:
/// it is zeroed on creation and the tail is zeroed on growth. Only the first
/// `len()` elements are considered valid.
pub struct Slice<'a> {
    buf: NonNull<u8>,
    capacity: usize,
    length: usize,
    element_size: usize,
    allocator: &'a dyn Allocator,
}

impl Slice<'static> {
    pub fn new(length: usize, capacity: usize, element_size: usize) -> Result<Self> {
        Slice::new_in(length, capacity, element_size, default_allocator())
    }

    pub fn from_bytes(
        source: &[u8],
        source_count: usize,
        length: usize,
        capacity: usize,
        element_size: usize,
    ) -> Result<Self> {
        Slice::from_bytes_in(
            source,
            source_count,
            length,
            capacity,
            element_size,
            default_allocator(),
        )
    }

    /// A full slice (`length == capacity == values.len()`) holding `values`.
    pub fn from_values<T: Pod>(values: &[T]) -> Result<Self> {
        Slice::from_values_in(values, default_allocator())
    }
}

impl<'a> Slice<'a> {
    pub fn new_in(
        length: usize,
        capacity: usize,
        element_size: usize,
        allocator: &'a dyn Allocator,
    ) -> Result<Self> {
        validate_shape(length, capacity, element_size)?;
        byte_size(capacity, element_size)?;

        let buf = allocator.allocate_zeroed(capacity, element_size)?;
        Ok(Slice {
            buf,
            capacity,
            length,
            element_size,
            allocator,
        })
    }

    /// Creates a slice and copies the first `source_count` elements of `source`
    /// into it.
    pub fn from_bytes_in(
        source: &[u8],
        source_count: usize,
        length: usize,
        capacity: usize,
        element_size: usize,
        allocator: &'a dyn Allocator,
    ) -> Result<Self> {
        validate_shape(length, capacity, element_size)?;
        if capacity < source_count {
            return Err(SliceError::invalid(format!(
                "cannot copy {source_count} elements into capacity {capacity}"
            )));
        }
        // source_count <= capacity, so the copy size fits once the buffer does.
        byte_size(capacity, element_size)?;
        let source_bytes = source_count * element_size;
        if source.len() < source_bytes {
            return Err(SliceError::invalid(format!(
                "source holds {} bytes, {} elements of size {} need {}",
                source.len(),
                source_count,
                element_size,
                source_bytes
            )));
        }

        let mut slice = Slice::new_in(length, capacity, element_size, allocator)?;
        slice.raw_bytes_mut()[..source_bytes].copy_from_slice(&source[..source_bytes]);
        Ok(slice)
    }

    pub fn from_values_in<T: Pod>(values: &[T], allocator: &'a dyn Allocator) -> Result<Self> {
        Slice::from_bytes_in(
            bytemuck::cast_slice(values),
            values.len(),
            values.len(),
            values.len(),
            mem::size_of::<T>(),
            allocator,
        )
    }

    // -------------------------------------------------------------------------
    // Views and copies
    // -------------------------------------------------------------------------

    /// Shares this slice's buffer starting at element `start`.
    pub fn view(&self, start: usize, length: usize) -> Result<View<'_, 'a>> {
        check_window(self.capacity, start, length)?;
        Ok(View::new(self, start, length))
    }

    /// Like [`view`](Slice::view), with write access through the view.
    pub fn view_mut(&mut self, start: usize, length: usize) -> Result<ViewMut<'_, 'a>> {
        check_window(self.capacity, start, length)?;
        Ok(ViewMut::new(self, start, length))
    }

    /// Deep-copies `length` elements starting at `start` into a new slice of
    /// the given capacity, using the same allocator.
    pub fn copy_view(&self, start: usize, length: usize, capacity: usize) -> Result<Slice<'a>> {
        check_window(self.capacity, start, length)?;
        let size = self.element_size;
        let window = &self.raw_bytes()[start * size..(start + length) * size];
        Slice::from_bytes_in(window, length, length, capacity, size, self.allocator)
    }

    // -------------------------------------------------------------------------
    // Length management
    // -------------------------------------------------------------------------

    /// Sets the length to zero. Capacity and contents are untouched.
    pub fn reset(&mut self) {
        self.length = 0;
    }

    pub fn set_len(&mut self, length: usize) -> Result<()> {
        if length > self.capacity {
            return Err(SliceError::overflow(length, self.capacity));
        }
        self.length = length;
        Ok(())
    }

    pub fn increment_len(&mut self, by: usize) -> Result<()> {
        self.length = checked_len(self.length, by, self.capacity)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Growth
    // -------------------------------------------------------------------------

    /// Capacity that the next [`grow`](Slice::grow) will produce.
    pub fn next_capacity(&self) -> usize {
        if self.capacity < GROWTH_THRESHOLD {
            self.capacity * 2
        } else {
            self.capacity.saturating_add(self.capacity / 4)
        }
    }

    /// Doubles small buffers and grows large ones by 25%. On failure the slice
    /// keeps its current buffer.
    pub fn grow(&mut self) -> Result<()> {
        self.reallocate(self.next_capacity())
    }

    /// Reallocates to exactly `target` elements; no-op when `target` is not
    /// larger than the current capacity.
    pub fn grow_to_capacity(&mut self, target: usize) -> Result<()> {
        if target <= self.capacity {
            return Ok(());
        }
        self.reallocate(target)
    }

    fn reallocate(&mut self, new_capacity: usize) -> Result<()> {
        let old_bytes = self.capacity * self.element_size;
        let new_bytes = byte_size(new_capacity, self.element_size)?;

        // SAFETY: buf was obtained from self.allocator and spans old_bytes
        let buf = unsafe { self.allocator.reallocate(self.buf, old_bytes, new_bytes) }?;
        if new_bytes > old_bytes {
            // SAFETY: the block now spans new_bytes; the tail starts at old_bytes
            unsafe { ptr::write_bytes(buf.as_ptr().add(old_bytes), 0, new_bytes - old_bytes) };
        }

        debug!(
            old_capacity = self.capacity,
            new_capacity,
            element_size = self.element_size,
            moved = (buf != self.buf),
            "slice buffer resized"
        );
        self.buf = buf;
        self.capacity = new_capacity;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Appending
    // -------------------------------------------------------------------------

    /// Appends one element, growing first when the slice is full.
    pub fn append(&mut self, item: &[u8]) -> Result<()> {
        check_item(item, self.element_size)?;
        if self.length == self.capacity {
            self.grow()?;
        }

        let size = self.element_size;
        let at = self.length * size;
        self.raw_bytes_mut()[at..at + size].copy_from_slice(item);
        self.length += 1;
        Ok(())
    }

    /// Appends `n` packed elements, growing at most once to
    /// `max(next_capacity(), len() + n)`.
    pub fn append_n(&mut self, items: &[u8], n: usize) -> Result<()> {
        let size = self.element_size;
        match n.checked_mul(size) {
            Some(bytes) if bytes == items.len() => {}
            _ => {
                return Err(SliceError::invalid(format!(
                    "{} bytes do not hold {} elements of size {}",
                    items.len(),
                    n,
                    size
                )))
            }
        }
        if n == 0 {
            return Ok(());
        }

        let required = checked_len(self.length, n, usize::MAX)?;
        if required > self.capacity {
            self.grow_to_capacity(self.next_capacity().max(required))?;
        }

        let at = self.length * size;
        self.raw_bytes_mut()[at..at + items.len()].copy_from_slice(items);
        self.length = required;
        Ok(())
    }

    pub fn append_value<T: Pod>(&mut self, value: T) -> Result<()> {
        check_value_size::<T>(self.element_size)?;
        self.append(bytemuck::bytes_of(&value))
    }

    // -------------------------------------------------------------------------
    // Raw storage
    // -------------------------------------------------------------------------

    /// The whole backing buffer, `capacity * element_size` bytes.
    pub(crate) fn raw_bytes(&self) -> &[u8] {
        // SAFETY: buf spans capacity * element_size initialised bytes owned by self
        unsafe {
            std::slice::from_raw_parts(self.buf.as_ptr(), self.capacity * self.element_size)
        }
    }

    pub(crate) fn raw_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as raw_bytes, and &mut self guarantees exclusive access
        unsafe {
            std::slice::from_raw_parts_mut(self.buf.as_ptr(), self.capacity * self.element_size)
        }
    }
}

impl Elements for Slice<'_> {
    fn element_size(&self) -> usize {
        self.element_size
    }

    fn len(&self) -> usize {
        self.length
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn as_bytes(&self) -> &[u8] {
        &self.raw_bytes()[..self.length * self.element_size]
    }
}

impl<'a> ElementsMut<'a> for Slice<'a> {
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let end = self.length * self.element_size;
        &mut self.raw_bytes_mut()[..end]
    }

    fn allocator(&self) -> &'a dyn Allocator {
        self.allocator
    }
}

impl Drop for Slice<'_> {
    fn drop(&mut self) {
        // SAFETY: the buffer came from self.allocator with this size and is released once
        unsafe {
            self.allocator
                .release(self.buf, self.capacity * self.element_size)
        }
    }
}

impl fmt::Debug for Slice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("length", &self.length)
            .field("capacity", &self.capacity)
            .field("element_size", &self.element_size)
            .finish()
    }
}
