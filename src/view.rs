//! Views over a range of an owning [`Slice`].
//!
//! A view stores only its offset and length. Every access goes through the
//! owner's current buffer, and the borrow on the owner keeps the buffer from
//! being grown or dropped while the view exists.

use std::fmt;

use bytemuck::Pod;

use crate::allocator::Allocator;
use crate::error::{Result, SliceError};
use crate::slice::{check_value_size, checked_len, Elements, ElementsMut, Slice};

// =============================================================================
// View: shared window
// =============================================================================

pub struct View<'s, 'a> {
    owner: &'s Slice<'a>,
    offset: usize,
    length: usize,
}

impl<'s, 'a> View<'s, 'a> {
    pub(crate) fn new(owner: &'s Slice<'a>, offset: usize, length: usize) -> Self {
        View {
            owner,
            offset,
            length,
        }
    }

    /// Index of the first viewed element in the owner.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Elements for View<'_, '_> {
    fn element_size(&self) -> usize {
        self.owner.element_size()
    }

    fn len(&self) -> usize {
        self.length
    }

    fn capacity(&self) -> usize {
        self.owner.capacity() - self.offset
    }

    fn as_bytes(&self) -> &[u8] {
        let size = self.element_size();
        &self.owner.raw_bytes()[self.offset * size..(self.offset + self.length) * size]
    }
}

impl fmt::Debug for View<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("capacity", &self.capacity())
            .finish()
    }
}

// =============================================================================
// ViewMut: exclusive window
// =============================================================================

/// A writable window into a [`Slice`].
///
/// Its capacity runs to the end of the owner's buffer. A view never allocates,
/// so appending past that capacity fails with `Overflow`.
pub struct ViewMut<'s, 'a> {
    owner: &'s mut Slice<'a>,
    offset: usize,
    length: usize,
}

impl<'s, 'a> ViewMut<'s, 'a> {
    pub(crate) fn new(owner: &'s mut Slice<'a>, offset: usize, length: usize) -> Self {
        ViewMut {
            owner,
            offset,
            length,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reset(&mut self) {
        self.length = 0;
    }

    pub fn set_len(&mut self, length: usize) -> Result<()> {
        if length > self.capacity() {
            return Err(SliceError::overflow(length, self.capacity()));
        }
        self.length = length;
        Ok(())
    }

    pub fn increment_len(&mut self, by: usize) -> Result<()> {
        self.length = checked_len(self.length, by, self.capacity())?;
        Ok(())
    }

    pub fn append(&mut self, item: &[u8]) -> Result<()> {
        self.append_n(item, 1)
    }

    pub fn append_n(&mut self, items: &[u8], n: usize) -> Result<()> {
        let size = self.element_size();
        if n.checked_mul(size) != Some(items.len()) {
            return Err(SliceError::invalid(format!(
                "{} bytes do not hold {} elements of size {}",
                items.len(),
                n,
                size
            )));
        }

        let required = checked_len(self.length, n, self.capacity())?;
        let at = (self.offset + self.length) * size;
        self.owner.raw_bytes_mut()[at..at + items.len()].copy_from_slice(items);
        self.length = required;
        Ok(())
    }

    pub fn append_value<T: Pod>(&mut self, value: T) -> Result<()> {
        check_value_size::<T>(self.element_size())?;
        self.append(bytemuck::bytes_of(&value))
    }

    /// Reborrows as a shared view over the same window.
    pub fn as_view(&self) -> View<'_, 'a> {
        View::new(&*self.owner, self.offset, self.length)
    }
}

impl Elements for ViewMut<'_, '_> {
    fn element_size(&self) -> usize {
        self.owner.element_size()
    }

    fn len(&self) -> usize {
        self.length
    }

    fn capacity(&self) -> usize {
        self.owner.capacity() - self.offset
    }

    fn as_bytes(&self) -> &[u8] {
        let size = self.element_size();
        &self.owner.raw_bytes()[self.offset * size..(self.offset + self.length) * size]
    }
}

impl<'a> ElementsMut<'a> for ViewMut<'_, 'a> {
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let size = self.element_size();
        let (start, end) = (self.offset * size, (self.offset + self.length) * size);
        &mut self.owner.raw_bytes_mut()[start..end]
    }

    fn allocator(&self) -> &'a dyn Allocator {
        self.owner.allocator()
    }
}

impl fmt::Debug for ViewMut<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewMut")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints<E: Elements + ?Sized>(elements: &E) -> Vec<i32> {
        elements.to_vec::<i32>().unwrap()
    }

    #[test]
    fn test_view_aliases_source_elements() {
        let source = Slice::from_values(&[1i32, 2, 3, 4, 5, 6]).unwrap();
        let view = source.view(2, 3).unwrap();

        assert_eq!(view.len(), 3);
        assert_eq!(view.capacity(), 4);
        assert_eq!(view.offset(), 2);
        for i in 0..view.len() {
            assert_eq!(view.get(i).unwrap(), source.get(2 + i).unwrap());
        }
    }

    #[test]
    fn test_view_bounds() {
        let source = Slice::new(2, 8, 4).unwrap();
        assert!(source.view(8, 0).is_err());
        assert!(source.view(5, 4).is_err());

        // A view may cover initialised bytes past the source length.
        let view = source.view(1, 7).unwrap();
        assert_eq!(view.len(), 7);
        assert!(view.is_full());
    }

    #[test]
    fn test_writes_through_view_reach_source() {
        let mut source = Slice::from_values(&[10i32, 20, 30, 40]).unwrap();
        {
            let mut view = source.view_mut(1, 2).unwrap();
            view.set_value(0, -20i32).unwrap();
            view.set_value(1, -30i32).unwrap();
            assert_eq!(ints(&view), vec![-20, -30]);
        }
        assert_eq!(ints(&source), vec![10, -20, -30, 40]);

        source.set_value(3, 99i32).unwrap();
        let view = source.view(3, 1).unwrap();
        assert_eq!(view.get_value::<i32>(0).unwrap(), 99);
    }

    #[test]
    fn test_view_mut_append_fills_owner_buffer_without_growing() {
        let mut source = Slice::new(0, 4, 4).unwrap();
        {
            let mut view = source.view_mut(2, 0).unwrap();
            view.append_value(7i32).unwrap();
            view.append_n(bytemuck::cast_slice(&[8i32]), 1).unwrap();
            assert!(view.is_full());
            assert!(matches!(
                view.append_value(9i32),
                Err(SliceError::Overflow { requested: 3, capacity: 2 })
            ));
            assert!(view.append(&[1]).is_err());
        }
        assert_eq!(source.capacity(), 4);
        source.set_len(4).unwrap();
        assert_eq!(ints(&source), vec![0, 0, 7, 8]);
    }

    #[test]
    fn test_view_mut_length_management() {
        let mut source = Slice::new(0, 10, 2).unwrap();
        let mut view = source.view_mut(4, 2).unwrap();
        assert_eq!(view.usable_capacity(), 4);

        assert!(view.set_len(7).is_err());
        view.set_len(6).unwrap();
        assert!(view.increment_len(1).is_err());
        assert_eq!(view.len(), 6);

        view.reset();
        assert!(view.is_empty());
        view.increment_len(3).unwrap();
        assert_eq!(view.len(), 3);
    }

    #[cfg(not(feature = "strict-bounds"))]
    #[test]
    fn test_view_get_respects_view_length() {
        let source = Slice::from_values(&[1i32, 2, 3, 4]).unwrap();
        let view = source.view(1, 2).unwrap();
        assert_eq!(view.get(2), Err(SliceError::OutOfBounds { index: 2, length: 2 }));
        assert_eq!(view.get_last().unwrap(), &3i32.to_ne_bytes());
    }

    #[test]
    fn test_copy_between_views_and_slices() {
        let mut source = Slice::from_values(&[1i32, 2, 3, 4, 5, 6]).unwrap();
        let other = Slice::from_values(&[70i32, 80, 90]).unwrap();

        let mut view = source.view_mut(3, 3).unwrap();
        assert_eq!(view.copy_from(&other.view(1, 2).unwrap()).unwrap(), 2);
        assert_eq!(ints(&view.as_view()), vec![80, 90, 6]);
        assert_eq!(ints(&source), vec![1, 2, 3, 80, 90, 6]);
    }

    #[test]
    fn test_view_shares_owner_allocator() {
        let arena = crate::allocator::Arena::new(64).unwrap();
        let mut source = Slice::new_in(4, 4, 4, &arena).unwrap();
        let view = source.view_mut(0, 4).unwrap();
        assert_eq!(format!("{:?}", view.allocator()), format!("{:?}", arena));
        assert_eq!(
            format!("{:?}", view),
            "ViewMut { offset: 0, length: 4, capacity: 4 }"
        );
    }
}
