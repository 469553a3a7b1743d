use bytemuck::Pod;

use crate::allocator::{default_allocator, Allocator};
use crate::error::Result;
use crate::slice::{check_value_size, Elements, Slice};

const DEFAULT_CAPACITY: usize = 8;

/// LIFO stack of fixed-size elements on top of a [`Slice`].
///
/// Push appends, pop shortens the length by one. Popped bytes stay in the
/// buffer until overwritten, so `pop` can hand them out by reference.
#[derive(Debug)]
pub struct Stack<'a> {
    items: Slice<'a>,
}

impl Stack<'static> {
    pub fn new(element_size: usize) -> Result<Self> {
        Stack::with_capacity(DEFAULT_CAPACITY, element_size)
    }

    pub fn with_capacity(capacity: usize, element_size: usize) -> Result<Self> {
        Stack::new_in(capacity, element_size, default_allocator())
    }
}

impl<'a> Stack<'a> {
    pub fn new_in(
        capacity: usize,
        element_size: usize,
        allocator: &'a dyn Allocator,
    ) -> Result<Self> {
        Ok(Stack {
            items: Slice::new_in(0, capacity, element_size, allocator)?,
        })
    }

    pub fn push(&mut self, item: &[u8]) -> Result<()> {
        self.items.append(item)
    }

    pub fn push_value<T: Pod>(&mut self, value: T) -> Result<()> {
        self.items.append_value(value)
    }

    pub fn pop(&mut self) -> Option<&[u8]> {
        let top = self.items.len().checked_sub(1)?;
        self.items.set_len(top).ok()?;

        let size = self.items.element_size();
        Some(&self.items.raw_bytes()[top * size..(top + 1) * size])
    }

    /// `Ok(None)` when empty; an error when `T` does not match the element size.
    pub fn pop_value<T: Pod>(&mut self) -> Result<Option<T>> {
        check_value_size::<T>(self.items.element_size())?;
        Ok(self.pop().map(bytemuck::pod_read_unaligned))
    }

    pub fn peek(&self) -> Option<&[u8]> {
        if self.items.is_empty() {
            return None;
        }
        self.items.get_last().ok()
    }

    pub fn peek_value<T: Pod>(&self) -> Result<Option<T>> {
        check_value_size::<T>(self.items.element_size())?;
        Ok(self.peek().map(bytemuck::pod_read_unaligned))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Elements from the bottom of the stack to the top.
    pub fn as_slice(&self) -> &Slice<'a> {
        &self.items
    }

    pub fn into_slice(self) -> Slice<'a> {
        self.items
    }
}
