//! Growable contiguous buffers of fixed-size elements over a pluggable
//! allocator, with views into them and an in-place hybrid quicksort.
//!
//! ```
//! use growslice::{Elements, Slice, SortEngine};
//!
//! let mut slice = Slice::new(0, 4, 4)?;
//! for value in [5i32, 3, 9, 1, 7] {
//!     slice.append_value(value)?;
//! }
//! assert_eq!(slice.capacity(), 8);
//!
//! SortEngine::new().sort_values_by(&mut slice, i32::cmp)?;
//! assert_eq!(slice.to_vec::<i32>()?, vec![1, 3, 5, 7, 9]);
//! # Ok::<(), growslice::SliceError>(())
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod fault;
pub mod slice;
pub mod sort;
pub mod stack;
pub mod view;

pub use allocator::{default_allocator, AllocError, Allocator, Arena, Heap, ALIGN};
pub use config::{ConfigError, SortConfig};
pub use error::{Result, SliceError};
pub use slice::{Elements, ElementsMut, Slice, GROWTH_THRESHOLD};
pub use sort::{bytes_ascending, bytes_descending, SortEngine, SortStats};
pub use stack::Stack;
pub use view::{View, ViewMut};
