use thiserror::Error;

use crate::allocator::AllocError;

pub type Result<T> = std::result::Result<T, SliceError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SliceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("allocation failed: {0}")]
    AllocationFailure(#[from] AllocError),

    #[error("index {index} is out of bounds for slice of length {length}")]
    OutOfBounds { index: usize, length: usize },

    #[error("requested length {requested} exceeds capacity {capacity}")]
    Overflow { requested: usize, capacity: usize },
}

impl SliceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn overflow(requested: usize, capacity: usize) -> Self {
        Self::Overflow {
            requested,
            capacity,
        }
    }

    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::AllocationFailure(_))
    }
}
