//! Error types for bounded buffers and their configuration.

use thiserror::Error;

use super::MAX_RATE;

/// A buffer using [`OverflowPolicy::Fail`](super::OverflowPolicy::Fail)
/// received an element while full.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("buffer overflow: capacity {capacity} exceeded")]
pub struct OverflowError {
    /// Capacity of the buffer that overflowed.
    pub capacity: usize,
}

/// Errors returned when offering an element to a buffer.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The buffer overflowed under the fail policy; it accepts nothing more.
    #[error(transparent)]
    Overflow(#[from] OverflowError),
    /// The consumer dropped its receiver.
    #[error("buffer receiver dropped")]
    Closed,
}

/// Errors returned when creating buffers.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferConfigError {
    /// Buffers must hold at least one element.
    #[error("invalid capacity {0}; must be >= 1")]
    InvalidCapacity(usize),
    /// The provided rate was zero or exceeded [`MAX_RATE`].
    #[error("invalid rate {0}; must be between 1 and {max}", max = MAX_RATE)]
    InvalidRate(usize),
}
