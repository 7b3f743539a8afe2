//! Ring Buffer Error Types

use thiserror::Error;

/// Errors returned by ring buffer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingBufferError {
    /// Storage slice is empty
    #[error("Ring buffer storage must not be empty")]
    ZeroCapacity,

    /// Item can never fit, whatever the buffer state
    #[error("Item of {len} bytes exceeds ring buffer capacity of {capacity} bytes")]
    Oversize { len: usize, capacity: usize },

    /// A read grant is still outstanding
    #[error("Operation not allowed while a read is outstanding")]
    ReadOutstanding,

    /// No room became available before the timeout
    #[error("Timed out waiting for free space")]
    Timeout,
}
