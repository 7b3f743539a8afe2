//! Record Store Error Types

use ring_buffer::RingBufferError;
use thiserror::Error;

/// Errors returned by the retention record store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Empty data, unknown tag or unusable retained memory
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Operation not allowed in the current store state
    #[error("Store is not in a valid state for this operation")]
    InvalidState,

    /// Record can never fit in its log
    #[error("Record of {len} bytes exceeds log capacity of {capacity} bytes")]
    Oversize { len: usize, capacity: usize },

    /// Non-critical record dropped because the log was busy
    #[error("Record dropped: log is locked by another task")]
    Dropped,

    /// Underlying ring buffer failure
    #[error("Ring buffer error: {0}")]
    Ring(#[from] RingBufferError),
}

/// Errors in the store configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Critical log needs at least one byte
    #[error("Critical log size must be non-zero")]
    EmptyCriticalLog,

    /// Critical log takes all of the retained area
    #[error("Critical size {critical} leaves no room in total size {total}")]
    CriticalExceedsTotal { critical: usize, total: usize },

    /// Non-critical log cannot hold a single record
    #[error("Non-critical log of {size} bytes cannot hold a single record")]
    NonCriticalTooSmall { size: usize },
}
