//! Blocking Byte Ring Buffer
//!
//! Fixed-capacity circular byte store over caller-supplied storage with
//! bounded-buffer send/receive semantics and zero-copy reads.

mod buffer;
mod cursor;
mod error;
mod signal;

pub use buffer::{ReadGrant, RingBuffer};
pub use cursor::RingInfo;
pub use error::RingBufferError;
pub use signal::Timeout;
