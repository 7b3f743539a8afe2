//! Retention Record Store
//!
//! Crash-survivable diagnostic store built on two ring buffers kept in
//! reset-retained memory:
//!
//! - the critical log takes raw bytes and always admits a write that fits
//!   its capacity, evicting the oldest bytes first
//! - the non-critical log takes tagged records, never blocks, and evicts
//!   whole records oldest first
//!
//! At start-up [`RtcStore::init`] asks a [`ResetSource`] why the chip reset
//! and either restores the retained bytes or wipes them.

mod config;
mod error;
mod record;
mod recovery;
mod retained;
mod store;

pub use config::StoreConfig;
pub use error::{ConfigError, StoreError};
pub use record::{Record, RecordHeader, Records, TagId, TagRegistry, HEADER_LEN};
pub use recovery::{
    discard, recovery_action, restore, stage, HeapScratch, RecoveryAction, ResetCause,
    ResetSource, ScratchAllocator,
};
pub use retained::{Descriptor, RetainedArea, RetainedBlock, RetainedLog, RetainedMemory};
pub use store::{LockedRead, LogKind, LogStats, RtcStore};
