//! Reset-aware Recovery
//!
//! Decides at start-up whether the bytes left in retained memory can be
//! trusted, and rebuilds a log from them. The decision is a pure function of
//! the reset cause and the persisted descriptor; each outcome is carried out
//! by its own routine.

use crate::error::StoreError;
use crate::retained::{Descriptor, RetainedLog};
use ring_buffer::{RingBuffer, Timeout};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reason reported by the chip for the most recent reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetCause {
    Unknown,
    PowerOn,
    External,
    Software,
    Panic,
    InterruptWatchdog,
    TaskWatchdog,
    OtherWatchdog,
    DeepSleep,
    Brownout,
    Sdio,
}

impl ResetCause {
    /// Whether retained memory keeps its content across this kind of reset
    pub fn retains_memory(self) -> bool {
        !matches!(
            self,
            ResetCause::Unknown | ResetCause::PowerOn | ResetCause::Brownout
        )
    }
}

/// Source of the most recent reset cause
pub trait ResetSource {
    fn reset_cause(&self) -> ResetCause;
}

impl ResetSource for ResetCause {
    fn reset_cause(&self) -> ResetCause {
        *self
    }
}

/// Allocator for the transient copy made during recovery
pub trait ScratchAllocator {
    /// Empty buffer with room for `len` bytes, or `None` when out of memory
    fn allocate(&self, len: usize) -> Option<Vec<u8>>;
}

/// Scratch buffers from the global heap
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapScratch;

impl ScratchAllocator for HeapScratch {
    fn allocate(&self, len: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        Some(buf)
    }
}

/// What recovery does with a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Memory is stale after this reset, wipe it
    Discard,
    /// Copy the live bytes out and re-insert them from the start of storage
    StageAndRestore,
    /// Memory survived but the descriptor is empty or out of bounds
    FailSafeDiscard,
}

/// Decide how to recover a log with `capacity` bytes of storage
pub fn recovery_action(
    cause: ResetCause,
    descriptor: &Descriptor,
    capacity: usize,
) -> RecoveryAction {
    if !cause.retains_memory() {
        return RecoveryAction::Discard;
    }
    let len = descriptor.len as usize;
    if len == 0 || len > capacity || descriptor.read_offset >= capacity {
        RecoveryAction::FailSafeDiscard
    } else {
        RecoveryAction::StageAndRestore
    }
}

/// Zero the descriptor and the storage
pub fn discard(descriptor: &mut Descriptor, storage: &mut [u8]) {
    *descriptor = Descriptor::new();
    storage.fill(0);
}

/// Copy the live bytes, in order, into a scratch buffer.
///
/// The descriptor must have been validated by [`recovery_action`].
/// Returns `None` when the scratch allocation fails.
pub fn stage(
    descriptor: &Descriptor,
    storage: &[u8],
    scratch: &dyn ScratchAllocator,
) -> Option<Vec<u8>> {
    let len = descriptor.len as usize;
    let start = descriptor.read_offset;
    let mut staged = scratch.allocate(len)?;

    // live bytes may wrap around the physical end
    let first = len.min(storage.len() - start);
    staged.extend_from_slice(&storage[start..start + first]);
    staged.extend_from_slice(&storage[..len - first]);
    Some(staged)
}

/// Re-insert staged bytes into a freshly created, empty ring buffer
pub fn restore(
    ring: &RingBuffer<'_>,
    descriptor: &mut Descriptor,
    staged: &[u8],
) -> Result<(), StoreError> {
    ring.send(staged, Timeout::Immediate)?;
    descriptor.len = staged.len() as u32;
    descriptor.read_offset = 0;
    Ok(())
}

/// A recovered log, or the error together with the retained memory
pub(crate) type Recovered<'a> =
    Result<(RingBuffer<'a>, &'a mut Descriptor), (StoreError, RetainedLog<'a>)>;

/// Rebuild one log over its retained memory after a reset
pub(crate) fn recover_log<'a>(
    name: &'static str,
    log: RetainedLog<'a>,
    cause: ResetCause,
    scratch: &dyn ScratchAllocator,
) -> Recovered<'a> {
    let RetainedLog {
        descriptor,
        storage,
    } = log;
    let capacity = storage.len();

    let action = recovery_action(cause, descriptor, capacity);
    let staged = match action {
        RecoveryAction::StageAndRestore => {
            let staged = stage(descriptor, storage, scratch);
            if staged.is_none() {
                warn!(
                    "No memory to stage {} bytes of {} log, discarding",
                    descriptor.len, name
                );
            }
            staged
        }
        RecoveryAction::Discard | RecoveryAction::FailSafeDiscard => None,
    };
    debug!("{} log: {:?} after {:?} reset", name, action, cause);

    discard(descriptor, storage);
    descriptor.size = capacity as u32;
    let ring = match RingBuffer::create(storage) {
        Ok(ring) => ring,
        // only empty storage is refused
        Err(e) => {
            let log = RetainedLog {
                descriptor,
                storage: &mut [],
            };
            return Err((e.into(), log));
        }
    };
    if let Some(staged) = staged {
        let restored = restore(&ring, descriptor, &staged);
        if let Err(e) = restored {
            let log = RetainedLog {
                descriptor,
                storage: ring.delete(),
            };
            return Err((e, log));
        }
    }
    Ok((ring, descriptor))
}
