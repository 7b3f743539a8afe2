//! Retention Record Store Implementation

use crate::error::StoreError;
use crate::record::{RecordHeader, TagId, TagRegistry, HEADER_LEN};
use crate::recovery::{recover_log, HeapScratch, ResetSource, ScratchAllocator};
use crate::retained::{Descriptor, RetainedArea, RetainedLog};
use ring_buffer::{ReadGrant, RingBuffer, RingInfo, Timeout};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, info, warn};

/// Selects one of the two logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Unframed byte stream, written with blocking semantics
    Critical,
    /// Tagged records, oldest evicted first
    NonCritical,
}

impl LogKind {
    pub fn name(self) -> &'static str {
        match self {
            LogKind::Critical => "critical",
            LogKind::NonCritical => "non-critical",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub kind: LogKind,
    /// Storage length
    pub capacity: usize,
    /// Persisted live length
    pub len: usize,
    /// Persisted read offset
    pub read_offset: usize,
    /// Free bytes in the ring buffer
    pub free: usize,
    /// Ring buffer cursors
    pub ring: RingInfo,
}

type DescriptorGuard<'s, 'a> = MutexGuard<'s, &'a mut Descriptor>;

/// One log: a ring buffer over retained storage plus its persisted descriptor.
///
/// The descriptor mutex is the per-log lock; every store operation on the log
/// holds it while touching the ring buffer.
struct Log<'a> {
    kind: LogKind,
    ring: RingBuffer<'a>,
    descriptor: Mutex<&'a mut Descriptor>,
}

impl<'a> Log<'a> {
    fn new(kind: LogKind, ring: RingBuffer<'a>, descriptor: &'a mut Descriptor) -> Self {
        Self {
            kind,
            ring,
            descriptor: Mutex::new(descriptor),
        }
    }

    fn lock(&self) -> DescriptorGuard<'_, 'a> {
        self.descriptor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock(&self) -> Option<DescriptorGuard<'_, 'a>> {
        match self.descriptor.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn check_fits(&self, len: usize) -> Result<(), StoreError> {
        let capacity = self.ring.capacity();
        if len > capacity {
            warn!(
                "Rejecting {} byte write to {} log of {} bytes",
                len, self.kind, capacity
            );
            return Err(StoreError::Oversize { len, capacity });
        }
        Ok(())
    }

    fn write_complete(&self, descriptor: &mut Descriptor, len: usize) {
        descriptor.len += len as u32;
    }

    fn read_complete(&self, descriptor: &mut Descriptor, len: usize) {
        descriptor.len -= len as u32;
        descriptor.read_offset = self.ring.get_info().read;
    }

    /// Drop up to `size` bytes from the front of the log
    fn discard_front(&self, descriptor: &mut Descriptor, size: usize) -> usize {
        match self.ring.receive_upto(Timeout::Immediate, size) {
            Some(grant) => {
                let len = grant.len();
                grant.return_item();
                self.read_complete(descriptor, len);
                len
            }
            None => 0,
        }
    }

    /// Drop the oldest `needed` bytes of an unframed log
    fn evict_bytes(&self, descriptor: &mut Descriptor, mut needed: usize) {
        debug!("Evicting {} bytes from {} log", needed, self.kind);
        while needed > 0 {
            let dropped = self.discard_front(descriptor, needed);
            if dropped == 0 {
                break;
            }
            needed -= dropped;
        }
    }

    /// Drop the oldest record of a framed log, returning the bytes freed
    fn evict_record(&self, descriptor: &mut Descriptor) -> usize {
        // Headers never straddle the physical end, so the header is readable
        // in one piece at the read cursor.
        let framed = match self.ring.receive_upto(Timeout::Immediate, HEADER_LEN) {
            Some(grant) => {
                let framed = RecordHeader::decode(&grant)
                    .map(|header| header.framed_len())
                    .unwrap_or(grant.len());
                grant.release(0);
                framed
            }
            None => return 0,
        };
        debug!("Evicting {} byte record from {} log", framed, self.kind);

        let mut freed = 0;
        while freed < framed {
            let dropped = self.discard_front(descriptor, framed - freed);
            if dropped == 0 {
                break;
            }
            freed += dropped;
        }
        freed
    }

    /// Move the live bytes to the start of storage so that the free space
    /// after them is contiguous.
    fn realign(&self, descriptor: &mut Descriptor) -> Result<(), StoreError> {
        debug!(
            "Realigning {} log: {} live bytes from offset {}",
            self.kind,
            self.ring.len(),
            descriptor.read_offset
        );
        self.ring.realign()?;
        descriptor.read_offset = 0;
        Ok(())
    }

    /// Realign if `len` bytes would not fit after the write cursor
    fn ensure_contiguous(&self, descriptor: &mut Descriptor, len: usize) -> Result<(), StoreError> {
        if self.ring.contiguous_free_size() < len {
            self.realign(descriptor)?;
        }
        Ok(())
    }

    fn stats(&self) -> LogStats {
        let ring = self.ring.get_info();
        let (len, read_offset) = match self.try_lock() {
            Some(descriptor) => (descriptor.len as usize, descriptor.read_offset),
            // held by a reader or writer: the engine's free cursor and length
            // track the descriptor under the lock
            None => (self.ring.len(), ring.free),
        };
        LogStats {
            kind: self.kind,
            capacity: self.ring.capacity(),
            len,
            read_offset,
            free: self.ring.get_cur_free_size(),
            ring,
        }
    }

    /// Give the retained memory back
    fn into_retained(self) -> RetainedLog<'a> {
        RetainedLog {
            descriptor: self.descriptor.into_inner().unwrap_or_else(PoisonError::into_inner),
            storage: self.ring.delete(),
        }
    }
}

enum State<'a> {
    Uninitialized(Option<RetainedArea<'a>>),
    Ready { critical: Log<'a>, non_critical: Log<'a> },
}

/// Crash-survivable diagnostic store with a critical and a non-critical log.
///
/// Created over retained memory in the uninitialized state; [`init`] runs
/// reset-aware recovery and makes the store ready. All data operations take
/// `&self` and may be called from any number of threads.
///
/// [`init`]: RtcStore::init
pub struct RtcStore<'a> {
    state: State<'a>,
    tags: TagRegistry,
}

impl<'a> RtcStore<'a> {
    /// Create an uninitialized store over `area`
    pub fn new(area: RetainedArea<'a>, tags: TagRegistry) -> Result<Self, StoreError> {
        for log in [&area.critical, &area.non_critical] {
            if log.storage.is_empty() {
                return Err(StoreError::InvalidArgument("empty log storage"));
            }
            if u32::try_from(log.storage.len()).is_err() {
                return Err(StoreError::InvalidArgument("log storage too large"));
            }
        }
        if area.non_critical.storage.len() <= HEADER_LEN {
            return Err(StoreError::InvalidArgument("non-critical storage below one record"));
        }
        Ok(Self {
            state: State::Uninitialized(Some(area)),
            tags,
        })
    }

    /// Recover both logs and make the store ready
    pub fn init<R: ResetSource + ?Sized>(&mut self, reset: &R) -> Result<(), StoreError> {
        self.init_with(reset, &HeapScratch)
    }

    /// Like [`init`](Self::init), staging recovered bytes through `scratch`.
    ///
    /// On failure the retained area is handed back to the store, so `init`
    /// may be retried.
    pub fn init_with<R: ResetSource + ?Sized>(
        &mut self,
        reset: &R,
        scratch: &dyn ScratchAllocator,
    ) -> Result<(), StoreError> {
        let area = match &mut self.state {
            State::Uninitialized(area) => area.take().ok_or(StoreError::InvalidState)?,
            State::Ready { .. } => return Err(StoreError::InvalidState),
        };
        let RetainedArea {
            critical,
            non_critical,
        } = area;
        let cause = reset.reset_cause();
        info!("Initializing store after {:?} reset", cause);

        let critical = match recover_log(LogKind::Critical.name(), critical, cause, scratch) {
            Ok((ring, descriptor)) => Log::new(LogKind::Critical, ring, descriptor),
            Err((e, critical)) => {
                return Err(self.init_failed(e, critical, non_critical));
            }
        };

        let non_critical =
            match recover_log(LogKind::NonCritical.name(), non_critical, cause, scratch) {
                Ok((ring, descriptor)) => Log::new(LogKind::NonCritical, ring, descriptor),
                Err((e, non_critical)) => {
                    return Err(self.init_failed(e, critical.into_retained(), non_critical));
                }
            };

        info!(
            "Store ready: critical {}/{} bytes, non-critical {}/{} bytes recovered",
            critical.ring.len(),
            critical.ring.capacity(),
            non_critical.ring.len(),
            non_critical.ring.capacity()
        );
        self.state = State::Ready {
            critical,
            non_critical,
        };
        Ok(())
    }

    fn init_failed(
        &mut self,
        error: StoreError,
        critical: RetainedLog<'a>,
        non_critical: RetainedLog<'a>,
    ) -> StoreError {
        warn!("Store init failed: {}", error);
        self.state = State::Uninitialized(Some(RetainedArea {
            critical,
            non_critical,
        }));
        error
    }

    /// Tear down both logs. Retained bytes are left in place.
    pub fn deinit(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Uninitialized(None));
        self.state = match state {
            State::Ready {
                critical,
                non_critical,
            } => {
                info!("Store deinitialized");
                State::Uninitialized(Some(RetainedArea {
                    critical: critical.into_retained(),
                    non_critical: non_critical.into_retained(),
                }))
            }
            uninitialized => uninitialized,
        };
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready { .. })
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    fn log(&self, kind: LogKind) -> Result<&Log<'a>, StoreError> {
        match &self.state {
            State::Ready {
                critical,
                non_critical,
            } => Ok(match kind {
                LogKind::Critical => critical,
                LogKind::NonCritical => non_critical,
            }),
            State::Uninitialized(_) => Err(StoreError::InvalidState),
        }
    }

    /// Append raw bytes to the critical log.
    ///
    /// Oldest bytes are evicted when the log is short of space, so any write
    /// up to the log capacity succeeds.
    pub fn critical_write(&self, data: &[u8]) -> Result<(), StoreError> {
        if data.is_empty() {
            return Err(StoreError::InvalidArgument("empty data"));
        }
        let log = self.log(LogKind::Critical)?;
        log.check_fits(data.len())?;

        let mut descriptor = log.lock();
        let free = log.ring.get_cur_free_size();
        if free < data.len() {
            log.evict_bytes(&mut descriptor, data.len() - free);
        }
        log.ensure_contiguous(&mut descriptor, data.len())?;

        log.ring.send(data, Timeout::Immediate)?;
        log.write_complete(&mut descriptor, data.len());
        Ok(())
    }

    /// Append a tagged record to the non-critical log.
    ///
    /// Never blocks: if another task holds the log the record is dropped and
    /// [`StoreError::Dropped`] is returned. Oldest records are evicted to make
    /// room.
    pub fn non_critical_write(&self, tag: TagId, data: &[u8]) -> Result<(), StoreError> {
        if data.is_empty() {
            return Err(StoreError::InvalidArgument("empty data"));
        }
        if !self.tags.contains(tag) {
            return Err(StoreError::InvalidArgument("unregistered tag"));
        }
        let log = self.log(LogKind::NonCritical)?;
        let framed = HEADER_LEN + data.len();
        log.check_fits(framed)?;

        let Some(mut descriptor) = log.try_lock() else {
            debug!("Dropping {} byte record: non-critical log busy", framed);
            return Err(StoreError::Dropped);
        };

        while log.ring.get_cur_free_size() < framed {
            if log.evict_record(&mut descriptor) == 0 {
                break;
            }
        }
        log.ensure_contiguous(&mut descriptor, framed)?;

        let header = RecordHeader::new(tag, data.len() as u32);
        log.ring.send(&header.encode(), Timeout::Immediate)?;
        log.ring.send(data, Timeout::Immediate)?;
        log.write_complete(&mut descriptor, framed);
        Ok(())
    }

    /// Lock a log and borrow the contiguous bytes at its read offset.
    ///
    /// Returns `None`, with the lock released, when the log is empty. If the
    /// live bytes wrap around the physical end only the first part is
    /// returned; release it to reach the rest.
    pub fn read_and_lock(&self, kind: LogKind) -> Result<Option<LockedRead<'_, 'a>>, StoreError> {
        let log = self.log(kind)?;
        let descriptor = log.lock();
        let Some(grant) = log.ring.receive(Timeout::Immediate) else {
            return Ok(None);
        };
        debug_assert_eq!(grant.offset(), descriptor.read_offset);
        Ok(Some(LockedRead {
            grant,
            descriptor,
            log,
        }))
    }

    /// Consume up to `size` bytes from the front of a log without holding the
    /// lock across processing. Returns the bytes consumed.
    pub fn release(&self, kind: LogKind, size: usize) -> Result<usize, StoreError> {
        Ok(match self.read_and_lock(kind)? {
            Some(read) => read.release_and_unlock(size),
            None => 0,
        })
    }

    /// Snapshot of a log. Never blocks, so it may be called while holding a
    /// [`LockedRead`] on the same log.
    pub fn stats(&self, kind: LogKind) -> Result<LogStats, StoreError> {
        Ok(self.log(kind)?.stats())
    }
}

impl fmt::Debug for RtcStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcStore")
            .field("ready", &self.is_ready())
            .field("tags", &self.tags.len())
            .finish()
    }
}

/// Locked, zero-copy window into a log.
///
/// The log stays locked until the window is released or dropped; dropping it
/// consumes nothing. Other entry points on the same log, apart from
/// [`RtcStore::stats`], wait for the lock (or drop the record, for
/// non-critical writes).
pub struct LockedRead<'s, 'a> {
    // dropped before the lock is released
    grant: ReadGrant<'s>,
    descriptor: DescriptorGuard<'s, 'a>,
    log: &'s Log<'a>,
}

impl LockedRead<'_, '_> {
    pub fn kind(&self) -> LogKind {
        self.log.kind
    }

    /// Consume up to `size` bytes from the front of the window and unlock.
    /// Returns the bytes consumed.
    pub fn release_and_unlock(self, size: usize) -> usize {
        let LockedRead {
            grant,
            mut descriptor,
            log,
        } = self;
        let freed = grant.release(size);
        log.read_complete(&mut descriptor, freed);
        freed
    }
}

impl Deref for LockedRead<'_, '_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.grant
    }
}

impl fmt::Debug for LockedRead<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedRead")
            .field("kind", &self.log.kind)
            .field("offset", &self.grant.offset())
            .field("len", &self.grant.len())
            .finish()
    }
}
