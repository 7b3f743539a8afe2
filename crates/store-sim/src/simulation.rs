//! Reset Simulation
//!
//! Boots a store over the same retained memory several times, runs a mixed
//! writer/reader workload after each boot and reports what survived.

use rtc_store::{
    LogKind, LogStats, Records, ResetCause, RetainedMemory, RtcStore, StoreError, TagId,
    TagRegistry,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid store layout: {0}")]
    Layout(#[from] rtc_store::ConfigError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Report serialization error: {0}")]
    Report(#[from] serde_json::Error),
    #[error("Failed to set tracing subscriber: {0}")]
    Logging(String),
    #[error("Worker thread panicked")]
    WorkerPanicked,
}

/// Outcome of one simulated boot
#[derive(Debug, Clone, Serialize)]
pub struct BootReport {
    pub cause: ResetCause,
    /// Critical bytes found in retained memory at init
    pub recovered_critical: usize,
    /// Non-critical bytes found in retained memory at init
    pub recovered_non_critical: usize,
    pub records_written: usize,
    pub records_dropped: usize,
    pub records_consumed: usize,
    /// Log state at the end of the boot
    pub critical: LogStats,
    pub non_critical: LogStats,
}

#[derive(Debug, Default)]
struct WriterStats {
    written: usize,
    dropped: usize,
}

/// Workload run after every boot
#[derive(Debug, Clone)]
pub struct Simulation {
    pub writers: usize,
    pub writes_per_writer: usize,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            writers: 4,
            writes_per_writer: 50,
        }
    }
}

/// Registers tags in the same order at every boot so ids stay stable
fn register_tags() -> (TagRegistry, [TagId; 3]) {
    let mut tags = TagRegistry::new();
    let ids = [
        tags.register("boot"),
        tags.register("heap"),
        tags.register("wifi"),
    ];
    (tags, ids)
}

impl Simulation {
    /// Boot a store over `memory` after a `cause` reset and run the workload.
    /// The store is dropped on return, which stands in for the next reset.
    pub fn boot(
        &self,
        memory: &mut RetainedMemory,
        cause: ResetCause,
    ) -> Result<BootReport, SimError> {
        let (tags, ids) = register_tags();
        let mut store = RtcStore::new(memory.area(), tags)?;
        store.init(&cause)?;

        let recovered_critical = store.stats(LogKind::Critical)?.len;
        let recovered_non_critical = store.stats(LogKind::NonCritical)?.len;
        info!(
            "Boot after {:?}: recovered {} critical and {} non-critical bytes",
            cause, recovered_critical, recovered_non_critical
        );

        let done = AtomicBool::new(false);
        let (writers, consumed) = thread::scope(|s| {
            let reader = s.spawn(|| consume(&store, &done));
            let handles: Vec<_> = (0..self.writers)
                .map(|id| {
                    let store = &store;
                    s.spawn(move || self.write(store, id, ids))
                })
                .collect();

            let writers: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
            done.store(true, Ordering::Release);
            (writers, reader.join())
        });

        let mut totals = WriterStats::default();
        for writer in writers {
            let stats = writer.map_err(|_| SimError::WorkerPanicked)??;
            totals.written += stats.written;
            totals.dropped += stats.dropped;
        }
        let consumed = consumed.map_err(|_| SimError::WorkerPanicked)??;
        if totals.dropped > 0 {
            warn!("{} records dropped on a busy log", totals.dropped);
        }

        Ok(BootReport {
            cause,
            recovered_critical,
            recovered_non_critical,
            records_written: totals.written,
            records_dropped: totals.dropped,
            records_consumed: consumed,
            critical: store.stats(LogKind::Critical)?,
            non_critical: store.stats(LogKind::NonCritical)?,
        })
    }

    fn write(
        &self,
        store: &RtcStore<'_>,
        id: usize,
        tags: [TagId; 3],
    ) -> Result<WriterStats, StoreError> {
        let mut stats = WriterStats::default();
        for n in 0..self.writes_per_writer {
            store.critical_write(format!("writer {} event {}\n", id, n).as_bytes())?;

            let tag = tags[n % tags.len()];
            let payload = [id as u8, n as u8, 0xA5];
            match store.non_critical_write(tag, &payload) {
                Ok(()) => stats.written += 1,
                Err(StoreError::Dropped) => stats.dropped += 1,
                Err(e) => return Err(e),
            }
            thread::yield_now();
        }
        Ok(stats)
    }
}

/// Consume whole non-critical records until `done` is set
fn consume(store: &RtcStore<'_>, done: &AtomicBool) -> Result<usize, StoreError> {
    let mut consumed = 0;
    while !done.load(Ordering::Acquire) {
        let Some(read) = store.read_and_lock(LogKind::NonCritical)? else {
            thread::yield_now();
            continue;
        };
        let mut records = Records::new(&read, store.tags());
        consumed += records.by_ref().count();
        let used = match records.consumed() {
            // nothing parseable, skip the window
            0 => read.len(),
            used => used,
        };
        debug!("Consumed {} bytes of non-critical records", used);
        read.release_and_unlock(used);
        thread::yield_now();
    }
    Ok(consumed)
}
