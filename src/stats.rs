use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by one destination. Updated with relaxed atomics from the
/// ingest path and the destination worker.
#[derive(Debug, Default)]
pub struct DestinationCounters {
    /// Admitted into the buffer.
    pub enqueued: AtomicU64,
    /// Dropped because the buffer was full or already closed.
    pub dropped: AtomicU64,
    /// Accepted by the storage backend.
    pub records_flushed: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub batches_failed: AtomicU64,
    /// Discarded after a failed store or an expired shutdown grace period.
    pub records_lost: AtomicU64,
}

impl DestinationCounters {
    /// Records admitted but neither stored nor counted as lost yet.
    pub fn unsettled(&self) -> u64 {
        let enqueued = self.enqueued.load(Ordering::Relaxed);
        let settled = self.records_flushed.load(Ordering::Relaxed) + self.records_lost.load(Ordering::Relaxed);
        enqueued.saturating_sub(settled)
    }

    pub fn snapshot(&self) -> DestinationStats {
        DestinationStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
        }
    }
}

/// Service-wide ingest counters.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub ingested: AtomicU64,
    /// Matched no rule and the default list was empty.
    pub unrouted: AtomicU64,
    /// Routing named a destination that is not configured or not enabled.
    pub unknown_destination: AtomicU64,
    /// Arrived before `start` or after shutdown began.
    pub rejected: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestinationStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub records_flushed: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub records_lost: u64,
}

/// Point-in-time copy of every counter in the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub ingested: u64,
    pub unrouted: u64,
    pub unknown_destination: u64,
    pub rejected: u64,
    pub destinations: BTreeMap<String, DestinationStats>,
}

impl ServiceStats {
    pub fn destination(&self, name: &str) -> DestinationStats {
        self.destinations.get(name).cloned().unwrap_or_default()
    }
}
