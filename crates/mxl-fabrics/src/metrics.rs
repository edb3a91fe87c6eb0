//! Fabrics layer metrics collection.
//!
//! Mirrors `claudefs_transport::metrics::TransportMetrics`: a set of atomic
//! counters behind a thin collector, with a `Serialize`-able snapshot type.
//! Ambient observability, not a feature spec.md names — kept regardless of
//! spec.md §1's exclusion of NMOS/JSON flow parsing and CLI tooling, which
//! are unrelated non-goals (spec.md §10.4 in SPEC_FULL.md).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of fabrics metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Transfers posted (grain or sample writes), across all peers.
    pub transfers_posted: u64,
    /// Transfers whose completion was observed.
    pub transfers_completed: u64,
    /// Transfers whose completion reported failure.
    pub transfers_failed: u64,
    /// Total bytes written across every posted transfer.
    pub bytes_written: u64,
    /// Connection-oriented activation attempts.
    pub connect_attempts: u64,
    /// Connection-oriented activation attempts that did not reach `Connected`.
    pub connect_failures: u64,
    /// Targets evicted from an initiator's peer map after reaching `Done`.
    pub targets_evicted: u64,
    /// Absolute indices recovered from a partial immediate-data value.
    pub index_recoveries: u64,
}

/// Thread-safe fabrics layer metrics collector. One instance is shared by
/// every [`crate::initiator::Initiator`] and [`crate::target::Target`]
/// created from the same [`crate::ffi::MxlFabricsInstance`].
#[derive(Default)]
pub struct FabricsMetrics {
    transfers_posted: AtomicU64,
    transfers_completed: AtomicU64,
    transfers_failed: AtomicU64,
    bytes_written: AtomicU64,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    targets_evicted: AtomicU32,
    index_recoveries: AtomicU64,
}

impl std::fmt::Debug for FabricsMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricsMetrics").field("snapshot", &self.snapshot()).finish()
    }
}

impl FabricsMetrics {
    /// A fresh collector with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer posted, carrying `bytes` of payload.
    pub fn record_transfer_posted(&self, bytes: u64) {
        self.transfers_posted.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a transfer's completion outcome.
    pub fn record_completion(&self, ok: bool) {
        if ok {
            self.transfers_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transfers_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a connection-oriented activation attempt and whether it
    /// eventually failed (demoted back to `Idle`).
    pub fn record_connect_attempt(&self, failed: bool) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.connect_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a peer evicted from an initiator's peer map.
    pub fn record_target_evicted(&self) {
        self.targets_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one absolute-index recovery (spec.md §4.3.3).
    pub fn record_index_recovery(&self) {
        self.index_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_posted: self.transfers_posted.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            targets_evicted: self.targets_evicted.load(Ordering::Relaxed),
            index_recoveries: self.index_recoveries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_snapshot_is_all_zero() {
        let m = FabricsMetrics::new();
        let s = m.snapshot();
        assert_eq!(s.transfers_posted, 0);
        assert_eq!(s.bytes_written, 0);
    }

    #[test]
    fn records_transfers_and_bytes() {
        let m = FabricsMetrics::new();
        m.record_transfer_posted(128);
        m.record_transfer_posted(256);
        m.record_completion(true);
        m.record_completion(false);
        let s = m.snapshot();
        assert_eq!(s.transfers_posted, 2);
        assert_eq!(s.bytes_written, 384);
        assert_eq!(s.transfers_completed, 1);
        assert_eq!(s.transfers_failed, 1);
    }

    #[test]
    fn records_connect_attempts_and_failures() {
        let m = FabricsMetrics::new();
        m.record_connect_attempt(false);
        m.record_connect_attempt(true);
        let s = m.snapshot();
        assert_eq!(s.connect_attempts, 2);
        assert_eq!(s.connect_failures, 1);
    }

    #[test]
    fn records_eviction_and_index_recovery() {
        let m = FabricsMetrics::new();
        m.record_target_evicted();
        m.record_index_recovery();
        m.record_index_recovery();
        let s = m.snapshot();
        assert_eq!(s.targets_evicted, 1);
        assert_eq!(s.index_recoveries, 2);
    }
}
