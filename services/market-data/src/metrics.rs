//! Observability counters for the market-data fabric
//!
//! Counts published snapshots, end-of-update notifications, emitted
//! incremental updates, publish failures and replay progress. Commit
//! latency is sampled into a bounded window for percentile queries.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

const COMMIT_LATENCY_WINDOW: usize = 1000;

/// Shared metrics for caches, incremental engines and the replay player.
pub struct FabricMetrics {
    // Caches
    pub snapshots_published: AtomicU64,
    pub end_updates: AtomicU64,
    pub no_updates: AtomicU64,
    pub listener_failures: AtomicU64,
    commit_latency_ns: Mutex<LatencyWindow>,

    // Incremental engine
    pub incremental_published: AtomicU64,
    pub publish_failures: AtomicU64,

    // Dispatch
    pub messages_dispatched: AtomicU64,
    pub out_of_order_messages: AtomicU64,

    // Replay
    pub replayed_messages: AtomicU64,
    pub track_runs_completed: AtomicU64,
}

impl FabricMetrics {
    pub fn new() -> Self {
        Self {
            snapshots_published: AtomicU64::new(0),
            end_updates: AtomicU64::new(0),
            no_updates: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            commit_latency_ns: Mutex::new(LatencyWindow::with_capacity(COMMIT_LATENCY_WINDOW)),
            incremental_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            out_of_order_messages: AtomicU64::new(0),
            replayed_messages: AtomicU64::new(0),
            track_runs_completed: AtomicU64::new(0),
        }
    }

    /// Record one completed commit.
    pub fn record_commit(&self, published_snapshot: bool, latency_ns: u64) {
        if published_snapshot {
            self.snapshots_published.fetch_add(1, Ordering::Relaxed);
        }
        self.end_updates.fetch_add(1, Ordering::Relaxed);
        self.commit_latency_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(latency_ns);
    }

    pub fn record_no_update(&self) {
        self.no_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_listener_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incremental_published(&self) {
        self.incremental_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, out_of_order: bool) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        if out_of_order {
            self.out_of_order_messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a finished track run and the messages it emitted.
    pub fn record_track_run(&self, messages: u64) {
        self.replayed_messages.fetch_add(messages, Ordering::Relaxed);
        self.track_runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// p99 commit latency in nanoseconds, if any commit was sampled.
    pub fn commit_latency_p99(&self) -> Option<u64> {
        self.commit_latency_ns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .quantile(0.99)
    }

    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("snapshots_published".to_string(), self.snapshots_published.load(Ordering::Relaxed));
        m.insert("end_updates".to_string(), self.end_updates.load(Ordering::Relaxed));
        m.insert("no_updates".to_string(), self.no_updates.load(Ordering::Relaxed));
        m.insert("listener_failures".to_string(), self.listener_failures.load(Ordering::Relaxed));
        m.insert("incremental_published".to_string(), self.incremental_published.load(Ordering::Relaxed));
        m.insert("publish_failures".to_string(), self.publish_failures.load(Ordering::Relaxed));
        m.insert("messages_dispatched".to_string(), self.messages_dispatched.load(Ordering::Relaxed));
        m.insert("out_of_order_messages".to_string(), self.out_of_order_messages.load(Ordering::Relaxed));
        m.insert("replayed_messages".to_string(), self.replayed_messages.load(Ordering::Relaxed));
        m.insert("track_runs_completed".to_string(), self.track_runs_completed.load(Ordering::Relaxed));
        m
    }
}

impl Default for FabricMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Most recent commit latencies, oldest dropped first.
struct LatencyWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl LatencyWindow {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, value: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank quantile, `q` in (0, 1].
    fn quantile(&self, q: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (q * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_recording() {
        let metrics = FabricMetrics::new();

        metrics.record_commit(true, 500);
        metrics.record_commit(false, 1500);

        let exported = metrics.export();
        assert_eq!(exported["snapshots_published"], 1);
        assert_eq!(exported["end_updates"], 2);
        assert_eq!(metrics.commit_latency_p99(), Some(1500));
    }

    #[test]
    fn test_dispatch_and_publish_counters() {
        let metrics = FabricMetrics::new();
        metrics.record_dispatch(false);
        metrics.record_dispatch(true);
        metrics.record_incremental_published();
        metrics.record_publish_failure();
        metrics.record_no_update();

        let exported = metrics.export();
        assert_eq!(exported["messages_dispatched"], 2);
        assert_eq!(exported["out_of_order_messages"], 1);
        assert_eq!(exported["incremental_published"], 1);
        assert_eq!(exported["publish_failures"], 1);
        assert_eq!(exported["no_updates"], 1);
    }

    #[test]
    fn test_track_runs_accumulate() {
        let metrics = FabricMetrics::new();
        metrics.record_track_run(10);
        metrics.record_track_run(5);

        let exported = metrics.export();
        assert_eq!(exported["replayed_messages"], 15);
        assert_eq!(exported["track_runs_completed"], 2);
    }

    #[test]
    fn test_latency_window_drops_oldest() {
        let mut window = LatencyWindow::with_capacity(3);
        for value in [900, 10, 20, 30] {
            window.record(value);
        }

        assert_eq!(window.samples.len(), 3);
        assert_eq!(window.quantile(0.99), Some(30));
        assert_eq!(window.quantile(0.34), Some(20));
    }

    #[test]
    fn test_p99_over_full_window() {
        let metrics = FabricMetrics::new();
        assert_eq!(metrics.commit_latency_p99(), None);

        for ns in 1..=100 {
            metrics.record_commit(false, ns);
        }
        assert_eq!(metrics.commit_latency_p99(), Some(99));
    }
}
