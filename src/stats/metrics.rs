//! Statistics metrics definitions
//!
//! Counters for each part of the engine. Every counter is a relaxed atomic;
//! they are diagnostics, never used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Normal grace-period counters
#[derive(Debug, Default)]
pub struct GracePeriodStats {
    /// Grace periods started
    pub started: AtomicU64,
    /// Grace periods completed
    pub completed: AtomicU64,
    /// Force-quiescent-state passes
    pub fqs_passes: AtomicU64,
    /// Contexts kicked by forcing passes
    pub kicks: AtomicU64,
    /// Contexts reported quiescent to their leaf
    pub qs_reported: AtomicU64,
    /// Sum of grace-period durations in nanoseconds
    pub total_duration_ns: AtomicU64,
    /// Duration of the last completed grace period in nanoseconds
    pub last_duration_ns: AtomicU64,
}

impl GracePeriodStats {
    /// Create new grace-period stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a grace period start
    pub fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a grace period end
    pub fn record_end(&self, duration: Duration) {
        let ns = duration.as_nanos() as u64;
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ns.fetch_add(ns, Ordering::Relaxed);
        self.last_duration_ns.store(ns, Ordering::Relaxed);
    }

    /// Record a forcing pass
    pub fn record_fqs(&self) {
        self.fqs_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `n` kicks
    pub fn record_kicks(&self, n: u64) {
        self.kicks.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` quiescent-state reports
    pub fn record_qs(&self, n: u64) {
        self.qs_reported.fetch_add(n, Ordering::Relaxed);
    }

    /// Average grace-period duration
    pub fn average_duration(&self) -> Duration {
        let count = self.completed.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_duration_ns.load(Ordering::Relaxed) / count)
    }
}

/// Callback counters
#[derive(Debug, Default)]
pub struct CallbackStats {
    /// Callbacks queued
    pub queued: AtomicU64,
    /// Callbacks invoked
    pub invoked: AtomicU64,
    /// Callbacks moved off departing contexts
    pub migrated: AtomicU64,
    /// Times a context crossed the high watermark
    pub overload_events: AtomicU64,
    /// Barriers completed
    pub barriers: AtomicU64,
}

impl CallbackStats {
    /// Create new callback stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a queued callback
    #[inline]
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `n` invoked callbacks
    #[inline]
    pub fn record_invoked(&self, n: u64) {
        self.invoked.fetch_add(n, Ordering::Relaxed);
    }

    /// Record `n` migrated callbacks
    pub fn record_migrated(&self, n: u64) {
        self.migrated.fetch_add(n, Ordering::Relaxed);
    }

    /// Record an overload
    pub fn record_overload(&self) {
        self.overload_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed barrier
    pub fn record_barrier(&self) {
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Expedited grace-period counters
#[derive(Debug, Default)]
pub struct ExpeditedStats {
    /// Expedited grace periods driven
    pub started: AtomicU64,
    /// Requests satisfied by another caller's expedited grace period
    pub piggybacked: AtomicU64,
    /// Expedited quiescent states recorded for online contexts
    pub qs_reported: AtomicU64,
    /// Stall warnings logged
    pub stalls: AtomicU64,
}

impl ExpeditedStats {
    /// Create new expedited stats
    pub fn new() -> Self {
        Self::default()
    }
}

/// Hotplug counters
#[derive(Debug, Default)]
pub struct HotplugStats {
    /// Contexts brought online
    pub onlined: AtomicU64,
    /// Contexts taken offline
    pub offlined: AtomicU64,
}

impl HotplugStats {
    /// Create new hotplug stats
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grace_period_average() {
        let stats = GracePeriodStats::new();
        assert_eq!(stats.average_duration(), Duration::ZERO);
        stats.record_start();
        stats.record_end(Duration::from_millis(2));
        stats.record_start();
        stats.record_end(Duration::from_millis(4));
        assert_eq!(stats.completed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.average_duration(), Duration::from_millis(3));
        assert_eq!(
            stats.last_duration_ns.load(Ordering::Relaxed),
            Duration::from_millis(4).as_nanos() as u64
        );
    }

    #[test]
    fn test_callback_counters() {
        let stats = CallbackStats::new();
        stats.record_queued();
        stats.record_queued();
        stats.record_invoked(5);
        stats.record_migrated(2);
        assert_eq!(stats.queued.load(Ordering::Relaxed), 2);
        assert_eq!(stats.invoked.load(Ordering::Relaxed), 5);
        assert_eq!(stats.migrated.load(Ordering::Relaxed), 2);
    }
}
