//! Statistics collector
//!
//! Groups the per-component counters of a domain and produces snapshots.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::stats::metrics::{CallbackStats, ExpeditedStats, GracePeriodStats, HotplugStats};

/// All counters of one domain
#[derive(Debug)]
pub struct RcuStats {
    /// Normal grace periods
    pub gp: GracePeriodStats,
    /// Callbacks
    pub callbacks: CallbackStats,
    /// Expedited grace periods
    pub expedited: ExpeditedStats,
    /// Hotplug
    pub hotplug: HotplugStats,
    start_time: Instant,
}

impl Default for RcuStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RcuStats {
    /// Create zeroed statistics
    pub fn new() -> Self {
        Self {
            gp: GracePeriodStats::new(),
            callbacks: CallbackStats::new(),
            expedited: ExpeditedStats::new(),
            hotplug: HotplugStats::new(),
            start_time: Instant::now(),
        }
    }

    /// Get elapsed time since collection started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Copy the counters; domain-level gauges are left zero for the caller to fill
    pub fn snapshot(&self) -> RcuStatsSnapshot {
        RcuStatsSnapshot {
            elapsed: self.elapsed(),
            gp_seq: 0,
            gp_state: String::new(),
            online_cpus: 0,
            callbacks_pending: 0,
            callback_overloaded: false,
            gps_started: self.gp.started.load(Ordering::Relaxed),
            gps_completed: self.gp.completed.load(Ordering::Relaxed),
            avg_gp_duration: self.gp.average_duration(),
            fqs_passes: self.gp.fqs_passes.load(Ordering::Relaxed),
            kicks: self.gp.kicks.load(Ordering::Relaxed),
            qs_reported: self.gp.qs_reported.load(Ordering::Relaxed),
            cbs_queued: self.callbacks.queued.load(Ordering::Relaxed),
            cbs_invoked: self.callbacks.invoked.load(Ordering::Relaxed),
            cbs_migrated: self.callbacks.migrated.load(Ordering::Relaxed),
            overload_events: self.callbacks.overload_events.load(Ordering::Relaxed),
            barriers: self.callbacks.barriers.load(Ordering::Relaxed),
            exp_gps: self.expedited.started.load(Ordering::Relaxed),
            exp_piggybacked: self.expedited.piggybacked.load(Ordering::Relaxed),
            exp_qs_reported: self.expedited.qs_reported.load(Ordering::Relaxed),
            exp_stalls: self.expedited.stalls.load(Ordering::Relaxed),
            cpus_onlined: self.hotplug.onlined.load(Ordering::Relaxed),
            cpus_offlined: self.hotplug.offlined.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a domain's statistics
#[derive(Debug, Clone, Serialize)]
pub struct RcuStatsSnapshot {
    /// Time since the domain was created
    pub elapsed: Duration,
    /// Current grace-period sequence
    pub gp_seq: u64,
    /// Current coordinator state
    pub gp_state: String,
    /// Contexts currently online
    pub online_cpus: usize,
    /// Callbacks queued but not yet invoked
    pub callbacks_pending: u64,
    /// Whether the coordinator is running shortened forcing intervals
    pub callback_overloaded: bool,
    /// Grace periods started
    pub gps_started: u64,
    /// Grace periods completed
    pub gps_completed: u64,
    /// Average grace-period duration
    pub avg_gp_duration: Duration,
    /// Force-quiescent-state passes
    pub fqs_passes: u64,
    /// Kicks issued
    pub kicks: u64,
    /// Quiescent states reported to the tree
    pub qs_reported: u64,
    /// Callbacks queued
    pub cbs_queued: u64,
    /// Callbacks invoked
    pub cbs_invoked: u64,
    /// Callbacks migrated off departing contexts
    pub cbs_migrated: u64,
    /// High-watermark crossings
    pub overload_events: u64,
    /// Barriers completed
    pub barriers: u64,
    /// Expedited grace periods driven
    pub exp_gps: u64,
    /// Expedited requests satisfied by another caller
    pub exp_piggybacked: u64,
    /// Expedited quiescent states recorded
    pub exp_qs_reported: u64,
    /// Expedited stall warnings
    pub exp_stalls: u64,
    /// Contexts brought online
    pub cpus_onlined: u64,
    /// Contexts taken offline
    pub cpus_offlined: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_copies_counters() {
        let stats = RcuStats::new();
        stats.gp.record_start();
        stats.callbacks.record_queued();
        stats.callbacks.record_invoked(1);
        stats.expedited.qs_reported.fetch_add(4, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.gps_started, 1);
        assert_eq!(snapshot.gps_completed, 0);
        assert_eq!(snapshot.cbs_queued, 1);
        assert_eq!(snapshot.cbs_invoked, 1);
        assert_eq!(snapshot.exp_qs_reported, 4);
    }
}
