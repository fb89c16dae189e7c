//! Prometheus text exposition for oxircu statistics.
//!
//! Metric naming conventions:
//! - All metrics are prefixed with `oxircu_`.
//! - Counters use the `_total` suffix.
//! - Durations are reported in seconds (`*_seconds`).

use std::fmt::Write as _;

use crate::stats::RcuStatsSnapshot;

/// Render options for Prometheus text exposition.
#[derive(Debug, Clone)]
pub struct PrometheusOptions {
    /// Whether to include `# HELP` and `# TYPE` lines.
    pub include_metadata: bool,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
        }
    }
}

/// A renderer for Prometheus text exposition.
#[derive(Debug, Clone)]
pub struct PrometheusRenderer {
    options: PrometheusOptions,
}

impl PrometheusRenderer {
    /// Create a renderer with default options.
    pub fn new() -> Self {
        Self {
            options: PrometheusOptions::default(),
        }
    }

    /// Create a renderer with custom options.
    pub fn with_options(options: PrometheusOptions) -> Self {
        Self { options }
    }

    /// Render an `RcuStatsSnapshot` as Prometheus text exposition.
    pub fn render_snapshot(&self, s: &RcuStatsSnapshot) -> String {
        let mut out = String::with_capacity(2048);

        self.metric_gauge_f64(
            &mut out,
            "oxircu_uptime_seconds",
            "Seconds since the domain was created.",
            s.elapsed.as_secs_f64(),
        );
        self.metric_gauge_u64(
            &mut out,
            "oxircu_gp_seq",
            "Current grace-period sequence number.",
            s.gp_seq,
        );
        self.metric_gauge_u64(
            &mut out,
            "oxircu_online_cpus",
            "Contexts currently taking part in grace periods.",
            s.online_cpus as u64,
        );
        self.metric_gauge_u64(
            &mut out,
            "oxircu_callbacks_pending",
            "Callbacks queued but not yet invoked.",
            s.callbacks_pending,
        );
        self.metric_gauge_u64(
            &mut out,
            "oxircu_callback_overloaded",
            "1 while forcing intervals are shortened by callback overload.",
            u64::from(s.callback_overloaded),
        );

        self.metric_counter_u64(
            &mut out,
            "oxircu_grace_periods_started_total",
            "Grace periods started.",
            s.gps_started,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_grace_periods_completed_total",
            "Grace periods completed.",
            s.gps_completed,
        );
        self.metric_gauge_f64(
            &mut out,
            "oxircu_grace_period_avg_seconds",
            "Average grace-period duration.",
            s.avg_gp_duration.as_secs_f64(),
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_fqs_passes_total",
            "Force-quiescent-state passes.",
            s.fqs_passes,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_kicks_total",
            "Contexts kicked to hurry a grace period.",
            s.kicks,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_quiescent_states_total",
            "Quiescent states reported to the tree.",
            s.qs_reported,
        );

        self.metric_counter_u64(
            &mut out,
            "oxircu_callbacks_queued_total",
            "Callbacks queued.",
            s.cbs_queued,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_callbacks_invoked_total",
            "Callbacks invoked.",
            s.cbs_invoked,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_callbacks_migrated_total",
            "Callbacks moved off departing contexts.",
            s.cbs_migrated,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_callback_overloads_total",
            "Times a context crossed the callback high watermark.",
            s.overload_events,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_barriers_total",
            "Callback barriers completed.",
            s.barriers,
        );

        self.metric_counter_u64(
            &mut out,
            "oxircu_expedited_grace_periods_total",
            "Expedited grace periods driven.",
            s.exp_gps,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_expedited_piggybacked_total",
            "Expedited requests satisfied by another caller.",
            s.exp_piggybacked,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_expedited_quiescent_states_total",
            "Expedited quiescent states recorded.",
            s.exp_qs_reported,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_expedited_stalls_total",
            "Expedited stall warnings logged.",
            s.exp_stalls,
        );

        self.metric_counter_u64(
            &mut out,
            "oxircu_cpus_onlined_total",
            "Contexts brought online.",
            s.cpus_onlined,
        );
        self.metric_counter_u64(
            &mut out,
            "oxircu_cpus_offlined_total",
            "Contexts taken offline.",
            s.cpus_offlined,
        );

        out
    }

    fn maybe_metadata(&self, out: &mut String, name: &str, help: &str, ty: &str) {
        if !self.options.include_metadata {
            return;
        }
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {ty}");
    }

    fn metric_counter_u64(&self, out: &mut String, name: &str, help: &str, value: u64) {
        self.maybe_metadata(out, name, help, "counter");
        let _ = writeln!(out, "{name} {value}");
    }

    fn metric_gauge_u64(&self, out: &mut String, name: &str, help: &str, value: u64) {
        self.maybe_metadata(out, name, help, "gauge");
        let _ = writeln!(out, "{name} {value}");
    }

    fn metric_gauge_f64(&self, out: &mut String, name: &str, help: &str, value: f64) {
        self.maybe_metadata(out, name, help, "gauge");
        let v = if value.is_finite() { value } else { 0.0 };
        let _ = writeln!(out, "{name} {v}");
    }
}

impl Default for PrometheusRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RcuStats;

    #[test]
    fn test_counters_have_total_suffix() {
        let stats = RcuStats::new();
        stats.gp.record_start();
        let text = PrometheusRenderer::new().render_snapshot(&stats.snapshot());
        assert!(text.contains("# TYPE oxircu_grace_periods_started_total counter"));
        assert!(text.contains("oxircu_grace_periods_started_total 1\n"));
        for line in text.lines().filter(|l| l.starts_with("# TYPE") && l.ends_with("counter")) {
            let name = line.split_whitespace().nth(2).unwrap();
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn test_without_metadata() {
        let renderer = PrometheusRenderer::with_options(PrometheusOptions {
            include_metadata: false,
        });
        let text = renderer.render_snapshot(&RcuStats::new().snapshot());
        assert!(!text.contains("# HELP"));
        assert!(text.contains("oxircu_online_cpus 0\n"));
    }
}
