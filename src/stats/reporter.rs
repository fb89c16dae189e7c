//! Statistics reporter
//!
//! Provides formatting and output for statistics.

use std::fmt::Write;

use crate::stats::collector::RcuStatsSnapshot;

/// Output format for statistics reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Human-readable text format
    Text,
    /// JSON format
    Json,
    /// Compact one-line format
    Compact,
}

/// Statistics reporter
///
/// Formats and outputs statistics in various formats.
pub struct StatsReporter {
    /// Output format
    format: ReportFormat,
    /// Whether to include detailed stats
    detailed: bool,
}

impl StatsReporter {
    /// Create a new reporter with the given format
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            detailed: true,
        }
    }

    /// Create a reporter with text format
    pub fn text() -> Self {
        Self::new(ReportFormat::Text)
    }

    /// Create a reporter with JSON format
    pub fn json() -> Self {
        Self::new(ReportFormat::Json)
    }

    /// Set whether to include detailed stats
    pub fn with_detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    /// Generate a report from a snapshot
    pub fn report_snapshot(&self, snapshot: &RcuStatsSnapshot) -> String {
        match self.format {
            ReportFormat::Text => self.format_text(snapshot),
            ReportFormat::Json => self.format_json(snapshot),
            ReportFormat::Compact => self.format_compact(snapshot),
        }
    }

    fn format_text(&self, snapshot: &RcuStatsSnapshot) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "=== RCU Statistics ===");
        let _ = writeln!(output, "Elapsed: {:.2?}", snapshot.elapsed);
        let _ = writeln!(output);

        let _ = writeln!(output, "Grace periods:");
        let _ = writeln!(output, "  Sequence:  {:#x} ({})", snapshot.gp_seq, snapshot.gp_state);
        let _ = writeln!(
            output,
            "  Completed: {} of {} started",
            snapshot.gps_completed, snapshot.gps_started
        );
        let _ = writeln!(output, "  Avg time:  {:.2?}", snapshot.avg_gp_duration);
        let _ = writeln!(output);

        let _ = writeln!(output, "Callbacks:");
        let _ = writeln!(output, "  Queued:    {}", snapshot.cbs_queued);
        let _ = writeln!(output, "  Invoked:   {}", snapshot.cbs_invoked);
        let _ = writeln!(output, "  Pending:   {}", snapshot.callbacks_pending);
        let _ = writeln!(output);

        if self.detailed {
            let _ = writeln!(output, "Forcing:");
            let _ = writeln!(output, "  Passes:    {}", snapshot.fqs_passes);
            let _ = writeln!(output, "  Kicks:     {}", snapshot.kicks);
            let _ = writeln!(output, "  QS:        {}", snapshot.qs_reported);
            let _ = writeln!(
                output,
                "  Overload:  {} events (active: {})",
                snapshot.overload_events, snapshot.callback_overloaded
            );
            let _ = writeln!(output);

            let _ = writeln!(output, "Expedited:");
            let _ = writeln!(
                output,
                "  Driven:    {} (piggybacked: {})",
                snapshot.exp_gps, snapshot.exp_piggybacked
            );
            let _ = writeln!(output, "  QS:        {}", snapshot.exp_qs_reported);
            let _ = writeln!(output, "  Stalls:    {}", snapshot.exp_stalls);
            let _ = writeln!(output);

            let _ = writeln!(output, "Hotplug:");
            let _ = writeln!(output, "  Online:    {}", snapshot.online_cpus);
            let _ = writeln!(
                output,
                "  Events:    +{} / -{} (migrated: {})",
                snapshot.cpus_onlined, snapshot.cpus_offlined, snapshot.cbs_migrated
            );
        }

        output
    }

    fn format_json(&self, snapshot: &RcuStatsSnapshot) -> String {
        serde_json::to_string_pretty(snapshot).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn format_compact(&self, snapshot: &RcuStatsSnapshot) -> String {
        format!(
            "gp={:#x}({}) done={}/{} cbs={}/{} pending={} fqs={} exp={} online={}",
            snapshot.gp_seq,
            snapshot.gp_state,
            snapshot.gps_completed,
            snapshot.gps_started,
            snapshot.cbs_invoked,
            snapshot.cbs_queued,
            snapshot.callbacks_pending,
            snapshot.fqs_passes,
            snapshot.exp_gps,
            snapshot.online_cpus,
        )
    }
}
