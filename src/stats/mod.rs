//! Statistics collection for grace-period domains
//!
//! Counters are updated with relaxed atomics on the paths they describe and
//! read through [`RcuStatsSnapshot`].

pub mod collector;
pub mod metrics;
#[cfg(feature = "prometheus")]
pub mod prometheus;
pub mod reporter;

pub use collector::{RcuStats, RcuStatsSnapshot};
pub use metrics::{CallbackStats, ExpeditedStats, GracePeriodStats, HotplugStats};
#[cfg(feature = "prometheus")]
pub use prometheus::{PrometheusOptions, PrometheusRenderer};
pub use reporter::{ReportFormat, StatsReporter};
