//! Hook for prodding contexts that hold up a grace period

use std::fmt;

/// Why a context is being kicked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KickReason {
    /// A normal grace period has waited past its force-quiescent-state delay
    ForceQuiescentState,
    /// An expedited grace period is waiting on the context
    Expedited,
}

impl KickReason {
    /// Get the reason as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            KickReason::ForceQuiescentState => "fqs",
            KickReason::Expedited => "expedited",
        }
    }
}

impl fmt::Display for KickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Asks a context to pass through a quiescent state soon, typically by
/// making its owner call
/// [`check_and_report`](crate::GracePeriodDomain::check_and_report).
///
/// Called without any domain lock held, possibly from the coordinator thread.
pub trait ContextKicker: Send + Sync + 'static {
    /// Prod context `cpu`
    fn kick(&self, cpu: usize, reason: KickReason);
}

impl<F> ContextKicker for F
where
    F: Fn(usize, KickReason) + Send + Sync + 'static,
{
    fn kick(&self, cpu: usize, reason: KickReason) {
        self(cpu, reason)
    }
}

/// Kicker that does nothing; contexts are expected to tick on their own
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKicker;

impl ContextKicker for NoopKicker {
    fn kick(&self, _cpu: usize, _reason: KickReason) {}
}
