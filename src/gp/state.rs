//! Coordinator state machine

use std::sync::atomic::{AtomicU8, Ordering};

/// What the coordinator thread is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GpState {
    /// Not started yet
    Idle = 0,
    /// Waiting for a grace-period request
    WaitGps = 1,
    /// Request received
    DoneGps = 2,
    /// Applying buffered hotplug changes to the tree
    Onoff = 3,
    /// Initializing nodes for the new grace period
    Init = 4,
    /// Waiting for quiescent states or the next forcing pass
    WaitFqs = 5,
    /// Running a force-quiescent-state pass
    DoingFqs = 6,
    /// Ending the grace period
    Cleanup = 7,
    /// Grace period ended
    Cleaned = 8,
}

impl GpState {
    /// Get the state as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            GpState::Idle => "Idle",
            GpState::WaitGps => "WaitGps",
            GpState::DoneGps => "DoneGps",
            GpState::Onoff => "Onoff",
            GpState::Init => "Init",
            GpState::WaitFqs => "WaitFqs",
            GpState::DoingFqs => "DoingFqs",
            GpState::Cleanup => "Cleanup",
            GpState::Cleaned => "Cleaned",
        }
    }
}

impl From<u8> for GpState {
    fn from(value: u8) -> Self {
        match value {
            1 => GpState::WaitGps,
            2 => GpState::DoneGps,
            3 => GpState::Onoff,
            4 => GpState::Init,
            5 => GpState::WaitFqs,
            6 => GpState::DoingFqs,
            7 => GpState::Cleanup,
            8 => GpState::Cleaned,
            _ => GpState::Idle,
        }
    }
}

impl std::fmt::Display for GpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Atomic cell holding a [`GpState`]; written only by the coordinator
#[derive(Debug)]
pub(crate) struct AtomicGpState(AtomicU8);

impl AtomicGpState {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(GpState::Idle as u8))
    }

    #[inline]
    pub(crate) fn load(&self) -> GpState {
        GpState::from(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, state: GpState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A new grace period is needed
pub(crate) const GP_FLAG_INIT: u8 = 0x1;
/// A force-quiescent-state pass is wanted now
pub(crate) const GP_FLAG_FQS: u8 = 0x2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_states() {
        for raw in 0..=8u8 {
            assert_eq!(GpState::from(raw) as u8, raw);
        }
        assert_eq!(GpState::from(200), GpState::Idle);
    }

    #[test]
    fn test_atomic_cell() {
        let cell = AtomicGpState::new();
        assert_eq!(cell.load(), GpState::Idle);
        cell.store(GpState::WaitFqs);
        assert_eq!(cell.load(), GpState::WaitFqs);
        assert_eq!(cell.load().to_string(), "WaitFqs");
    }
}
