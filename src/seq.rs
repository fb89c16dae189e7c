//! Grace-period sequence numbers
//!
//! A sequence value packs a counter and a phase into one `u64`. The low
//! [`STATE_BITS`] bits hold the phase (zero when no grace period is running);
//! the upper bits count grace periods. All comparisons are modular so the
//! counter may wrap without breaking ordering.

use std::sync::atomic::{AtomicU64, Ordering};

/// Number of low-order bits holding the phase
pub const STATE_BITS: u32 = 2;

/// Mask selecting the phase bits
pub const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

/// Initial value of every sequence counter.
///
/// Starts a few hundred grace periods below the wrap point so the modular
/// comparisons are exercised early in every run.
pub const INITIAL_SEQ: u64 = 0u64.wrapping_sub(300) << STATE_BITS;

/// Wrap-safe `a >= b`
#[inline]
pub const fn cmp_ge(a: u64, b: u64) -> bool {
    u64::MAX / 2 >= a.wrapping_sub(b)
}

/// Wrap-safe `a < b`
#[inline]
pub const fn cmp_lt(a: u64, b: u64) -> bool {
    u64::MAX / 2 < a.wrapping_sub(b)
}

/// Phase bits of a sequence value
#[inline]
pub const fn seq_state(s: u64) -> u64 {
    s & STATE_MASK
}

/// Counter part of a sequence value
#[inline]
pub const fn seq_ctr(s: u64) -> u64 {
    s >> STATE_BITS
}

/// Whether a grace period is in progress for this value
#[inline]
pub const fn seq_in_progress(s: u64) -> bool {
    seq_state(s) != 0
}

/// Value after starting a grace period from the idle value `s`
#[inline]
pub const fn seq_start_val(s: u64) -> u64 {
    s.wrapping_add(1)
}

/// Value after ending the grace period in progress in `s`
#[inline]
pub const fn seq_end_val(s: u64) -> u64 {
    (s | STATE_MASK).wrapping_add(1)
}

/// Smallest sequence value whose completion implies a full grace period
/// elapsed after `s` was observed.
///
/// If a grace period is in flight it cannot be relied upon, so the snapshot
/// skips to the end of the next one.
#[inline]
pub const fn seq_snap(s: u64) -> u64 {
    s.wrapping_add(2 * STATE_MASK + 1) & !STATE_MASK
}

/// Whether the grace period identified by `snap` has completed at `cur`
#[inline]
pub const fn seq_done(cur: u64, snap: u64) -> bool {
    cmp_ge(cur, snap)
}

/// Like [`seq_done`] but also treats values far behind `snap` as done,
/// covering counter wrap for long-lived cookies.
#[inline]
pub const fn seq_done_exact(cur: u64, snap: u64) -> bool {
    cmp_ge(cur, snap) || cmp_lt(cur, snap.wrapping_sub(3 * STATE_MASK + 1))
}

/// Whether the grace period required by `s` has already started at `cur`
#[inline]
pub const fn seq_started(cur: u64, s: u64) -> bool {
    cmp_lt(s.wrapping_sub(1) & !STATE_MASK, cur)
}

/// Whether a grace period ended between observing `old` and `new`
#[inline]
pub const fn seq_completed_gp(old: u64, new: u64) -> bool {
    cmp_lt(old, new & !STATE_MASK)
}

/// Whether a new grace period started between observing `old` and `new`
#[inline]
pub const fn seq_new_gp(old: u64, new: u64) -> bool {
    cmp_lt(old.wrapping_add(STATE_MASK) & !STATE_MASK, new)
}

/// Atomic sequence counter
///
/// Writers serialize externally (the coordinator under the root lock, the
/// expedited path under its mutex); readers load without locking.
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicSeq(AtomicU64);

impl AtomicSeq {
    /// Create a counter at `value`
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Current value
    #[inline]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Snapshot for a future completion check
    #[inline]
    pub fn snap(&self) -> u64 {
        seq_snap(self.load())
    }

    /// Whether `snap` has completed
    #[inline]
    pub fn done(&self, snap: u64) -> bool {
        seq_done(self.load(), snap)
    }

    /// Start a grace period; returns the new value
    pub fn start(&self) -> u64 {
        let cur = self.load();
        debug_assert!(!seq_in_progress(cur), "sequence already in progress");
        let next = seq_start_val(cur);
        self.0.store(next, Ordering::SeqCst);
        debug_assert_eq!(seq_state(next), 1);
        next
    }

    /// End the grace period in progress; returns the new value
    pub fn end(&self) -> u64 {
        let cur = self.load();
        debug_assert!(seq_in_progress(cur), "sequence not in progress");
        let next = seq_end_val(cur);
        self.0.store(next, Ordering::SeqCst);
        next
    }
}

impl Default for AtomicSeq {
    fn default() -> Self {
        Self::new(INITIAL_SEQ)
    }
}
