//! Expedited grace periods
//!
//! An expedited grace period does not wait for contexts to notice it. The
//! caller resets every node's `expmask`, reports idle, offline and
//! reader-free contexts at once, and flags the rest; a flagged context
//! reports when it leaves its outermost read-side section or at its next
//! tick. Callers serialize on one mutex, and a caller whose snapshot was
//! covered by someone else's expedited grace period returns without running
//! one.

use std::sync::atomic::Ordering;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::data::RcuData;
use crate::domain::RcuState;
use crate::error::{RcuError, Result};
use crate::kick::KickReason;
use crate::seq::AtomicSeq;

/// Expedited grace-period bookkeeping of one domain
#[derive(Debug)]
pub(crate) struct ExpState {
    /// Expedited sequence; written only under `mutex`
    pub(crate) seq: AtomicSeq,
    mutex: Mutex<()>,
    /// Callers waiting for the current leader to finish
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
    /// The leader waiting for the root `expmask` to clear
    done_lock: Mutex<()>,
    done_cv: Condvar,
}

impl ExpState {
    pub(crate) fn new() -> Self {
        Self {
            seq: AtomicSeq::new(0),
            mutex: Mutex::new(()),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
            done_lock: Mutex::new(()),
            done_cv: Condvar::new(),
        }
    }
}

impl RcuState {
    pub(crate) fn expedite(&self, cpu: usize) -> Result<()> {
        self.check_running()?;
        let rdp = self.online_rdp(cpu)?;
        if rdp.in_read_section() {
            return Err(RcuError::ReadSideActive(cpu));
        }

        let snap = self.exp.seq.snap();
        loop {
            if self.exp.seq.done(snap) {
                self.stats.expedited.piggybacked.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            if let Some(guard) = self.exp.mutex.try_lock() {
                if self.exp.seq.done(snap) {
                    self.stats.expedited.piggybacked.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                let result = self.run_expedited(cpu);
                drop(guard);
                let _wake = self.exp.wake_lock.lock();
                self.exp.wake_cv.notify_all();
                return result;
            }

            self.check_running()?;
            let mut wake = self.exp.wake_lock.lock();
            if !self.exp.seq.done(snap) && self.exp.mutex.is_locked() {
                self.exp
                    .wake_cv
                    .wait_for(&mut wake, self.config.expedited_kick_interval);
            }
        }
    }

    /// Drive one expedited grace period; the caller holds the expedited mutex
    fn run_expedited(&self, caller: usize) -> Result<()> {
        let started = Instant::now();
        let seq = self.exp.seq.start();
        self.stats.expedited.started.fetch_add(1, Ordering::Relaxed);

        for idx in 0..self.tree.len() {
            let mut guard = self.tree.node(idx).lock();
            guard.expmask = guard.expmaskinit;
        }
        let kicks = self.exp_select(caller);
        for &cpu in &kicks {
            self.kicker.kick(cpu, KickReason::Expedited);
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(exp_seq = seq, holdouts = kicks.len(), "expedited grace period started");
        }

        let result = self.exp_wait(started);
        self.exp.seq.end();
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                exp_seq = self.exp.seq.load(),
                elapsed = ?started.elapsed(),
                ok = result.is_ok(),
                "expedited grace period ended"
            );
        }
        result
    }

    /// Report every context that needs no help and flag the others.
    /// Returns the contexts to kick.
    fn exp_select(&self, caller: usize) -> Vec<usize> {
        let mut kicks = Vec::new();
        for leaf in self.tree.leaves() {
            let node = self.tree.node(leaf);
            let guard = node.lock();
            if guard.expmask == 0 {
                continue;
            }
            let mut quiet = 0u64;
            let mut gone = 0u64;
            for cpu in node.cpus_in(guard.expmask) {
                let rdp = &self.rda[cpu];
                if guard.qsmaskinitnext & rdp.grpmask == 0 || !rdp.is_online() {
                    gone |= rdp.grpmask;
                } else if cpu == caller || rdp.is_idle() || !rdp.in_read_section() {
                    quiet |= rdp.grpmask;
                } else {
                    rdp.exp_deferred_qs.store(true, Ordering::SeqCst);
                    // The reader may have left between the two checks.
                    if !rdp.in_read_section() && rdp.exp_deferred_qs.swap(false, Ordering::SeqCst) {
                        quiet |= rdp.grpmask;
                    } else {
                        kicks.push(cpu);
                    }
                }
            }
            if quiet | gone != 0 {
                self.tree.report_exp_rnp(leaf, quiet | gone, guard);
                self.stats
                    .expedited
                    .qs_reported
                    .fetch_add(u64::from(quiet.count_ones()), Ordering::Relaxed);
            }
        }
        kicks
    }

    /// Block until the root `expmask` clears, re-checking and re-kicking
    /// holdouts every kick interval
    fn exp_wait(&self, started: Instant) -> Result<()> {
        let stall_timeout = self.config.expedited_stall_timeout;
        let mut next_stall = started + stall_timeout;
        loop {
            {
                let mut done = self.exp.done_lock.lock();
                loop {
                    if self.tree.root().lock().expmask == 0 {
                        return Ok(());
                    }
                    if self.is_shutdown() {
                        return Err(RcuError::ShutDown);
                    }
                    if self
                        .exp
                        .done_cv
                        .wait_for(&mut done, self.config.expedited_kick_interval)
                        .timed_out()
                    {
                        break;
                    }
                }
            }

            let mut kicks = Vec::new();
            for leaf in self.tree.leaves() {
                let node = self.tree.node(leaf);
                let guard = node.lock();
                if guard.expmask == 0 {
                    continue;
                }
                let mut mask = 0u64;
                for cpu in node.cpus_in(guard.expmask) {
                    let rdp = &self.rda[cpu];
                    if !rdp.is_online() {
                        rdp.exp_deferred_qs.store(false, Ordering::SeqCst);
                        mask |= rdp.grpmask;
                    } else if rdp.is_idle() || !rdp.in_read_section() {
                        // Whoever clears the flag reports.
                        if rdp.exp_deferred_qs.swap(false, Ordering::SeqCst) {
                            mask |= rdp.grpmask;
                        }
                    } else {
                        kicks.push(cpu);
                    }
                }
                if mask != 0 {
                    let (reported, _) = self.tree.report_exp_rnp(leaf, mask, guard);
                    self.stats
                        .expedited
                        .qs_reported
                        .fetch_add(u64::from(reported), Ordering::Relaxed);
                }
            }

            if Instant::now() >= next_stall && !kicks.is_empty() {
                self.stats.expedited.stalls.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    exp_seq = self.exp.seq.load(),
                    elapsed = ?started.elapsed(),
                    holdouts = ?kicks,
                    "expedited grace period stalled"
                );
                next_stall += stall_timeout;
            }
            for cpu in kicks {
                self.kicker.kick(cpu, KickReason::Expedited);
            }
        }
    }

    /// Record `rdp`'s expedited quiescent state, if the current expedited
    /// grace period still waits for it
    pub(crate) fn report_exp_qs(&self, rdp: &RcuData) {
        let (reported, root_done) = self.tree.report_exp_cpus(rdp.leaf, rdp.grpmask);
        if reported > 0 {
            self.stats
                .expedited
                .qs_reported
                .fetch_add(u64::from(reported), Ordering::Relaxed);
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(cpu = rdp.cpu, "expedited quiescent state");
            }
        }
        if root_done {
            let _done = self.exp.done_lock.lock();
            self.exp.done_cv.notify_all();
        }
    }

    /// Wake every expedited waiter so it notices shutdown
    pub(crate) fn wake_expediters(&self) {
        {
            let _wake = self.exp.wake_lock.lock();
            self.exp.wake_cv.notify_all();
        }
        let _done = self.exp.done_lock.lock();
        self.exp.done_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RcuConfig;
    use crate::kick::NoopKicker;
    use crate::seq::seq_snap;
    use std::time::Duration;

    fn state(nr_cpus: usize) -> RcuState {
        let config = RcuConfig::new()
            .with_nr_cpus(nr_cpus)
            .with_fanout(2)
            .with_fanout_leaf(2)
            .with_expedited(Duration::from_millis(1), Duration::from_secs(5));
        let rsp = RcuState::new(config, Box::new(NoopKicker)).unwrap();
        for cpu in 0..nr_cpus {
            rsp.cpu_coming_online(cpu).unwrap();
        }
        rsp
    }

    #[test]
    fn test_no_readers_completes_at_once() {
        let rsp = state(5);
        let before = rsp.exp.seq.load();
        rsp.expedite(1).unwrap();
        assert_eq!(rsp.exp.seq.load(), seq_snap(before));
        assert_eq!(rsp.stats.expedited.qs_reported.load(Ordering::Relaxed), 5);
        assert!(rsp.tree.snapshot().iter().all(|n| n.expmask == 0));
    }

    #[test]
    fn test_reader_holds_up_expedited() {
        let rsp = state(4);
        rsp.rda[2].read_nesting.fetch_add(1, Ordering::SeqCst);
        std::thread::scope(|s| {
            let handle = s.spawn(|| rsp.expedite(0));
            std::thread::sleep(Duration::from_millis(20));
            assert!(!handle.is_finished());
            assert!(rsp.rda[2].exp_deferred_qs.load(Ordering::SeqCst));
            rsp.read_unlock(&rsp.rda[2]);
            handle.join().unwrap().unwrap();
        });
        assert_eq!(rsp.stats.expedited.qs_reported.load(Ordering::Relaxed), 4);
        assert!(!rsp.rda[2].exp_deferred_qs.load(Ordering::SeqCst));
    }

    #[test]
    fn test_idle_and_offline_contexts_need_no_help() {
        let rsp = state(4);
        rsp.enter_idle(3).unwrap();
        rsp.cpu_going_offline(2).unwrap();
        rsp.expedite(0).unwrap();
        assert_eq!(rsp.stats.expedited.qs_reported.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_refused_inside_read_section() {
        let rsp = state(2);
        rsp.rda[1].read_nesting.fetch_add(1, Ordering::SeqCst);
        assert!(matches!(rsp.expedite(1), Err(RcuError::ReadSideActive(1))));
    }
}
