//! Callback registration, acceleration and invocation

use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use parking_lot::Mutex;

use crate::cblist::{Callback, CallbackRecord};
use crate::constants::MAX_BLIMIT;
use crate::data::RcuData;
use crate::domain::RcuState;
use crate::error::{RcuError, Result};
use crate::gp::{GP_FLAG_FQS, GP_FLAG_INIT};
use crate::seq::{seq_done, seq_snap, AtomicSeq};

/// How often a blocked waiter re-checks shutdown and ticks its own context
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Serializes barriers; concurrent callers share one
#[derive(Debug)]
pub(crate) struct BarrierState {
    mutex: Mutex<()>,
    seq: AtomicSeq,
}

impl BarrierState {
    pub(crate) fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            seq: AtomicSeq::new(0),
        }
    }
}

impl RcuState {
    pub(crate) fn enqueue(&self, cpu: usize, func: Callback) -> Result<()> {
        self.check_running()?;
        let rdp = self.online_rdp(cpu)?;
        // qlen covers every record in the inbox.
        let qlen = rdp.qlen.fetch_add(1, Ordering::Relaxed) + 1;
        rdp.inbox.push(CallbackRecord::new(func, self.gp_seq.load()));
        self.stats.callbacks.record_queued();

        if !self.gp_in_progress() && self.gp_flags.load(Ordering::Relaxed) & GP_FLAG_INIT == 0 {
            self.request_gp_flags(GP_FLAG_INIT);
        }
        if rdp.inbox_since_check.fetch_add(1, Ordering::Relaxed) + 1 > self.config.qhimark {
            self.note_overload(rdp, qlen);
        }
        if qlen >= self.config.qovld && !self.cbovld.load(Ordering::Relaxed) {
            self.cbovld.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// A context queued more than `qhimark` callbacks since the last check
    fn note_overload(&self, rdp: &RcuData, qlen: usize) {
        rdp.inbox_since_check.store(0, Ordering::Relaxed);
        rdp.blimit.store(MAX_BLIMIT, Ordering::Relaxed);
        self.stats.callbacks.record_overload();
        if tracing::enabled!(tracing::Level::WARN) {
            tracing::warn!(cpu = rdp.cpu, qlen, "callback overload, lifting batch limit");
        }
        if self.gp_in_progress() {
            self.request_gp_flags(GP_FLAG_FQS);
        } else {
            self.request_gp_flags(GP_FLAG_INIT);
        }
    }

    /// Move new callbacks into the list, advance finished segments and make
    /// sure a grace period is requested for the rest
    pub(crate) fn process_callbacks(&self, rdp: &RcuData) {
        let (need, target) = {
            let mut cbs = rdp.lock_cbs();
            // Hotplug may have taken the list already.
            if !rdp.is_online() {
                return;
            }
            rdp.flush_inbox(&mut cbs);
            if cbs.is_empty() {
                return;
            }
            let cur = self.gp_seq.load();
            cbs.advance(cur);
            let target = seq_snap(cur);
            (cbs.accelerate(target), target)
        };
        if need {
            self.start_this_gp(rdp, target);
        }
    }

    /// Invoke up to the batch limit of ready callbacks outside every lock.
    /// Returns the number invoked.
    pub(crate) fn do_batch(&self, rdp: &RcuData) -> usize {
        let bl = rdp.blimit.load(Ordering::Relaxed);
        let ready = {
            let mut cbs = rdp.lock_cbs();
            if !cbs.ready() {
                return 0;
            }
            cbs.extract_done(bl)
        };
        let count = ready.len();
        let cur = self.gp_seq.load();
        for record in ready {
            if let Some(registered) = record.registered_seq() {
                debug_assert!(
                    seq_done(cur, seq_snap(registered)),
                    "callback registered at {registered:#x} invoked at {cur:#x}"
                );
            }
            record.invoke();
        }

        let left = rdp.qlen.fetch_sub(count, Ordering::Relaxed) - count;
        self.stats.callbacks.record_invoked(count as u64);
        if left == 0 {
            rdp.inbox_since_check.store(0, Ordering::Relaxed);
        }
        if bl >= MAX_BLIMIT && left <= self.config.qlowmark {
            rdp.blimit.store(self.config.blimit, Ordering::Relaxed);
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(cpu = rdp.cpu, left, "batch limit restored");
            }
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(cpu = rdp.cpu, count, left, "invoked callbacks");
        }
        count
    }

    /// Hand callbacks that raced into an offline context's inbox to `to`
    pub(crate) fn rescue_inbox(&self, from: &RcuData, to: usize) -> usize {
        let target = &self.rda[to];
        let mut moved = 0;
        while let Some(record) = from.inbox.pop() {
            target.qlen.fetch_add(1, Ordering::Relaxed);
            target.inbox.push(record);
            from.qlen.fetch_sub(1, Ordering::Relaxed);
            moved += 1;
        }
        if moved > 0 {
            self.stats.callbacks.record_migrated(moved as u64);
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(from = from.cpu, to, moved, "rescued stranded callbacks");
            }
        }
        moved
    }

    /// First online context after `cpu`, wrapping around; never `cpu` itself
    pub(crate) fn next_online_cpu(&self, cpu: usize) -> Option<usize> {
        let n = self.rda.len();
        (1..n)
            .map(|i| (cpu + i) % n)
            .find(|&other| self.rda[other].is_online())
    }

    pub(crate) fn synchronize(&self, cpu: usize) -> Result<()> {
        let rdp = self.online_rdp(cpu)?;
        if rdp.in_read_section() {
            return Err(RcuError::ReadSideActive(cpu));
        }
        let (tx, rx) = channel::bounded(1);
        self.enqueue(
            cpu,
            Box::new(move || {
                let _ = tx.send(());
            }),
        )?;

        loop {
            if rdp.is_online() {
                self.report_quiescent_state(cpu)?;
                self.check_and_report(cpu)?;
            }
            match rx.recv_timeout(WAIT_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => self.check_running()?,
                Err(RecvTimeoutError::Disconnected) => return Err(RcuError::ShutDown),
            }
        }
    }

    pub(crate) fn barrier(&self) -> Result<()> {
        self.check_running()?;
        let snap = self.barrier.seq.snap();
        let _barrier = self.barrier.mutex.lock();
        if self.barrier.seq.done(snap) {
            return Ok(());
        }
        self.barrier.seq.start();

        let (tx, rx) = channel::unbounded();
        let mut pending = 0usize;
        {
            let _ofl = self.ofl_lock.lock();
            for rdp in self.rda.iter() {
                if !rdp.is_online() {
                    if let Some(to) = self.next_online_cpu(rdp.cpu) {
                        self.rescue_inbox(rdp, to);
                    }
                    continue;
                }
                let mut cbs = rdp.lock_cbs();
                rdp.flush_inbox(&mut cbs);
                let tx = tx.clone();
                let record = CallbackRecord::entrained(Box::new(move || {
                    let _ = tx.send(());
                }));
                if cbs.entrain(record).is_ok() {
                    rdp.qlen.fetch_add(1, Ordering::Relaxed);
                    pending += 1;
                }
            }
        }
        drop(tx);
        if pending > 0 && !self.gp_in_progress() {
            self.request_gp_flags(GP_FLAG_INIT);
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(pending, "barrier entrained");
        }

        while pending > 0 {
            match rx.recv_timeout(WAIT_POLL_INTERVAL) {
                Ok(()) => pending -= 1,
                Err(RecvTimeoutError::Timeout) => self.check_running()?,
                Err(RecvTimeoutError::Disconnected) => return Err(RcuError::ShutDown),
            }
        }
        self.barrier.seq.end();
        self.stats.callbacks.record_barrier();
        Ok(())
    }
}
