//! The coordinator thread
//!
//! Waits for a request, initializes the tree for a new grace period, forces
//! quiescent states from idle or offline contexts until the root is clear,
//! then cleans up and hands finished callbacks back to their contexts.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::domain::RcuState;
use crate::error::Result;
use crate::gp::{GpState, GP_FLAG_FQS, GP_FLAG_INIT};
use crate::kick::KickReason;
use crate::seq::{cmp_lt, seq_end_val, seq_snap};

/// Lower bound for a forcing interval shortened by callback overload
const MIN_OVERLOAD_FQS_DELAY: Duration = Duration::from_millis(1);

/// Spawn the coordinator thread for `rsp`
pub(crate) fn spawn_coordinator(rsp: Arc<RcuState>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(rsp.config.coordinator_name.clone())
        .spawn(move || gp_kthread(&rsp))?;
    Ok(handle)
}

fn gp_kthread(rsp: &RcuState) {
    tracing::info!(name = %rsp.config.coordinator_name, "coordinator started");
    loop {
        rsp.gp_state.store(GpState::WaitGps);
        {
            let mut wq = rsp.gp_wq.lock();
            while rsp.gp_flags.load(Ordering::SeqCst) & GP_FLAG_INIT == 0 && !rsp.is_shutdown() {
                rsp.gp_wq_cv.wait(&mut wq);
            }
        }
        if rsp.is_shutdown() {
            break;
        }
        rsp.gp_state.store(GpState::DoneGps);

        let started = Instant::now();
        if !gp_init(rsp) {
            continue;
        }
        if !fqs_loop(rsp) {
            break;
        }
        gp_cleanup(rsp, started);
    }
    rsp.gp_state.store(GpState::Idle);
    tracing::info!(gp_seq = rsp.gp_seq.load(), "coordinator stopped");
}

/// Start a grace period. Returns false if there was nothing to start.
fn gp_init(rsp: &RcuState) -> bool {
    let flags = rsp.gp_flags.swap(0, Ordering::SeqCst);
    if flags & GP_FLAG_INIT == 0 || rsp.gp_in_progress() {
        return false;
    }

    let absorbed = absorb_inboxes(rsp);
    let gps = {
        let _root = rsp.tree.root().lock();
        rsp.gp_seq.start()
    };
    rsp.stats.gp.record_start();

    // Apply hotplug changes buffered since the last grace period.
    rsp.gp_state.store(GpState::Onoff);
    {
        let _ofl = rsp.ofl_lock.lock();
        for leaf in rsp.tree.leaves() {
            let mut guard = rsp.tree.node(leaf).lock();
            if guard.qsmaskinit == guard.qsmaskinitnext {
                continue;
            }
            let was_empty = guard.qsmaskinit == 0;
            guard.qsmaskinit = guard.qsmaskinitnext;
            let is_empty = guard.qsmaskinit == 0;
            if was_empty && !is_empty {
                rsp.tree.init_new_leaf(leaf);
            } else if !was_empty && is_empty {
                rsp.tree.cleanup_dead_leaf(leaf);
            }
        }
    }

    rsp.gp_state.store(GpState::Init);
    let mut root_done = false;
    for idx in 0..rsp.tree.len() {
        let node = rsp.tree.node(idx);
        let mut guard = node.lock();
        guard.qsmask = guard.qsmaskinit;
        node.set_gp_seq(&guard, gps);
        if node.is_leaf {
            // Contexts that went offline after the ONOFF phase.
            let gone = guard.qsmask & !guard.qsmaskinitnext;
            if gone != 0 && rsp.tree.report_qs_rnp(gone, idx, guard, gps) {
                root_done = true;
            }
        }
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(gp_seq = gps, absorbed, root_done, "grace period started");
    }
    true
}

/// Move every online context's inbox into its list, waiting on the grace
/// period about to start
fn absorb_inboxes(rsp: &RcuState) -> usize {
    let cur = rsp.gp_seq.load();
    let target = seq_snap(cur);
    let mut absorbed = 0;
    for rdp in rsp.rda.iter() {
        if rdp.inbox.is_empty() {
            continue;
        }
        let mut cbs = rdp.lock_cbs();
        if !rdp.is_online() {
            continue;
        }
        absorbed += rdp.flush_inbox(&mut cbs);
        cbs.advance(cur);
        cbs.accelerate(target);
    }
    absorbed
}

fn root_quiescent(rsp: &RcuState) -> bool {
    rsp.tree.root().lock().qsmask == 0
}

/// Wait for the root to clear, forcing quiescent states at intervals.
/// Returns false on shutdown.
fn fqs_loop(rsp: &RcuState) -> bool {
    let mut first = true;
    loop {
        let base = if first {
            rsp.config.first_fqs_delay
        } else {
            rsp.config.next_fqs_delay
        };
        let delay = if rsp.cbovld.load(Ordering::Relaxed) {
            ((base + Duration::from_millis(2)) / 3).max(MIN_OVERLOAD_FQS_DELAY)
        } else {
            base
        };

        rsp.gp_state.store(GpState::WaitFqs);
        let deadline = Instant::now() + delay;
        {
            let mut wq = rsp.gp_wq.lock();
            loop {
                if rsp.is_shutdown() {
                    return false;
                }
                if root_quiescent(rsp) || rsp.gp_flags.load(Ordering::SeqCst) & GP_FLAG_FQS != 0 {
                    break;
                }
                if rsp.gp_wq_cv.wait_until(&mut wq, deadline).timed_out() {
                    break;
                }
            }
        }

        if root_quiescent(rsp) {
            return true;
        }
        rsp.gp_state.store(GpState::DoingFqs);
        rsp.gp_flags.fetch_and(!GP_FLAG_FQS, Ordering::SeqCst);
        force_qs(rsp, first);
        first = false;
    }
}

/// One force-quiescent-state pass over the leaves still owing reports.
///
/// The first pass samples every holdout's idle counter; later passes report
/// contexts that are idle, have been idle since the sample, or are offline,
/// and kick the rest.
fn force_qs(rsp: &RcuState, first: bool) {
    let mut kicks = Vec::new();
    let mut reported = 0u64;
    for leaf in rsp.tree.leaves() {
        let node = rsp.tree.node(leaf);
        let guard = node.lock();
        if guard.qsmask == 0 {
            continue;
        }
        let gps = node.gp_seq();
        let mut mask = 0u64;
        for cpu in node.cpus_in(guard.qsmask) {
            let rdp = &rsp.rda[cpu];
            if cmp_lt(rdp.gp_seq.load(Ordering::Acquire).wrapping_add(u64::MAX / 4), gps) {
                rdp.gpwrap.store(true, Ordering::Release);
            }
            let quiet = if !rdp.is_online() {
                true
            } else if first {
                let snap = rdp.dynticks.load(Ordering::SeqCst);
                rdp.dynticks_snap.store(snap, Ordering::Relaxed);
                snap & 1 == 0
            } else {
                let cur = rdp.dynticks.load(Ordering::SeqCst);
                cur & 1 == 0 || cur != rdp.dynticks_snap.load(Ordering::Relaxed)
            };
            if quiet {
                mask |= rdp.grpmask;
            } else if !first {
                rdp.urgent_qs.store(true, Ordering::SeqCst);
                kicks.push(cpu);
            }
        }
        if mask != 0 {
            reported += u64::from(mask.count_ones());
            rsp.tree.report_qs_rnp(mask, leaf, guard, gps);
        }
    }

    rsp.stats.gp.record_fqs();
    rsp.stats.gp.record_qs(reported);
    rsp.stats.gp.record_kicks(kicks.len() as u64);
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(
            gp_seq = rsp.gp_seq.load(),
            first,
            reported,
            kicked = kicks.len(),
            "force-quiescent-state pass"
        );
    }
    for cpu in kicks {
        rsp.kicker.kick(cpu, KickReason::ForceQuiescentState);
    }
}

/// End the grace period and hand finished callbacks back to their contexts
fn gp_cleanup(rsp: &RcuState, started: Instant) {
    rsp.gp_state.store(GpState::Cleanup);
    let new = seq_end_val(rsp.gp_seq.load());
    let mut needgp = false;
    let mut overloaded = false;

    for idx in 0..rsp.tree.len() {
        let node = rsp.tree.node(idx);
        let mut guard = node.lock();
        debug_assert_eq!(guard.qsmask, 0, "node {idx} still owes reports at cleanup");
        node.set_gp_seq(&guard, new);
        if cmp_lt(new, guard.gp_seq_needed) {
            needgp = true;
        } else {
            guard.gp_seq_needed = new;
        }
        if node.is_leaf {
            let mut ovld = 0u64;
            for cpu in node.grplo..=node.grphi {
                let rdp = &rsp.rda[cpu];
                let over = rdp.qlen.load(Ordering::Relaxed) >= rsp.config.qovld;
                rdp.overloaded.store(over, Ordering::Relaxed);
                if over {
                    ovld |= rdp.grpmask;
                }
            }
            guard.cbovldmask = ovld;
            overloaded |= ovld != 0;
        }
    }
    rsp.cbovld.store(overloaded, Ordering::Relaxed);

    {
        let root = rsp.tree.root().lock();
        let ended = rsp.gp_seq.end();
        debug_assert_eq!(ended, new);
        if cmp_lt(ended, root.gp_seq_needed) {
            needgp = true;
        }
        rsp.gp_state.store(GpState::Cleaned);
        if needgp {
            rsp.gp_flags.fetch_or(GP_FLAG_INIT, Ordering::SeqCst);
        }
    }

    let elapsed = started.elapsed();
    rsp.stats.gp.record_end(elapsed);
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!(gp_seq = new, ?elapsed, needgp, overloaded, "grace period ended");
    }
    rsp.notify_gp_done();

    sweep_callbacks(rsp);
    rsp.gp_state.store(GpState::Idle);
}

/// Advance and re-accelerate every online context's callbacks; hand
/// callbacks stranded on offline contexts to an online one
fn sweep_callbacks(rsp: &RcuState) {
    for rdp in rsp.rda.iter() {
        if rdp.is_online() {
            rsp.process_callbacks(rdp);
        } else if !rdp.inbox.is_empty() {
            if let Some(to) = rsp.next_online_cpu(rdp.cpu) {
                rsp.rescue_inbox(rdp, to);
            }
        }
    }
}
