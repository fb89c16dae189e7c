//! Bringing contexts online and taking them offline
//!
//! Both directions run under the domain's hotplug lock, which also excludes
//! the coordinator's ONOFF phase and callback barriers. Changes land in the
//! leaf's `qsmaskinitnext` and take effect at the next grace period; a
//! departing context reports whatever the current grace periods still expect
//! from it.

use std::sync::atomic::Ordering;

use crate::data::RcuData;
use crate::domain::RcuState;
use crate::error::{RcuError, Result};
use crate::seq::seq_snap;

impl RcuState {
    pub(crate) fn cpu_coming_online(&self, cpu: usize) -> Result<()> {
        let rdp = self.rdp(cpu)?;
        let ofl = self.ofl_lock.lock();
        if rdp.is_online() {
            return Err(RcuError::CpuAlreadyOnline(cpu));
        }

        let node = self.tree.node(rdp.leaf);
        let root_done = {
            let mut guard = node.lock();
            let gps = node.gp_seq();
            rdp.gp_seq.store(gps, Ordering::Release);
            rdp.gp_seq_needed.store(guard.gp_seq_needed, Ordering::Release);
            rdp.cpu_no_qs.store(true, Ordering::SeqCst);
            rdp.core_needs_qs.store(false, Ordering::SeqCst);
            rdp.gpwrap.store(false, Ordering::Release);
            rdp.urgent_qs.store(false, Ordering::Relaxed);
            rdp.exp_deferred_qs.store(false, Ordering::SeqCst);
            rdp.blimit.store(self.config.blimit, Ordering::Relaxed);
            rdp.inbox_since_check.store(0, Ordering::Relaxed);
            self.exit_idle_rdp(rdp);

            if guard.expmaskinit & rdp.grpmask == 0 {
                let first = guard.expmaskinit == 0;
                guard.expmaskinit |= rdp.grpmask;
                if first {
                    self.tree.propagate_expmaskinit(rdp.leaf);
                }
            }
            guard.qsmaskinitnext |= rdp.grpmask;
            rdp.online.store(true, Ordering::Release);
            rdp.beenonline.store(true, Ordering::Relaxed);

            if guard.qsmask & rdp.grpmask != 0 {
                self.tree.report_qs_rnp(rdp.grpmask, rdp.leaf, guard, gps)
            } else {
                false
            }
        };
        let online = self.n_online.fetch_add(1, Ordering::AcqRel) + 1;
        self.stats.hotplug.onlined.fetch_add(1, Ordering::Relaxed);
        drop(ofl);

        if root_done {
            self.wake_gp();
        }
        tracing::info!(cpu, online, "context online");
        Ok(())
    }

    pub(crate) fn cpu_going_offline(&self, cpu: usize) -> Result<()> {
        let rdp = self.rdp(cpu)?;
        let ofl = self.ofl_lock.lock();
        if !rdp.is_online() {
            return Err(RcuError::CpuOffline(cpu));
        }
        if rdp.in_read_section() {
            return Err(RcuError::ReadSideActive(cpu));
        }
        let target = match self.next_online_cpu(cpu) {
            Some(target) if self.n_online.load(Ordering::Acquire) > 1 => target,
            _ => return Err(RcuError::LastOnlineCpu(cpu)),
        };

        let node = self.tree.node(rdp.leaf);
        let root_done = {
            let mut guard = node.lock();
            guard.qsmaskinitnext &= !rdp.grpmask;
            rdp.online.store(false, Ordering::Release);
            if guard.qsmask & rdp.grpmask != 0 {
                self.stats.gp.record_qs(1);
                self.tree.report_qs_rnp(rdp.grpmask, rdp.leaf, guard, node.gp_seq())
            } else {
                false
            }
        };
        rdp.exp_deferred_qs.store(false, Ordering::SeqCst);
        self.report_exp_qs(rdp);
        rdp.urgent_qs.store(false, Ordering::Relaxed);
        rdp.core_needs_qs.store(false, Ordering::SeqCst);

        let moved = self.migrate_callbacks(rdp, &self.rda[target]);
        let online = self.n_online.fetch_sub(1, Ordering::AcqRel) - 1;
        self.stats.hotplug.offlined.fetch_add(1, Ordering::Relaxed);
        drop(ofl);

        if root_done {
            self.wake_gp();
        }
        tracing::info!(cpu, online, migrated = moved, to = target, "context offline");
        Ok(())
    }

    /// Move every callback of `from` onto `to`. Callbacks whose grace period
    /// already ended stay ready; the rest wait for a fresh one.
    fn migrate_callbacks(&self, from: &RcuData, to: &RcuData) -> usize {
        let cur = self.gp_seq.load();
        let mut taken = {
            let mut src = from.lock_cbs();
            from.flush_inbox(&mut src);
            src.advance(cur);
            std::mem::take(&mut *src)
        };
        let moved = taken.len();
        if moved == 0 {
            return 0;
        }

        let target = seq_snap(cur);
        let need = {
            let mut dst = to.lock_cbs();
            to.flush_inbox(&mut dst);
            dst.advance(cur);
            dst.merge(&mut taken);
            from.qlen.fetch_sub(moved, Ordering::Relaxed);
            to.qlen.fetch_add(moved, Ordering::Relaxed);
            dst.accelerate(target)
        };
        if need {
            self.start_this_gp(to, target);
        }
        self.stats.callbacks.record_migrated(moved as u64);
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cblist::CallbackRecord;
    use crate::config::RcuConfig;
    use crate::kick::NoopKicker;

    fn state(nr_cpus: usize) -> RcuState {
        let config = RcuConfig::new()
            .with_nr_cpus(nr_cpus)
            .with_fanout(2)
            .with_fanout_leaf(2);
        let rsp = RcuState::new(config, Box::new(NoopKicker)).unwrap();
        for cpu in 0..nr_cpus {
            rsp.cpu_coming_online(cpu).unwrap();
        }
        rsp
    }

    #[test]
    fn test_online_sets_masks() {
        let rsp = state(5);
        let leaf = rsp.tree.node(rsp.rda[4].leaf).lock().clone();
        assert_eq!(leaf.qsmaskinitnext, 0b1);
        assert_eq!(leaf.expmaskinit, 0b1);
        assert_eq!(rsp.tree.root().lock().expmaskinit, 0b11);
        assert_eq!(rsp.n_online.load(Ordering::Relaxed), 5);
        assert!(matches!(
            rsp.cpu_coming_online(4),
            Err(RcuError::CpuAlreadyOnline(4))
        ));
    }

    #[test]
    fn test_last_online_context_stays() {
        let rsp = state(2);
        rsp.cpu_going_offline(0).unwrap();
        assert!(matches!(
            rsp.cpu_going_offline(1),
            Err(RcuError::LastOnlineCpu(1))
        ));
        assert!(matches!(rsp.cpu_going_offline(0), Err(RcuError::CpuOffline(0))));
    }

    #[test]
    fn test_offline_refused_in_read_section() {
        let rsp = state(2);
        rsp.rda[1].read_nesting.fetch_add(1, Ordering::SeqCst);
        assert!(matches!(
            rsp.cpu_going_offline(1),
            Err(RcuError::ReadSideActive(1))
        ));
        assert!(rsp.rda[1].is_online());
    }

    #[test]
    fn test_offline_migrates_callbacks() {
        let rsp = state(4);
        for _ in 0..3 {
            rsp.enqueue(1, Box::new(|| {})).unwrap();
        }
        rsp.cpu_going_offline(1).unwrap();
        assert_eq!(rsp.rda[1].qlen.load(Ordering::Relaxed), 0);
        assert!(rsp.rda[1].lock_cbs().is_empty());
        assert_eq!(rsp.rda[2].qlen.load(Ordering::Relaxed), 3);
        assert_eq!(rsp.rda[2].lock_cbs().len(), 3);
        assert_eq!(rsp.stats.callbacks.migrated.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_offline_between_count_and_push() {
        let rsp = state(4);
        let from = &rsp.rda[1];

        // An enqueue on context 1 has counted its record but not pushed it.
        from.qlen.fetch_add(1, Ordering::Relaxed);
        rsp.cpu_going_offline(1).unwrap();
        assert_eq!(from.qlen.load(Ordering::Relaxed), 1);
        assert_eq!(rsp.rda[2].qlen.load(Ordering::Relaxed), 0);

        // The push lands in the offline inbox and is rescued later.
        from.inbox
            .push(CallbackRecord::new(Box::new(|| {}), rsp.gp_seq.load()));
        assert_eq!(rsp.rescue_inbox(from, 2), 1);
        assert_eq!(from.qlen.load(Ordering::Relaxed), 0);
        assert_eq!(rsp.rda[2].qlen.load(Ordering::Relaxed), 1);
        assert_eq!(rsp.snapshot_stats().callbacks_pending, 1);
    }

    #[test]
    fn test_offline_after_enqueue_keeps_counts() {
        let rsp = state(4);
        rsp.enqueue(1, Box::new(|| {})).unwrap();
        rsp.cpu_going_offline(1).unwrap();
        assert_eq!(rsp.rda[1].qlen.load(Ordering::Relaxed), 0);
        assert_eq!(rsp.rda[2].qlen.load(Ordering::Relaxed), 1);

        rsp.enqueue(2, Box::new(|| {})).unwrap();
        assert_eq!(rsp.rda[2].qlen.load(Ordering::Relaxed), 2);
        assert_eq!(rsp.snapshot_stats().callbacks_pending, 2);
    }

    #[test]
    fn test_offline_then_online_again() {
        let rsp = state(4);
        rsp.cpu_going_offline(3).unwrap();
        let leaf = rsp.rda[3].leaf;
        assert_eq!(rsp.tree.node(leaf).lock().qsmaskinitnext, 0b01);
        // expmaskinit remembers contexts that were ever online
        assert_eq!(rsp.tree.node(leaf).lock().expmaskinit, 0b11);

        rsp.cpu_coming_online(3).unwrap();
        assert_eq!(rsp.tree.node(leaf).lock().qsmaskinitnext, 0b11);
        assert_eq!(rsp.stats.hotplug.onlined.load(Ordering::Relaxed), 5);
        assert_eq!(rsp.stats.hotplug.offlined.load(Ordering::Relaxed), 1);
    }
}
