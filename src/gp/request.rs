//! Funnel for grace-period requests
//!
//! A request walks from the context's leaf towards the root, recording the
//! wanted sequence in each node's `gp_seq_needed`. It stops at the first node
//! that already covers the request or is taking part in a grace period; the
//! coordinator's cleanup scan will find the recorded value there. Only a
//! request that reaches an idle root sets the `INIT` flag, so concurrent
//! requesters mostly stop at their own leaf.

use std::sync::atomic::Ordering;

use parking_lot::MutexGuard;

use crate::data::RcuData;
use crate::domain::RcuState;
use crate::gp::GP_FLAG_INIT;
use crate::seq::{cmp_ge, cmp_lt, seq_in_progress, seq_started};
use crate::tree::NodeState;

impl RcuState {
    /// Request the grace period ending at `req` on behalf of `rdp`.
    ///
    /// Holds the leaf lock throughout and at most one ancestor lock at a time.
    pub(crate) fn start_this_gp(&self, rdp: &RcuData, req: u64) {
        let start_idx = rdp.leaf;
        let start = self.tree.node(start_idx);
        let mut leaf = start.lock();
        let mut upper: Option<MutexGuard<'_, NodeState>> = None;
        let mut idx = start_idx;
        let mut wake = false;

        loop {
            let node = self.tree.node(idx);
            let state: &mut NodeState = match upper.as_mut() {
                Some(guard) => &mut **guard,
                None => &mut *leaf,
            };
            if cmp_ge(state.gp_seq_needed, req)
                || seq_started(start.gp_seq(), req)
                || (idx != start_idx && seq_in_progress(node.gp_seq()))
            {
                break;
            }
            state.gp_seq_needed = req;
            if seq_in_progress(start.gp_seq()) {
                // Cleanup of the leaf will pick the request up.
                break;
            }
            match node.parent {
                Some(parent) => {
                    drop(upper.take());
                    idx = parent;
                    upper = Some(self.tree.node(parent).lock());
                }
                None => {
                    if !self.gp_in_progress() {
                        self.gp_flags.fetch_or(GP_FLAG_INIT, Ordering::SeqCst);
                        wake = true;
                    }
                    break;
                }
            }
        }

        let needed = upper
            .as_ref()
            .map_or(leaf.gp_seq_needed, |guard| guard.gp_seq_needed);
        if cmp_lt(req, needed) {
            leaf.gp_seq_needed = needed;
            rdp.gp_seq_needed.store(needed, Ordering::Release);
        }
        drop(upper);
        drop(leaf);

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(cpu = rdp.cpu, req, stopped_at = idx, wake, "grace period requested");
        }
        if wake {
            self.wake_gp();
        }
    }
}
