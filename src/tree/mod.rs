//! Hierarchy of quiescent-state aggregation nodes
//!
//! Nodes live in an arena in breadth-first order: the root at index zero,
//! then each level in turn, leaves last. Every node points to its parent by
//! index. Reports travel leaf to root; a node's lock is released before its
//! parent's is taken, so locks are only ever acquired child before parent.

mod geometry;
mod node;

pub use geometry::{LevelInfo, TreeGeometry};
pub(crate) use node::{NodeState, RcuNode};

use std::ops::Range;

use parking_lot::MutexGuard;

/// Point-in-time copy of one node, for diagnostics and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Arena index
    pub index: usize,
    /// Depth, zero at the root
    pub level: usize,
    /// Parent arena index
    pub parent: Option<usize>,
    /// Bit in the parent's masks
    pub grpmask: u64,
    /// Contexts covered
    pub cpus: (usize, usize),
    /// Grace period the node was last initialized or cleaned up for
    pub gp_seq: u64,
    /// Children still owing a quiescent state
    pub qsmask: u64,
    /// Children taking part in the current grace period
    pub qsmaskinit: u64,
    /// Online children (leaves only)
    pub qsmaskinitnext: u64,
    /// Children still owing an expedited quiescent state
    pub expmask: u64,
    /// Children that have ever been online
    pub expmaskinit: u64,
    /// Furthest grace period requested through this node
    pub gp_seq_needed: u64,
}

/// The node arena
#[derive(Debug)]
pub(crate) struct RcuTree {
    geometry: TreeGeometry,
    nodes: Box<[RcuNode]>,
}

impl RcuTree {
    pub(crate) fn new(geometry: TreeGeometry) -> Self {
        let nr_cpus = geometry.nr_cpus();
        let depth = geometry.depth();
        let mut nodes = Vec::with_capacity(geometry.num_nodes());
        for (i, level) in geometry.levels().iter().enumerate() {
            for j in 0..level.count {
                let grplo = j * level.cpu_stride;
                let grphi = ((j + 1) * level.cpu_stride - 1).min(nr_cpus - 1);
                let (parent, grpnum) = if i == 0 {
                    (None, 0)
                } else {
                    let up = geometry.levels()[i - 1];
                    (Some(up.start + j / up.spread), (j % up.spread) as u32)
                };
                nodes.push(RcuNode::new(i, parent, grpnum, grplo, grphi, i == depth - 1));
            }
        }
        Self {
            geometry,
            nodes: nodes.into_boxed_slice(),
        }
    }

    pub(crate) fn geometry(&self) -> &TreeGeometry {
        &self.geometry
    }

    #[inline]
    pub(crate) fn node(&self, idx: usize) -> &RcuNode {
        &self.nodes[idx]
    }

    #[inline]
    pub(crate) fn root(&self) -> &RcuNode {
        &self.nodes[0]
    }

    /// Number of nodes
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Arena indices of the leaves
    pub(crate) fn leaves(&self) -> Range<usize> {
        let leaf = self.geometry.leaf_level();
        leaf.start..leaf.start + leaf.count
    }

    #[inline]
    pub(crate) fn leaf_of(&self, cpu: usize) -> usize {
        self.geometry.leaf_of(cpu)
    }

    /// Report quiescent states for the children in `mask` of node `idx`.
    ///
    /// `guard` is the node's held lock; it is released before the parent is
    /// locked. Reports for a grace period other than `gps` are dropped.
    /// Returns true when the root's `qsmask` became empty, in which case the
    /// coordinator must be woken.
    pub(crate) fn report_qs_rnp<'a>(
        &'a self,
        mut mask: u64,
        mut idx: usize,
        mut guard: MutexGuard<'a, NodeState>,
        gps: u64,
    ) -> bool {
        loop {
            let node = &self.nodes[idx];
            if node.gp_seq() != gps {
                return false;
            }
            debug_assert_eq!(
                guard.qsmask & mask,
                mask,
                "quiescent state reported twice to node {idx} for gp {gps}"
            );
            if guard.qsmask & mask == 0 {
                return false;
            }
            guard.qsmask &= !mask;
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(node = idx, mask, qsmask = guard.qsmask, gp_seq = gps, "qs reported");
            }
            if guard.qsmask != 0 {
                return false;
            }
            match node.parent {
                None => return true,
                Some(parent) => {
                    mask = node.grpmask;
                    drop(guard);
                    idx = parent;
                    // child lock released above
                    guard = self.nodes[idx].lock();
                }
            }
        }
    }

    /// Report expedited quiescent states for the contexts in `mask` of leaf `leaf`.
    ///
    /// Bits already reported are ignored. Returns the number of contexts newly
    /// reported and whether the root's `expmask` became empty.
    pub(crate) fn report_exp_cpus(&self, leaf: usize, mask: u64) -> (u32, bool) {
        let guard = self.nodes[leaf].lock();
        self.report_exp_rnp(leaf, mask, guard)
    }

    /// Like [`report_exp_cpus`](Self::report_exp_cpus) with the leaf already locked
    pub(crate) fn report_exp_rnp<'a>(
        &'a self,
        leaf: usize,
        mask: u64,
        mut guard: MutexGuard<'a, NodeState>,
    ) -> (u32, bool) {
        let mask = mask & guard.expmask;
        if mask == 0 {
            return (0, false);
        }
        guard.expmask &= !mask;
        let reported = mask.count_ones();
        let mut idx = leaf;
        loop {
            if guard.expmask != 0 {
                return (reported, false);
            }
            let node = &self.nodes[idx];
            let Some(parent) = node.parent else {
                return (reported, true);
            };
            let up = node.grpmask;
            drop(guard);
            idx = parent;
            guard = self.nodes[idx].lock();
            debug_assert_ne!(guard.expmask & up, 0, "expedited report lost at node {idx}");
            guard.expmask &= !up;
        }
    }

    /// A leaf gained its first online context: add it to its ancestors'
    /// `qsmaskinit`. The caller holds the leaf's lock.
    pub(crate) fn init_new_leaf(&self, leaf: usize) {
        let mut mask = self.nodes[leaf].grpmask;
        let mut cur = self.nodes[leaf].parent;
        while let Some(idx) = cur {
            let mut guard = self.nodes[idx].lock();
            let old = guard.qsmaskinit;
            guard.qsmaskinit |= mask;
            drop(guard);
            if old != 0 {
                return;
            }
            mask = self.nodes[idx].grpmask;
            cur = self.nodes[idx].parent;
        }
    }

    /// A leaf lost its last online context: remove it from its ancestors'
    /// `qsmaskinit`. Only called between grace periods.
    pub(crate) fn cleanup_dead_leaf(&self, leaf: usize) {
        let mut mask = self.nodes[leaf].grpmask;
        let mut cur = self.nodes[leaf].parent;
        while let Some(idx) = cur {
            let mut guard = self.nodes[idx].lock();
            guard.qsmaskinit &= !mask;
            debug_assert_eq!(guard.qsmask & mask, 0, "dead leaf still owed a report");
            if guard.qsmaskinit != 0 {
                return;
            }
            drop(guard);
            mask = self.nodes[idx].grpmask;
            cur = self.nodes[idx].parent;
        }
    }

    /// A leaf's `expmaskinit` went from empty to non-empty: propagate upwards.
    /// The caller holds the leaf's lock.
    pub(crate) fn propagate_expmaskinit(&self, leaf: usize) {
        let mut mask = self.nodes[leaf].grpmask;
        let mut cur = self.nodes[leaf].parent;
        while let Some(idx) = cur {
            let mut guard = self.nodes[idx].lock();
            let old = guard.expmaskinit;
            guard.expmaskinit |= mask;
            drop(guard);
            if old != 0 {
                return;
            }
            mask = self.nodes[idx].grpmask;
            cur = self.nodes[idx].parent;
        }
    }

    /// Copy every node's state
    pub(crate) fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let state = node.lock();
                NodeSnapshot {
                    index,
                    level: node.level,
                    parent: node.parent,
                    grpmask: node.grpmask,
                    cpus: (node.grplo, node.grphi),
                    gp_seq: node.gp_seq(),
                    qsmask: state.qsmask,
                    qsmaskinit: state.qsmaskinit,
                    qsmaskinitnext: state.qsmaskinitnext,
                    expmask: state.expmask,
                    expmaskinit: state.expmaskinit,
                    gp_seq_needed: state.gp_seq_needed,
                }
            })
            .collect()
    }
}
