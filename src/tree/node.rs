//! Hierarchy node

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::seq::INITIAL_SEQ;

/// Lock-protected state of a node
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeState {
    /// Children that still owe a quiescent state for the current grace period
    pub qsmask: u64,
    /// Children taking part in the current grace period
    pub qsmaskinit: u64,
    /// Online children as of now; applied to `qsmaskinit` at the next grace period.
    /// Only meaningful on leaves.
    pub qsmaskinitnext: u64,
    /// Children that still owe an expedited quiescent state
    pub expmask: u64,
    /// Children that have ever had an online context
    pub expmaskinit: u64,
    /// Furthest grace period requested through this node
    pub gp_seq_needed: u64,
    /// Callback-overloaded contexts (leaves only)
    pub cbovldmask: u64,
}

/// A node of the hierarchy
#[derive(Debug)]
pub(crate) struct RcuNode {
    /// Depth of this node, zero at the root
    pub level: usize,
    /// Arena index of the parent; `None` for the root
    pub parent: Option<usize>,
    /// Position of this node among its parent's children
    pub grpnum: u32,
    /// Bit this node occupies in its parent's masks
    pub grpmask: u64,
    /// Lowest context covered
    pub grplo: usize,
    /// Highest context covered
    pub grphi: usize,
    /// Whether this is a leaf node
    pub is_leaf: bool,
    gp_seq: AtomicU64,
    state: Mutex<NodeState>,
}

impl RcuNode {
    pub(crate) fn new(
        level: usize,
        parent: Option<usize>,
        grpnum: u32,
        grplo: usize,
        grphi: usize,
        is_leaf: bool,
    ) -> Self {
        Self {
            level,
            parent,
            grpnum,
            grpmask: if parent.is_some() { 1u64 << grpnum } else { 0 },
            grplo,
            grphi,
            is_leaf,
            gp_seq: AtomicU64::new(INITIAL_SEQ),
            state: Mutex::new(NodeState {
                gp_seq_needed: INITIAL_SEQ,
                ..NodeState::default()
            }),
        }
    }

    /// Lock this node.
    ///
    /// While holding a node's lock only its ancestors may be locked; never a
    /// descendant.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock()
    }

    /// Grace period this node has been initialized for; readable without the lock
    #[inline]
    pub(crate) fn gp_seq(&self) -> u64 {
        self.gp_seq.load(Ordering::Acquire)
    }

    /// Update the node's grace period; the caller holds the node lock
    #[inline]
    pub(crate) fn set_gp_seq(&self, _guard: &NodeState, gp_seq: u64) {
        self.gp_seq.store(gp_seq, Ordering::Release);
    }

    /// Bit of `cpu` in this leaf's masks
    #[inline]
    pub(crate) fn cpu_bit(&self, cpu: usize) -> u64 {
        debug_assert!(self.is_leaf);
        debug_assert!(cpu >= self.grplo && cpu <= self.grphi);
        1u64 << (cpu - self.grplo)
    }

    /// Contexts of this leaf whose bits are set in `mask`
    pub(crate) fn cpus_in(&self, mask: u64) -> impl Iterator<Item = usize> + '_ {
        (self.grplo..=self.grphi).filter(move |&cpu| mask & self.cpu_bit(cpu) != 0)
    }
}
