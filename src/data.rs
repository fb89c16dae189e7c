//! Per-context quiescent-state record
//!
//! Fields a context updates on its own fast paths are atomics; anything that
//! must agree with the tree (`gp_seq`, `cpu_no_qs`, `core_needs_qs`) is
//! written under the context's leaf lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use parking_lot::{Mutex, MutexGuard};

use crate::cblist::{CallbackRecord, SegCbList};
use crate::seq::INITIAL_SEQ;

/// State of one context
#[derive(Debug)]
pub(crate) struct RcuData {
    /// Context index
    pub cpu: usize,
    /// Arena index of the leaf covering this context
    pub leaf: usize,
    /// Bit of this context in its leaf's masks
    pub grpmask: u64,

    /// Last grace period this context noticed
    pub gp_seq: AtomicU64,
    /// Furthest grace period this context has requested
    pub gp_seq_needed: AtomicU64,
    /// No quiescent state seen yet for `gp_seq`
    pub cpu_no_qs: AtomicBool,
    /// The tree still expects a report from this context for `gp_seq`
    pub core_needs_qs: AtomicBool,
    /// `gp_seq` fell far enough behind that comparisons may have wrapped
    pub gpwrap: AtomicBool,

    /// Currently taking part in grace periods
    pub online: AtomicBool,
    /// Has ever been online
    pub beenonline: AtomicBool,

    /// Read-side critical section nesting depth
    pub read_nesting: AtomicU32,
    /// Even while idle, odd while active
    pub dynticks: AtomicU64,
    /// `dynticks` as sampled by the first pass of the current grace period
    pub dynticks_snap: AtomicU64,
    /// The coordinator wants a quiescent state soon
    pub urgent_qs: AtomicBool,
    /// An expedited grace period is waiting for this context to leave its
    /// read-side critical section
    pub exp_deferred_qs: AtomicBool,

    /// Lock-free staging for new callbacks
    pub inbox: SegQueue<CallbackRecord>,
    /// Callbacks pushed since the last overload check
    pub inbox_since_check: AtomicUsize,
    /// Total callbacks held (inbox plus list)
    pub qlen: AtomicUsize,
    /// Overloaded as of the last check
    pub overloaded: AtomicBool,
    /// Callbacks invoked per drain
    pub blimit: AtomicUsize,

    cbs: Mutex<SegCbList<CallbackRecord>>,
}

impl RcuData {
    pub(crate) fn new(cpu: usize, leaf: usize, grpmask: u64, blimit: usize) -> Self {
        Self {
            cpu,
            leaf,
            grpmask,
            gp_seq: AtomicU64::new(INITIAL_SEQ),
            gp_seq_needed: AtomicU64::new(INITIAL_SEQ),
            cpu_no_qs: AtomicBool::new(true),
            core_needs_qs: AtomicBool::new(false),
            gpwrap: AtomicBool::new(false),
            online: AtomicBool::new(false),
            beenonline: AtomicBool::new(false),
            read_nesting: AtomicU32::new(0),
            dynticks: AtomicU64::new(1),
            dynticks_snap: AtomicU64::new(0),
            urgent_qs: AtomicBool::new(false),
            exp_deferred_qs: AtomicBool::new(false),
            inbox: SegQueue::new(),
            inbox_since_check: AtomicUsize::new(0),
            qlen: AtomicUsize::new(0),
            overloaded: AtomicBool::new(false),
            blimit: AtomicUsize::new(blimit),
            cbs: Mutex::new(SegCbList::new()),
        }
    }

    /// Lock the callback list. Node locks may be held; never take a node
    /// lock while holding this one.
    #[inline]
    pub(crate) fn lock_cbs(&self) -> MutexGuard<'_, SegCbList<CallbackRecord>> {
        self.cbs.lock()
    }

    #[inline]
    pub(crate) fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn in_read_section(&self) -> bool {
        self.read_nesting.load(Ordering::SeqCst) != 0
    }

    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        self.dynticks.load(Ordering::SeqCst) & 1 == 0
    }

    /// Move everything from the inbox into the list's NEXT segment.
    /// Returns the number moved.
    pub(crate) fn flush_inbox(&self, cbs: &mut SegCbList<CallbackRecord>) -> usize {
        let mut moved = 0;
        while let Some(record) = self.inbox.pop() {
            cbs.enqueue(record);
            moved += 1;
        }
        moved
    }
}
