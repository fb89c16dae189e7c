//! Grace-period domain
//!
//! [`GracePeriodDomain`] owns the node tree, one record per context, and the
//! coordinator thread. Each context index is driven by one owner thread at a
//! time; that thread calls the per-context operations (`read_lock`,
//! `report_quiescent_state`, `check_and_report`, ...) for it.
//!
//! ```rust,ignore
//! use oxircu::{GracePeriodDomain, RcuConfig};
//!
//! let domain = GracePeriodDomain::new(RcuConfig::new().with_nr_cpus(4))?;
//! {
//!     let _guard = domain.read_lock(0)?;
//!     // read shared data
//! }
//! domain.enqueue(1, || println!("reclaimed"))?;
//! domain.check_and_report(1)?;
//! ```

mod callbacks;
mod polled;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};

use crate::config::RcuConfig;
use crate::data::RcuData;
use crate::error::{RcuError, Result};
use crate::expedited::ExpState;
use crate::gp::{spawn_coordinator, AtomicGpState, GpState};
use crate::kick::{ContextKicker, NoopKicker};
use crate::seq::{cmp_lt, seq_completed_gp, seq_in_progress, seq_new_gp, AtomicSeq};
use crate::stats::{RcuStats, RcuStatsSnapshot};
use crate::tree::{NodeSnapshot, RcuTree, TreeGeometry};

pub(crate) use callbacks::BarrierState;

/// State shared between the handle, its read guards and the coordinator
pub(crate) struct RcuState {
    pub(crate) config: RcuConfig,
    pub(crate) tree: RcuTree,
    pub(crate) rda: Box<[CachePadded<RcuData>]>,

    /// Global grace-period sequence; written by the coordinator under the
    /// root lock
    pub(crate) gp_seq: AtomicSeq,
    pub(crate) gp_state: AtomicGpState,
    pub(crate) gp_flags: AtomicU8,
    /// Coordinator wait queue
    pub(crate) gp_wq: Mutex<()>,
    pub(crate) gp_wq_cv: Condvar,
    /// Grace-period completion wait queue
    pub(crate) gp_done: Mutex<()>,
    pub(crate) gp_done_cv: Condvar,

    /// Serializes hotplug against the ONOFF phase and barriers
    pub(crate) ofl_lock: Mutex<()>,
    /// Online contexts; written under `ofl_lock`
    pub(crate) n_online: AtomicUsize,
    /// Some context holds at least `qovld` callbacks
    pub(crate) cbovld: AtomicBool,

    pub(crate) exp: ExpState,
    pub(crate) barrier: BarrierState,
    pub(crate) kicker: Box<dyn ContextKicker>,
    pub(crate) stats: RcuStats,
    pub(crate) shutdown: AtomicBool,
}

impl RcuState {
    pub(crate) fn new(config: RcuConfig, kicker: Box<dyn ContextKicker>) -> Result<Self> {
        config.validate()?;
        let geometry = TreeGeometry::new(config.nr_cpus, config.fanout, config.fanout_leaf);
        let tree = RcuTree::new(geometry);
        let rda = (0..config.nr_cpus)
            .map(|cpu| {
                let leaf = tree.leaf_of(cpu);
                let grpmask = tree.node(leaf).cpu_bit(cpu);
                CachePadded::new(RcuData::new(cpu, leaf, grpmask, config.blimit))
            })
            .collect();

        Ok(Self {
            config,
            tree,
            rda,
            gp_seq: AtomicSeq::default(),
            gp_state: AtomicGpState::new(),
            gp_flags: AtomicU8::new(0),
            gp_wq: Mutex::new(()),
            gp_wq_cv: Condvar::new(),
            gp_done: Mutex::new(()),
            gp_done_cv: Condvar::new(),
            ofl_lock: Mutex::new(()),
            n_online: AtomicUsize::new(0),
            cbovld: AtomicBool::new(false),
            exp: ExpState::new(),
            barrier: BarrierState::new(),
            kicker,
            stats: RcuStats::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    #[inline]
    pub(crate) fn rdp(&self, cpu: usize) -> Result<&RcuData> {
        self.rda.get(cpu).map(|rdp| &**rdp).ok_or(RcuError::InvalidCpu {
            cpu,
            nr_cpus: self.rda.len(),
        })
    }

    #[inline]
    pub(crate) fn online_rdp(&self, cpu: usize) -> Result<&RcuData> {
        let rdp = self.rdp(cpu)?;
        if !rdp.is_online() {
            return Err(RcuError::CpuOffline(cpu));
        }
        Ok(rdp)
    }

    #[inline]
    pub(crate) fn check_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RcuError::ShutDown);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn gp_in_progress(&self) -> bool {
        seq_in_progress(self.gp_seq.load())
    }

    /// Wake the coordinator
    pub(crate) fn wake_gp(&self) {
        let _wq = self.gp_wq.lock();
        self.gp_wq_cv.notify_one();
    }

    /// Set coordinator request flags and wake it if any were new
    pub(crate) fn request_gp_flags(&self, flags: u8) {
        let old = self.gp_flags.fetch_or(flags, Ordering::SeqCst);
        if old & flags != flags {
            self.wake_gp();
        }
    }

    /// Wake everyone waiting for a grace period to end
    pub(crate) fn notify_gp_done(&self) {
        let _done = self.gp_done.lock();
        self.gp_done_cv.notify_all();
    }

    // ============ Quiescent-state tracking ============

    pub(crate) fn report_quiescent_state(&self, cpu: usize) -> Result<bool> {
        let rdp = self.online_rdp(cpu)?;
        if rdp.in_read_section() {
            return Ok(false);
        }
        rdp.cpu_no_qs.store(false, Ordering::SeqCst);
        Ok(true)
    }

    pub(crate) fn check_and_report(&self, cpu: usize) -> Result<usize> {
        self.check_running()?;
        let rdp = self.rdp(cpu)?;
        if !rdp.is_online() {
            return Ok(0);
        }

        self.note_gp_changes(rdp);
        if !rdp.in_read_section() {
            if rdp.urgent_qs.swap(false, Ordering::SeqCst) {
                rdp.cpu_no_qs.store(false, Ordering::SeqCst);
            }
            if rdp.exp_deferred_qs.swap(false, Ordering::SeqCst) {
                self.report_exp_qs(rdp);
            }
        }
        self.check_quiescent_state(rdp);
        self.process_callbacks(rdp);
        Ok(self.do_batch(rdp))
    }

    /// Bring the context's view of the grace period up to date with its leaf
    pub(crate) fn note_gp_changes(&self, rdp: &RcuData) {
        let node = self.tree.node(rdp.leaf);
        if rdp.gp_seq.load(Ordering::Acquire) == node.gp_seq()
            && !rdp.gpwrap.load(Ordering::Acquire)
        {
            return;
        }

        let leaf = node.lock();
        let node_seq = node.gp_seq();
        let old = rdp.gp_seq.load(Ordering::Acquire);
        let wrapped = rdp.gpwrap.load(Ordering::Acquire);
        if old == node_seq && !wrapped {
            return;
        }
        if seq_completed_gp(old, node_seq) || wrapped {
            rdp.core_needs_qs.store(false, Ordering::SeqCst);
        }
        if seq_new_gp(old, node_seq) || wrapped {
            let need_qs = leaf.qsmask & rdp.grpmask != 0;
            rdp.cpu_no_qs.store(need_qs, Ordering::SeqCst);
            rdp.core_needs_qs.store(need_qs, Ordering::SeqCst);
        }
        rdp.gp_seq.store(node_seq, Ordering::Release);
        if cmp_lt(rdp.gp_seq_needed.load(Ordering::Acquire), leaf.gp_seq_needed) || wrapped {
            rdp.gp_seq_needed.store(leaf.gp_seq_needed, Ordering::Release);
        }
        rdp.gpwrap.store(false, Ordering::Release);
        drop(leaf);

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(cpu = rdp.cpu, old, new = node_seq, "noted grace-period change");
        }
    }

    /// Pass a locally recorded quiescent state up to the leaf
    pub(crate) fn check_quiescent_state(&self, rdp: &RcuData) {
        if !rdp.core_needs_qs.load(Ordering::SeqCst) || rdp.cpu_no_qs.load(Ordering::SeqCst) {
            return;
        }
        let node = self.tree.node(rdp.leaf);
        let leaf = node.lock();
        let gps = node.gp_seq();
        if rdp.cpu_no_qs.load(Ordering::SeqCst)
            || rdp.gp_seq.load(Ordering::Acquire) != gps
            || rdp.gpwrap.load(Ordering::Acquire)
        {
            // The quiescent state predates the grace period the leaf is in.
            rdp.cpu_no_qs.store(true, Ordering::SeqCst);
            return;
        }
        rdp.core_needs_qs.store(false, Ordering::SeqCst);
        if leaf.qsmask & rdp.grpmask == 0 {
            return;
        }
        self.stats.gp.record_qs(1);
        if self.tree.report_qs_rnp(rdp.grpmask, rdp.leaf, leaf, gps) {
            self.wake_gp();
        }
    }

    pub(crate) fn read_unlock(&self, rdp: &RcuData) {
        let prev = rdp.read_nesting.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "read_unlock without read_lock on context {}", rdp.cpu);
        if prev == 1
            && rdp.exp_deferred_qs.load(Ordering::SeqCst)
            && rdp.exp_deferred_qs.swap(false, Ordering::SeqCst)
        {
            self.report_exp_qs(rdp);
        }
    }

    pub(crate) fn enter_idle(&self, cpu: usize) -> Result<()> {
        let rdp = self.online_rdp(cpu)?;
        if rdp.in_read_section() {
            return Err(RcuError::ReadSideActive(cpu));
        }
        if rdp.is_idle() {
            return Ok(());
        }
        rdp.dynticks.fetch_add(1, Ordering::SeqCst);
        rdp.urgent_qs.store(false, Ordering::Relaxed);
        if rdp.exp_deferred_qs.swap(false, Ordering::SeqCst) {
            self.report_exp_qs(rdp);
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(cpu, "entered idle");
        }
        Ok(())
    }

    pub(crate) fn exit_idle_rdp(&self, rdp: &RcuData) {
        if rdp.is_idle() {
            rdp.dynticks.fetch_add(1, Ordering::SeqCst);
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!(cpu = rdp.cpu, "left idle");
            }
        }
    }

    pub(crate) fn snapshot_stats(&self) -> RcuStatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.gp_seq = self.gp_seq.load();
        snapshot.gp_state = self.gp_state.load().to_string();
        snapshot.online_cpus = self.n_online.load(Ordering::Acquire);
        snapshot.callbacks_pending = self
            .rda
            .iter()
            .map(|rdp| rdp.qlen.load(Ordering::Relaxed) as u64)
            .sum();
        snapshot.callback_overloaded = self.cbovld.load(Ordering::Relaxed);
        snapshot
    }
}

/// A grace-period domain
///
/// Dropping the domain stops its coordinator thread. Callbacks still queued
/// at that point are dropped without being invoked.
pub struct GracePeriodDomain {
    state: Arc<RcuState>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl GracePeriodDomain {
    /// Create a domain whose contexts tick on their own
    pub fn new(config: RcuConfig) -> Result<Self> {
        Self::with_kicker(config, NoopKicker)
    }

    /// Create a domain that prods lagging contexts through `kicker`.
    ///
    /// Every context starts online. The coordinator thread is spawned here.
    pub fn with_kicker(config: RcuConfig, kicker: impl ContextKicker) -> Result<Self> {
        let state = Arc::new(RcuState::new(config, Box::new(kicker))?);
        for cpu in 0..state.config.nr_cpus {
            state.cpu_coming_online(cpu)?;
        }
        let handle = spawn_coordinator(Arc::clone(&state))?;
        tracing::info!(
            nr_cpus = state.config.nr_cpus,
            levels = state.tree.geometry().depth(),
            nodes = state.tree.len(),
            "grace-period domain created"
        );
        Ok(Self {
            state,
            coordinator: Mutex::new(Some(handle)),
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &RcuConfig {
        &self.state.config
    }

    /// Number of contexts
    pub fn nr_cpus(&self) -> usize {
        self.state.config.nr_cpus
    }

    /// Shape of the node tree
    pub fn geometry(&self) -> &TreeGeometry {
        self.state.tree.geometry()
    }

    /// Enter a read-side critical section on `cpu`.
    ///
    /// Sections nest. An idle context leaves idle first.
    pub fn read_lock(&self, cpu: usize) -> Result<ReadGuard<'_>> {
        let rdp = self.state.online_rdp(cpu)?;
        self.state.exit_idle_rdp(rdp);
        rdp.read_nesting.fetch_add(1, Ordering::SeqCst);
        Ok(ReadGuard {
            state: &self.state,
            rdp,
            _not_send: PhantomData,
        })
    }

    /// Record that `cpu` passed through a quiescent state.
    ///
    /// Only touches the context's own record; the report reaches the tree at
    /// the next [`check_and_report`](Self::check_and_report). Returns false
    /// when refused because `cpu` is inside a read-side critical section.
    pub fn report_quiescent_state(&self, cpu: usize) -> Result<bool> {
        self.state.report_quiescent_state(cpu)
    }

    /// Periodic per-context hook.
    ///
    /// Notices grace-period changes, reports pending quiescent states,
    /// requests grace periods for new callbacks and invokes ready ones.
    /// Returns the number of callbacks invoked; zero for an offline context.
    pub fn check_and_report(&self, cpu: usize) -> Result<usize> {
        self.state.check_and_report(cpu)
    }

    /// Put `cpu` into an extended quiescent state
    pub fn enter_idle(&self, cpu: usize) -> Result<()> {
        self.state.enter_idle(cpu)
    }

    /// Take `cpu` out of its extended quiescent state
    pub fn exit_idle(&self, cpu: usize) -> Result<()> {
        let rdp = self.state.online_rdp(cpu)?;
        self.state.exit_idle_rdp(rdp);
        Ok(())
    }

    /// Whether `cpu` is in an extended quiescent state
    pub fn is_idle(&self, cpu: usize) -> Result<bool> {
        Ok(self.state.rdp(cpu)?.is_idle())
    }

    /// Whether `cpu` is online
    pub fn is_online(&self, cpu: usize) -> Result<bool> {
        Ok(self.state.rdp(cpu)?.is_online())
    }

    /// Indices of the online contexts
    pub fn online_cpus(&self) -> Vec<usize> {
        self.state
            .rda
            .iter()
            .filter(|rdp| rdp.is_online())
            .map(|rdp| rdp.cpu)
            .collect()
    }

    /// Queue `func` to run on `cpu` after a full grace period
    ///
    /// The push itself takes no locks. The first request in an idle period
    /// also wakes the coordinator, which briefly takes its wait-queue mutex.
    pub fn enqueue<F>(&self, cpu: usize, func: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.enqueue(cpu, Box::new(func))
    }

    /// Drop `value` on `cpu` after a full grace period
    pub fn defer_drop<T: Send + 'static>(&self, cpu: usize, value: T) -> Result<()> {
        self.enqueue(cpu, move || drop(value))
    }

    /// Invoke up to the batch limit of `cpu`'s ready callbacks
    pub fn drain_done(&self, cpu: usize) -> Result<usize> {
        let rdp = self.state.rdp(cpu)?;
        Ok(self.state.do_batch(rdp))
    }

    /// Block until a full grace period has elapsed.
    ///
    /// `cpu` is the caller's context; it is reported quiescent and ticked
    /// while waiting.
    pub fn synchronize(&self, cpu: usize) -> Result<()> {
        self.state.synchronize(cpu)
    }

    /// Block until an expedited grace period has elapsed
    pub fn expedite(&self, cpu: usize) -> Result<()> {
        self.state.expedite(cpu)
    }

    /// Wait for every callback queued before this call to be invoked.
    ///
    /// Needs the owners of contexts holding callbacks to keep ticking, so
    /// the caller must not be the only ticker of such a context.
    pub fn barrier(&self) -> Result<()> {
        self.state.barrier()
    }

    /// Bring `cpu` online; it takes part from the next grace period
    pub fn cpu_coming_online(&self, cpu: usize) -> Result<()> {
        self.state.check_running()?;
        self.state.cpu_coming_online(cpu)
    }

    /// Take `cpu` offline, reporting what it owes and handing its callbacks
    /// to an online context
    pub fn cpu_going_offline(&self, cpu: usize) -> Result<()> {
        self.state.check_running()?;
        self.state.cpu_going_offline(cpu)
    }

    /// Cookie for [`poll_state`](Self::poll_state); does not request a grace period
    pub fn get_state(&self) -> u64 {
        self.state.get_state()
    }

    /// Like [`get_state`](Self::get_state) but also requests the grace period
    pub fn start_poll(&self, cpu: usize) -> Result<u64> {
        self.state.start_poll(cpu)
    }

    /// Whether the grace period identified by `cookie` has elapsed
    pub fn poll_state(&self, cookie: u64) -> bool {
        self.state.poll_state(cookie)
    }

    /// Block until `cookie` has elapsed, unless it already has
    pub fn cond_synchronize(&self, cpu: usize, cookie: u64) -> Result<()> {
        self.state.cond_synchronize(cpu, cookie)
    }

    /// Current grace-period sequence
    pub fn gp_seq(&self) -> u64 {
        self.state.gp_seq.load()
    }

    /// Current coordinator state
    pub fn gp_state(&self) -> GpState {
        self.state.gp_state.load()
    }

    /// Current expedited sequence
    pub fn exp_seq(&self) -> u64 {
        self.state.exp.seq.load()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RcuStatsSnapshot {
        self.state.snapshot_stats()
    }

    /// Copy of every node's state, root first
    pub fn node_snapshot(&self) -> Vec<NodeSnapshot> {
        self.state.tree.snapshot()
    }

    /// Stop the coordinator thread and wait for it.
    ///
    /// Later operations that need the coordinator fail with
    /// [`RcuError::ShutDown`]. Calling this twice is harmless.
    pub fn shutdown(&self) {
        if self.state.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.wake_gp();
        self.state.notify_gp_done();
        self.state.wake_expediters();
        if let Some(handle) = self.coordinator.lock().take() {
            if handle.join().is_err() {
                tracing::error!("grace-period coordinator panicked");
            }
        }
        tracing::info!(gp_seq = self.state.gp_seq.load(), "grace-period domain shut down");
    }
}

impl Drop for GracePeriodDomain {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for GracePeriodDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracePeriodDomain")
            .field("nr_cpus", &self.state.config.nr_cpus)
            .field("gp_seq", &self.state.gp_seq.load())
            .field("gp_state", &self.state.gp_state.load())
            .finish()
    }
}

/// RAII read-side critical section on one context
///
/// Not `Send`: the section belongs to the thread driving the context.
#[must_use = "the read-side critical section ends when the guard is dropped"]
pub struct ReadGuard<'a> {
    state: &'a RcuState,
    rdp: &'a RcuData,
    _not_send: PhantomData<*const ()>,
}

impl ReadGuard<'_> {
    /// Context this section runs on
    pub fn cpu(&self) -> usize {
        self.rdp.cpu
    }

    /// Current nesting depth, including this guard
    pub fn depth(&self) -> u32 {
        self.rdp.read_nesting.load(Ordering::Relaxed)
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.state.read_unlock(self.rdp);
    }
}

impl std::fmt::Debug for ReadGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGuard")
            .field("cpu", &self.rdp.cpu)
            .finish()
    }
}
