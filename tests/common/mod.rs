//! Shared test utilities: fast configurations and ticker threads that drive
//! contexts the way a runtime's per-context owner would.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use oxircu::{GracePeriodDomain, RcuConfig, RcuError};

/// Upper bound for anything a test waits on
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A small tree (fan-out 2) with short forcing and kick intervals.
pub fn test_config(nr_cpus: usize) -> RcuConfig {
    RcuConfig::new()
        .with_nr_cpus(nr_cpus)
        .with_fanout(2)
        .with_fanout_leaf(2)
        .with_fqs_delay(Duration::from_millis(1), Duration::from_millis(1))
        .with_expedited(Duration::from_millis(1), Duration::from_secs(5))
}

pub fn test_domain(nr_cpus: usize) -> Arc<GracePeriodDomain> {
    Arc::new(GracePeriodDomain::new(test_config(nr_cpus)).unwrap())
}

/// One tick of a context's owner: pass through a quiescent state and run the
/// periodic hook. Offline and shut-down errors are expected during churn.
pub fn tick(domain: &GracePeriodDomain, cpu: usize) -> usize {
    match domain.report_quiescent_state(cpu) {
        Ok(_) | Err(RcuError::CpuOffline(_)) | Err(RcuError::ShutDown) => {}
        Err(e) => panic!("report_quiescent_state({cpu}) failed: {e}"),
    }
    match domain.check_and_report(cpu) {
        Ok(n) => n,
        Err(RcuError::ShutDown) => 0,
        Err(e) => panic!("check_and_report({cpu}) failed: {e}"),
    }
}

/// Background threads ticking a set of contexts until stopped or dropped.
pub struct Tickers {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Tickers {
    pub fn spawn(domain: &Arc<GracePeriodDomain>, cpus: impl IntoIterator<Item = usize>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handles = cpus
            .into_iter()
            .map(|cpu| {
                let domain = Arc::clone(domain);
                let stop = Arc::clone(&stop);
                thread::Builder::new()
                    .name(format!("ticker-{cpu}"))
                    .spawn(move || {
                        while !stop.load(Ordering::Acquire) {
                            tick(&domain, cpu);
                            thread::sleep(Duration::from_micros(200));
                        }
                    })
                    .unwrap()
            })
            .collect();
        Self { stop, handles }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() && !thread::panicking() {
                panic!("ticker thread panicked");
            }
        }
    }
}

impl Drop for Tickers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
