//! Callback overload handling.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use oxircu::{GracePeriodDomain, RcuConfig};

use common::{wait_until, Tickers, TEST_TIMEOUT};

fn overload_config() -> RcuConfig {
    RcuConfig::new()
        .with_nr_cpus(4)
        .with_fanout(2)
        .with_fanout_leaf(2)
        .with_fqs_delay(Duration::from_millis(1), Duration::from_millis(1))
        .with_blimit(2)
        .with_watermarks(2, 8, 16)
}

#[test]
fn test_flood_raises_and_clears_overload() {
    let domain = Arc::new(GracePeriodDomain::new(overload_config()).unwrap());
    let invoked = Arc::new(AtomicUsize::new(0));

    for _ in 0..40 {
        let invoked = Arc::clone(&invoked);
        domain
            .enqueue(1, move || {
                invoked.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    let stats = domain.stats();
    assert!(stats.overload_events >= 1);
    assert!(stats.callback_overloaded);
    assert_eq!(stats.callbacks_pending, 40);

    let tickers = Tickers::spawn(&domain, 1..4);
    assert!(wait_until(TEST_TIMEOUT, || invoked.load(Ordering::SeqCst) == 40));

    // The next grace period recomputes the overload state.
    domain.synchronize(0).unwrap();
    domain.synchronize(0).unwrap();
    let stats = domain.stats();
    assert!(!stats.callback_overloaded);
    assert_eq!(stats.callbacks_pending, 0);
    tickers.stop();
}

#[test]
fn test_small_queue_is_not_overloaded() {
    let domain = Arc::new(GracePeriodDomain::new(overload_config()).unwrap());
    for _ in 0..5 {
        domain.enqueue(2, || {}).unwrap();
    }
    let stats = domain.stats();
    assert_eq!(stats.overload_events, 0);
    assert!(!stats.callback_overloaded);
}
