//! Expedited grace periods under concurrent callers and readers.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use oxircu::seq::seq_done;
use oxircu::{GracePeriodDomain, KickReason, RcuError};

use common::{test_config, test_domain, TEST_TIMEOUT};

#[test]
fn test_expedite_without_readers() {
    let domain = test_domain(6);
    let snap = oxircu::seq::seq_snap(domain.exp_seq());
    domain.expedite(0).unwrap();
    assert!(seq_done(domain.exp_seq(), snap));

    let stats = domain.stats();
    assert_eq!(stats.exp_gps, 1);
    assert_eq!(stats.exp_qs_reported, 6);
    assert!(domain.node_snapshot().iter().all(|n| n.expmask == 0));
}

#[test]
fn test_expedite_waits_for_reader() {
    let domain = test_domain(3);
    let (entered_tx, entered_rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);

    let reader = {
        let domain = Arc::clone(&domain);
        thread::spawn(move || {
            let guard = domain.read_lock(2).unwrap();
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            drop(guard);
        })
    };
    entered_rx.recv().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let expediter = {
        let domain = Arc::clone(&domain);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            domain.expedite(0).unwrap();
            done.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!done.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    reader.join().unwrap();
    expediter.join().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(domain.stats().exp_qs_reported, 3);
}

#[test]
fn test_concurrent_expediters_share_work() {
    let domain = test_domain(4);
    let handles: Vec<_> = (0..4)
        .map(|cpu| {
            let domain = Arc::clone(&domain);
            thread::spawn(move || {
                for _ in 0..25 {
                    domain.expedite(cpu).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = domain.stats();
    assert!(stats.exp_gps >= 25);
    assert_eq!(stats.exp_gps + stats.exp_piggybacked, 100);
    // Every expedited grace period hears from every online context once.
    assert_eq!(stats.exp_qs_reported, stats.exp_gps * 4);
}

#[test]
fn test_kicker_sees_expedited_reason() {
    let (tx, rx) = channel::unbounded();
    let domain = Arc::new(
        GracePeriodDomain::with_kicker(test_config(2), move |cpu: usize, reason: KickReason| {
            let _ = tx.send((cpu, reason));
        })
        .unwrap(),
    );

    let (entered_tx, entered_rx) = channel::bounded(1);
    let reader = {
        let domain = Arc::clone(&domain);
        thread::spawn(move || {
            let guard = domain.read_lock(1).unwrap();
            entered_tx.send(()).unwrap();
            // Leave the section once kicked for the expedited grace period.
            loop {
                match rx.recv_timeout(TEST_TIMEOUT) {
                    Ok((1, KickReason::Expedited)) => break,
                    Ok(_) => continue,
                    Err(e) => panic!("never kicked: {e}"),
                }
            }
            drop(guard);
        })
    };
    entered_rx.recv().unwrap();

    domain.expedite(0).unwrap();
    reader.join().unwrap();
    assert_eq!(domain.stats().exp_qs_reported, 2);
}

#[test]
fn test_expedite_errors() {
    let domain = test_domain(2);
    {
        let _guard = domain.read_lock(0).unwrap();
        assert!(matches!(domain.expedite(0), Err(RcuError::ReadSideActive(0))));
    }
    domain.cpu_going_offline(1).unwrap();
    assert!(matches!(domain.expedite(1), Err(RcuError::CpuOffline(1))));

    domain.shutdown();
    assert!(matches!(domain.expedite(0), Err(RcuError::ShutDown)));
    assert_eq!(domain.stats().exp_gps, 0);
}
