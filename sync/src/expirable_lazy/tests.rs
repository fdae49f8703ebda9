use super::*;
use crate::util::test::trace_init;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering::SeqCst},
};

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("provider blew up")]
struct Boom;

#[test]
fn computes_once_and_caches() {
    let _trace = trace_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let lazy = {
        let calls = calls.clone();
        ExpirableLazy::<_, Boom>::new(
            move || {
                calls.fetch_add(1, SeqCst);
                Ok(42)
            },
            Duration::from_secs(60),
        )
    };
    let cancel = CancelToken::new();
    assert_eq!(lazy.get(&cancel).unwrap(), 42);
    assert_eq!(lazy.get(&cancel).unwrap(), 42);
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn recomputes_after_expiry() {
    let _trace = trace_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let lazy = {
        let calls = calls.clone();
        ExpirableLazy::<_, Boom>::new(
            move || Ok(calls.fetch_add(1, SeqCst)),
            Duration::from_millis(50),
        )
    };
    let cancel = CancelToken::new();
    assert_eq!(lazy.get(&cancel).unwrap(), 0);
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(lazy.get(&cancel).unwrap(), 1);
    assert_eq!(calls.load(SeqCst), 2);
}

#[test]
fn concurrent_callers_share_one_computation() {
    let _trace = trace_init();
    const CALLERS: usize = 8;
    let calls = Arc::new(AtomicUsize::new(0));
    let lazy = {
        let calls = calls.clone();
        Arc::new(ExpirableLazy::<_, Boom>::new(
            move || {
                calls.fetch_add(1, SeqCst);
                // hold the computation open long enough for every caller to
                // pile up behind it
                std::thread::sleep(Duration::from_millis(100));
                Ok("shared")
            },
            Duration::from_secs(60),
        ))
    };

    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let lazy = lazy.clone();
            std::thread::spawn(move || lazy.get(&CancelToken::new()).unwrap())
        })
        .collect();
    for caller in callers {
        assert_eq!(caller.join().unwrap(), "shared");
    }
    assert_eq!(calls.load(SeqCst), 1);
}

#[test]
fn provider_error_reaches_computing_caller_only() {
    let _trace = trace_init();
    let lazy = ExpirableLazy::<u32, Boom>::new(|| Err(Boom), Duration::from_secs(60));
    match lazy.get(&CancelToken::new()) {
        Err(Error::Provider(Boom)) => {}
        other => panic!("expected provider error, got {other:?}"),
    }
}

#[test]
fn failure_lets_a_waiter_retry() {
    let _trace = trace_init();
    let calls = Arc::new(AtomicUsize::new(0));
    let lazy = {
        let calls = calls.clone();
        Arc::new(ExpirableLazy::<_, Boom>::new(
            move || {
                let call = calls.fetch_add(1, SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                // first call fails, the retry succeeds
                if call == 0 { Err(Boom) } else { Ok(call) }
            },
            Duration::from_secs(60),
        ))
    };

    let barrier = Arc::new(std::sync::Barrier::new(4));
    let callers: Vec<_> = (0..4)
        .map(|_| {
            let (lazy, barrier) = (lazy.clone(), barrier.clone());
            std::thread::spawn(move || {
                barrier.wait();
                lazy.get(&CancelToken::new())
            })
        })
        .collect();

    let results: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();
    let failures = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Provider(Boom))))
        .count();
    let successes = results
        .iter()
        .filter(|r| matches!(r, Ok(1)))
        .count();
    // exactly one caller observed the failure; everyone else saw the value
    // produced by the retry
    assert_eq!(failures, 1);
    assert_eq!(successes, 3);
    assert_eq!(calls.load(SeqCst), 2);
}

#[test]
fn cancelled_waiter_propagates() {
    let _trace = trace_init();
    let lazy = Arc::new(ExpirableLazy::<u32, Boom>::new(
        || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(1)
        },
        Duration::from_secs(60),
    ));
    // occupy the computation slot
    let computer = {
        let lazy = lazy.clone();
        std::thread::spawn(move || lazy.get(&CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));

    let cancel = CancelToken::new();
    let waiter = {
        let (lazy, cancel) = (lazy.clone(), cancel.clone());
        std::thread::spawn(move || lazy.get(&cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert!(matches!(waiter.join().unwrap(), Err(Error::Cancelled(_))));
    assert_eq!(computer.join().unwrap().unwrap(), 1);
}
