use super::*;
use crate::util::test::{LONG, trace_init};
use std::sync::Arc;
use std::time::Instant;

#[test]
fn immediate_match_left_then_right() {
    let _trace = trace_init();
    let pairing = Arc::new(Pairing::new());
    let left = {
        let pairing = pairing.clone();
        std::thread::spawn(move || pairing.provide_left("t", LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    let right = pairing.provide_right(7, LONG, &CancelToken::new());
    assert_eq!(right, Ok(Some(("t", 7))));
    assert_eq!(left.join().unwrap(), Ok(Some(("t", 7))));
}

#[test]
fn pair_order_is_t_u_even_when_right_arrives_first() {
    let _trace = trace_init();
    let pairing = Arc::new(Pairing::new());
    let right = {
        let pairing = pairing.clone();
        std::thread::spawn(move || pairing.provide_right("u", LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        pairing.provide_left(1, LONG, &CancelToken::new()),
        Ok(Some((1, "u")))
    );
    assert_eq!(right.join().unwrap(), Ok(Some((1, "u"))));
}

#[test]
fn immediate_timeout_without_counterpart() {
    let pairing = Pairing::<u32, u32>::new();
    assert_eq!(
        pairing.provide_left(1, Duration::ZERO, &CancelToken::new()),
        Ok(None)
    );
    // the abandoned offer must not match a later caller
    assert_eq!(
        pairing.provide_right(2, Duration::ZERO, &CancelToken::new()),
        Ok(None)
    );
}

#[test]
fn timed_out_offer_is_withdrawn() {
    let _trace = trace_init();
    let pairing = Pairing::<&str, u32>::new();
    let start = Instant::now();
    assert_eq!(
        pairing.provide_left("stale", Duration::from_millis(80), &CancelToken::new()),
        Ok(None)
    );
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert_eq!(
        pairing.provide_right(1, Duration::ZERO, &CancelToken::new()),
        Ok(None)
    );
}

#[test]
fn cancelled_offer_propagates_and_is_withdrawn() {
    let _trace = trace_init();
    let pairing = Arc::new(Pairing::<&str, u32>::new());
    let cancel = CancelToken::new();
    let left = {
        let (pairing, cancel) = (pairing.clone(), cancel.clone());
        std::thread::spawn(move || pairing.provide_left("x", LONG, &cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert_eq!(left.join().unwrap(), Err(Cancelled::new()));
    assert_eq!(
        pairing.provide_right(1, Duration::ZERO, &CancelToken::new()),
        Ok(None)
    );
}

#[test]
fn matched_offer_beats_cancellation() {
    let _trace = trace_init();
    let pairing = Arc::new(Pairing::new());
    let cancel = CancelToken::new();
    let left = {
        let (pairing, cancel) = (pairing.clone(), cancel.clone());
        std::thread::spawn(move || pairing.provide_left("x", LONG, &cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    // match the offer first, then cancel: the pair already belongs to both
    // callers, so the left side must return it despite the fired token
    assert_eq!(
        pairing.provide_right(1, Duration::ZERO, &CancelToken::new()),
        Ok(Some(("x", 1)))
    );
    cancel.cancel();
    assert_eq!(left.join().unwrap(), Ok(Some(("x", 1))));
    assert!(cancel.is_cancelled());
}

#[test]
fn offers_match_in_fifo_order() {
    let _trace = trace_init();
    let pairing = Arc::new(Pairing::new());
    let first = {
        let pairing = pairing.clone();
        std::thread::spawn(move || pairing.provide_left("first", LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    let second = {
        let pairing = pairing.clone();
        std::thread::spawn(move || pairing.provide_left("second", LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        pairing.provide_right(1, LONG, &CancelToken::new()),
        Ok(Some(("first", 1)))
    );
    assert_eq!(
        pairing.provide_right(2, LONG, &CancelToken::new()),
        Ok(Some(("second", 2)))
    );
    assert_eq!(first.join().unwrap(), Ok(Some(("first", 1))));
    assert_eq!(second.join().unwrap(), Ok(Some(("second", 2))));
}

#[test]
fn many_concurrent_pairs_all_match() {
    let _trace = trace_init();
    const PAIRS: usize = 50;
    let pairing = Arc::new(Pairing::new());

    let lefts: Vec<_> = (0..PAIRS)
        .map(|i| {
            let pairing = pairing.clone();
            std::thread::spawn(move || pairing.provide_left(i, LONG, &CancelToken::new()))
        })
        .collect();
    let rights: Vec<_> = (0..PAIRS)
        .map(|i| {
            let pairing = pairing.clone();
            std::thread::spawn(move || pairing.provide_right(i * 10, LONG, &CancelToken::new()))
        })
        .collect();

    let mut left_pairs: Vec<_> = lefts
        .into_iter()
        .map(|t| t.join().unwrap().unwrap().unwrap())
        .collect();
    let mut right_pairs: Vec<_> = rights
        .into_iter()
        .map(|t| t.join().unwrap().unwrap().unwrap())
        .collect();

    // every caller got a pair, and both sides agree on the same matching
    left_pairs.sort_unstable();
    right_pairs.sort_unstable();
    assert_eq!(left_pairs, right_pairs);
    let ts: Vec<_> = left_pairs.iter().map(|(t, _)| *t).collect();
    assert_eq!(ts, (0..PAIRS).collect::<Vec<_>>());
}
