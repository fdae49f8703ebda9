use super::*;
use crate::util::test::{LONG, trace_init};
use std::sync::Arc;
use std::time::Instant;

#[test]
fn put_then_take_fifo() {
    let _trace = trace_init();
    let q = TransferQueue::new();
    let cancel = CancelToken::new();
    q.put("A");
    q.put("B");
    assert_eq!(q.take(LONG, &cancel), Ok(Some("A")));
    assert_eq!(q.take(LONG, &cancel), Ok(Some("B")));
}

#[test]
fn take_immediate_on_empty() {
    let q = TransferQueue::<u32>::new();
    assert_eq!(q.take(Duration::ZERO, &CancelToken::new()), Ok(None));
}

#[test]
fn take_times_out_on_empty() {
    let _trace = trace_init();
    let q = TransferQueue::<u32>::new();
    let start = Instant::now();
    assert_eq!(q.take(Duration::from_millis(100), &CancelToken::new()), Ok(None));
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[test]
fn transfer_immediate_without_taker_fails() {
    let q = TransferQueue::new();
    assert_eq!(q.transfer(1, Duration::ZERO, &CancelToken::new()), Ok(false));
    // the value must not linger for a later taker
    assert_eq!(q.take(Duration::ZERO, &CancelToken::new()), Ok(None));
}

#[test]
fn transfer_times_out_and_withdraws_value() {
    let _trace = trace_init();
    let q = TransferQueue::new();
    let start = Instant::now();
    assert_eq!(
        q.transfer(7, Duration::from_millis(80), &CancelToken::new()),
        Ok(false)
    );
    assert!(start.elapsed() >= Duration::from_millis(80));
    assert_eq!(q.take(Duration::ZERO, &CancelToken::new()), Ok(None));
}

#[test]
fn transfer_completes_when_taken() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::new());
    let taker = {
        let q = q.clone();
        std::thread::spawn(move || q.take(LONG, &CancelToken::new()))
    };
    assert_eq!(q.transfer(42, LONG, &CancelToken::new()), Ok(true));
    assert_eq!(taker.join().unwrap(), Ok(Some(42)));
}

#[test]
fn transfer_wakes_already_waiting_taker() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::new());
    let taker = {
        let q = q.clone();
        std::thread::spawn(move || q.take(LONG, &CancelToken::new()))
    };
    // let the taker block first so the transfer takes the "reader already
    // waiting" path
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(q.transfer(9, LONG, &CancelToken::new()), Ok(true));
    assert_eq!(taker.join().unwrap(), Ok(Some(9)));
}

#[test]
fn cancelled_take_propagates() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::<u32>::new());
    let cancel = CancelToken::new();
    let taker = {
        let (q, cancel) = (q.clone(), cancel.clone());
        std::thread::spawn(move || q.take(LONG, &cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert_eq!(taker.join().unwrap(), Err(Cancelled::new()));
}

#[test]
fn cancelled_transfer_withdraws_value() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::new());
    let cancel = CancelToken::new();
    let producer = {
        let (q, cancel) = (q.clone(), cancel.clone());
        std::thread::spawn(move || q.transfer(5, LONG, &cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert_eq!(producer.join().unwrap(), Err(Cancelled::new()));
    assert_eq!(q.take(Duration::ZERO, &CancelToken::new()), Ok(None));
}

#[test]
fn consumed_transfer_beats_cancellation() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::new());
    let cancel = CancelToken::new();
    let producer = {
        let (q, cancel) = (q.clone(), cancel.clone());
        std::thread::spawn(move || q.transfer(3, LONG, &cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    // claim the value first, then cancel: the producer's value is gone, so
    // the transfer must report success even though its token fired
    assert_eq!(q.take(Duration::ZERO, &CancelToken::new()), Ok(Some(3)));
    cancel.cancel();
    assert_eq!(producer.join().unwrap(), Ok(true));
    // the token stays cancelled for the producer's next wait to observe
    assert!(cancel.is_cancelled());
}

#[test]
fn cancelled_take_passes_wakeup_on() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::new());
    let cancel_first = CancelToken::new();
    let first = {
        let (q, cancel) = (q.clone(), cancel_first.clone());
        std::thread::spawn(move || q.take(LONG, &cancel))
    };
    std::thread::sleep(Duration::from_millis(50));
    let second = {
        let q = q.clone();
        std::thread::spawn(move || q.take(LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    // cancelling the head taker must not strand the second one
    cancel_first.cancel();
    assert_eq!(first.join().unwrap(), Err(Cancelled::new()));
    q.put(11);
    assert_eq!(second.join().unwrap(), Ok(Some(11)));
}

#[test]
fn takers_are_released_in_fifo_order() {
    let _trace = trace_init();
    let q = Arc::new(TransferQueue::new());
    let first = {
        let q = q.clone();
        std::thread::spawn(move || q.take(LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    let second = {
        let q = q.clone();
        std::thread::spawn(move || q.take(LONG, &CancelToken::new()))
    };
    std::thread::sleep(Duration::from_millis(50));
    q.put("first");
    q.put("second");
    assert_eq!(first.join().unwrap(), Ok(Some("first")));
    assert_eq!(second.join().unwrap(), Ok(Some("second")));
}

#[test]
fn concurrent_producers_and_consumers_lose_nothing() {
    let _trace = trace_init();
    const PRODUCERS: usize = 4;
    const MSGS: usize = 250;

    let q = Arc::new(TransferQueue::new());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = q.clone();
            std::thread::spawn(move || {
                for i in 0..MSGS {
                    q.put(p * MSGS + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let q = q.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                let cancel = CancelToken::new();
                while let Ok(Some(v)) = q.take(Duration::from_millis(500), &cancel) {
                    seen.push(v);
                }
                seen
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let mut all: Vec<_> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();
    all.sort_unstable();
    let expected: Vec<_> = (0..PRODUCERS * MSGS).collect();
    assert_eq!(all, expected);
}
