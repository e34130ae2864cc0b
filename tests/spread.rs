use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use burstwork::{Dispatcher, DispatcherConfig};

fn dispatcher(workers: u16) -> Dispatcher {
    Dispatcher::new(DispatcherConfig::new().max_hardware_concurrency(workers)).expect("pool should start")
}

#[test]
fn zero_iterations_returns_ok_and_never_calls_work() {
    let pool = dispatcher(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    pool.spread(0, move |_, _| { c.fetch_add(1, Ordering::SeqCst); }, 1).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn one_iteration_runs_once_on_caller_thread() {
    let pool = dispatcher(4);
    let caller = std::thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    pool.spread(
        1,
        move |start, stop| {
            s.lock().unwrap().push((start, stop, std::thread::current().id() == caller));
        },
        1,
    )
    .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.as_slice(), &[(0, 1, true)]);
}

#[test]
fn hundred_over_four_workers_partitions_into_quarters() {
    let pool = dispatcher(4);
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&ranges);
    pool.spread(100, move |start, stop| { r.lock().unwrap().push((start, stop)); }, 25).unwrap();

    let mut ranges = ranges.lock().unwrap().clone();
    ranges.sort_unstable();
    assert_eq!(ranges, vec![(0, 25), (25, 50), (50, 75), (75, 100)]);
}

#[test]
fn remainder_chunking_gives_three_of_twenty_six_and_one_of_twenty_five() {
    let pool = dispatcher(4);
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&ranges);
    pool.spread(103, move |start, stop| { r.lock().unwrap().push((start, stop)); }, 1).unwrap();

    let mut ranges = ranges.lock().unwrap().clone();
    ranges.sort_unstable();
    let lengths: Vec<u32> = ranges.iter().map(|&(s, e)| e - s).collect();
    assert_eq!(lengths.iter().filter(|&&l| l == 26).count(), 3);
    assert_eq!(lengths.iter().filter(|&&l| l == 25).count(), 1);

    let mut cursor = 0;
    for (start, stop) in ranges {
        assert_eq!(start, cursor);
        cursor = stop;
    }
    assert_eq!(cursor, 103);
}

#[test]
fn two_concurrent_spreads_each_see_their_own_totality() {
    let pool = Arc::new(dispatcher(4));

    let run = |pool: Arc<Dispatcher>, iterations: u32| {
        std::thread::spawn(move || {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let s = Arc::clone(&seen);
            pool.spread(iterations, move |start, stop| { s.lock().unwrap().push((start, stop)); }, 1).unwrap();
            let mut ranges = seen.lock().unwrap().clone();
            ranges.sort_unstable();
            let mut cursor = 0;
            for (start, stop) in &ranges {
                assert_eq!(*start, cursor);
                cursor = *stop;
            }
            assert_eq!(cursor, iterations);
        })
    };

    let a = run(Arc::clone(&pool), 1000);
    let b = run(Arc::clone(&pool), 1000);
    a.join().unwrap();
    b.join().unwrap();
}

#[test]
fn fire_and_forget_running_a_nested_spread_does_not_deadlock() {
    let pool = Arc::new(dispatcher(4));
    // Recursive spreads run sequentially on the worker already executing the
    // outer job, so `work` is invoked once covering the whole range.
    let inner_range = Arc::new(Mutex::new(None));

    let p = Arc::clone(&pool);
    let r = Arc::clone(&inner_range);
    let outcome = pool.dispatch(move || {
        p.spread(50, move |start, stop| { *r.lock().unwrap() = Some((start, stop)); }, 1).unwrap();
    });

    outcome.join().unwrap();
    assert_eq!(*inner_range.lock().unwrap(), Some((0, 50)));
}

#[test]
fn number_of_workers_matches_configured_cap() {
    let pool = dispatcher(3);
    assert_eq!(pool.number_of_workers(), 3);
}

#[test]
fn set_max_allowed_threads_resizes_an_idle_pool() {
    let pool = dispatcher(2);
    pool.set_max_allowed_threads(4).unwrap();
    assert_eq!(pool.number_of_workers(), 4);

    let iterations_done = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&iterations_done);
    pool.spread(40, move |start, stop| { d.fetch_add((stop - start) as usize, Ordering::SeqCst); }, 1).unwrap();
    assert_eq!(iterations_done.load(Ordering::SeqCst), 40);
}
