// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Whole-pool scenarios exercising the concrete examples that motivated this
//! crate's design: a parallel-for write pattern, a parallel-reduce sum, the
//! empty-input identity cases, a plain `join`, and a deep nested `join` tree.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use forkpool::PoolConfig;

/// Tests in this file share one process-wide pool; `init`/`deinit` are not
/// re-entrant across concurrent test threads, so serialize them.
fn lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}

fn with_pool<R>(workers: usize, f: impl FnOnce() -> R) -> R {
    let _guard = lock();
    forkpool::init_with_config(
        PoolConfig::builder()
            .background_worker_count(NonZeroUsize::new(workers))
            .build(),
    )
    .expect("pool should not already be initialized");
    let result = f();
    forkpool::deinit();
    result
}

#[test]
fn s1_parallel_for_writes_every_slot() {
    use std::sync::atomic::{AtomicI64, Ordering};

    // Only one test in this file installs a subscriber: `tracing_subscriber`
    // panics on a second global-default install, and tests here run
    // concurrently on the same process.
    let _ = tracing_subscriber::fmt::try_init();

    with_pool(4, || {
        let ctx: Vec<AtomicI64> = (0..1000).map(|_| AtomicI64::new(-1)).collect();
        forkpool::parallel_for(ctx.len(), &ctx, |_, ctx, i| {
            ctx[i].store((i as i64) * 2, Ordering::Relaxed);
        });
        let expected: Vec<i64> = (0..1000).map(|i| i * 2).collect();
        let actual: Vec<i64> = ctx.iter().map(|x| x.load(Ordering::Relaxed)).collect();
        assert_eq!(actual, expected);
    });
}

#[test]
fn s2_parallel_reduce_sums_a_range() {
    with_pool(4, || {
        let sum = forkpool::parallel_reduce(10_000, 0.0f64, &(), |_, (), i| i as f64, |a, b| a + b);
        assert_eq!(sum, (10_000.0 * 9_999.0) / 2.0);
    });
}

#[test]
fn s3_parallel_reduce_empty_returns_identity() {
    with_pool(4, || {
        let result = forkpool::parallel_reduce(0, 42, &(), |_, (), i| i as i32, |a, b| a + b);
        assert_eq!(result, 42);
    });
}

#[test]
fn s4_join_returns_both_results() {
    with_pool(4, || {
        let (a, b): (i32, i64) = forkpool::join(|_| 21 * 2, |_| 100);
        assert_eq!((a, b), (42, 100));
    });
}

#[test]
fn s5_future_body_runs_exactly_once_whether_or_not_it_is_stolen() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static CALLS: AtomicUsize = AtomicUsize::new(0);

    with_pool(1, || {
        // Whether the background worker wins the race to steal this job or
        // the originator pops it back off its own queue first, the body
        // must run exactly once either way.
        let (_, calls) = forkpool::join(
            |_| (),
            |_| {
                CALLS.fetch_add(1, Ordering::Relaxed);
                CALLS.load(Ordering::Relaxed)
            },
        );
        assert_eq!(calls, 1);
    });
}

#[test]
fn s6_deep_nested_join_matches_sequential_and_does_not_deadlock() {
    fn fib(task: &forkpool::Task, n: u64) -> u64 {
        task.tick();
        if n < 2 {
            return n;
        }
        let (a, b) = forkpool::join(|task| fib(task, n - 1), |task| fib(task, n - 2));
        a + b
    }

    fn fib_sequential(n: u64) -> u64 {
        if n < 2 {
            n
        } else {
            fib_sequential(n - 1) + fib_sequential(n - 2)
        }
    }

    with_pool(4, || {
        let result = forkpool::scope(|task| fib(task, 20));
        assert_eq!(result, fib_sequential(20));
    });
}

#[test]
fn parallel_for_each_mutates_every_element_across_many_workers() {
    with_pool(8, || {
        let mut items: Vec<i64> = (0..50_000).collect();
        forkpool::parallel_for_each(&mut items, |x| *x *= 2);
        for (i, &x) in items.iter().enumerate() {
            assert_eq!(x, (i as i64) * 2);
        }
    });
}

#[test]
fn pool_call_from_an_external_thread_joins_the_pool_transiently() {
    with_pool(2, || {
        let handles: Vec<_> = (0..4usize)
            .map(|i| {
                std::thread::spawn(move || {
                    forkpool::scope(|task| {
                        let (a, b) = forkpool::join(|_| i, |_| i * 2);
                        let _ = task;
                        a + b
                    })
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), i * 3);
        }
    });
}
