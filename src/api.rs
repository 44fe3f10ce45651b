// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The high-level primitives built on top of a [`Task`]: `join`, the
//! divide-and-conquer `parallel_for`/`parallel_reduce` family, `scope`, and a
//! slice-oriented `parallel_for_each`. None of these touch [`Future`]
//! directly except `join`, which is the one primitive that embeds a job on
//! the stack; everything else is expressed in terms of `join`.

use std::pin::pin;

use crate::future::Future;
use crate::task::Task;

/// The sub-range size below which `parallel_for`/`parallel_reduce` stop
/// bisecting and run the remaining iterations inline. Chosen to keep leaf
/// work well above the per-job bookkeeping cost; callers with cheaper or
/// more expensive bodies should reach for the `_with_grain` variants.
const DEFAULT_GRAIN: usize = 4096;

/// Runs `f` with a [`Task`] anchored appropriately: on the current worker if
/// the calling thread is already inside a pool frame, or via a transient
/// entry into the process-wide pool otherwise (auto-initializing it with
/// default configuration if no pool has been started yet).
///
/// `join`, `parallel_for`, and `parallel_reduce` are all implemented as a
/// call to `scope` followed by one or more nested `join`s; it is exposed
/// directly for callers who want to fork more than two independent pieces of
/// work without nesting `join` calls by hand.
pub fn scope<R>(f: impl FnOnce(&Task) -> R) -> R {
    crate::task::with_current(|current| match current {
        Some(task) => f(task),
        None => crate::pool::ensure().call(f),
    })
}

/// Runs `a` and `b`, potentially in parallel, and returns both results.
///
/// `b` is forked onto the calling task's local queue; `a` always runs
/// inline, on the calling thread. `b` is parallelized only if some other
/// worker happens to steal it before `a` finishes -- there is no guarantee
/// either way.
pub fn join<RA, RB, A, B>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce(&Task) -> RA + Send,
    RA: Send,
    B: FnOnce(&Task) -> RB + Send,
    RB: Send,
{
    scope(|task| join_on(task, a, b))
}

fn join_on<RA, RB, A, B>(task: &Task, a: A, b: B) -> (RA, RB)
where
    A: FnOnce(&Task) -> RA + Send,
    RA: Send,
    B: FnOnce(&Task) -> RB + Send,
    RB: Send,
{
    // Every `join` is a potential heartbeat tick: this is what makes the
    // divide-and-conquer primitives below produce advertisable work without
    // their recursion having to remember to call `Task::tick` by hand.
    task.tick();
    let mut future = pin!(Future::<B, RB>::new());
    // Safety: `future` is not moved again before `join` is called on it
    // below, on this same stack frame.
    unsafe { future.as_mut().fork(task, b) };
    let ra = a(task);
    let rb = future.join(task);
    (ra, rb)
}

/// Applies `body` to every index in `0..n`, in parallel, with a default
/// grain size. See [`parallel_for_with_grain`].
pub fn parallel_for<Ctx, Body>(n: usize, ctx: &Ctx, body: Body)
where
    Ctx: Sync,
    Body: Fn(&Task, &Ctx, usize) + Sync,
{
    parallel_for_with_grain(n, ctx, body, DEFAULT_GRAIN);
}

/// Applies `body` to every index in `0..n`, recursively bisecting the range
/// and forking the right half at each level until a sub-range is at most
/// `grain` wide, at which point it runs sequentially. `body` may run on any
/// worker, including the calling thread; there is no ordering guarantee
/// across indices.
pub fn parallel_for_with_grain<Ctx, Body>(n: usize, ctx: &Ctx, body: Body, grain: usize)
where
    Ctx: Sync,
    Body: Fn(&Task, &Ctx, usize) + Sync,
{
    if n == 0 {
        return;
    }
    let grain = grain.max(1);
    scope(|task| for_range(task, ctx, &body, 0, n, grain));
}

fn for_range<Ctx, Body>(task: &Task, ctx: &Ctx, body: &Body, start: usize, end: usize, grain: usize)
where
    Ctx: Sync,
    Body: Fn(&Task, &Ctx, usize) + Sync,
{
    if end - start <= grain {
        for i in start..end {
            body(task, ctx, i);
        }
        return;
    }
    let mid = start + (end - start) / 2;
    join(
        |task| for_range(task, ctx, body, start, mid, grain),
        |task| for_range(task, ctx, body, mid, end, grain),
    );
}

/// Maps `map` over every index in `0..n` and folds the results together
/// with `combine`, in parallel, with a default grain size. `identity` is
/// returned as-is when `n == 0`. See [`parallel_reduce_with_grain`].
pub fn parallel_reduce<T, Ctx, Map, Combine>(
    n: usize,
    identity: T,
    ctx: &Ctx,
    map: Map,
    combine: Combine,
) -> T
where
    T: Send + Sync + Clone,
    Ctx: Sync,
    Map: Fn(&Task, &Ctx, usize) -> T + Sync,
    Combine: Fn(T, T) -> T + Sync,
{
    parallel_reduce_with_grain(n, identity, ctx, map, combine, DEFAULT_GRAIN)
}

/// Like [`parallel_reduce`], but with an explicit grain size. `combine` must
/// be associative; it is not required to be commutative, but the order in
/// which sub-ranges are merged is otherwise unspecified. Each leaf folds its
/// sub-range starting from a clone of `identity`, so `combine(identity, x)`
/// must equal `x` for any `x` the map function can produce.
pub fn parallel_reduce_with_grain<T, Ctx, Map, Combine>(
    n: usize,
    identity: T,
    ctx: &Ctx,
    map: Map,
    combine: Combine,
    grain: usize,
) -> T
where
    T: Send + Sync + Clone,
    Ctx: Sync,
    Map: Fn(&Task, &Ctx, usize) -> T + Sync,
    Combine: Fn(T, T) -> T + Sync,
{
    if n == 0 {
        return identity;
    }
    let grain = grain.max(1);
    scope(|task| reduce_range(task, ctx, &identity, &map, &combine, 0, n, grain))
}

#[allow(clippy::too_many_arguments)]
fn reduce_range<T, Ctx, Map, Combine>(
    task: &Task,
    ctx: &Ctx,
    identity: &T,
    map: &Map,
    combine: &Combine,
    start: usize,
    end: usize,
    grain: usize,
) -> T
where
    T: Send + Sync + Clone,
    Ctx: Sync,
    Map: Fn(&Task, &Ctx, usize) -> T + Sync,
    Combine: Fn(T, T) -> T + Sync,
{
    if end - start <= grain {
        let mut acc = identity.clone();
        for i in start..end {
            acc = combine(acc, map(task, ctx, i));
        }
        return acc;
    }
    let mid = start + (end - start) / 2;
    let (left, right) = join(
        |task| reduce_range(task, ctx, identity, map, combine, start, mid, grain),
        |task| reduce_range(task, ctx, identity, map, combine, mid, end, grain),
    );
    combine(left, right)
}

/// Applies `f` to every element of `items`, in parallel, with a default
/// grain size. A thin convenience over [`parallel_for_with_grain`] for the
/// common case of mapping over a mutable slice.
pub fn parallel_for_each<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    parallel_for_each_with_grain(items, f, DEFAULT_GRAIN);
}

/// Like [`parallel_for_each`], but with an explicit grain size.
pub fn parallel_for_each_with_grain<T, F>(items: &mut [T], f: F, grain: usize)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    if items.is_empty() {
        return;
    }
    let grain = grain.max(1);
    scope(|task| for_each(task, items, &f, grain));
}

fn for_each<T, F>(task: &Task, items: &mut [T], f: &F, grain: usize)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    if items.len() <= grain {
        for item in items {
            f(item);
        }
        return;
    }
    let mid = items.len() / 2;
    let (left, right) = items.split_at_mut(mid);
    join(
        |task| for_each(task, left, f, grain),
        |task| for_each(task, right, f, grain),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn join_runs_both_closures() {
        let (a, b) = join(|_| 1 + 1, |_| 2 + 2);
        assert_eq!((a, b), (2, 4));
    }

    #[test]
    fn parallel_for_touches_every_index() {
        let seen: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        parallel_for_with_grain(seen.len(), &seen, |_, seen, i| {
            seen[i].fetch_add(1, Ordering::Relaxed);
        }, 16);
        assert!(seen.iter().all(|count| count.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn parallel_reduce_sums_a_range() {
        let sum = parallel_reduce_with_grain(
            10_000,
            0i64,
            &(),
            |_, (), i| i as i64,
            |a, b| a + b,
            64,
        );
        assert_eq!(sum, (0..10_000i64).sum::<i64>());
    }

    #[test]
    fn parallel_reduce_returns_identity_when_empty() {
        let result = parallel_reduce(0, 42, &(), |_, (), i| i as i32, |a, b| a + b);
        assert_eq!(result, 42);
    }

    #[test]
    fn parallel_for_each_mutates_every_element() {
        let mut items: Vec<i32> = (0..500).collect();
        parallel_for_each_with_grain(&mut items, |x| *x *= 2, 32);
        assert!(items.iter().enumerate().all(|(i, &x)| x == (i as i32) * 2));
    }

    #[test]
    fn nested_join_does_not_deadlock() {
        fn depth(task: &Task, n: u32) -> u32 {
            if n == 0 {
                return 0;
            }
            let (a, b) = join(|task| depth(task, n - 1), |_| n);
            a.max(b)
        }
        let result = scope(|task| depth(task, 20));
        assert_eq!(result, 20);
    }
}

#[cfg(test)]
mod proptest_primitives {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Spec property: for any parallel-for over `[0, n)`, each index is
        /// passed to the body exactly once across all invocations.
        #[test]
        fn parallel_for_covers_each_index_exactly_once(n in 0usize..2_000, grain in 1usize..256) {
            let seen: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();
            parallel_for_with_grain(n, &seen, |_, seen, i| {
                seen[i].fetch_add(1, Ordering::Relaxed);
            }, grain);
            prop_assert!(seen.iter().all(|count| count.load(Ordering::Relaxed) == 1));
        }

        /// Spec property: for any parallel-reduce with an associative
        /// combine, the returned value equals the sequential left-fold,
        /// regardless of schedule (grain size here).
        #[test]
        fn parallel_reduce_matches_sequential_fold(n in 0usize..2_000, grain in 1usize..256) {
            let expected = (0..n as i64).fold(0i64, |acc, i| acc + i);
            let actual = parallel_reduce_with_grain(
                n,
                0i64,
                &(),
                |_, (), i| i as i64,
                |a, b| a + b,
                grain,
            );
            prop_assert_eq!(actual, expected);
        }
    }
}
