// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Stack-allocated futures: the object that splices a second task into a
//! worker's local queue and collects its result.

use std::cell::Cell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::job::{Job, JobState};
use crate::loom::cell::UnsafeCell;
use crate::signal::CompletionSignal;
use crate::task::Task;

// The data-model budget (spec: "≤ ~48 bytes for typical I/O") is a design
// goal, not a hard contract enforceable over arbitrary `F`/`O`, since a
// caller's closure can capture arbitrarily much. We can only hold the line
// for the zero-capture case every leaf of `parallel_for`/`parallel_reduce`
// actually uses (a bare function pointer), so that's what's checked here.
static_assertions::const_assert!(
    std::mem::size_of::<Future<fn(&Task) -> u64, u64>>() <= 64
);

/// Heap-allocated side record attached to a job once it moves to the
/// executing state: space for the typed result, and a completion signal.
/// Freed exactly once, by whichever side (reclaimer or joiner) observes
/// completion.
struct ExecuteState<O> {
    result: UnsafeCell<MaybeUninit<O>>,
    signal: CompletionSignal,
}

/// Test-only accounting for spec property "total live execute-state
/// allocations equals the number of jobs currently executing": incremented
/// in `publish`, decremented on drop, never read outside `#[cfg(test)]`.
#[cfg(test)]
static LIVE_EXECUTE_STATES: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

#[cfg(test)]
impl<O> Drop for ExecuteState<O> {
    fn drop(&mut self) {
        LIVE_EXECUTE_STATES.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }
}

/// A typed, stack-allocated placeholder for the result of a forked
/// computation. Created in the pending state; `fork` pushes its job onto
/// the current task's local queue; `join`/`try_join` must be called exactly
/// once before the `Future` is dropped.
pub struct Future<F, O> {
    job: Job,
    func: UnsafeCell<Option<F>>,
    execute_state: Cell<Option<NonNull<ExecuteState<O>>>>,
    /// Set once `try_join` returns, regardless of which branch it took. The
    /// job's derived state alone can't distinguish "joined and done" from
    /// "forked, stolen, never joined" -- both are `Executing` -- so dropping
    /// safely needs this alongside `Job::state`. See `Drop` below.
    joined: Cell<bool>,
}

impl<F, O> Future<F, O>
where
    F: FnOnce(&Task) -> O + Send,
{
    pub fn new() -> Self {
        Self {
            job: Job::new(),
            func: UnsafeCell::new(None),
            execute_state: Cell::new(None),
            joined: Cell::new(false),
        }
    }

    /// Stores `func`, pushes the embedded job onto `task`'s local queue,
    /// and -- if idle workers are observably waiting -- immediately
    /// publishes it rather than waiting for the next heartbeat (active
    /// stealing).
    ///
    /// # Safety
    ///
    /// `self` must not be moved for as long as this job could be observed
    /// by another worker, i.e. until `join`/`try_join` has been called.
    /// `task` must name the worker running on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if this future was already forked.
    pub unsafe fn fork(self: std::pin::Pin<&mut Self>, task: &Task, func: F) {
        // Safety: we never move out of `self` through this reference; the
        // pin is purely a caller-facing contract that this future's address
        // is stable until joined.
        let this = unsafe { self.get_unchecked_mut() };
        debug_assert_eq!(this.job.state(), JobState::Pending, "future already forked");

        this.func.with_mut(|slot| unsafe { *slot = Some(func) });
        this.job.arm(execute::<F, O>, publish::<F, O>);

        let job_ptr = NonNull::from(&this.job);
        // Safety: `job_ptr` stays valid until this future is joined, which
        // the caller promises not to skip.
        unsafe { task.worker().queue().push(job_ptr) };

        if task.pool().idle_count() > 0 {
            task.pool().service_heartbeat(task.worker());
        }
    }

    /// Idempotent observation of the job's state; safe even if `fork` was
    /// never called.
    pub fn try_join(&self, task: &Task) -> Option<O> {
        let result = match self.job.state() {
            JobState::Pending => None,
            JobState::Queued => {
                let job_ptr = NonNull::from(&self.job);
                let popped = task.worker().queue().pop(job_ptr);
                debug_assert!(popped, "job was queued but missing from the queue tail");
                None
            }
            JobState::Executing => Some(self.cold_wait(task)),
        };
        self.joined.set(true);
        result
    }

    /// Asserts `fork` was called, then delegates to `try_join`, running the
    /// callback locally if the job was not stolen.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if this future was never forked.
    pub fn join(&self, task: &Task) -> O {
        debug_assert_ne!(
            self.job.state(),
            JobState::Pending,
            "join called on a future that was never forked"
        );
        match self.try_join(task) {
            Some(result) => result,
            None => self.run_locally(task),
        }
    }

    fn run_locally(&self, task: &Task) -> O {
        let func = self
            .func
            .with_mut(|slot| unsafe { (*slot).take() })
            .expect("job's function was already taken");
        func(task)
    }

    fn cold_wait(&self, task: &Task) -> O {
        let job_ptr = NonNull::from(&self.job);
        if task.pool().reclaim_if_unclaimed(task.worker(), job_ptr) {
            self.free_execute_state();
            return self.run_locally(task);
        }

        let state_ptr = self
            .execute_state
            .get()
            .expect("job is executing but has no execute-state");
        // Safety: the execute-state outlives the job's executing phase by
        // construction -- it is only freed here, after `wait` returns, or
        // by the reclaim path above.
        let signal = unsafe { &(*state_ptr.as_ptr()).signal };

        task.pool().help_until_done(signal);
        signal.wait();

        let result = unsafe {
            (*state_ptr.as_ptr())
                .result
                .with_mut(|slot| (*slot).assume_init_read())
        };
        self.free_execute_state();
        result
    }

    fn free_execute_state(&self) {
        if let Some(state_ptr) = self.execute_state.take() {
            // Safety: `state_ptr` was allocated by `publish` via `Box::new`
            // and is freed exactly once, either here or never again.
            unsafe { drop(Box::from_raw(state_ptr.as_ptr())) };
        }
    }
}

impl<F, O> Default for Future<F, O>
where
    F: FnOnce(&Task) -> O + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<F, O> Drop for Future<F, O> {
    fn drop(&mut self) {
        // A future owes nothing if `fork` was never called (still pending).
        // Otherwise `try_join` must have run to completion -- `joined` is
        // the only thing that can tell "joined and done" apart from "forked,
        // stolen, and dropped without ever joining", since both leave the
        // job's derived state at `Executing` (see `Job::state`).
        debug_assert!(
            self.joined.get() || self.job.state() == JobState::Pending,
            "future dropped without calling join/try_join after fork"
        );
    }
}

/// Recovers the containing `Future` from a job pointer via a compile-time
/// field offset, per the "field-offset-from-parent" design note: handlers
/// are monomorphized per `<F, O>` so this is a plain pointer arithmetic, not
/// a dynamic lookup.
unsafe fn future_from_job<F, O>(job: NonNull<Job>) -> NonNull<Future<F, O>> {
    let offset = std::mem::offset_of!(Future<F, O>, job);
    // Safety: `job` always points at the `job` field of a live `Future<F,
    // O>`, because only `Future::fork` installs `future_from_job`'s sibling
    // functions (`execute`, `publish`) as a job's handler/publish thunks.
    unsafe { job.byte_sub(offset).cast() }
}

/// Allocates the job's execute-state and returns a type-erased pointer to
/// its completion signal, so pool code never needs to know the future's
/// output type.
unsafe fn publish<F, O>(job: NonNull<Job>) -> NonNull<CompletionSignal>
where
    F: FnOnce(&Task) -> O + Send,
{
    // Safety: see `future_from_job`.
    let future = unsafe { future_from_job::<F, O>(job) };
    let state = Box::new(ExecuteState::<O> {
        result: UnsafeCell::new(MaybeUninit::uninit()),
        signal: CompletionSignal::new(),
    });
    #[cfg(test)]
    LIVE_EXECUTE_STATES.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let state_ptr = NonNull::from(Box::leak(state));
    // Safety: `future` is valid per `future_from_job`'s contract.
    unsafe { (*future.as_ptr()).execute_state.set(Some(state_ptr)) };
    // Safety: `state_ptr` was just allocated and is live for at least as
    // long as this function's caller needs the signal (until `set_done`).
    unsafe { NonNull::new_unchecked(std::ptr::addr_of_mut!((*state_ptr.as_ptr()).signal)) }
}

/// Runs the job: reconstructs a `Task` on the calling worker, invokes the
/// stored callback, writes the result into the execute-state, and signals
/// completion.
unsafe fn execute<F, O>(job: NonNull<Job>)
where
    F: FnOnce(&Task) -> O + Send,
{
    // Safety: see `future_from_job`.
    let future = unsafe { future_from_job::<F, O>(job) };
    let func = unsafe {
        (*future.as_ptr())
            .func
            .with_mut(|slot| (*slot).take())
            .expect("job executed twice")
    };

    crate::task::with_current(|task| {
        let task = task.expect("a job handler must run on a worker with a current task");
        let output = func(task);
        // Safety: `publish` always runs before `execute` for a given job
        // (it is how the job became executable in the first place), so the
        // execute-state is present.
        let state_ptr = unsafe { (*future.as_ptr()).execute_state.get() }
            .expect("executing job has no execute-state");
        unsafe {
            (*state_ptr.as_ptr())
                .result
                .with_mut(|slot| (*slot).write(output));
            (*state_ptr.as_ptr()).signal.set_done();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn try_join_on_unforked_future_is_a_no_op() {
        crate::api::scope(|task| {
            let future = Future::<fn(&Task) -> u32, u32>::new();
            assert_eq!(future.try_join(task), None);
        });
    }

    /// Spec property: total live execute-state allocations equals the
    /// number of jobs currently executing -- exercised here as its
    /// observable corollary, that every allocation is freed exactly once
    /// (the live count returns to its pre-scenario baseline, never going
    /// negative or leaking) across many forks that are actively stolen.
    #[test]
    fn execute_state_allocations_never_leak_across_many_stolen_forks() {
        let baseline = LIVE_EXECUTE_STATES.load(Ordering::Relaxed);

        crate::api::scope(|task| {
            fn spin(task: &Task, depth: u32) -> u32 {
                task.tick();
                if depth == 0 {
                    std::thread::yield_now();
                    return 0;
                }
                let (a, b) = crate::api::join(
                    |task| spin(task, depth - 1),
                    |task| spin(task, depth - 1),
                );
                a + b
            }
            spin(task, 12);
        });

        assert_eq!(LIVE_EXECUTE_STATES.load(Ordering::Relaxed), baseline);
    }

    #[test]
    fn fork_join_invokes_the_body_exactly_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let result = crate::api::scope(|task| {
            let mut future = pin!(Future::<_, u32>::new());
            // Safety: `future` is not moved again before `join` below, on
            // this same stack frame.
            unsafe {
                future.as_mut().fork(task, |_task| {
                    CALLS.fetch_add(1, Ordering::Relaxed);
                    7
                });
            }
            future.join(task)
        });

        assert_eq!(result, 7);
        assert_eq!(CALLS.load(Ordering::Relaxed), 1);
    }
}
