// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The lightweight value passed into every user callback. A `Task` is the
//! anchor a [`Future`][crate::future::Future] forks against and the handle
//! through which heartbeats are serviced.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::pool::Pool;
use crate::worker::Worker;

/// A value type carrying the execution context (which worker, which pool)
/// needed to fork further work. Cheap to create; a fresh one is constructed
/// for every frame of user code that needs to spawn work.
pub struct Task<'a> {
    pool: &'a Pool,
    worker: &'a Worker,
}

impl<'a> Task<'a> {
    pub(crate) fn new(pool: &'a Pool, worker: &'a Worker) -> Self {
        Self { pool, worker }
    }

    pub(crate) fn pool(&self) -> &'a Pool {
        self.pool
    }

    pub(crate) fn worker(&self) -> &'a Worker {
        self.worker
    }

    /// Services a pending heartbeat, if one is due. A single monotonic load
    /// on the hot path; the heavy publication path only runs when the
    /// ticker has actually set the flag.
    pub fn tick(&self) {
        if self.worker.heartbeat_due() {
            self.pool.service_heartbeat(self.worker);
        }
    }
}

impl std::fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("worker", &self.worker).finish()
    }
}

#[derive(Clone, Copy)]
struct CurrentTask {
    pool: NonNull<Pool>,
    worker: NonNull<Worker>,
}

// Safety: the raw pointers are only ever dereferenced for the dynamic
// extent bracketed by `enter`/`Drop` below, which always runs on the same
// thread that set them; they never cross threads.
unsafe impl Send for CurrentTask {}

thread_local! {
    static CURRENT: Cell<Option<CurrentTask>> = const { Cell::new(None) };
}

/// Saved/restored around every pool re-entry (`Pool::call`, a worker's main
/// loop picking up a job) so that recursive `join`/parallel-for calls issued
/// from inside pool code take the fast path instead of re-entering the pool.
pub(crate) struct CurrentTaskGuard {
    previous: Option<CurrentTask>,
}

impl CurrentTaskGuard {
    pub(crate) fn enter(pool: &Pool, worker: &Worker) -> Self {
        let current = CurrentTask {
            pool: NonNull::from(pool),
            worker: NonNull::from(worker),
        };
        let previous = CURRENT.with(|cell| cell.replace(Some(current)));
        Self { previous }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(self.previous));
    }
}

/// Runs `f` with the current thread's task, if this thread is presently
/// executing inside a pool frame.
pub(crate) fn with_current<R>(f: impl FnOnce(Option<&Task<'_>>) -> R) -> R {
    let current = CURRENT.with(Cell::get);
    match current {
        // Safety: `CurrentTaskGuard` guarantees these pointers stay valid
        // for as long as they are observable through the thread-local.
        Some(current) => {
            let task = Task {
                pool: unsafe { current.pool.as_ref() },
                worker: unsafe { current.worker.as_ref() },
            };
            f(Some(&task))
        }
        None => f(None),
    }
}
