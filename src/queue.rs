// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The per-worker local job queue: a doubly-linked intrusive list,
//! manipulated only by the thread that owns it.

use std::ptr::NonNull;

use cordyceps::list;

use crate::job::Job;
use crate::loom::cell::UnsafeCell;

/// A non-atomic, owner-only doubly-linked queue of [`Job`]s.
///
/// Every method here is only ever called from the worker thread that owns
/// this queue (`push`/`pop` from user code running on the worker; `shift`
/// from the same worker's own heartbeat tick). No method here touches an
/// atomic; the pool mutex taken around `shift`'s caller protects the
/// *shared-job slot* it publishes to, not this list.
pub(crate) struct LocalQueue {
    list: UnsafeCell<list::List<Job>>,
}

impl LocalQueue {
    pub(crate) fn new() -> Self {
        Self {
            list: UnsafeCell::new(list::List::new()),
        }
    }

    /// Appends `job` to the tail of the queue. `job` transitions to queued.
    ///
    /// # Safety
    ///
    /// `job` must remain valid (the stack frame that owns it must not
    /// return) until it is removed from this queue by `pop` or `shift`.
    pub(crate) unsafe fn push(&self, job: NonNull<Job>) {
        self.list
            .with_mut(|list| unsafe { (*list).push_back(job) });
    }

    /// Removes `job` from the tail of the queue if it is still there.
    /// Returns whether the job was popped locally.
    pub(crate) fn pop(&self, job: NonNull<Job>) -> bool {
        self.list.with_mut(|list| {
            let popped = unsafe { (*list).pop_back() };
            match popped {
                Some(popped) if popped == job => true,
                Some(other) => {
                    // Not our job: put it back. This should not happen under
                    // the stack discipline this crate relies on (the job at
                    // the tail is always the one most recently forked by the
                    // current frame), but we don't assume it away.
                    unsafe { (*list).push_back(other) };
                    false
                }
                None => false,
            }
        })
    }

    /// Removes and returns the oldest (head-most) queued job, if any.
    pub(crate) fn shift(&self) -> Option<NonNull<Job>> {
        self.list.with_mut(|list| unsafe { (*list).pop_front() })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.with(|list| unsafe { (*list).is_empty() })
    }
}

// Safety: a `LocalQueue` is embedded in a `Worker` which is `Sync` so it can
// live behind a shared pool-wide registry, but every operation on the queue
// itself is only ever invoked from the owning worker thread.
unsafe impl Send for LocalQueue {}
unsafe impl Sync for LocalQueue {}


#[cfg(test)]
mod proptest_conservation {
    use super::*;
    use crate::job::Job;
    use proptest::prelude::*;

    unsafe fn noop_handler(_: NonNull<Job>) {}
    unsafe fn noop_publish(_: NonNull<Job>) -> NonNull<crate::signal::CompletionSignal> {
        unreachable!("not exercised in these tests")
    }

    const JOB_COUNT: usize = 6;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Push(usize),
        Pop,
        Shift,
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(
            prop_oneof![
                (0..JOB_COUNT).prop_map(Op::Push),
                Just(Op::Pop),
                Just(Op::Shift),
            ],
            0..40,
        )
    }

    proptest! {
        /// Spec property: for any sequence of push/pop/shift, the multiset
        /// of items present equals push-set minus pop-set minus shift-set,
        /// and the queue is empty iff pushes == pops + shifts.
        #[test]
        fn push_pop_shift_conserve_the_multiset(sequence in ops()) {
            let queue = LocalQueue::new();
            let jobs: Vec<_> = (0..JOB_COUNT).map(|_| Box::pin(Job::new())).collect();
            let ptrs: Vec<NonNull<Job>> = jobs
                .iter()
                .map(|j| NonNull::from(j.as_ref().get_ref()))
                .collect();
            for &p in &ptrs {
                unsafe { (*p.as_ptr()).arm(noop_handler, noop_publish) };
            }

            let mut present = vec![false; JOB_COUNT];
            let mut pushed = 0usize;
            let mut removed = 0usize;

            for op in sequence {
                match op {
                    Op::Push(i) => {
                        if !present[i] {
                            unsafe { queue.push(ptrs[i]) };
                            present[i] = true;
                            pushed += 1;
                        }
                    }
                    Op::Pop => {
                        if let Some(i) = present.iter().rposition(|&p| p) {
                            if queue.pop(ptrs[i]) {
                                present[i] = false;
                                removed += 1;
                            }
                        }
                    }
                    Op::Shift => {
                        if let Some(job) = queue.shift() {
                            let i = ptrs.iter().position(|&p| p == job).unwrap();
                            present[i] = false;
                            removed += 1;
                        }
                    }
                }
            }

            let remaining = present.iter().filter(|&&p| p).count();
            prop_assert_eq!(pushed - removed, remaining);
            prop_assert_eq!(queue.is_empty(), remaining == 0);
        }
    }
}
