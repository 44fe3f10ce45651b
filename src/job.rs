// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The intrusive list node at the heart of a [`Future`][crate::future::Future].
//!
//! A `Job`'s lifecycle state is never stored as a discriminant. It is derived
//! from the null-ness of two fields: `handler` (set once, at `fork`) and
//! whether the node is currently linked into a worker's local queue. See
//! [`Job::state`].

use std::cell::Cell;
use std::marker::PhantomPinned;
use std::ptr::NonNull;

use cordyceps::list;

use crate::signal::CompletionSignal;

/// Observed lifecycle state of a [`Job`], derived rather than stored.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum JobState {
    /// `fork` has not been called yet.
    Pending,
    /// Linked into the owner's local queue; only the owner may run it.
    Queued,
    /// Claimed by some worker (owner or a stealer); running or about to run.
    Executing,
}

/// Called on whichever worker ends up running the job. Recovers the owning
/// `Future` from the job pointer (via a field offset computed at
/// monomorphization time) and drives it to completion.
pub(crate) type HandlerFn = unsafe fn(NonNull<Job>);

/// Called exactly once, by whichever path transitions a job to `executing`
/// (the heartbeat cold path or active stealing). Allocates the job's
/// execute-state and returns a type-erased handle to its completion signal,
/// so pool code never needs to know the future's output type.
pub(crate) type PublishFn = unsafe fn(NonNull<Job>) -> NonNull<CompletionSignal>;

pub(crate) struct Job {
    links: list::Links<Job>,
    handler: Cell<Option<HandlerFn>>,
    publish: Cell<Option<PublishFn>>,
    job_time: Cell<u64>,
    #[cfg(debug_assertions)]
    high_water: Cell<JobState>,
    _pin: PhantomPinned,
}

// Safety: a `Job` only ever moves between threads while queued or executing,
// and in both cases access is serialized by the owner's exclusive access to
// the local queue or by the pool mutex. The `Cell`s are never aliased
// concurrently.
unsafe impl Send for Job {}
unsafe impl Sync for Job {}

impl Job {
    pub(crate) fn new() -> Self {
        Self {
            links: list::Links::new(),
            handler: Cell::new(None),
            publish: Cell::new(None),
            job_time: Cell::new(0),
            #[cfg(debug_assertions)]
            high_water: Cell::new(JobState::Pending),
            _pin: PhantomPinned,
        }
    }

    /// Derives the job's lifecycle state from its pointer fields, per the
    /// table in the data model: pending has no handler; queued has a handler
    /// and is still linked; executing has a handler and has been unlinked.
    ///
    /// In debug builds this also checks that the state never regresses
    /// relative to the highest state previously observed (pending -> queued
    /// -> executing, never backwards).
    pub(crate) fn state(&self) -> JobState {
        let observed = if self.handler.get().is_none() {
            JobState::Pending
        } else if self.links.is_linked() {
            JobState::Queued
        } else {
            JobState::Executing
        };
        #[cfg(debug_assertions)]
        {
            let prev = self.high_water.get();
            debug_assert!(
                rank(observed) >= rank(prev),
                "job state moved backwards: {prev:?} -> {observed:?}",
            );
            self.high_water.set(observed);
        }
        observed
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.links.is_linked()
    }

    /// Installs the handler and publish thunks and transitions pending ->
    /// queued. Must only be called once, by `fork`.
    pub(crate) fn arm(&self, handler: HandlerFn, publish: PublishFn) {
        debug_assert_eq!(self.state(), JobState::Pending, "job already forked");
        self.handler.set(Some(handler));
        self.publish.set(Some(publish));
    }

    pub(crate) fn handler(&self) -> HandlerFn {
        self.handler.get().expect("job has no handler installed")
    }

    pub(crate) fn publish_fn(&self) -> PublishFn {
        self.publish.get().expect("job has no publish fn installed")
    }

    pub(crate) fn job_time(&self) -> u64 {
        self.job_time.get()
    }

    pub(crate) fn set_job_time(&self, tag: u64) {
        self.job_time.set(tag);
    }
}

#[cfg(debug_assertions)]
fn rank(state: JobState) -> u8 {
    match state {
        JobState::Pending => 0,
        JobState::Queued => 1,
        JobState::Executing => 2,
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("state", &self.state())
            .field("job_time", &self.job_time.get())
            .finish()
    }
}

// Safety: `Job` is always accessed through `NonNull`, and this crate never
// moves a job out of the stack frame that owns it; `Handle = NonNull<Self>`
// keeps the list non-owning, which is required since jobs are never
// heap-allocated.
unsafe impl list::Linked<list::Links<Job>> for Job {
    type Handle = NonNull<Job>;

    fn into_ptr(r: Self::Handle) -> NonNull<Job> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<Job>) -> Self::Handle {
        ptr
    }

    unsafe fn links(ptr: NonNull<Job>) -> NonNull<list::Links<Job>> {
        // Safety: `links` is a valid field of `Job`, and the caller
        // guarantees `ptr` points to a live `Job`.
        unsafe { ptr.byte_add(std::mem::offset_of!(Job, links)) }.cast()
    }
}
