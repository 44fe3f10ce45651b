// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A worker owns a local queue, a heartbeat flag, and one advertised-job
//! slot. Workers are created at pool start (background workers) or attached
//! transiently to a caller's thread by [`crate::pool::Pool::call`].

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::job::Job;
use crate::queue::LocalQueue;

/// Opaque worker identity, unique within a pool for its lifetime.
pub(crate) type WorkerId = usize;

pub(crate) struct Worker {
    id: WorkerId,
    queue: LocalQueue,
    /// Set by the ticker roughly every heartbeat interval; cleared by the
    /// worker once it has serviced the pulse.
    heartbeat: AtomicBool,
    /// The one job this worker has advertised for stealing, if any.
    /// Guarded by the pool's mutex -- never read or written without it.
    shared_job: UnsafeCell<Option<NonNull<Job>>>,
    /// The job-time tag under which `shared_job` was last published, purely
    /// for introspection/debugging (the authoritative tag lives on the job
    /// itself, see [`Job::job_time`]).
    last_published_tag: AtomicU64,
}

// Safety: `shared_job` is only ever read or written while the owning pool's
// mutex is held; `queue` is only ever touched by the thread that owns this
// worker. See the safety notes on `LocalQueue`.
unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            queue: LocalQueue::new(),
            heartbeat: AtomicBool::new(false),
            shared_job: UnsafeCell::new(None),
            last_published_tag: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    pub(crate) fn mark_heartbeat(&self) {
        self.heartbeat.store(true, Ordering::Relaxed);
    }

    /// The hot-path heartbeat check: a single monotonic load.
    pub(crate) fn heartbeat_due(&self) -> bool {
        self.heartbeat.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_heartbeat(&self) {
        self.heartbeat.store(false, Ordering::Relaxed);
    }

    /// Reads this worker's shared-job slot.
    ///
    /// # Safety
    ///
    /// Caller must hold the owning pool's mutex.
    pub(crate) unsafe fn shared_job(&self) -> Option<NonNull<Job>> {
        unsafe { *self.shared_job.get() }
    }

    /// Sets this worker's shared-job slot.
    ///
    /// # Safety
    ///
    /// Caller must hold the owning pool's mutex.
    pub(crate) unsafe fn set_shared_job(&self, job: Option<NonNull<Job>>) {
        unsafe { *self.shared_job.get() = job };
        if let Some(job) = job {
            let tag = unsafe { (*job.as_ptr()).job_time() };
            self.last_published_tag.store(tag, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish()
    }
}
