// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The thread pool: owns all workers, the heartbeat ticker thread, and the
//! rendezvous point where stolen jobs are published and consumed.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::job::Job;
use crate::signal::CompletionSignal;
use crate::task::{CurrentTaskGuard, Task};
use crate::worker::{Worker, WorkerId};

struct Inner {
    workers: Vec<Arc<Worker>>,
    stopping: bool,
}

/// A mutex-guarded container of worker pointers, the ticker thread handle, a
/// monotonic tag counter, the heartbeat interval, and an atomic count of
/// idle workers. The mutex is held only during heartbeat publication and
/// stolen-job handoff, never during user code execution.
pub(crate) struct Pool {
    inner: Mutex<Inner>,
    condvar: Condvar,
    idle_count: AtomicUsize,
    next_tag: AtomicU64,
    next_worker_id: AtomicUsize,
    background_worker_count: usize,
    config: PoolConfig,
    background: Mutex<Vec<JoinHandle<()>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    fn start(config: PoolConfig) -> Result<Arc<Pool>> {
        let worker_count = config.resolved_worker_count();
        let background_worker_count = worker_count;

        let pool = Arc::new(Pool {
            inner: Mutex::new(Inner {
                workers: Vec::with_capacity(worker_count),
                stopping: false,
            }),
            condvar: Condvar::new(),
            idle_count: AtomicUsize::new(0),
            next_tag: AtomicU64::new(0),
            next_worker_id: AtomicUsize::new(0),
            background_worker_count,
            config,
            background: Mutex::new(Vec::with_capacity(worker_count)),
            ticker: Mutex::new(None),
        });

        let ready = Arc::new(Barrier::new(worker_count + 1));
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let worker = Arc::new(Worker::new(pool.next_worker_id()));
            pool.inner.lock().workers.push(Arc::clone(&worker));

            let pool = Arc::clone(&pool);
            let ready = Arc::clone(&ready);
            let mut builder = thread::Builder::new().name(format!(
                "{}-{}",
                pool.config.thread_name,
                worker.id()
            ));
            if let Some(stack_size) = pool.config.thread_stack_size {
                builder = builder.stack_size(stack_size);
            }
            let handle = match builder.spawn(move || run_worker(pool, worker, &ready)) {
                Ok(handle) => handle,
                Err(source) => {
                    // Workers spawned so far are already parked on `ready`,
                    // which needs `worker_count + 1` parties to ever resolve.
                    // Flip `stopping` and release the barrier ourselves so
                    // they observe it and exit instead of hanging forever,
                    // then join them before reporting failure.
                    pool.inner.lock().stopping = true;
                    ready.wait();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::SpawnFailed {
                        kind: "worker",
                        source,
                    });
                }
            };
            handles.push(handle);
        }
        *pool.background.lock() = handles;

        let ticker_pool = Arc::clone(&pool);
        let ticker_handle = match thread::Builder::new()
            .name(format!("{}-ticker", pool.config.thread_name))
            .spawn(move || run_ticker(ticker_pool))
        {
            Ok(handle) => handle,
            Err(source) => {
                // Same reasoning as above: every background worker is
                // already parked on `ready`, waiting for this thread to
                // reach it.
                pool.inner.lock().stopping = true;
                ready.wait();
                for handle in std::mem::take(&mut *pool.background.lock()) {
                    let _ = handle.join();
                }
                return Err(PoolError::SpawnFailed {
                    kind: "ticker",
                    source,
                });
            }
        };
        *pool.ticker.lock() = Some(ticker_handle);

        ready.wait();
        tracing::debug!(workers = worker_count, "pool started");
        Ok(pool)
    }

    fn next_worker_id(&self) -> WorkerId {
        self.next_worker_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.background_worker_count
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle_count.load(Ordering::Relaxed)
    }

    /// Services a worker's heartbeat: if its shared-job slot is empty, shift
    /// the oldest queued job, allocate its execute-state, and publish it.
    pub(crate) fn service_heartbeat(&self, worker: &Worker) {
        let _guard = self.inner.lock();
        // Safety: we hold the pool mutex, as required by `shared_job`.
        if unsafe { worker.shared_job() }.is_none() {
            if let Some(job) = worker.queue().shift() {
                let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
                // Safety: `job` was just removed from the local queue it
                // owned; no one else can observe it yet.
                unsafe {
                    (*job.as_ptr()).set_job_time(tag);
                    let publish_fn = (*job.as_ptr()).publish_fn();
                    let _signal = publish_fn(job);
                    worker.set_shared_job(Some(job));
                }
                tracing::trace!(worker = worker.id(), tag, "published job");
            }
        }
        worker.clear_heartbeat();
        drop(_guard);
        self.condvar.notify_all();
    }

    /// Reclaims `job` from `worker`'s shared-job slot if it has not yet been
    /// picked up by another worker.
    pub(crate) fn reclaim_if_unclaimed(&self, worker: &Worker, job: NonNull<Job>) -> bool {
        let _guard = self.inner.lock();
        // Safety: we hold the pool mutex.
        if unsafe { worker.shared_job() } == Some(job) {
            unsafe { worker.set_shared_job(None) };
            true
        } else {
            false
        }
    }

    /// Helps other workers by running advertised jobs, oldest first, until
    /// `signal` fires or there is nothing left to help with.
    pub(crate) fn help_until_done(&self, signal: &CompletionSignal) {
        loop {
            if signal.is_done() {
                return;
            }
            let job = {
                let inner = self.inner.lock();
                take_oldest_shared_job(&inner)
            };
            match job {
                Some(job) => {
                    // Safety: `job` was just unpublished and is in the
                    // executing state; only one worker can hold it.
                    let handler = unsafe { (*job.as_ptr()).handler() };
                    unsafe { handler(job) };
                }
                None => return,
            }
        }
    }

    /// Creates a transient worker on the calling thread, runs `f` anchored
    /// on it, then removes the worker. This is how external threads enter
    /// the pool without becoming permanent.
    pub(crate) fn call<R>(&self, f: impl FnOnce(&Task) -> R) -> R {
        let worker = Arc::new(Worker::new(self.next_worker_id()));
        self.inner.lock().workers.push(Arc::clone(&worker));

        let _guard = CurrentTaskGuard::enter(self, &worker);
        let task = Task::new(self, &worker);
        let result = f(&task);

        self.inner
            .lock()
            .workers
            .retain(|w| !Arc::ptr_eq(w, &worker));
        result
    }

    fn shutdown(self: Arc<Self>) {
        tracing::debug!("stop signal received, shutting down");
        self.inner.lock().stopping = true;
        self.condvar.notify_all();

        let handles = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            let _ = handle.join();
        }
        if let Some(handle) = self.ticker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn take_oldest_shared_job(inner: &Inner) -> Option<NonNull<Job>> {
    let mut best: Option<(NonNull<Job>, &Arc<Worker>, u64)> = None;
    for worker in &inner.workers {
        // Safety: caller holds the pool mutex.
        if let Some(job) = unsafe { worker.shared_job() } {
            let tag = unsafe { (*job.as_ptr()).job_time() };
            let is_older = best.as_ref().map_or(true, |(_, _, best_tag)| tag < *best_tag);
            if is_older {
                best = Some((job, worker, tag));
            }
        }
    }
    let (job, worker, _) = best?;
    // Safety: caller holds the pool mutex.
    unsafe { worker.set_shared_job(None) };
    Some(job)
}

fn run_worker(pool: Arc<Pool>, worker: Arc<Worker>, ready: &Barrier) {
    let span = tracing::debug_span!("worker", id = worker.id());
    let _span = span.enter();
    let _guard = CurrentTaskGuard::enter(&pool, &worker);
    ready.wait();

    loop {
        let job = {
            let mut inner = pool.inner.lock();
            if inner.stopping {
                break;
            }
            match take_oldest_shared_job(&inner) {
                Some(job) => Some(job),
                None => {
                    pool.idle_count.fetch_add(1, Ordering::SeqCst);
                    pool.condvar.wait(&mut inner);
                    pool.idle_count.fetch_sub(1, Ordering::SeqCst);
                    None
                }
            }
        };
        if let Some(job) = job {
            // Safety: `job` is in the executing state and owned by this
            // call stack alone.
            let handler = unsafe { (*job.as_ptr()).handler() };
            unsafe { handler(job) };
        }
    }
    tracing::debug!("stop signal received, shutting down");
}

fn run_ticker(pool: Arc<Pool>) {
    // Randomize the starting worker so that, across repeated pool
    // start/stop cycles, the same low-numbered worker isn't always first to
    // receive a pulse.
    let mut next = fastrand::usize(..);
    loop {
        let worker_count = {
            let inner = pool.inner.lock();
            if inner.stopping {
                break;
            }
            inner.workers.len().max(1)
        };

        let pulse = pool
            .config
            .heartbeat_interval
            .checked_div(u32::try_from(worker_count).unwrap_or(1))
            .unwrap_or(pool.config.heartbeat_interval);
        thread::sleep(pulse);

        let inner = pool.inner.lock();
        if inner.stopping {
            break;
        }
        if let Some(worker) = inner.workers.get(next % inner.workers.len().max(1)) {
            worker.mark_heartbeat();
        }
        next = next.wrapping_add(1);
    }
}


static REGISTRY: OnceLock<Mutex<Option<Arc<Pool>>>> = OnceLock::new();

fn registry() -> &'static Mutex<Option<Arc<Pool>>> {
    REGISTRY.get_or_init(|| Mutex::new(None))
}

/// Initializes the process-wide pool with default configuration. Idempotent
/// in the sense that it fails loudly rather than silently if already
/// initialized; see [`deinit`].
pub fn init() -> Result<()> {
    init_with_config(PoolConfig::default())
}

/// Initializes the process-wide pool with the given configuration.
pub fn init_with_config(config: PoolConfig) -> Result<()> {
    let mut guard = registry().lock();
    if guard.is_some() {
        return Err(PoolError::AlreadyInitialized);
    }
    let pool = Pool::start(config)?;
    *guard = Some(pool);
    Ok(())
}

/// Shuts down the process-wide pool, joining all threads. A no-op if no
/// pool is currently initialized.
pub fn deinit() {
    let pool = registry().lock().take();
    if let Some(pool) = pool {
        pool.shutdown();
    }
}

/// Whether a process-wide pool is currently initialized.
pub fn is_initialized() -> bool {
    registry().lock().is_some()
}

/// The number of persistent background worker threads in the process-wide
/// pool, or `0` if uninitialized.
pub fn num_workers() -> usize {
    registry().lock().as_ref().map_or(0, |pool| pool.num_workers())
}

/// Returns the process-wide pool, if one is initialized.
pub(crate) fn current() -> Option<Arc<Pool>> {
    registry().lock().clone()
}

/// Returns the process-wide pool, auto-initializing it with default
/// configuration on first use. Callers that want explicit control over pool
/// configuration should call [`init_with_config`] before doing any work;
/// this is the convenience path for everyone else.
pub(crate) fn ensure() -> Arc<Pool> {
    if let Some(pool) = current() {
        return pool;
    }
    match init() {
        Ok(()) | Err(PoolError::AlreadyInitialized) => {
            current().expect("pool initialized but missing from the registry")
        }
        Err(err) => panic!("failed to auto-initialize the default pool: {err}"),
    }
}
