// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A heartbeat-scheduled fork-join thread pool.
//!
//! Most schedulers make work visible to other threads the moment it is
//! created, paying a synchronization cost on every `fork` so that idle
//! workers can see it immediately. This pool instead only advertises a
//! worker's oldest queued job on a periodic heartbeat (see [`Task::tick`]),
//! so the common case -- a [`join`] whose second half is never stolen --
//! costs a handful of non-atomic pointer writes and a single relaxed load.
//!
//! The cost of that laziness is made up for by two things: active stealing
//! (a `fork` immediately publishes work if the pool already has idle
//! workers parked, see [`future::Future::fork`]) and helping (a thread
//! waiting on its own [`join`] runs other workers' advertised jobs instead
//! of blocking, see the cold-wait path in `future.rs`).
//!
//! # Usage
//!
//! ```no_run
//! fn fib(task: &forkpool::Task, n: u64) -> u64 {
//!     task.tick();
//!     if n < 2 {
//!         return n;
//!     }
//!     let (a, b) = forkpool::join(
//!         |task| fib(task, n - 1),
//!         |task| fib(task, n - 2),
//!     );
//!     a + b
//! }
//!
//! let result = forkpool::scope(|task| fib(task, 20));
//! assert_eq!(result, 6765);
//! ```
//!
//! [`join`], [`parallel_for`], and [`parallel_reduce`] all auto-initialize a
//! process-wide pool with default configuration on first use. Call
//! [`init_with_config`] first if you need non-default tuning; call
//! [`deinit`] to shut the pool down and join all of its threads.

mod api;
mod config;
mod error;
mod future;
mod job;
mod loom;
mod pool;
mod queue;
mod signal;
mod task;
mod worker;

pub use api::{
    join, parallel_for, parallel_for_each, parallel_for_each_with_grain, parallel_for_with_grain,
    parallel_reduce, parallel_reduce_with_grain, scope,
};
pub use config::{Builder, PoolConfig};
pub use error::{PoolError, Result};
pub use future::Future;
pub use pool::{deinit, init, init_with_config, is_initialized, num_workers};
pub use task::Task;

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn fib_matches_sequential() {
        fn fib(task: &Task, n: u64) -> u64 {
            task.tick();
            if n < 2 {
                return n;
            }
            let (a, b) = join(|task| fib(task, n - 1), |task| fib(task, n - 2));
            a + b
        }

        let result = scope(|task| fib(task, 20));
        assert_eq!(result, 6765);
    }
}
