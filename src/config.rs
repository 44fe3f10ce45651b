// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Default period between heartbeat pulses.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_micros(10);

/// Configuration recognized by [`init_with_config`][crate::init_with_config].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub(crate) background_worker_count: Option<NonZeroUsize>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) thread_name: String,
    pub(crate) thread_stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            background_worker_count: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            thread_name: "forkpool-worker".to_string(),
            thread_stack_size: None,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The number of background worker threads this configuration resolves
    /// to, given the platform's hardware concurrency.
    pub(crate) fn resolved_worker_count(&self) -> usize {
        self.background_worker_count.map_or_else(
            || {
                std::thread::available_parallelism()
                    .map(NonZeroUsize::get)
                    .unwrap_or(1)
                    .saturating_sub(1)
                    .max(1)
            },
            NonZeroUsize::get,
        )
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: PoolConfig,
}

impl Builder {
    /// Sets the number of persistent background worker threads. `None`
    /// resolves to `max(1, hardware_concurrency - 1)` at pool start.
    #[must_use]
    pub fn background_worker_count(mut self, count: Option<NonZeroUsize>) -> Self {
        self.config.background_worker_count = count;
        self
    }

    /// Sets the period between heartbeat pulses.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Sets the name prefix given to spawned worker threads.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Sets the stack size for spawned worker threads.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = Some(size);
        self
    }

    #[must_use]
    pub fn build(self) -> PoolConfig {
        self.config
    }
}
