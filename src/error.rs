// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;

use thiserror::Error;

/// Errors returned by pool lifecycle operations.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to spawn {kind} thread")]
    SpawnFailed {
        kind: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("the pool is already initialized")]
    AlreadyInitialized,

    #[error("the pool has not been initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, PoolError>;
