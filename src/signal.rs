// Copyright 2026 forkpool contributors
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-shot completion event with spin -> yield -> park semantics.

use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex};

const PENDING: u8 = 0;
const WAITING: u8 = 1;
const DONE: u8 = 2;

/// How many spin/yield rounds `wait` tries before parking on the condvar.
const SPIN_LIMIT: u32 = 64;

/// Three-state completion event: PENDING -> (WAITING | DONE).
///
/// `set_done` establishes a release that synchronizes-with the acquire load
/// observed by every successful `wait`, so a handler's writes to a job's
/// result slot are visible to the joiner once `wait` returns.
pub(crate) struct CompletionSignal {
    state: AtomicU8,
    gate: Mutex<()>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            gate: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Marks the signal as done, waking any parked waiters. Idempotent but
    /// should only be called once per spec contract.
    pub(crate) fn set_done(&self) {
        let prev = self.state.swap(DONE, Ordering::AcqRel);
        if prev == WAITING {
            let _guard = self.gate.lock();
            self.condvar.notify_all();
        }
    }

    /// Blocks until `set_done` has been observed, spinning first, then
    /// yielding, then parking on a condition variable.
    pub(crate) fn wait(&self) {
        let backoff = Backoff::new();
        for _ in 0..SPIN_LIMIT {
            if self.is_done() {
                return;
            }
            if backoff.is_completed() {
                break;
            }
            backoff.snooze();
        }

        loop {
            if self.is_done() {
                return;
            }
            let mut guard = self.gate.lock();
            // Announce that we intend to park, so a racing `set_done` knows
            // to notify rather than skip the wake.
            match self
                .state
                .compare_exchange(PENDING, WAITING, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {}
                Err(DONE) => return,
                Err(_) => {}
            }
            if self.is_done() {
                return;
            }
            self.condvar.wait(&mut guard);
        }
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_if_already_done() {
        let signal = CompletionSignal::new();
        signal.set_done();
        signal.wait();
        assert!(signal.is_done());
    }

    #[test]
    fn wait_blocks_until_set_done() {
        let signal = Arc::new(CompletionSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };

        thread::sleep(std::time::Duration::from_millis(5));
        signal.set_done();
        waiter.join().unwrap();
        assert!(signal.is_done());
    }
}
