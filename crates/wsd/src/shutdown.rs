// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cancellable delay shared by every sleeping component.
//!
//! A retry chain or an application delay waits on the signal instead of
//! calling `thread::sleep`, so triggering shutdown wakes it immediately.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SignalState {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

/// Cloneable shutdown flag with interruptible waits.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalState>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shutdown and wake every waiter.
    pub fn trigger(&self) {
        let mut triggered = self.inner.triggered.lock();
        *triggered = true;
        self.inner.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.lock()
    }

    /// Wait for `duration` unless shutdown is triggered first.
    ///
    /// Returns true if the full duration elapsed, false on shutdown. A
    /// duration past the representable range waits for the trigger alone.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut triggered = self.inner.triggered.lock();
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !*triggered {
                self.inner.condvar.wait(&mut triggered);
            }
            return false;
        };
        while !*triggered {
            if self
                .inner
                .condvar
                .wait_until(&mut triggered, deadline)
                .timed_out()
            {
                return !*triggered;
            }
        }
        false
    }
}
