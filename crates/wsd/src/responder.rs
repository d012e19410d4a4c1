// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retrying unicast responder.
//!
//! Sends a datagram once, then repeats it with jittered exponential backoff
//! (SOAP-over-UDP retransmission):
//!
//! ```text
//! send -> sleep(rand[min,max]) -> send -> sleep(2x, capped) -> send -> ...
//! ```
//!
//! A send error ends the chain for that datagram; it is logged and counted,
//! never returned to whoever handed the reply over. Shutdown is checked
//! before every resend and interrupts the delay itself.

use crate::observe::DispatchMetrics;
use crate::shutdown::ShutdownSignal;
use crate::transport::DatagramSender;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Retransmission parameters for one class of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resends after the first send (0 = best effort, single send)
    pub repeat_count: u32,
    /// Lower bound of the initial random delay
    pub min_delay: Duration,
    /// Upper bound of the initial random delay
    pub max_delay: Duration,
    /// Cap applied when doubling
    pub upper_delay: Duration,
}

impl RetryPolicy {
    /// Single send, no repeats.
    pub const fn once() -> Self {
        Self {
            repeat_count: 0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            upper_delay: Duration::ZERO,
        }
    }

    /// Delay schedule with fresh jitter.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self, &mut fastrand::Rng::new())
    }
}

/// Inter-send delays of one retransmission chain.
///
/// Yields exactly `repeat_count` delays: the first uniformly random in
/// `[min_delay, max_delay]`, each following one doubled and capped at
/// `upper_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    remaining: u32,
    upper: Duration,
}

impl Backoff {
    pub fn new(policy: &RetryPolicy, rng: &mut fastrand::Rng) -> Self {
        let lo = policy.min_delay.as_millis() as u64;
        let hi = (policy.max_delay.as_millis() as u64).max(lo);
        let initial = Duration::from_millis(rng.u64(lo..=hi));
        let upper = policy.upper_delay.max(policy.min_delay);
        Self {
            delay: initial.min(upper),
            remaining: policy.repeat_count,
            upper,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.delay;
        self.delay = current.saturating_mul(2).min(self.upper);
        Some(current)
    }
}

/// How a retransmission chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespondOutcome {
    /// All sends went out.
    Completed { sends: u32 },
    /// A send failed; remaining repeats were dropped.
    Aborted { sends: u32 },
    /// Shutdown stopped the chain.
    Cancelled { sends: u32 },
}

impl RespondOutcome {
    pub fn sends(&self) -> u32 {
        match *self {
            Self::Completed { sends } | Self::Aborted { sends } | Self::Cancelled { sends } => {
                sends
            }
        }
    }
}

/// Sends replies with retransmission.
#[derive(Clone)]
pub struct RetryingResponder {
    sender: Arc<dyn DatagramSender>,
    shutdown: ShutdownSignal,
    metrics: Arc<DispatchMetrics>,
}

impl RetryingResponder {
    pub fn new(
        sender: Arc<dyn DatagramSender>,
        shutdown: ShutdownSignal,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            sender,
            shutdown,
            metrics,
        }
    }

    /// Send `datagram` to `destination`, repeating per `policy`.
    ///
    /// Blocks the calling thread for the duration of the chain.
    pub fn respond(
        &self,
        datagram: &[u8],
        destination: SocketAddr,
        policy: &RetryPolicy,
    ) -> RespondOutcome {
        self.respond_with(datagram, destination, policy.backoff())
    }

    /// Send a sequence of related messages to the same destination, each with
    /// its own retransmission chain. Stops early on shutdown.
    pub fn respond_all(
        &self,
        datagrams: &[Vec<u8>],
        destination: SocketAddr,
        policy: &RetryPolicy,
    ) -> Vec<RespondOutcome> {
        let mut outcomes = Vec::with_capacity(datagrams.len());
        for datagram in datagrams {
            let outcome = self.respond(datagram, destination, policy);
            outcomes.push(outcome);
            if matches!(outcome, RespondOutcome::Cancelled { .. }) {
                break;
            }
        }
        outcomes
    }

    fn respond_with(
        &self,
        datagram: &[u8],
        destination: SocketAddr,
        backoff: Backoff,
    ) -> RespondOutcome {
        if self.shutdown.is_triggered() {
            self.metrics.replies_cancelled.fetch_add(1, Ordering::Relaxed);
            return RespondOutcome::Cancelled { sends: 0 };
        }
        if !self.send_once(datagram, destination, 0) {
            return RespondOutcome::Aborted { sends: 0 };
        }

        let mut sends = 1;
        for delay in backoff {
            if !self.shutdown.sleep(delay) {
                log::debug!(
                    "[RESPONDER] shutdown after {} send(s), dropping resends to {}",
                    sends,
                    destination
                );
                self.metrics.replies_cancelled.fetch_add(1, Ordering::Relaxed);
                return RespondOutcome::Cancelled { sends };
            }
            if !self.send_once(datagram, destination, sends) {
                return RespondOutcome::Aborted { sends };
            }
            sends += 1;
        }
        RespondOutcome::Completed { sends }
    }

    fn send_once(&self, datagram: &[u8], destination: SocketAddr, attempt: u32) -> bool {
        match self.sender.send_to(datagram, destination) {
            Ok(()) => {
                self.metrics.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                log::warn!(
                    "[RESPONDER] send to {} failed on attempt {}: {}",
                    destination,
                    attempt + 1,
                    e
                );
                self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}
