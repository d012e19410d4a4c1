// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observability: message sink and dispatch counters.
//!
//! The sink sees every accepted inbound message exactly once and every
//! reply the engine produces exactly once. Counters are relaxed atomics; read
//! them through [`DispatchMetrics::snapshot`].

use crate::message::{DiscoveryMessage, MessageHeader};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why an inbound datagram did not reach any listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Undecodable,
    Duplicate,
    Stale,
    NotRelevant,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undecodable => "undecodable",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
            Self::NotRelevant => "not-relevant",
        };
        f.write_str(s)
    }
}

/// Receives copies of discovery traffic for monitoring.
///
/// Implementations must be cheap; they run on dispatcher worker threads.
pub trait ObservabilitySink: Send + Sync {
    /// An inbound message passed the filter.
    fn inbound(&self, message: &DiscoveryMessage, source: SocketAddr);

    /// The engine produced a reply addressed at `destination`.
    fn outbound(&self, _message: &DiscoveryMessage, _destination: SocketAddr) {}

    /// An inbound message was dropped before dispatch. `header` is `None`
    /// when the datagram could not be decoded.
    fn discarded(&self, _header: Option<&MessageHeader>, _reason: DiscardReason) {}
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ObservabilitySink for NullSink {
    fn inbound(&self, _message: &DiscoveryMessage, _source: SocketAddr) {}
}

/// Sink writing one `log` line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ObservabilitySink for LogSink {
    fn inbound(&self, message: &DiscoveryMessage, source: SocketAddr) {
        log::info!(
            "[OBSERVE] <- {} {} from {}",
            message.message_type(),
            message.id(),
            source
        );
    }

    fn outbound(&self, message: &DiscoveryMessage, destination: SocketAddr) {
        log::info!(
            "[OBSERVE] -> {} {} to {}",
            message.message_type(),
            message.id(),
            destination
        );
    }

    fn discarded(&self, header: Option<&MessageHeader>, reason: DiscardReason) {
        match header {
            Some(h) => log::debug!(
                "[OBSERVE] drop {} {} ({})",
                h.message_type,
                h.message_id,
                reason
            ),
            None => log::debug!("[OBSERVE] drop datagram ({})", reason),
        }
    }
}

/// Dispatch and reply counters.
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Datagrams handed to the dispatcher.
    pub datagrams_received: AtomicU64,
    /// Datagrams the codec rejected.
    pub decode_failures: AtomicU64,
    pub accepted: AtomicU64,
    pub duplicates: AtomicU64,
    pub stale: AtomicU64,
    pub not_relevant: AtomicU64,
    /// Listener errors and panics (caught).
    pub listener_failures: AtomicU64,
    /// Replies handed to the reply pool.
    pub replies_queued: AtomicU64,
    /// Individual datagrams written to the network, resends included.
    pub datagrams_sent: AtomicU64,
    pub send_failures: AtomicU64,
    /// Reply chains cut short by shutdown.
    pub replies_cancelled: AtomicU64,
}

impl DispatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            datagrams_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            not_relevant: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            replies_queued: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            replies_cancelled: AtomicU64::new(0),
        }
    }

    /// Count a discard under its reason.
    pub fn record_discard(&self, reason: DiscardReason) {
        let counter = match reason {
            DiscardReason::Undecodable => &self.decode_failures,
            DiscardReason::Duplicate => &self.duplicates,
            DiscardReason::Stale => &self.stale,
            DiscardReason::NotRelevant => &self.not_relevant,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            not_relevant: self.not_relevant.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            replies_queued: self.replies_queued.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            replies_cancelled: self.replies_cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub datagrams_received: u64,
    pub decode_failures: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub not_relevant: u64,
    pub listener_failures: u64,
    pub replies_queued: u64,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub replies_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_discard_routes_to_counter() {
        let metrics = DispatchMetrics::new();
        metrics.record_discard(DiscardReason::Duplicate);
        metrics.record_discard(DiscardReason::Duplicate);
        metrics.record_discard(DiscardReason::Stale);
        metrics.record_discard(DiscardReason::Undecodable);

        let snap = metrics.snapshot();
        assert_eq!(snap.duplicates, 2);
        assert_eq!(snap.stale, 1);
        assert_eq!(snap.decode_failures, 1);
        assert_eq!(snap.not_relevant, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_string(&MetricsSnapshot::default()).unwrap();
        assert!(json.contains("\"datagrams_sent\":0"));
    }
}
