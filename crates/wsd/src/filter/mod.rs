// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Duplicate and staleness suppression for inbound discovery messages.
//!
//! ```text
//! header -> MessageIdBuffer (duplicate?) -> AppSequence tracker (stale?, Hello/Bye only)
//!        -> Relevance (anyone interested?) -> Accept (tracker updated)
//! ```
//!
//! The filter performs no I/O; its only side effects are on the id history
//! and the AppSequence table.

pub mod app_sequence_tracker;
pub mod message_id_buffer;

pub use app_sequence_tracker::{AppSequenceTracker, SequenceCheck};
pub use message_id_buffer::MessageIdBuffer;

use crate::message::MessageHeader;
use parking_lot::Mutex;
use std::fmt;

/// Filter decision for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Duplicate,
    Stale,
    NotRelevant,
}

impl fmt::Display for FilterVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Stale => write!(f, "stale"),
            Self::NotRelevant => write!(f, "not-relevant"),
        }
    }
}

/// Answers "is anybody interested in this message?".
pub trait Relevance {
    fn is_relevant(&self, header: &MessageHeader) -> bool;
}

impl<F> Relevance for F
where
    F: Fn(&MessageHeader) -> bool,
{
    fn is_relevant(&self, header: &MessageHeader) -> bool {
        self(header)
    }
}

/// Duplicate and staleness filter.
pub struct DiscoveryFilter {
    seen: Mutex<MessageIdBuffer>,
    sequences: AppSequenceTracker,
}

impl DiscoveryFilter {
    /// Create a filter remembering the last `history` message ids.
    pub fn new(history: usize) -> Self {
        Self {
            seen: Mutex::new(MessageIdBuffer::new(history)),
            sequences: AppSequenceTracker::new(),
        }
    }

    /// Classify one inbound message.
    ///
    /// Duplicate detection runs first and always records the id. The
    /// AppSequence tracker only moves forward on `Accept`.
    pub fn accept(&self, header: &MessageHeader, relevance: &dyn Relevance) -> FilterVerdict {
        if self.seen.lock().contains_or_enqueue(&header.message_id) {
            self.trace(header, FilterVerdict::Duplicate);
            return FilterVerdict::Duplicate;
        }

        let verdict = match (
            header.message_type.is_announcement(),
            header.app_sequence,
            header.endpoint.as_ref(),
        ) {
            (true, Some(seq), Some(endpoint)) => {
                let mut relevant = false;
                let check = self.sequences.check_and_commit(endpoint, seq, || {
                    relevant = relevance.is_relevant(header);
                    relevant
                });
                match check {
                    SequenceCheck::Stale => FilterVerdict::Stale,
                    SequenceCheck::Fresh if relevant => FilterVerdict::Accept,
                    SequenceCheck::Fresh => FilterVerdict::NotRelevant,
                }
            }
            _ if relevance.is_relevant(header) => FilterVerdict::Accept,
            _ => FilterVerdict::NotRelevant,
        };

        self.trace(header, verdict);
        verdict
    }

    /// Last accepted AppSequence for an endpoint.
    pub fn sequences(&self) -> &AppSequenceTracker {
        &self.sequences
    }

    /// Drop all history (shutdown).
    pub fn clear(&self) {
        self.seen.lock().clear();
        self.sequences.clear();
    }

    #[cfg(feature = "trace-filter")]
    fn trace(&self, header: &MessageHeader, verdict: FilterVerdict) {
        log::trace!(
            "[FILTER] {} id={} seq={:?} -> {}",
            header.message_type,
            header.message_id,
            header.app_sequence,
            verdict
        );
    }

    #[cfg(not(feature = "trace-filter"))]
    fn trace(&self, _header: &MessageHeader, _verdict: FilterVerdict) {}
}
