// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! AppSequence ordering triple and the local generator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordering triple stamped on announcements from one endpoint.
///
/// `sequence_id` is 0 when the sender does not use sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppSequence {
    pub instance_id: u64,
    pub sequence_id: u64,
    pub message_number: u64,
}

impl AppSequence {
    pub const fn new(instance_id: u64, sequence_id: u64, message_number: u64) -> Self {
        Self {
            instance_id,
            sequence_id,
            message_number,
        }
    }

    /// Returns true when `self` must be discarded given the last accepted value.
    ///
    /// A lower instance always loses; within an instance a lower sequence loses;
    /// within a sequence the message number must strictly increase.
    pub fn is_stale_relative_to(&self, last: &AppSequence) -> bool {
        if self.instance_id != last.instance_id {
            return self.instance_id < last.instance_id;
        }
        if self.sequence_id != last.sequence_id {
            return self.sequence_id < last.sequence_id;
        }
        self.message_number <= last.message_number
    }
}

impl fmt::Display for AppSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{})",
            self.instance_id, self.sequence_id, self.message_number
        )
    }
}

/// Stamps outgoing announcements with increasing message numbers.
///
/// The instance id defaults to the process start time in seconds so that a
/// restarted device outranks everything it sent before the restart.
#[derive(Debug)]
pub struct AppSequenceGenerator {
    instance_id: u64,
    sequence_id: u64,
    next_message_number: AtomicU64,
}

impl AppSequenceGenerator {
    pub fn new() -> Self {
        let instance_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(1);
        Self::with_instance(instance_id, 0)
    }

    pub fn with_instance(instance_id: u64, sequence_id: u64) -> Self {
        Self {
            instance_id,
            sequence_id,
            next_message_number: AtomicU64::new(1),
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Next AppSequence; message numbers start at 1.
    pub fn next(&self) -> AppSequence {
        let message_number = self.next_message_number.fetch_add(1, Ordering::Relaxed);
        AppSequence::new(self.instance_id, self.sequence_id, message_number)
    }
}

impl Default for AppSequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
