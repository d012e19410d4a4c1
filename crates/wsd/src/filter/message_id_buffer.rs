// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded FIFO history of recently seen message ids.

use crate::message::MessageId;
use std::collections::{HashSet, VecDeque};

/// Duplicate-detection history.
///
/// An id is remembered for the next `capacity` insertions; inserting past
/// capacity evicts the oldest id.
///
/// # Performance
/// - contains_or_enqueue(): O(1) average (hash lookup + deque push/pop)
pub struct MessageIdBuffer {
    order: VecDeque<MessageId>,
    members: HashSet<MessageId>,
    capacity: usize,
}

impl MessageIdBuffer {
    /// Create a buffer remembering `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Check membership and insert when absent.
    ///
    /// Returns true if `id` was already present (a duplicate).
    pub fn contains_or_enqueue(&mut self, id: &MessageId) -> bool {
        if self.members.contains(id) {
            return true;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.clone());
        self.members.insert(id.clone());
        false
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}
