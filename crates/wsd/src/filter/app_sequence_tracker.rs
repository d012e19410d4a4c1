// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Last accepted AppSequence per endpoint.

use crate::data::EndpointReference;
use crate::message::AppSequence;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of offering an AppSequence to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Newer than anything accepted; not yet recorded.
    Fresh,
    /// Older than or equal to the last accepted value.
    Stale,
}

/// Per-endpoint AppSequence table.
///
/// Each endpoint's entry is locked for the whole check-then-commit step, so
/// two announcements for one endpoint are ordered as they were handed in.
#[derive(Debug, Default)]
pub struct AppSequenceTracker {
    last_accepted: DashMap<EndpointReference, AppSequence>,
}

impl AppSequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `seq` for `endpoint` and, if fresh, let `commit` decide whether
    /// to record it. The entry stays locked while `commit` runs.
    pub fn check_and_commit<F>(
        &self,
        endpoint: &EndpointReference,
        seq: AppSequence,
        commit: F,
    ) -> SequenceCheck
    where
        F: FnOnce() -> bool,
    {
        match self.last_accepted.entry(endpoint.clone()) {
            Entry::Occupied(mut occupied) => {
                if seq.is_stale_relative_to(occupied.get()) {
                    return SequenceCheck::Stale;
                }
                if commit() {
                    occupied.insert(seq);
                }
                SequenceCheck::Fresh
            }
            Entry::Vacant(vacant) => {
                if commit() {
                    vacant.insert(seq);
                }
                SequenceCheck::Fresh
            }
        }
    }

    pub fn last_accepted(&self, endpoint: &EndpointReference) -> Option<AppSequence> {
        self.last_accepted.get(endpoint).map(|s| *s)
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    pub fn clear(&self) {
        self.last_accepted.clear();
    }
}
