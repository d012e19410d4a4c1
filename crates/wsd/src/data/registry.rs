// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of remote endpoints keyed by endpoint reference.
//!
//! Each record is mutated under its map entry lock, so merges for one endpoint
//! are serialized while different endpoints proceed in parallel.

use super::{DiscoveryData, EndpointReference};
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;

/// Kind of registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    Discovered,
    Updated,
    Lost,
}

impl fmt::Display for RegistryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Updated => write!(f, "updated"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// A registry change together with the record after the change
/// (or the removed record for `Lost`).
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub kind: RegistryEventKind,
    pub data: DiscoveryData,
}

/// Endpoint-keyed owner of [`DiscoveryData`] records.
#[derive(Debug, Default)]
pub struct DiscoveryRegistry {
    records: DashMap<EndpointReference, DiscoveryData>,
    subscribers: Mutex<Vec<Sender<RegistryEvent>>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every future registry event.
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Apply announced or matched data for an endpoint.
    ///
    /// First sighting creates the record; later sightings go through the
    /// version merge and only report `Updated` when the merge says so.
    pub fn apply(&self, data: &DiscoveryData) -> Option<RegistryEvent> {
        let event = match self.records.entry(data.endpoint_reference.clone()) {
            Entry::Vacant(vacant) => {
                let stored = vacant.insert(data.clone());
                Some(RegistryEvent {
                    kind: RegistryEventKind::Discovered,
                    data: stored.clone(),
                })
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.update(Some(data)) {
                    Some(RegistryEvent {
                        kind: RegistryEventKind::Updated,
                        data: record.clone(),
                    })
                } else {
                    None
                }
            }
        };

        if let Some(ref ev) = event {
            log::debug!(
                "[REGISTRY] {} {} version={}",
                ev.kind,
                ev.data.endpoint_reference,
                ev.data.metadata_version
            );
            self.publish(ev);
        }
        event
    }

    /// Purge an endpoint that said goodbye.
    pub fn remove(&self, endpoint: &EndpointReference) -> Option<RegistryEvent> {
        let (_, data) = self.records.remove(endpoint)?;
        log::debug!("[REGISTRY] lost {}", endpoint);
        let event = RegistryEvent {
            kind: RegistryEventKind::Lost,
            data,
        };
        self.publish(&event);
        Some(event)
    }

    /// Merge protocol capabilities learned from a secondary reply into both
    /// address sets of the known record.
    pub fn merge_protocol_info(&self, source: &DiscoveryData) -> bool {
        let Some(mut record) = self.records.get_mut(&source.endpoint_reference) else {
            return false;
        };
        let mut changed = record.x_addresses.merge_protocol_info(&source.x_addresses);
        changed |= record
            .discovery_x_addresses
            .merge_protocol_info(&source.discovery_x_addresses);
        changed
    }

    pub fn get(&self, endpoint: &EndpointReference) -> Option<DiscoveryData> {
        self.records.get(endpoint).map(|r| r.value().clone())
    }

    /// Copy of every record, ordered by endpoint reference.
    pub fn snapshot(&self) -> Vec<DiscoveryData> {
        let mut all: Vec<DiscoveryData> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.endpoint_reference.cmp(&b.endpoint_reference));
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    fn publish(&self, event: &RegistryEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
