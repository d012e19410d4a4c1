// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport addresses of a remote endpoint and their protocol capabilities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capabilities advertised alongside one transport address.
///
/// Every field is optional; merging fills gaps without overwriting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub protocol_version: Option<String>,
    pub communication_manager: Option<String>,
    pub max_message_size: Option<u32>,
    pub supports_attachments: Option<bool>,
}

impl ProtocolInfo {
    /// Fill fields missing in `self` from `other`. Returns true if anything changed.
    pub fn merge(&mut self, other: &ProtocolInfo) -> bool {
        let mut changed = false;
        changed |= fill(&mut self.protocol_version, &other.protocol_version);
        changed |= fill(&mut self.communication_manager, &other.communication_manager);
        changed |= fill(&mut self.max_message_size, &other.max_message_size);
        changed |= fill(&mut self.supports_attachments, &other.supports_attachments);
        changed
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) -> bool {
    if slot.is_none() && other.is_some() {
        slot.clone_from(other);
        return true;
    }
    false
}

/// One reachable address record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XAddressInfo {
    pub address: String,
    #[serde(default)]
    pub protocol_info: Option<ProtocolInfo>,
}

impl XAddressInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocol_info: None,
        }
    }

    pub fn with_protocol_info(mut self, info: ProtocolInfo) -> Self {
        self.protocol_info = Some(info);
        self
    }

    /// Merge protocol info of the same address, existing fields winning.
    pub fn merge(&mut self, other: &XAddressInfo) -> bool {
        match (&mut self.protocol_info, &other.protocol_info) {
            (_, None) => false,
            (None, Some(theirs)) => {
                self.protocol_info = Some(theirs.clone());
                true
            }
            (Some(ours), Some(theirs)) => ours.merge(theirs),
        }
    }
}

/// Address records keyed by address, so each address appears once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<XAddressInfo>", into = "Vec<XAddressInfo>")]
pub struct XAddressInfoSet {
    entries: BTreeMap<String, XAddressInfo>,
}

impl XAddressInfoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge one record.
    pub fn add(&mut self, info: XAddressInfo) {
        match self.entries.get_mut(&info.address) {
            Some(existing) => {
                existing.merge(&info);
            }
            None => {
                self.entries.insert(info.address.clone(), info);
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<&XAddressInfo> {
        self.entries.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &XAddressInfo> {
        self.entries.values()
    }

    /// Entry-by-entry merge: shared addresses merge their protocol info,
    /// addresses only in `other` are added. Returns true if anything changed.
    pub fn merge(&mut self, other: &XAddressInfoSet) -> bool {
        let mut changed = false;
        for info in other.iter() {
            match self.entries.get_mut(&info.address) {
                Some(existing) => changed |= existing.merge(info),
                None => {
                    self.entries.insert(info.address.clone(), info.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Merge protocol info for addresses already present; never adds addresses.
    pub fn merge_protocol_info(&mut self, other: &XAddressInfoSet) -> bool {
        let mut changed = false;
        for info in other.iter() {
            if let Some(existing) = self.entries.get_mut(&info.address) {
                changed |= existing.merge(info);
            }
        }
        changed
    }
}

impl From<Vec<XAddressInfo>> for XAddressInfoSet {
    fn from(list: Vec<XAddressInfo>) -> Self {
        let mut set = Self::new();
        for info in list {
            set.add(info);
        }
        set
    }
}

impl From<XAddressInfoSet> for Vec<XAddressInfo> {
    fn from(set: XAddressInfoSet) -> Self {
        set.entries.into_values().collect()
    }
}

impl FromIterator<XAddressInfo> for XAddressInfoSet {
    fn from_iter<I: IntoIterator<Item = XAddressInfo>>(iter: I) -> Self {
        let mut set = Self::new();
        for info in iter {
            set.add(info);
        }
        set
    }
}
