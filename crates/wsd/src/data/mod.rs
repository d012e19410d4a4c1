// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Versioned discovery data about remote endpoints.
//!
//! A [`DiscoveryData`] record is created on first sighting of an endpoint and
//! updated in place by [`DiscoveryData::update`]. The metadata version decides
//! between replacing, merging, and ignoring incoming data:
//!
//! ```text
//! existing.version <  incoming.version  -> replace (changed unless previously unknown)
//! existing.version == incoming.version  -> union of sets, merge addresses (never "changed")
//! existing.version >  incoming.version  -> ignore (stale)
//! ```

pub mod registry;
pub mod scope;
pub mod xaddress;

pub use registry::{DiscoveryRegistry, RegistryEvent, RegistryEventKind};
pub use scope::MatchBy;
pub use xaddress::{ProtocolInfo, XAddressInfo, XAddressInfoSet};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Metadata version meaning "not yet known".
pub const UNKNOWN_METADATA_VERSION: i64 = -1;

/// Stable identity of a remote endpoint (usually a `urn:uuid:` address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointReference(String);

impl EndpointReference {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Qualified type name (namespace + local part).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub namespace: String,
    pub local_part: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local_part: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_part: local_part.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.local_part)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_part)
        }
    }
}

/// What is known about one discoverable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryData {
    pub endpoint_reference: EndpointReference,
    #[serde(default = "unknown_version")]
    pub metadata_version: i64,
    #[serde(default)]
    pub types: BTreeSet<QName>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub x_addresses: XAddressInfoSet,
    #[serde(default)]
    pub discovery_x_addresses: XAddressInfoSet,
    #[serde(default)]
    pub is_discovery_proxy: bool,
}

fn unknown_version() -> i64 {
    UNKNOWN_METADATA_VERSION
}

impl DiscoveryData {
    /// Empty record with unknown metadata version.
    pub fn new(endpoint_reference: EndpointReference) -> Self {
        Self {
            endpoint_reference,
            metadata_version: UNKNOWN_METADATA_VERSION,
            types: BTreeSet::new(),
            scopes: BTreeSet::new(),
            x_addresses: XAddressInfoSet::new(),
            discovery_x_addresses: XAddressInfoSet::new(),
            is_discovery_proxy: false,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.metadata_version = version;
        self
    }

    pub fn with_type(mut self, qname: QName) -> Self {
        self.types.insert(qname);
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    pub fn with_x_address(mut self, info: XAddressInfo) -> Self {
        self.x_addresses.add(info);
        self
    }

    pub fn is_version_known(&self) -> bool {
        self.metadata_version != UNKNOWN_METADATA_VERSION
    }

    /// Apply `incoming` to this record. Returns true when the record moved to
    /// a newer, previously known version.
    ///
    /// `is_discovery_proxy` is not versioned and keeps the value from the
    /// first sighting.
    pub fn update(&mut self, incoming: Option<&DiscoveryData>) -> bool {
        let Some(incoming) = incoming else {
            return false;
        };
        if incoming.endpoint_reference != self.endpoint_reference {
            log::debug!(
                "[DATA] ignoring update for {} applied to record of {}",
                incoming.endpoint_reference,
                self.endpoint_reference
            );
            return false;
        }

        if self.metadata_version < incoming.metadata_version {
            let was_known = self.is_version_known();
            self.metadata_version = incoming.metadata_version;
            self.types.clone_from(&incoming.types);
            self.scopes.clone_from(&incoming.scopes);
            self.x_addresses.clone_from(&incoming.x_addresses);
            self.discovery_x_addresses
                .clone_from(&incoming.discovery_x_addresses);
            return was_known;
        }

        if self.metadata_version == incoming.metadata_version {
            self.types.extend(incoming.types.iter().cloned());
            self.scopes.extend(incoming.scopes.iter().cloned());
            self.x_addresses.merge(&incoming.x_addresses);
            self.discovery_x_addresses
                .merge(&incoming.discovery_x_addresses);
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(local: &str) -> QName {
        QName::new("http://example.org/dev", local)
    }

    fn record(version: i64) -> DiscoveryData {
        DiscoveryData::new(EndpointReference::new("urn:uuid:e1")).with_version(version)
    }

    #[test]
    fn test_update_replace() {
        let mut existing = record(3)
            .with_type(qn("A"))
            .with_scope("ldap:///ou=old")
            .with_x_address(XAddressInfo::new("http://10.0.0.1/old"));
        let incoming = record(7)
            .with_type(qn("B"))
            .with_scope("ldap:///ou=new")
            .with_x_address(XAddressInfo::new("http://10.0.0.1/new"));

        assert!(existing.update(Some(&incoming)));
        assert_eq!(existing.metadata_version, 7);
        assert_eq!(existing.types, incoming.types);
        assert_eq!(existing.scopes, incoming.scopes);
        assert_eq!(existing.x_addresses, incoming.x_addresses);
    }

    #[test]
    fn test_update_replace_from_unknown_not_reported() {
        let mut existing = record(UNKNOWN_METADATA_VERSION);
        let incoming = record(1).with_type(qn("A"));
        assert!(!existing.update(Some(&incoming)));
        assert_eq!(existing.metadata_version, 1);
        assert!(existing.types.contains(&qn("A")));
    }

    #[test]
    fn test_update_replace_keeps_proxy_flag() {
        let mut existing = record(1);
        existing.is_discovery_proxy = true;
        let incoming = record(2).with_type(qn("A"));
        assert!(existing.update(Some(&incoming)));
        assert!(existing.is_discovery_proxy);
        assert_eq!(existing.types, incoming.types);
    }

    #[test]
    fn test_update_union() {
        let mut existing = record(5).with_type(qn("A")).with_type(qn("B"));
        let incoming = record(5).with_type(qn("B")).with_type(qn("C"));
        assert!(!existing.update(Some(&incoming)));
        let expected: BTreeSet<QName> = [qn("A"), qn("B"), qn("C")].into_iter().collect();
        assert_eq!(existing.types, expected);
    }

    #[test]
    fn test_update_stale() {
        let mut existing = record(9).with_type(qn("A"));
        let before = existing.clone();
        let incoming = record(2).with_type(qn("Z"));
        assert!(!existing.update(Some(&incoming)));
        assert_eq!(existing, before);
    }

    #[test]
    fn test_update_none_and_identity() {
        let mut existing = record(1);
        assert!(!existing.update(None));
        let copy = existing.clone();
        assert!(!existing.update(Some(&copy)));
        assert_eq!(existing, copy);
    }

    #[test]
    fn test_update_idempotent() {
        let base = record(4).with_type(qn("A")).with_scope("s1");
        let incoming = record(4)
            .with_type(qn("B"))
            .with_scope("s2")
            .with_x_address(XAddressInfo::new("http://h/x").with_protocol_info(ProtocolInfo {
                protocol_version: Some("1.1".into()),
                ..Default::default()
            }));

        let mut once = base.clone();
        once.update(Some(&incoming));
        let mut twice = base.clone();
        twice.update(Some(&incoming));
        twice.update(Some(&incoming));
        assert_eq!(once, twice);

        let newer = record(8).with_type(qn("C"));
        let mut once = base.clone();
        once.update(Some(&newer));
        let mut twice = base;
        twice.update(Some(&newer));
        twice.update(Some(&newer));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_update_commutative_for_equal_versions() {
        let a = record(2).with_type(qn("A")).with_scope("s1");
        let b = record(2).with_type(qn("B")).with_scope("s2");

        let mut ab = a.clone();
        ab.update(Some(&b));
        let mut ba = b.clone();
        ba.update(Some(&a));

        assert_eq!(ab.types, ba.types);
        assert_eq!(ab.scopes, ba.scopes);
    }

    #[test]
    fn test_update_other_endpoint_ignored() {
        let mut existing = record(1);
        let other = DiscoveryData::new(EndpointReference::new("urn:uuid:other")).with_version(9);
        assert!(!existing.update(Some(&other)));
        assert_eq!(existing.metadata_version, 1);
    }

    #[test]
    fn test_qname_display() {
        assert_eq!(qn("Printer").to_string(), "{http://example.org/dev}Printer");
        assert_eq!(QName::new("", "Bare").to_string(), "Bare");
    }
}
