// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A locally hosted discoverable endpoint.
//!
//! Registered as a Probe/Resolve listener, it answers queries about itself.
//! It also builds the Hello/Bye announcements for its endpoint.

use crate::data::{DiscoveryData, EndpointReference};
use crate::dispatch::{DiscoveryListener, InboundMessage};
use crate::error::DiscoveryResult;
use crate::message::{AppSequenceGenerator, DiscoveryBody, DiscoveryMessage, ProbeData};
use parking_lot::RwLock;
use std::sync::Arc;

/// How a probe relates to this target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMatch {
    Match,
    NoMatch,
    /// The probe asked for a scope matching rule we do not implement.
    UnsupportedRule,
}

pub struct TargetService {
    data: RwLock<DiscoveryData>,
    sequence: Arc<AppSequenceGenerator>,
}

impl TargetService {
    pub fn new(data: DiscoveryData, sequence: Arc<AppSequenceGenerator>) -> Self {
        Self {
            data: RwLock::new(data),
            sequence,
        }
    }

    pub fn endpoint(&self) -> EndpointReference {
        self.data.read().endpoint_reference.clone()
    }

    /// Current metadata.
    pub fn data(&self) -> DiscoveryData {
        self.data.read().clone()
    }

    /// Change metadata and bump its version.
    ///
    /// The endpoint reference cannot be changed this way. Returns the new
    /// version; announce it with a fresh [`TargetService::hello`].
    pub fn update_metadata<F>(&self, edit: F) -> i64
    where
        F: FnOnce(&mut DiscoveryData),
    {
        let mut data = self.data.write();
        let endpoint = data.endpoint_reference.clone();
        edit(&mut data);
        data.endpoint_reference = endpoint;
        data.metadata_version = data.metadata_version.max(0) + 1;
        data.metadata_version
    }

    /// Hello announcing the current metadata.
    pub fn hello(&self) -> DiscoveryMessage {
        DiscoveryMessage::new(DiscoveryBody::Hello(self.data()))
            .with_app_sequence(self.sequence.next())
    }

    /// Bye for this endpoint.
    pub fn bye(&self) -> DiscoveryMessage {
        DiscoveryMessage::new(DiscoveryBody::Bye(self.data()))
            .with_app_sequence(self.sequence.next())
    }

    /// Probe types must all be ours; every probe scope must match one of ours.
    pub fn matches_probe(&self, probe: &ProbeData) -> ProbeMatch {
        if !probe.match_by.is_supported() {
            return ProbeMatch::UnsupportedRule;
        }
        let data = self.data.read();
        let types_ok = probe.types.is_subset(&data.types);
        if types_ok && probe.match_by.matches_all(&probe.scopes, &data.scopes) {
            ProbeMatch::Match
        } else {
            ProbeMatch::NoMatch
        }
    }
}

impl DiscoveryListener for TargetService {
    fn on_message(&self, inbound: &InboundMessage) -> DiscoveryResult<Option<DiscoveryBody>> {
        match &inbound.message.body {
            DiscoveryBody::Probe(probe) => match self.matches_probe(probe) {
                ProbeMatch::Match => Ok(Some(DiscoveryBody::ProbeMatches(vec![self.data()]))),
                ProbeMatch::NoMatch => Ok(None),
                ProbeMatch::UnsupportedRule => {
                    log::debug!(
                        "[TARGET] ignoring probe {} with unsupported rule {}",
                        inbound.message.id(),
                        probe.match_by.as_uri()
                    );
                    Ok(None)
                }
            },
            DiscoveryBody::Resolve(endpoint) if *endpoint == self.endpoint() => {
                Ok(Some(DiscoveryBody::ResolveMatches(self.data())))
            }
            _ => Ok(None),
        }
    }
}
