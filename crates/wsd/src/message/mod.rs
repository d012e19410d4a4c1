// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery message model.
//!
//! One tagged variant per logical message kind; the header carries what the
//! filter and dispatcher need (id, kind, correlation, AppSequence, endpoint)
//! and is always derived from the body by the constructors.

pub mod app_sequence;
pub mod codec;

pub use app_sequence::{AppSequence, AppSequenceGenerator};
pub use codec::{JsonCodec, MessageCodec};

use crate::data::{DiscoveryData, EndpointReference, MatchBy, QName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque identity of a message (`wsa:MessageID`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh `urn:uuid:` identifier.
    pub fn generate() -> Self {
        Self(format!("urn:uuid:{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Hello,
    Bye,
    Probe,
    ProbeMatches,
    Resolve,
    ResolveMatches,
    Fault,
}

impl MessageType {
    /// Kinds that listeners can register for.
    pub const LISTENABLE: [MessageType; 6] = [
        MessageType::Hello,
        MessageType::Bye,
        MessageType::Probe,
        MessageType::Resolve,
        MessageType::ProbeMatches,
        MessageType::ResolveMatches,
    ];

    /// Hello and Bye carry AppSequence staleness semantics.
    pub fn is_announcement(self) -> bool {
        matches!(self, Self::Hello | Self::Bye)
    }

    /// Probe and Resolve expect a unicast reply.
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::Probe | Self::Resolve)
    }

    /// Messages answering an earlier request.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::ProbeMatches | Self::ResolveMatches | Self::Fault)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "Hello",
            Self::Bye => "Bye",
            Self::Probe => "Probe",
            Self::ProbeMatches => "ProbeMatches",
            Self::Resolve => "Resolve",
            Self::ResolveMatches => "ResolveMatches",
            Self::Fault => "Fault",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe query: "anyone with these types and scopes?"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub types: BTreeSet<QName>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub match_by: MatchBy,
}

/// SOAP fault codes relevant to discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    VersionMismatch,
    ActionNotSupported,
    MatchingRuleNotSupported,
    InvalidMessage,
    Sender,
    Receiver,
}

impl FaultCode {
    /// Faults that only say "I do not speak this"; any other fault is more
    /// informative and supersedes them during aggregation.
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::VersionMismatch | Self::ActionNotSupported)
    }
}

/// Fault payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultData {
    pub code: FaultCode,
    #[serde(default)]
    pub reason: String,
}

impl FaultData {
    pub fn new(code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Message body, one variant per logical kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryBody {
    Hello(DiscoveryData),
    Bye(DiscoveryData),
    Probe(ProbeData),
    ProbeMatches(Vec<DiscoveryData>),
    Resolve(EndpointReference),
    ResolveMatches(DiscoveryData),
    Fault(FaultData),
}

impl DiscoveryBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::Bye(_) => MessageType::Bye,
            Self::Probe(_) => MessageType::Probe,
            Self::ProbeMatches(_) => MessageType::ProbeMatches,
            Self::Resolve(_) => MessageType::Resolve,
            Self::ResolveMatches(_) => MessageType::ResolveMatches,
            Self::Fault(_) => MessageType::Fault,
        }
    }

    /// Endpoint the message is about, when it is about exactly one.
    pub fn endpoint(&self) -> Option<&EndpointReference> {
        match self {
            Self::Hello(d) | Self::Bye(d) | Self::ResolveMatches(d) => Some(&d.endpoint_reference),
            Self::Resolve(epr) => Some(epr),
            Self::Probe(_) | Self::ProbeMatches(_) | Self::Fault(_) => None,
        }
    }
}

/// Decoded addressing/discovery header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: MessageId,
    pub message_type: MessageType,
    #[serde(default)]
    pub relates_to: Option<MessageId>,
    #[serde(default)]
    pub app_sequence: Option<AppSequence>,
    #[serde(default)]
    pub endpoint: Option<EndpointReference>,
}

/// A complete discovery message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub header: MessageHeader,
    pub body: DiscoveryBody,
}

impl DiscoveryMessage {
    /// New message with a freshly generated id.
    pub fn new(body: DiscoveryBody) -> Self {
        Self::with_id(MessageId::generate(), body)
    }

    pub fn with_id(message_id: MessageId, body: DiscoveryBody) -> Self {
        let header = MessageHeader {
            message_id,
            message_type: body.message_type(),
            relates_to: None,
            app_sequence: None,
            endpoint: body.endpoint().cloned(),
        };
        Self { header, body }
    }

    pub fn relating_to(mut self, request: MessageId) -> Self {
        self.header.relates_to = Some(request);
        self
    }

    pub fn with_app_sequence(mut self, seq: AppSequence) -> Self {
        self.header.app_sequence = Some(seq);
        self
    }

    pub fn id(&self) -> &MessageId {
        &self.header.message_id
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Re-derive the body-dependent header fields (type, endpoint).
    ///
    /// Called by codecs after decoding so that a header can never disagree
    /// with the body it travels with.
    pub fn normalize(&mut self) {
        self.header.message_type = self.body.message_type();
        self.header.endpoint = self.body.endpoint().cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_derived_from_body() {
        let data = DiscoveryData::new(EndpointReference::new("urn:uuid:a")).with_version(1);
        let msg = DiscoveryMessage::new(DiscoveryBody::Hello(data))
            .with_app_sequence(AppSequence::new(1, 0, 1));
        assert_eq!(msg.message_type(), MessageType::Hello);
        assert_eq!(msg.header.endpoint.as_ref().unwrap().as_str(), "urn:uuid:a");
        assert!(msg.id().as_str().starts_with("urn:uuid:"));

        let probe = DiscoveryMessage::new(DiscoveryBody::Probe(ProbeData::default()));
        assert!(probe.header.endpoint.is_none());
    }

    #[test]
    fn test_generated_ids_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn test_normalize_repairs_header() {
        let mut msg = DiscoveryMessage::new(DiscoveryBody::Resolve(EndpointReference::new("e")));
        msg.header.message_type = MessageType::Hello;
        msg.header.endpoint = None;
        msg.normalize();
        assert_eq!(msg.message_type(), MessageType::Resolve);
        assert_eq!(msg.header.endpoint, Some(EndpointReference::new("e")));
    }

    #[test]
    fn test_type_classes() {
        assert!(MessageType::Hello.is_announcement());
        assert!(!MessageType::Probe.is_announcement());
        assert!(MessageType::Resolve.expects_reply());
        assert!(MessageType::Fault.is_reply());
        assert!(FaultCode::ActionNotSupported.is_generic());
        assert!(!FaultCode::MatchingRuleNotSupported.is_generic());
    }
}
