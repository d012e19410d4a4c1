// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serializer seam between datagrams and [`DiscoveryMessage`]s.
//!
//! The engine never looks at wire bytes itself. Production deployments plug
//! a SOAP/XML codec in here; [`JsonCodec`] is a compact stand-in used by the
//! monitor tool and the tests.

use super::DiscoveryMessage;
use crate::error::{DiscoveryError, DiscoveryResult};

/// Converts between datagrams and messages.
pub trait MessageCodec: Send + Sync {
    fn decode(&self, datagram: &[u8]) -> DiscoveryResult<DiscoveryMessage>;
    fn encode(&self, message: &DiscoveryMessage) -> DiscoveryResult<Vec<u8>>;
}

/// JSON envelope codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn decode(&self, datagram: &[u8]) -> DiscoveryResult<DiscoveryMessage> {
        let mut message: DiscoveryMessage =
            serde_json::from_slice(datagram).map_err(|e| DiscoveryError::Decode {
                reason: e.to_string(),
            })?;
        message.normalize();
        Ok(message)
    }

    fn encode(&self, message: &DiscoveryMessage) -> DiscoveryResult<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| DiscoveryError::Encode {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DiscoveryData, EndpointReference, QName};
    use crate::message::{DiscoveryBody, MessageType};

    #[test]
    fn test_decode_garbage_fails() {
        let err = JsonCodec.decode(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, DiscoveryError::Decode { .. }));
    }

    #[test]
    fn test_decode_minimal_hello_fills_defaults() {
        let json = br#"{
            "header": { "message_id": "urn:uuid:1", "message_type": "Probe" },
            "body": { "Hello": { "endpoint_reference": "urn:uuid:dev" } }
        }"#;
        let msg = JsonCodec.decode(json).unwrap();
        assert_eq!(msg.message_type(), MessageType::Hello);
        assert_eq!(msg.header.endpoint, Some(EndpointReference::new("urn:uuid:dev")));
        let DiscoveryBody::Hello(data) = &msg.body else {
            panic!("expected Hello");
        };
        assert_eq!(data.metadata_version, crate::data::UNKNOWN_METADATA_VERSION);
        assert!(data.types.is_empty());
    }

    #[test]
    fn test_encode_then_decode_keeps_content() {
        let data = DiscoveryData::new(EndpointReference::new("urn:uuid:dev"))
            .with_version(3)
            .with_type(QName::new("ns", "Printer"));
        let msg = crate::message::DiscoveryMessage::new(DiscoveryBody::Hello(data));
        let bytes = JsonCodec.encode(&msg).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), msg);
    }
}
