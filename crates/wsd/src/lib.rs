// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # WSD - reliable WS-Discovery over unreliable UDP
//!
//! Devices announce themselves (Hello/Bye) and answer queries (Probe/Resolve)
//! over multicast and unicast UDP. This crate is the engine underneath:
//! duplicate and staleness suppression, retransmission with backoff,
//! non-blocking listener dispatch, versioned endpoint metadata, and
//! aggregation of many replies into one request outcome.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsd::{
//!     AppSequenceGenerator, DiscoveryConfig, DiscoveryData, DiscoveryNode, EndpointReference,
//!     JsonCodec, LogSink, TargetService,
//! };
//!
//! fn main() -> wsd::DiscoveryResult<()> {
//!     let config = DiscoveryConfig::default();
//!     let node = DiscoveryNode::start(config, Arc::new(JsonCodec), Arc::new(LogSink))?;
//!
//!     let epr = EndpointReference::new("urn:uuid:0b7d9a40-1c2e-4f7e-9d1a-5e6f7a8b9c0d");
//!     let me = DiscoveryData::new(epr)
//!         .with_version(1)
//!         .with_scope("onvif://www.onvif.org/location/lab");
//!     node.host(Arc::new(TargetService::new(me, Arc::clone(node.app_sequence()))))?;
//!
//!     for record in node.registry().snapshot() {
//!         println!("{} v{}", record.endpoint_reference, record.metadata_version);
//!     }
//!     node.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |  DiscoveryNode   host()/withdraw()  probe()/resolve()  registry()  |
//! +--------------------------------------------------------------------+
//! |  Dispatcher: codec -> DiscoveryFilter -> registry -> listener pool |
//! |  Querier + ResponseCoordinator          RetryingResponder (replies)|
//! +--------------------------------------------------------------------+
//! |  UdpTransport (socket2)     DatagramReceiver threads (mio)         |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Features
//!
//! - `trace-filter`: log every filter verdict at trace level

pub mod config;
pub mod coordinator;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod message;
pub mod node;
pub mod observe;
pub mod querier;
pub mod responder;
pub mod shutdown;
pub mod target;
pub mod transport;

pub use config::{ConfigError, DiscoveryConfig};
pub use coordinator::{CorrelationToken, RequestOutcome, ResponseCoordinator, ResponseHandler};
pub use data::{
    DiscoveryData, DiscoveryRegistry, EndpointReference, MatchBy, ProtocolInfo, QName,
    RegistryEvent, RegistryEventKind, XAddressInfo, XAddressInfoSet, UNKNOWN_METADATA_VERSION,
};
pub use dispatch::{DiscoveryListener, Dispatcher, InboundMessage, ListenerRegistry, SharedListener};
pub use error::{DiscoveryError, DiscoveryResult};
pub use filter::{DiscoveryFilter, FilterVerdict};
pub use message::{
    AppSequence, AppSequenceGenerator, DiscoveryBody, DiscoveryMessage, FaultCode, FaultData,
    JsonCodec, MessageCodec, MessageHeader, MessageId, MessageType, ProbeData,
};
pub use node::DiscoveryNode;
pub use observe::{
    DiscardReason, DispatchMetrics, LogSink, MetricsSnapshot, NullSink, ObservabilitySink,
};
pub use querier::{ProbeEvent, ProbeHandler, Querier};
pub use responder::{Backoff, RespondOutcome, RetryPolicy, RetryingResponder};
pub use shutdown::ShutdownSignal;
pub use target::{ProbeMatch, TargetService};
pub use transport::{DatagramReceiver, DatagramSender, Reception, UdpTransport};
