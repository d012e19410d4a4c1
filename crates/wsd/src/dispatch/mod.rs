// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery dispatcher: inbound datagrams to listeners, replies back out.
//!
//! ```text
//! receive thread:  decode -> filter -> registry update -> querier routing -> enqueue
//! listener pool:   listener.on_message()  (first job forwards to the sink)
//! reply pool:      app delay (multicast queries) -> RetryingResponder
//! ```
//!
//! Nothing after `enqueue` runs on the receive thread, and no per-message
//! failure propagates back to it.

pub mod listeners;
pub mod pool;

pub use listeners::{DiscoveryListener, InboundMessage, ListenerRegistry, SharedListener};
pub use pool::{Job, WorkerPool};

use crate::config::DiscoveryConfig;
use crate::data::DiscoveryRegistry;
use crate::filter::{DiscoveryFilter, FilterVerdict};
use crate::message::{
    AppSequenceGenerator, DiscoveryBody, DiscoveryMessage, MessageCodec, MessageHeader, MessageType,
};
use crate::observe::{DiscardReason, DispatchMetrics, NullSink, ObservabilitySink};
use crate::querier::Querier;
use crate::responder::{RetryPolicy, RetryingResponder};
use crate::shutdown::ShutdownSignal;
use crate::transport::{DatagramSender, Reception};
use std::io;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// State shared with pool jobs.
struct ReplyPath {
    codec: Arc<dyn MessageCodec>,
    sink: Arc<dyn ObservabilitySink>,
    metrics: Arc<DispatchMetrics>,
    responder: RetryingResponder,
    policy: RetryPolicy,
    app_max_delay: Duration,
    sequence: Option<Arc<AppSequenceGenerator>>,
    reply_pool: WorkerPool,
    shutdown: ShutdownSignal,
}

impl ReplyPath {
    /// Run one listener against one accepted message.
    fn run_listener(&self, listener: &SharedListener, inbound: &InboundMessage, first: bool) {
        if !self.shutdown.is_triggered() {
            match catch_unwind(AssertUnwindSafe(|| listener.on_message(inbound))) {
                Ok(Ok(Some(body))) if inbound.message.message_type().expects_reply() => {
                    self.send_reply(inbound, body);
                }
                Ok(Ok(Some(body))) => {
                    log::trace!(
                        "[DISPATCH] ignoring {} returned for {}",
                        body.message_type(),
                        inbound.message.message_type()
                    );
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    self.metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "[DISPATCH] listener failed on {} {}: {}",
                        inbound.message.message_type(),
                        inbound.message.id(),
                        e
                    );
                }
                Err(_) => {
                    self.metrics.listener_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!(
                        "[DISPATCH] listener panicked on {} {}",
                        inbound.message.message_type(),
                        inbound.message.id()
                    );
                }
            }
        }
        if first {
            self.sink.inbound(&inbound.message, inbound.source);
        }
    }

    /// Stamp, encode and queue a reply to `inbound`.
    fn send_reply(&self, inbound: &InboundMessage, body: DiscoveryBody) {
        let mut reply = DiscoveryMessage::new(body).relating_to(inbound.message.id().clone());
        if let Some(sequence) = &self.sequence {
            reply = reply.with_app_sequence(sequence.next());
        }
        let datagram = match self.codec.encode(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.send_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("[DISPATCH] cannot encode {}: {}", reply.message_type(), e);
                return;
            }
        };

        let destination = inbound.source;
        self.sink.outbound(&reply, destination);

        let delay = match inbound.reception {
            Reception::Multicast => {
                let max = self.app_max_delay.as_millis() as u64;
                Duration::from_millis(fastrand::u64(0..=max))
            }
            Reception::Unicast => Duration::ZERO,
        };
        let responder = self.responder.clone();
        let shutdown = self.shutdown.clone();
        let metrics = Arc::clone(&self.metrics);
        let policy = self.policy;
        let queued = self.reply_pool.submit(move || {
            if !delay.is_zero() && !shutdown.sleep(delay) {
                metrics.replies_cancelled.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let outcome = responder.respond(&datagram, destination, &policy);
            log::trace!("[DISPATCH] reply to {}: {:?}", destination, outcome);
        });
        match queued {
            Ok(()) => {
                self.metrics.replies_queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => log::debug!("[DISPATCH] reply to {} dropped: {}", destination, e),
        }
    }
}

/// Inbound message dispatcher.
pub struct Dispatcher {
    path: Arc<ReplyPath>,
    filter: DiscoveryFilter,
    listeners: Arc<ListenerRegistry>,
    registry: Option<Arc<DiscoveryRegistry>>,
    querier: Option<Arc<Querier>>,
    listener_pool: WorkerPool,
}

/// Assembles a [`Dispatcher`].
pub struct DispatcherBuilder<'a> {
    config: &'a DiscoveryConfig,
    sender: Arc<dyn DatagramSender>,
    codec: Arc<dyn MessageCodec>,
    registry: Option<Arc<DiscoveryRegistry>>,
    querier: Option<Arc<Querier>>,
    sink: Arc<dyn ObservabilitySink>,
    sequence: Option<Arc<AppSequenceGenerator>>,
}

impl<'a> DispatcherBuilder<'a> {
    /// Keep a registry of remote endpoints up to date.
    pub fn registry(mut self, registry: Arc<DiscoveryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Route replies to our own queries into `querier`.
    pub fn querier(mut self, querier: Arc<Querier>) -> Self {
        self.querier = Some(querier);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Stamp outgoing replies with AppSequences from `sequence`.
    pub fn app_sequence(mut self, sequence: Arc<AppSequenceGenerator>) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Spawn the worker pools.
    ///
    /// # Errors
    /// Returns IO error if a worker thread cannot be spawned.
    pub fn build(self) -> io::Result<Dispatcher> {
        let config = self.config;
        let metrics = Arc::new(DispatchMetrics::new());
        let shutdown = ShutdownSignal::new();
        let responder = RetryingResponder::new(self.sender, shutdown.clone(), Arc::clone(&metrics));

        let path = ReplyPath {
            codec: self.codec,
            sink: self.sink,
            metrics,
            responder,
            policy: config.unicast_retry_policy(),
            app_max_delay: config.app_max_delay(),
            sequence: self.sequence,
            reply_pool: WorkerPool::new("wsd-reply", config.reply_threads)?,
            shutdown,
        };

        Ok(Dispatcher {
            path: Arc::new(path),
            filter: DiscoveryFilter::new(config.message_id_capacity),
            listeners: Arc::new(ListenerRegistry::new()),
            registry: self.registry,
            querier: self.querier,
            listener_pool: WorkerPool::new("wsd-listener", config.listener_threads)?,
        })
    }
}

impl Dispatcher {
    /// Start assembling a dispatcher that replies through `sender`.
    pub fn builder(
        config: &DiscoveryConfig,
        sender: Arc<dyn DatagramSender>,
        codec: Arc<dyn MessageCodec>,
    ) -> DispatcherBuilder<'_> {
        DispatcherBuilder {
            config,
            sender,
            codec,
            registry: None,
            querier: None,
            sink: Arc::new(NullSink),
            sequence: None,
        }
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn registry(&self) -> Option<&Arc<DiscoveryRegistry>> {
        self.registry.as_ref()
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.path.metrics)
    }

    pub fn filter(&self) -> &DiscoveryFilter {
        &self.filter
    }

    /// Decode and dispatch one datagram. Never fails.
    pub fn handle_datagram(&self, datagram: &[u8], source: SocketAddr, reception: Reception) {
        let path = &self.path;
        path.metrics.datagrams_received.fetch_add(1, Ordering::Relaxed);
        match path.codec.decode(datagram) {
            Ok(message) => {
                self.handle_message(message, source, reception);
            }
            Err(e) => {
                log::debug!("[DISPATCH] dropping datagram from {}: {}", source, e);
                path.metrics.record_discard(DiscardReason::Undecodable);
                path.sink.discarded(None, DiscardReason::Undecodable);
            }
        }
    }

    /// Filter and dispatch one decoded message.
    pub fn handle_message(
        &self,
        message: DiscoveryMessage,
        source: SocketAddr,
        reception: Reception,
    ) -> FilterVerdict {
        let path = &self.path;
        if path.shutdown.is_triggered() {
            return FilterVerdict::NotRelevant;
        }

        let relevance = |header: &MessageHeader| self.is_relevant(header);
        let verdict = self.filter.accept(&message.header, &relevance);
        let reason = match verdict {
            FilterVerdict::Accept => None,
            FilterVerdict::Duplicate => Some(DiscardReason::Duplicate),
            FilterVerdict::Stale => Some(DiscardReason::Stale),
            FilterVerdict::NotRelevant => Some(DiscardReason::NotRelevant),
        };
        if let Some(reason) = reason {
            log::trace!(
                "[DISPATCH] {} {} from {} discarded: {}",
                message.message_type(),
                message.id(),
                source,
                reason
            );
            path.metrics.record_discard(reason);
            path.sink.discarded(Some(&message.header), reason);
            return verdict;
        }
        path.metrics.accepted.fetch_add(1, Ordering::Relaxed);

        self.update_registry(&message.body);
        if message.message_type().is_reply() {
            if let Some(querier) = &self.querier {
                querier.route_reply(&message);
            }
        }

        let listeners = self.listeners.snapshot(message.message_type());
        if listeners.is_empty() {
            path.sink.inbound(&message, source);
            return verdict;
        }

        let inbound = Arc::new(InboundMessage {
            message,
            source,
            reception,
        });
        for (index, listener) in listeners.into_iter().enumerate() {
            let path = Arc::clone(path);
            let inbound = Arc::clone(&inbound);
            let first = index == 0;
            let submitted = self
                .listener_pool
                .submit(move || path.run_listener(&listener, &inbound, first));
            if let Err(e) = submitted {
                log::debug!("[DISPATCH] listener job dropped: {}", e);
            }
        }
        verdict
    }

    fn is_relevant(&self, header: &MessageHeader) -> bool {
        if !self.listeners.is_empty(header.message_type) {
            return true;
        }
        let tracked = matches!(
            header.message_type,
            MessageType::Hello
                | MessageType::Bye
                | MessageType::ProbeMatches
                | MessageType::ResolveMatches
        );
        if tracked && self.registry.is_some() {
            return true;
        }
        match (&self.querier, &header.relates_to) {
            (Some(querier), Some(id)) => querier.relates_to(id),
            _ => false,
        }
    }

    fn update_registry(&self, body: &DiscoveryBody) {
        let Some(registry) = &self.registry else {
            return;
        };
        match body {
            DiscoveryBody::Hello(data) | DiscoveryBody::ResolveMatches(data) => {
                registry.apply(data);
            }
            DiscoveryBody::ProbeMatches(matches) => {
                for data in matches {
                    registry.apply(data);
                }
            }
            DiscoveryBody::Bye(data) => {
                registry.remove(&data.endpoint_reference);
            }
            DiscoveryBody::Probe(_) | DiscoveryBody::Resolve(_) | DiscoveryBody::Fault(_) => {}
        }
    }

    /// Stop dispatching: cancel delays and retries, drop listeners and
    /// filter state, join both pools. Idempotent.
    pub fn shutdown(&self) {
        self.path.shutdown.trigger();
        self.listeners.clear_all();
        self.filter.clear();
        self.listener_pool.shutdown();
        self.path.reply_pool.shutdown();
        log::debug!("[DISPATCH] shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.path.shutdown.is_triggered()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DiscoveryData, EndpointReference};
    use crate::error::{DiscoveryError, DiscoveryResult};
    use crate::message::{AppSequence, JsonCodec, MessageId, ProbeData};
    use crate::target::TargetService;
    use crossbeam::channel::{self, Receiver, Sender};
    use std::sync::atomic::AtomicUsize;

    struct ChannelSender(Sender<(Vec<u8>, SocketAddr)>);

    impl DatagramSender for ChannelSender {
        fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<()> {
            let _ = self.0.send((datagram.to_vec(), destination));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        inbound: AtomicUsize,
        outbound: AtomicUsize,
    }

    impl ObservabilitySink for CountingSink {
        fn inbound(&self, _message: &DiscoveryMessage, _source: SocketAddr) {
            self.inbound.fetch_add(1, Ordering::SeqCst);
        }

        fn outbound(&self, _message: &DiscoveryMessage, _destination: SocketAddr) {
            self.outbound.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            unicast_repeat: 0,
            app_max_delay_ms: 0,
            ..DiscoveryConfig::default()
        }
    }

    fn source() -> SocketAddr {
        "192.168.1.77:50000".parse().unwrap()
    }

    fn dispatcher(sink: Arc<CountingSink>) -> (Dispatcher, Receiver<(Vec<u8>, SocketAddr)>) {
        let (tx, rx) = channel::unbounded();
        let cfg = config();
        let d = Dispatcher::builder(&cfg, Arc::new(ChannelSender(tx)), Arc::new(JsonCodec))
            .sink(sink)
            .build()
            .unwrap();
        (d, rx)
    }

    fn forwarding_listener(tx: Sender<MessageId>) -> SharedListener {
        Arc::new(move |inbound: &InboundMessage| -> DiscoveryResult<Option<DiscoveryBody>> {
            let _ = tx.send(inbound.message.id().clone());
            Ok(None)
        })
    }

    fn hello(id: &str, seq: u64) -> DiscoveryMessage {
        let data = DiscoveryData::new(EndpointReference::new("urn:uuid:sensor")).with_version(1);
        DiscoveryMessage::with_id(MessageId::new(id), DiscoveryBody::Hello(data))
            .with_app_sequence(AppSequence::new(1, 0, seq))
    }

    #[test]
    fn test_undecodable_datagram_counted() {
        let (d, _) = dispatcher(Arc::new(CountingSink::default()));
        d.handle_datagram(b"<soap:Envelope", source(), Reception::Multicast);
        let snap = d.metrics().snapshot();
        assert_eq!(snap.datagrams_received, 1);
        assert_eq!(snap.decode_failures, 1);
    }

    #[test]
    fn test_duplicate_delivered_once() {
        let (d, _) = dispatcher(Arc::new(CountingSink::default()));
        let (tx, rx) = channel::unbounded();
        d.listeners().register(MessageType::Hello, forwarding_listener(tx));

        let first = d.handle_message(hello("urn:uuid:h1", 1), source(), Reception::Multicast);
        let again = d.handle_message(hello("urn:uuid:h1", 1), source(), Reception::Multicast);
        assert_eq!(first, FilterVerdict::Accept);
        assert_eq!(again, FilterVerdict::Duplicate);

        let delivered = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(delivered, MessageId::new("urn:uuid:h1"));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(d.metrics().snapshot().duplicates, 1);
    }

    #[test]
    fn test_probe_without_listeners_not_relevant() {
        let sink = Arc::new(CountingSink::default());
        let (d, sent) = dispatcher(Arc::clone(&sink));
        let probe = DiscoveryMessage::new(DiscoveryBody::Probe(ProbeData::default()));
        let verdict = d.handle_message(probe, source(), Reception::Multicast);
        assert_eq!(verdict, FilterVerdict::NotRelevant);
        assert!(sent.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(sink.inbound.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_probe_answered_by_target() {
        let sink = Arc::new(CountingSink::default());
        let (d, sent) = dispatcher(Arc::clone(&sink));
        let target: SharedListener = Arc::new(TargetService::new(
            DiscoveryData::new(EndpointReference::new("urn:uuid:camera")).with_version(4),
            Arc::new(AppSequenceGenerator::with_instance(1, 0)),
        ));
        d.listeners().register(MessageType::Probe, target);

        let probe = DiscoveryMessage::new(DiscoveryBody::Probe(ProbeData::default()));
        let probe_id = probe.id().clone();
        d.handle_message(probe, source(), Reception::Unicast);

        let (bytes, destination) = sent.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(destination, source());
        let reply = JsonCodec.decode(&bytes).unwrap();
        assert_eq!(reply.message_type(), MessageType::ProbeMatches);
        assert_eq!(reply.header.relates_to, Some(probe_id));
        assert!(sent.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(sink.outbound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listeners_isolated_and_forwarded_once() {
        let sink = Arc::new(CountingSink::default());
        let (d, _) = dispatcher(Arc::clone(&sink));
        let (tx, rx) = channel::unbounded();

        let failing: SharedListener =
            Arc::new(|_: &InboundMessage| -> DiscoveryResult<Option<DiscoveryBody>> {
                Err(DiscoveryError::listener("database offline"))
            });
        let panicking: SharedListener =
            Arc::new(|_: &InboundMessage| -> DiscoveryResult<Option<DiscoveryBody>> {
                panic!("listener bug")
            });
        d.listeners().register(MessageType::Hello, failing);
        d.listeners().register(MessageType::Hello, panicking);
        d.listeners().register(MessageType::Hello, forwarding_listener(tx));

        d.handle_message(hello("urn:uuid:h2", 1), source(), Reception::Multicast);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        d.shutdown();
        assert_eq!(d.metrics().snapshot().listener_failures, 2);
        assert_eq!(sink.inbound.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_stops_dispatch() {
        let (d, _) = dispatcher(Arc::new(CountingSink::default()));
        let (tx, _rx) = channel::unbounded();
        d.listeners().register(MessageType::Hello, forwarding_listener(tx));
        d.shutdown();
        d.shutdown();

        assert!(d.is_shut_down());
        assert!(d.listeners().is_empty(MessageType::Hello));
        assert_eq!(
            d.handle_message(hello("urn:uuid:h3", 1), source(), Reception::Multicast),
            FilterVerdict::NotRelevant
        );
    }
}
