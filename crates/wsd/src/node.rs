// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A running discovery node: sockets, receive threads, dispatcher, querier.

use crate::config::DiscoveryConfig;
use crate::coordinator::{CorrelationToken, ResponseCoordinator, ResponseHandler};
use crate::data::{DiscoveryRegistry, EndpointReference};
use crate::dispatch::{Dispatcher, SharedListener};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::message::{
    AppSequenceGenerator, DiscoveryMessage, MessageCodec, MessageType, ProbeData,
};
use crate::observe::{DispatchMetrics, ObservabilitySink};
use crate::querier::{ProbeHandler, Querier};
use crate::responder::{RespondOutcome, RetryPolicy, RetryingResponder};
use crate::shutdown::ShutdownSignal;
use crate::target::TargetService;
use crate::transport::{DatagramReceiver, DatagramSender, Reception, UdpTransport};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct DiscoveryNode {
    config: DiscoveryConfig,
    group: SocketAddr,
    codec: Arc<dyn MessageCodec>,
    registry: Arc<DiscoveryRegistry>,
    querier: Arc<Querier>,
    dispatcher: Arc<Dispatcher>,
    announcer: RetryingResponder,
    sequence: Arc<AppSequenceGenerator>,
    targets: Mutex<Vec<Arc<TargetService>>>,
    receivers: Mutex<Vec<DatagramReceiver>>,
    stopping: AtomicBool,
    shutdown: ShutdownSignal,
}

impl DiscoveryNode {
    /// Open the sockets and start receiving.
    ///
    /// # Errors
    /// `InvalidData` for a configuration that fails validation, `Transport`
    /// when sockets or threads cannot be set up.
    pub fn start(
        config: DiscoveryConfig,
        codec: Arc<dyn MessageCodec>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> DiscoveryResult<Self> {
        Self::validate(&config)?;
        let transport = Arc::new(UdpTransport::open(&config)?);
        let node = Self::assemble(config, transport.clone(), transport.group(), codec, sink)?;

        for (name, socket, reception) in [
            ("wsd-mcast-rx", transport.multicast_socket(), Reception::Multicast),
            ("wsd-ucast-rx", transport.unicast_socket(), Reception::Unicast),
        ] {
            let dispatcher = Arc::clone(&node.dispatcher);
            let receiver = DatagramReceiver::spawn(
                name,
                socket,
                reception,
                Arc::new(move |bytes: &[u8], source: SocketAddr, reception: Reception| {
                    dispatcher.handle_datagram(bytes, source, reception);
                }),
            )?;
            node.receivers.lock().push(receiver);
        }

        log::info!(
            "[NODE] discovery node up on port {} group {} (instance {})",
            node.config.port,
            node.config.multicast_group,
            node.sequence.instance_id()
        );
        Ok(node)
    }

    /// Build a node that sends through `sender` and owns no sockets.
    ///
    /// Inbound traffic is fed with [`DiscoveryNode::handle_datagram`]; the
    /// multicast destination is taken from the configuration.
    ///
    /// # Errors
    /// `InvalidData` for a configuration that fails validation, `Transport`
    /// when worker threads cannot be spawned.
    pub fn with_sender(
        config: DiscoveryConfig,
        sender: Arc<dyn DatagramSender>,
        codec: Arc<dyn MessageCodec>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> DiscoveryResult<Self> {
        Self::validate(&config)?;
        let group = config.multicast_destination();
        Self::assemble(config, sender, group, codec, sink)
    }

    fn validate(config: &DiscoveryConfig) -> DiscoveryResult<()> {
        config
            .validate()
            .map_err(|e| DiscoveryError::invalid(e.to_string()))
    }

    fn assemble(
        config: DiscoveryConfig,
        sender: Arc<dyn DatagramSender>,
        group: SocketAddr,
        codec: Arc<dyn MessageCodec>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> DiscoveryResult<Self> {
        let registry = Arc::new(DiscoveryRegistry::new());
        let sequence = Arc::new(AppSequenceGenerator::new());
        let querier = Arc::new(Querier::new(
            Arc::clone(&sender),
            Arc::clone(&codec),
            Some(Arc::clone(&registry)),
        )?);

        let dispatcher = Arc::new(
            Dispatcher::builder(&config, Arc::clone(&sender), Arc::clone(&codec))
                .registry(Arc::clone(&registry))
                .querier(Arc::clone(&querier))
                .sink(sink)
                .app_sequence(Arc::clone(&sequence))
                .build()?,
        );

        let shutdown = ShutdownSignal::new();
        let announcer = RetryingResponder::new(sender, shutdown.clone(), dispatcher.metrics());

        Ok(Self {
            config,
            group,
            codec,
            registry,
            querier,
            dispatcher,
            announcer,
            sequence,
            targets: Mutex::new(Vec::new()),
            receivers: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Hand one inbound datagram to the dispatcher.
    pub fn handle_datagram(&self, datagram: &[u8], source: SocketAddr, reception: Reception) {
        self.dispatcher.handle_datagram(datagram, source, reception);
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DiscoveryRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        self.dispatcher.metrics()
    }

    /// Sequence generator shared by this node's announcements and replies.
    pub fn app_sequence(&self) -> &Arc<AppSequenceGenerator> {
        &self.sequence
    }

    pub fn register(&self, message_type: MessageType, listener: SharedListener) -> bool {
        self.dispatcher.listeners().register(message_type, listener)
    }

    pub fn unregister(&self, message_type: MessageType, listener: &SharedListener) -> bool {
        self.dispatcher.listeners().unregister(message_type, listener)
    }

    /// Multicast `message` to the group with the multicast retry policy.
    ///
    /// # Errors
    /// `Encode` if the message cannot be serialized.
    pub fn announce(&self, message: &DiscoveryMessage) -> DiscoveryResult<RespondOutcome> {
        self.multicast(message, &self.config.multicast_retry_policy())
    }

    fn multicast(
        &self,
        message: &DiscoveryMessage,
        policy: &RetryPolicy,
    ) -> DiscoveryResult<RespondOutcome> {
        let datagram = self.codec.encode(message)?;
        log::debug!("[NODE] announcing {} {}", message.message_type(), message.id());
        Ok(self.announcer.respond(&datagram, self.group, policy))
    }

    /// Start answering Probe/Resolve for `target` and announce it.
    ///
    /// # Errors
    /// `Encode` if the Hello cannot be serialized.
    pub fn host(&self, target: Arc<TargetService>) -> DiscoveryResult<()> {
        let listener: SharedListener = target.clone();
        self.register(MessageType::Probe, Arc::clone(&listener));
        self.register(MessageType::Resolve, listener);
        self.targets.lock().push(Arc::clone(&target));
        self.announce(&target.hello())?;
        Ok(())
    }

    /// Stop hosting `target` and send its Bye.
    ///
    /// # Errors
    /// `Encode` if the Bye cannot be serialized.
    pub fn withdraw(&self, target: &Arc<TargetService>) -> DiscoveryResult<()> {
        let listener: SharedListener = target.clone();
        self.unregister(MessageType::Probe, &listener);
        self.unregister(MessageType::Resolve, &listener);
        self.targets.lock().retain(|t| !Arc::ptr_eq(t, target));
        self.announce(&target.bye())?;
        Ok(())
    }

    /// Multicast a probe; matches arrive on `handler` until `timeout`.
    ///
    /// # Errors
    /// See [`Querier::probe`].
    pub fn probe(
        &self,
        probe: ProbeData,
        timeout: Duration,
        handler: Arc<dyn ProbeHandler>,
    ) -> DiscoveryResult<Vec<CorrelationToken>> {
        self.querier.probe(probe, &[self.group], timeout, handler)
    }

    /// Multicast a resolve for `endpoint`.
    ///
    /// # Errors
    /// See [`Querier::resolve`].
    pub fn resolve(
        &self,
        endpoint: EndpointReference,
        timeout: Duration,
        handler: Arc<dyn ResponseHandler>,
    ) -> DiscoveryResult<Arc<ResponseCoordinator>> {
        self.querier.resolve(endpoint, &[self.group], timeout, handler)
    }

    /// Say Bye for hosted targets, then stop every thread.
    ///
    /// Only the first call does anything.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let targets: Vec<Arc<TargetService>> = self.targets.lock().drain(..).collect();
        for target in targets {
            if let Err(e) = self.multicast(&target.bye(), &RetryPolicy::once()) {
                log::warn!("[NODE] bye for {} not sent: {}", target.endpoint(), e);
            }
        }

        self.shutdown.trigger();
        self.dispatcher.shutdown();
        let receivers: Vec<DatagramReceiver> = self.receivers.lock().drain(..).collect();
        for receiver in receivers {
            receiver.shutdown();
        }
        self.querier.shutdown();
        log::info!("[NODE] discovery node stopped");
    }
}

impl Drop for DiscoveryNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DiscoveryData, QName};
    use crate::message::{DiscoveryBody, JsonCodec};
    use crate::observe::NullSink;
    use std::io;
    use std::thread;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(DiscoveryMessage, SocketAddr)>>,
    }

    impl RecordingSender {
        fn count(&self, kind: MessageType) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|(m, _)| m.message_type() == kind)
                .count()
        }
    }

    impl DatagramSender for RecordingSender {
        fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<()> {
            let message = JsonCodec
                .decode(datagram)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.sent.lock().push((message, destination));
            Ok(())
        }
    }

    fn quiet_config() -> DiscoveryConfig {
        DiscoveryConfig {
            multicast_repeat: 0,
            unicast_repeat: 0,
            app_max_delay_ms: 0,
            ..DiscoveryConfig::default()
        }
    }

    fn node(sender: &Arc<RecordingSender>) -> DiscoveryNode {
        DiscoveryNode::with_sender(
            quiet_config(),
            sender.clone(),
            Arc::new(JsonCodec),
            Arc::new(NullSink),
        )
        .unwrap()
    }

    fn target(node: &DiscoveryNode, name: &str) -> Arc<TargetService> {
        let data = DiscoveryData::new(EndpointReference::new(format!("urn:uuid:{}", name)))
            .with_version(1)
            .with_type(QName::new("http://example.org/dev", "Camera"));
        Arc::new(TargetService::new(data, Arc::clone(node.app_sequence())))
    }

    #[test]
    fn test_host_announces_hello_to_group() {
        let sender = Arc::new(RecordingSender::default());
        let node = node(&sender);
        node.host(target(&node, "cam-1")).unwrap();

        let sent = sender.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.message_type(), MessageType::Hello);
        assert_eq!(sent[0].1, node.config().multicast_destination());
        assert!(sent[0].0.header.app_sequence.is_some());
    }

    #[test]
    fn test_withdraw_sends_bye_once() {
        let sender = Arc::new(RecordingSender::default());
        let node = node(&sender);
        let cam = target(&node, "cam-1");
        node.host(Arc::clone(&cam)).unwrap();
        node.withdraw(&cam).unwrap();
        assert_eq!(sender.count(MessageType::Bye), 1);

        node.shutdown();
        assert_eq!(sender.count(MessageType::Bye), 1);
    }

    #[test]
    fn test_shutdown_says_bye_once_per_target() {
        let sender = Arc::new(RecordingSender::default());
        let node = node(&sender);
        node.host(target(&node, "cam-1")).unwrap();
        node.host(target(&node, "cam-2")).unwrap();

        node.shutdown();
        node.shutdown();
        drop(node);
        assert_eq!(sender.count(MessageType::Hello), 2);
        assert_eq!(sender.count(MessageType::Bye), 2);
    }

    #[test]
    fn test_concurrent_shutdown_says_bye_once() {
        let sender = Arc::new(RecordingSender::default());
        let node = Arc::new(node(&sender));
        node.host(target(&node, "cam-1")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let node = Arc::clone(&node);
                thread::spawn(move || node.shutdown())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(node);
        assert_eq!(sender.count(MessageType::Bye), 1);
    }

    #[test]
    fn test_hosted_target_answers_probe() {
        let sender = Arc::new(RecordingSender::default());
        let node = node(&sender);
        node.host(target(&node, "cam-1")).unwrap();

        let probe = DiscoveryMessage::new(DiscoveryBody::Probe(ProbeData::default()));
        let querier: SocketAddr = "10.0.0.9:3702".parse().unwrap();
        node.handle_datagram(&JsonCodec.encode(&probe).unwrap(), querier, Reception::Unicast);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sender.count(MessageType::ProbeMatches) == 0 {
            assert!(std::time::Instant::now() < deadline, "no ProbeMatches sent");
            thread::sleep(Duration::from_millis(10));
        }
        let sent = sender.sent.lock().clone();
        let (reply, destination) = sent
            .iter()
            .find(|(m, _)| m.message_type() == MessageType::ProbeMatches)
            .unwrap();
        assert_eq!(*destination, querier);
        assert_eq!(reply.header.relates_to.as_ref(), Some(probe.id()));
    }

    #[test]
    fn test_hello_from_peer_lands_in_registry() {
        let sender = Arc::new(RecordingSender::default());
        let node = node(&sender);
        let events = node.registry().subscribe();

        let peer = AppSequenceGenerator::with_instance(7, 0);
        let data = DiscoveryData::new(EndpointReference::new("urn:uuid:peer")).with_version(3);
        let hello =
            DiscoveryMessage::new(DiscoveryBody::Hello(data)).with_app_sequence(peer.next());
        let source: SocketAddr = "10.0.0.7:3702".parse().unwrap();
        node.handle_datagram(&JsonCodec.encode(&hello).unwrap(), source, Reception::Multicast);

        let event = events.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.data.metadata_version, 3);
        assert_eq!(node.registry().len(), 1);
        assert_eq!(node.metrics().snapshot().accepted, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DiscoveryConfig {
            port: 0,
            ..DiscoveryConfig::default()
        };
        let result = DiscoveryNode::with_sender(
            config,
            Arc::new(RecordingSender::default()),
            Arc::new(JsonCodec),
            Arc::new(NullSink),
        );
        assert!(matches!(result, Err(DiscoveryError::InvalidData { .. })));
    }
}
