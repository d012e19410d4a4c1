// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client side: Resolve and Probe requests with timeouts.
//!
//! Every outbound copy of a request gets its own MessageId, used as the
//! correlation token. Replies are routed back by their `relates_to` header.
//! A single timer thread (`wsd-query-timer`) expires tokens.

use crate::coordinator::{CorrelationToken, ResponseCoordinator, ResponseHandler};
use crate::data::{DiscoveryRegistry, EndpointReference};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::message::{DiscoveryBody, DiscoveryMessage, FaultData, MessageCodec, ProbeData};
use crate::transport::DatagramSender;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on how long the timer thread sleeps without checking its queue.
const TIMER_IDLE: Duration = Duration::from_millis(100);

/// Progress of a probe.
#[derive(Debug)]
pub enum ProbeEvent {
    /// One responder's ProbeMatches.
    Match {
        token: CorrelationToken,
        message: DiscoveryMessage,
    },
    /// A responder answered with a fault.
    Fault {
        token: CorrelationToken,
        fault: FaultData,
    },
    /// Probe window closed. Sent exactly once, last.
    Finished { matches: usize },
}

pub trait ProbeHandler: Send + Sync {
    fn on_probe_event(&self, event: ProbeEvent);
}

impl<F> ProbeHandler for F
where
    F: Fn(ProbeEvent) + Send + Sync,
{
    fn on_probe_event(&self, event: ProbeEvent) {
        self(event)
    }
}

/// Collects every ProbeMatches until all of its tokens expire.
///
/// Events are delivered under the state lock so nothing can follow
/// `Finished`.
struct ProbeCollector {
    handler: Arc<dyn ProbeHandler>,
    state: Mutex<CollectorState>,
}

struct CollectorState {
    open: HashSet<CorrelationToken>,
    matches: usize,
}

impl ProbeCollector {
    fn new(handler: Arc<dyn ProbeHandler>, tokens: &[CorrelationToken]) -> Self {
        Self {
            handler,
            state: Mutex::new(CollectorState {
                open: tokens.iter().cloned().collect(),
                matches: 0,
            }),
        }
    }

    /// Returns false if `token` already closed.
    fn on_match(&self, token: &CorrelationToken, message: DiscoveryMessage) -> bool {
        let mut state = self.state.lock();
        if !state.open.contains(token) {
            log::debug!("[QUERIER] late ProbeMatches for {} dropped", token);
            return false;
        }
        state.matches += 1;
        self.handler.on_probe_event(ProbeEvent::Match {
            token: token.clone(),
            message,
        });
        true
    }

    fn on_fault(&self, token: &CorrelationToken, fault: FaultData) -> bool {
        let state = self.state.lock();
        if !state.open.contains(token) {
            return false;
        }
        self.handler.on_probe_event(ProbeEvent::Fault {
            token: token.clone(),
            fault,
        });
        true
    }

    fn close(&self, token: &CorrelationToken) {
        let mut state = self.state.lock();
        if state.open.remove(token) && state.open.is_empty() {
            self.handler.on_probe_event(ProbeEvent::Finished {
                matches: state.matches,
            });
        }
    }
}

#[derive(Clone)]
enum Pending {
    Resolve(Arc<ResponseCoordinator>),
    Probe(Arc<ProbeCollector>),
}

struct Deadline {
    at: Instant,
    token: CorrelationToken,
}

// Reversed so BinaryHeap pops the earliest deadline.
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.at.cmp(&self.at)
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl Eq for Deadline {}

type PendingTable = Arc<DashMap<CorrelationToken, Pending>>;

/// Sends queries and correlates their replies.
pub struct Querier {
    sender: Arc<dyn DatagramSender>,
    codec: Arc<dyn MessageCodec>,
    registry: Option<Arc<DiscoveryRegistry>>,
    pending: PendingTable,
    timer_tx: Mutex<Option<Sender<Deadline>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Querier {
    /// Create a querier and start its timer thread.
    ///
    /// # Errors
    /// Returns IO error if the timer thread cannot be spawned.
    pub fn new(
        sender: Arc<dyn DatagramSender>,
        codec: Arc<dyn MessageCodec>,
        registry: Option<Arc<DiscoveryRegistry>>,
    ) -> std::io::Result<Self> {
        let pending: PendingTable = Arc::new(DashMap::new());
        let (tx, rx) = channel::unbounded::<Deadline>();
        let table = Arc::clone(&pending);

        let timer = std::thread::Builder::new()
            .name("wsd-query-timer".to_string())
            .spawn(move || {
                let mut heap: BinaryHeap<Deadline> = BinaryHeap::new();
                loop {
                    let now = Instant::now();
                    while heap.peek().is_some_and(|d| d.at <= now) {
                        if let Some(deadline) = heap.pop() {
                            Self::expire(&table, &deadline.token);
                        }
                    }
                    let wait = heap
                        .peek()
                        .map_or(TIMER_IDLE, |d| d.at.saturating_duration_since(now))
                        .min(TIMER_IDLE);
                    match rx.recv_timeout(wait) {
                        Ok(deadline) => heap.push(deadline),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("[QUERIER] timer stopped, {} deadline(s) abandoned", heap.len());
            })?;

        Ok(Self {
            sender,
            codec,
            registry,
            pending,
            timer_tx: Mutex::new(Some(tx)),
            timer: Mutex::new(Some(timer)),
        })
    }

    fn expire(table: &DashMap<CorrelationToken, Pending>, token: &CorrelationToken) {
        let Some((_, pending)) = table.remove(token) else {
            return;
        };
        log::trace!("[QUERIER] token {} expired", token);
        match pending {
            Pending::Resolve(coordinator) => coordinator.on_timeout(token),
            Pending::Probe(collector) => collector.close(token),
        }
    }

    /// Resolve `endpoint` by asking each destination.
    ///
    /// The handler receives exactly one outcome. A `timeout` too large to
    /// represent as a deadline never expires.
    ///
    /// # Errors
    /// `InvalidData` with no destinations, `Encode` if the request cannot be
    /// encoded, `Shutdown` after [`Querier::shutdown`]. Per-destination send
    /// failures are not errors; they feed the coordinator.
    pub fn resolve(
        &self,
        endpoint: EndpointReference,
        destinations: &[SocketAddr],
        timeout: Duration,
        handler: Arc<dyn ResponseHandler>,
    ) -> DiscoveryResult<Arc<ResponseCoordinator>> {
        let requests = self.prepare(DiscoveryBody::Resolve(endpoint), destinations)?;

        let mut coordinator =
            ResponseCoordinator::new(requests.iter().map(|r| r.token.clone()), handler);
        if let Some(registry) = &self.registry {
            coordinator = coordinator.with_registry(Arc::clone(registry));
        }
        let coordinator = Arc::new(coordinator);

        self.dispatch(requests, timeout, Pending::Resolve(Arc::clone(&coordinator)))?;
        Ok(coordinator)
    }

    /// Probe each destination; every ProbeMatches received within `timeout`
    /// is handed to `handler`, followed by one `Finished`.
    ///
    /// # Errors
    /// Same as [`Querier::resolve`].
    pub fn probe(
        &self,
        probe: ProbeData,
        destinations: &[SocketAddr],
        timeout: Duration,
        handler: Arc<dyn ProbeHandler>,
    ) -> DiscoveryResult<Vec<CorrelationToken>> {
        let requests = self.prepare(DiscoveryBody::Probe(probe), destinations)?;
        let tokens: Vec<CorrelationToken> = requests.iter().map(|r| r.token.clone()).collect();

        let collector = Arc::new(ProbeCollector::new(handler, &tokens));
        self.dispatch(requests, timeout, Pending::Probe(collector))?;
        Ok(tokens)
    }

    fn prepare(
        &self,
        body: DiscoveryBody,
        destinations: &[SocketAddr],
    ) -> DiscoveryResult<Vec<Request>> {
        if destinations.is_empty() {
            return Err(DiscoveryError::invalid("query without destinations"));
        }
        destinations
            .iter()
            .map(|destination| {
                let message = DiscoveryMessage::new(body.clone());
                let datagram = self.codec.encode(&message)?;
                Ok(Request {
                    token: message.id().clone(),
                    destination: *destination,
                    datagram,
                })
            })
            .collect()
    }

    fn dispatch(
        &self,
        requests: Vec<Request>,
        timeout: Duration,
        pending: Pending,
    ) -> DiscoveryResult<()> {
        let timer_tx = self.timer_tx.lock().clone().ok_or(DiscoveryError::Shutdown)?;
        // None: the request stays pending until answered or shut down.
        let deadline = Instant::now().checked_add(timeout);
        if deadline.is_none() {
            log::debug!("[QUERIER] timeout {:?} out of range, request never expires", timeout);
        }

        // Registered before sending so an immediate reply finds its entry.
        for request in &requests {
            self.pending.insert(request.token.clone(), pending.clone());
            if let Some(at) = deadline {
                timer_tx
                    .send(Deadline {
                        at,
                        token: request.token.clone(),
                    })
                    .map_err(|_| DiscoveryError::Shutdown)?;
            }
        }

        for request in requests {
            if let Err(e) = self.sender.send_to(&request.datagram, request.destination) {
                log::warn!(
                    "[QUERIER] send of {} to {} failed: {}",
                    request.token,
                    request.destination,
                    e
                );
                if let Some((_, entry)) = self.pending.remove(&request.token) {
                    match entry {
                        Pending::Resolve(coordinator) => {
                            coordinator.on_transmission_error(&request.token, e);
                        }
                        Pending::Probe(collector) => collector.close(&request.token),
                    }
                }
            }
        }
        Ok(())
    }

    /// True if `id` names one of our outstanding requests.
    pub fn relates_to(&self, id: &CorrelationToken) -> bool {
        self.pending.contains_key(id)
    }

    /// Feed an inbound reply to the request it answers.
    ///
    /// Returns false if the message does not answer a pending request.
    pub fn route_reply(&self, message: &DiscoveryMessage) -> bool {
        let Some(token) = message.header.relates_to.as_ref() else {
            return false;
        };
        // Clone out of the map so no shard lock is held across callbacks.
        let Some(pending) = self.pending.get(token).map(|e| e.value().clone()) else {
            return false;
        };

        match (pending, &message.body) {
            (Pending::Resolve(coordinator), DiscoveryBody::ResolveMatches(_)) => {
                self.pending.remove(token);
                coordinator.on_reply(token, message.clone());
            }
            (Pending::Resolve(coordinator), DiscoveryBody::Fault(fault)) => {
                self.pending.remove(token);
                coordinator.on_fault(token, fault.clone());
            }
            (Pending::Probe(collector), DiscoveryBody::ProbeMatches(_)) => {
                return collector.on_match(token, message.clone());
            }
            (Pending::Probe(collector), DiscoveryBody::Fault(fault)) => {
                return collector.on_fault(token, fault.clone());
            }
            (_, body) => {
                log::debug!(
                    "[QUERIER] {} does not answer request {}",
                    body.message_type(),
                    token
                );
                return false;
            }
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Stop the timer thread and forget every pending request.
    ///
    /// Handlers of unfinished requests are not invoked.
    pub fn shutdown(&self) {
        self.timer_tx.lock().take();
        if let Some(handle) = self.timer.lock().take() {
            if handle.join().is_err() {
                log::warn!("[QUERIER] timer thread terminated abnormally");
            }
        }
        self.pending.clear();
    }
}

impl Drop for Querier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Request {
    token: CorrelationToken,
    destination: SocketAddr,
    datagram: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RequestOutcome;
    use crate::data::DiscoveryData;
    use crate::message::{FaultCode, JsonCodec};
    use std::io;

    #[derive(Default)]
    struct CaptureSender {
        sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
        fail_to: Option<SocketAddr>,
    }

    impl DatagramSender for CaptureSender {
        fn send_to(&self, datagram: &[u8], destination: SocketAddr) -> io::Result<()> {
            if self.fail_to == Some(destination) {
                return Err(io::Error::new(io::ErrorKind::Other, "host unreachable"));
            }
            self.sent.lock().push((datagram.to_vec(), destination));
            Ok(())
        }
    }

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last], 3702))
    }

    fn sent_ids(sender: &CaptureSender) -> Vec<CorrelationToken> {
        sender
            .sent
            .lock()
            .iter()
            .map(|(bytes, _)| JsonCodec.decode(bytes).unwrap().id().clone())
            .collect()
    }

    fn idle_querier() -> Querier {
        Querier::new(Arc::new(CaptureSender::default()), Arc::new(JsonCodec), None).unwrap()
    }

    fn outcome_channel() -> (Arc<dyn ResponseHandler>, channel::Receiver<RequestOutcome>) {
        let (tx, rx) = channel::unbounded();
        let handler: Arc<dyn ResponseHandler> = Arc::new(move |o: RequestOutcome| {
            let _ = tx.send(o);
        });
        (handler, rx)
    }

    #[test]
    fn test_resolve_reply_routed() {
        let sender = Arc::new(CaptureSender::default());
        let querier = Querier::new(sender.clone(), Arc::new(JsonCodec), None).unwrap();
        let (handler, rx) = outcome_channel();

        let epr = EndpointReference::new("urn:uuid:printer");
        querier
            .resolve(epr.clone(), &[addr(10), addr(11)], Duration::from_secs(5), handler)
            .unwrap();
        let ids = sent_ids(&sender);
        assert_eq!(ids.len(), 2);
        assert!(querier.relates_to(&ids[0]));

        let data = DiscoveryData::new(epr).with_version(1);
        let reply = DiscoveryMessage::new(DiscoveryBody::ResolveMatches(data))
            .relating_to(ids[1].clone());
        assert!(querier.route_reply(&reply));

        let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, RequestOutcome::Reply { token, .. } if token == ids[1]));
        assert!(!querier.relates_to(&ids[1]));
        assert!(querier.relates_to(&ids[0]));
    }

    #[test]
    fn test_resolve_times_out() {
        let sender = Arc::new(CaptureSender::default());
        let querier = Querier::new(sender, Arc::new(JsonCodec), None).unwrap();
        let (handler, rx) = outcome_channel();

        querier
            .resolve(
                EndpointReference::new("urn:uuid:silent"),
                &[addr(10)],
                Duration::from_millis(30),
                handler,
            )
            .unwrap();

        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(outcome, RequestOutcome::Timeout));
        assert_eq!(querier.pending(), 0);
    }

    #[test]
    fn test_send_failure_becomes_transmission_error() {
        let sender = Arc::new(CaptureSender {
            fail_to: Some(addr(10)),
            ..Default::default()
        });
        let querier = Querier::new(sender, Arc::new(JsonCodec), None).unwrap();
        let (handler, rx) = outcome_channel();

        querier
            .resolve(
                EndpointReference::new("urn:uuid:gone"),
                &[addr(10)],
                Duration::from_secs(5),
                handler,
            )
            .unwrap();

        let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, RequestOutcome::TransmissionFailed { .. }));
    }

    #[test]
    fn test_probe_collects_until_timeout() {
        let sender = Arc::new(CaptureSender::default());
        let querier = Querier::new(sender.clone(), Arc::new(JsonCodec), None).unwrap();
        let (tx, rx) = channel::unbounded();
        let handler: Arc<dyn ProbeHandler> = Arc::new(move |e: ProbeEvent| {
            let _ = tx.send(e);
        });

        querier
            .probe(ProbeData::default(), &[addr(255)], Duration::from_millis(100), handler)
            .unwrap();
        let token = sent_ids(&sender)[0].clone();

        for n in 0..2 {
            let data = DiscoveryData::new(EndpointReference::new(format!("urn:uuid:dev-{}", n)));
            let reply = DiscoveryMessage::new(DiscoveryBody::ProbeMatches(vec![data]))
                .relating_to(token.clone());
            assert!(querier.route_reply(&reply));
        }
        let fault = FaultData::new(FaultCode::MatchingRuleNotSupported, "");
        let fault = DiscoveryMessage::new(DiscoveryBody::Fault(fault)).relating_to(token.clone());
        assert!(querier.route_reply(&fault));

        let events: Vec<ProbeEvent> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert!(matches!(events[0], ProbeEvent::Match { .. }));
        assert!(matches!(events[1], ProbeEvent::Match { .. }));
        assert!(matches!(events[2], ProbeEvent::Fault { .. }));
        assert!(matches!(events[3], ProbeEvent::Finished { matches: 2 }));
    }

    #[test]
    fn test_unrelated_reply_not_routed() {
        let querier = idle_querier();
        let stray = DiscoveryMessage::new(DiscoveryBody::ProbeMatches(Vec::new()))
            .relating_to(CorrelationToken::new("urn:uuid:nobody"));
        assert!(!querier.route_reply(&stray));
    }

    #[test]
    fn test_no_destinations_rejected() {
        let querier = idle_querier();
        let (handler, _rx) = outcome_channel();
        let epr = EndpointReference::new("urn:uuid:x");
        let result = querier.resolve(epr, &[], Duration::from_secs(1), handler);
        assert!(matches!(result, Err(DiscoveryError::InvalidData { .. })));
    }

    #[test]
    fn test_query_after_shutdown_rejected() {
        let querier = idle_querier();
        querier.shutdown();
        let (handler, _rx) = outcome_channel();
        let epr = EndpointReference::new("urn:uuid:x");
        let result = querier.resolve(epr, &[addr(1)], Duration::from_secs(1), handler);
        assert!(matches!(result, Err(DiscoveryError::Shutdown)));
    }

    #[test]
    fn test_unbounded_timeout_stays_pending() {
        let sender = Arc::new(CaptureSender::default());
        let querier = Querier::new(sender.clone(), Arc::new(JsonCodec), None).unwrap();
        let (handler, rx) = outcome_channel();

        let epr = EndpointReference::new("urn:uuid:patient");
        querier
            .resolve(epr.clone(), &[addr(10)], Duration::MAX, handler)
            .unwrap();
        assert_eq!(querier.pending(), 1);
        assert!(rx.recv_timeout(Duration::from_millis(250)).is_err());

        let token = sent_ids(&sender)[0].clone();
        let data = DiscoveryData::new(epr).with_version(1);
        let reply =
            DiscoveryMessage::new(DiscoveryBody::ResolveMatches(data)).relating_to(token);
        assert!(querier.route_reply(&reply));
        let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(outcome, RequestOutcome::Reply { .. }));
    }

    #[test]
    fn test_match_after_close_not_delivered() {
        let (tx, rx) = channel::unbounded();
        let handler: Arc<dyn ProbeHandler> = Arc::new(move |e: ProbeEvent| {
            let _ = tx.send(e);
        });
        let token = CorrelationToken::new("urn:uuid:window");
        let collector = ProbeCollector::new(handler, std::slice::from_ref(&token));

        let late = DiscoveryMessage::new(DiscoveryBody::ProbeMatches(Vec::new()))
            .relating_to(token.clone());
        collector.close(&token);
        assert!(!collector.on_match(&token, late));
        let fault = FaultData::new(FaultCode::Receiver, "late");
        assert!(!collector.on_fault(&token, fault));

        let events: Vec<ProbeEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProbeEvent::Finished { matches: 0 }));
    }
}
