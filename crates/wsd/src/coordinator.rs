// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Collapses the replies to one logical request into one outcome.
//!
//! A request sent to N destinations gets N correlation tokens. Replies,
//! faults, timeouts and transmission errors each drain one token:
//!
//! - the first successful reply is delivered immediately
//! - later replies only enrich the delivered target's address protocol info
//! - failures are held back until the last token drains, then exactly one
//!   aggregated failure is delivered (fault > transmission error > timeout)
//!
//! The handler is invoked at most once, outside the coordinator's lock.

use crate::data::{DiscoveryData, DiscoveryRegistry};
use crate::message::{DiscoveryBody, DiscoveryMessage, FaultData, MessageId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;

/// Identifies one outbound copy of a request (its MessageId).
pub type CorrelationToken = MessageId;

/// Final result of a coordinated request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// First successful reply.
    Reply {
        token: CorrelationToken,
        message: DiscoveryMessage,
    },
    /// Every destination failed and at least one sent a fault.
    Fault {
        token: CorrelationToken,
        fault: FaultData,
    },
    /// Every destination failed, no fault, at least one send error.
    TransmissionFailed {
        token: CorrelationToken,
        error: io::Error,
    },
    /// Every destination timed out.
    Timeout,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Reply { .. })
    }
}

/// Receives the single outcome of a coordinated request.
pub trait ResponseHandler: Send + Sync {
    fn on_outcome(&self, outcome: RequestOutcome);
}

impl<F> ResponseHandler for F
where
    F: Fn(RequestOutcome) + Send + Sync,
{
    fn on_outcome(&self, outcome: RequestOutcome) {
        self(outcome)
    }
}

#[derive(Default)]
struct CoordinatorState {
    outstanding: HashSet<CorrelationToken>,
    delivered: Option<DiscoveryData>,
    fault: Option<(CorrelationToken, FaultData)>,
    transmission_error: Option<(CorrelationToken, io::Error)>,
    resolved: bool,
}

impl CoordinatorState {
    /// Outcome to deliver once the last token has drained without success.
    fn aggregate_failure(&mut self) -> Option<RequestOutcome> {
        if self.resolved || !self.outstanding.is_empty() {
            return None;
        }
        self.resolved = true;
        if let Some((token, fault)) = self.fault.take() {
            return Some(RequestOutcome::Fault { token, fault });
        }
        if let Some((token, error)) = self.transmission_error.take() {
            return Some(RequestOutcome::TransmissionFailed { token, error });
        }
        Some(RequestOutcome::Timeout)
    }
}

/// Reply aggregation for one logical request.
pub struct ResponseCoordinator {
    state: Mutex<CoordinatorState>,
    handler: Arc<dyn ResponseHandler>,
    registry: Option<Arc<DiscoveryRegistry>>,
}

impl ResponseCoordinator {
    pub fn new<I>(tokens: I, handler: Arc<dyn ResponseHandler>) -> Self
    where
        I: IntoIterator<Item = CorrelationToken>,
    {
        Self {
            state: Mutex::new(CoordinatorState {
                outstanding: tokens.into_iter().collect(),
                ..CoordinatorState::default()
            }),
            handler,
            registry: None,
        }
    }

    /// Also merge late protocol info into this registry's record.
    pub fn with_registry(mut self, registry: Arc<DiscoveryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// A successful reply arrived for `token`.
    pub fn on_reply(&self, token: &CorrelationToken, message: DiscoveryMessage) {
        let outcome = {
            let mut state = self.state.lock();
            if !state.outstanding.remove(token) {
                log::debug!("[COORD] reply for unknown token {}", token);
                return;
            }

            if let Some(target) = state.delivered.as_mut() {
                let merged = merge_late_reply(target, &message.body);
                if merged {
                    if let Some(registry) = &self.registry {
                        registry.merge_protocol_info(target);
                    }
                    log::debug!(
                        "[COORD] merged protocol info from {} into {}",
                        token,
                        target.endpoint_reference
                    );
                }
                return;
            }
            if state.resolved {
                return;
            }

            state.resolved = true;
            state.delivered = first_data(&message.body).cloned();
            RequestOutcome::Reply {
                token: token.clone(),
                message,
            }
        };
        self.handler.on_outcome(outcome);
    }

    /// A fault arrived for `token`.
    pub fn on_fault(&self, token: &CorrelationToken, fault: FaultData) {
        let outcome = {
            let mut state = self.state.lock();
            if !state.outstanding.remove(token) {
                log::debug!("[COORD] fault for unknown token {}", token);
                return;
            }
            let keep_retained = matches!(
                &state.fault,
                Some((_, retained)) if !retained.code.is_generic() && fault.code.is_generic()
            );
            if !keep_retained {
                state.fault = Some((token.clone(), fault));
            }
            state.aggregate_failure()
        };
        self.deliver(outcome);
    }

    /// No answer arrived for `token` in time.
    pub fn on_timeout(&self, token: &CorrelationToken) {
        let outcome = {
            let mut state = self.state.lock();
            if !state.outstanding.remove(token) {
                return;
            }
            state.aggregate_failure()
        };
        self.deliver(outcome);
    }

    /// The request copy for `token` could not be sent.
    pub fn on_transmission_error(&self, token: &CorrelationToken, error: io::Error) {
        let outcome = {
            let mut state = self.state.lock();
            if !state.outstanding.remove(token) {
                log::debug!("[COORD] transmission error for unknown token {}", token);
                return;
            }
            if state.transmission_error.is_none() {
                state.transmission_error = Some((token.clone(), error));
            }
            state.aggregate_failure()
        };
        self.deliver(outcome);
    }

    fn deliver(&self, outcome: Option<RequestOutcome>) {
        if let Some(outcome) = outcome {
            self.handler.on_outcome(outcome);
        }
    }

    /// True once the handler has been (or is being) invoked.
    pub fn is_resolved(&self) -> bool {
        self.state.lock().resolved
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// The delivered target, including protocol info merged since.
    pub fn delivered_target(&self) -> Option<DiscoveryData> {
        self.state.lock().delivered.clone()
    }
}

fn first_data(body: &DiscoveryBody) -> Option<&DiscoveryData> {
    match body {
        DiscoveryBody::ResolveMatches(data) => Some(data),
        DiscoveryBody::ProbeMatches(matches) => matches.first(),
        _ => None,
    }
}

fn merge_late_reply(target: &mut DiscoveryData, body: &DiscoveryBody) -> bool {
    let candidates: &[DiscoveryData] = match body {
        DiscoveryBody::ResolveMatches(data) => std::slice::from_ref(data),
        DiscoveryBody::ProbeMatches(matches) => matches,
        _ => &[],
    };
    let mut changed = false;
    for data in candidates
        .iter()
        .filter(|d| d.endpoint_reference == target.endpoint_reference)
    {
        changed |= target.x_addresses.merge_protocol_info(&data.x_addresses);
        changed |= target
            .discovery_x_addresses
            .merge_protocol_info(&data.discovery_x_addresses);
    }
    changed
}
