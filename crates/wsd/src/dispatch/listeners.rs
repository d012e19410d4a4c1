// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener registration, one narrow registry per message type.

use crate::error::DiscoveryResult;
use crate::message::{DiscoveryBody, DiscoveryMessage, MessageType};
use crate::transport::Reception;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

/// An accepted message as listeners see it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: DiscoveryMessage,
    pub source: SocketAddr,
    pub reception: Reception,
}

/// Receives accepted discovery messages.
///
/// For Probe and Resolve, returning `Ok(Some(body))` produces a reply
/// (typically `ProbeMatches` or `ResolveMatches`) sent back to the querier.
/// Replies returned for other message types are ignored.
pub trait DiscoveryListener: Send + Sync {
    fn on_message(&self, inbound: &InboundMessage) -> DiscoveryResult<Option<DiscoveryBody>>;
}

impl<F> DiscoveryListener for F
where
    F: Fn(&InboundMessage) -> DiscoveryResult<Option<DiscoveryBody>> + Send + Sync,
{
    fn on_message(&self, inbound: &InboundMessage) -> DiscoveryResult<Option<DiscoveryBody>> {
        self(inbound)
    }
}

pub type SharedListener = Arc<dyn DiscoveryListener>;

fn same_listener(a: &SharedListener, b: &SharedListener) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn slot(message_type: MessageType) -> Option<usize> {
    MessageType::LISTENABLE
        .iter()
        .position(|t| *t == message_type)
}

/// Per-type listener sets, each behind its own lock.
pub struct ListenerRegistry {
    sets: [Mutex<Vec<SharedListener>>; MessageType::LISTENABLE.len()],
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            sets: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    /// Register `listener` for `message_type`.
    ///
    /// Returns `false` if it was already registered (same `Arc`) or the type
    /// cannot be listened to.
    pub fn register(&self, message_type: MessageType, listener: SharedListener) -> bool {
        let Some(index) = slot(message_type) else {
            log::debug!("[LISTENERS] {} is not listenable", message_type);
            return false;
        };
        let mut set = self.sets[index].lock();
        if set.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        set.push(listener);
        true
    }

    /// Register `listener` for every listenable type.
    pub fn register_all(&self, listener: &SharedListener) {
        for message_type in MessageType::LISTENABLE {
            self.register(message_type, Arc::clone(listener));
        }
    }

    /// Remove `listener` from `message_type`. Absent listeners are a no-op.
    pub fn unregister(&self, message_type: MessageType, listener: &SharedListener) -> bool {
        let Some(index) = slot(message_type) else {
            return false;
        };
        let mut set = self.sets[index].lock();
        let before = set.len();
        set.retain(|l| !same_listener(l, listener));
        set.len() != before
    }

    pub fn unregister_all(&self, listener: &SharedListener) {
        for message_type in MessageType::LISTENABLE {
            self.unregister(message_type, listener);
        }
    }

    /// Listeners registered for `message_type` at this instant.
    pub fn snapshot(&self, message_type: MessageType) -> Vec<SharedListener> {
        slot(message_type)
            .map(|index| self.sets[index].lock().clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, message_type: MessageType) -> bool {
        slot(message_type).map_or(true, |index| self.sets[index].lock().is_empty())
    }

    pub fn len(&self, message_type: MessageType) -> usize {
        slot(message_type).map_or(0, |index| self.sets[index].lock().len())
    }

    pub fn clear_all(&self) {
        for set in &self.sets {
            set.lock().clear();
        }
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
