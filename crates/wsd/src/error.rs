// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the discovery engine.

use std::fmt;
use std::io;

/// Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Discovery subsystem error categorisation.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Datagram could not be turned into a message.
    Decode { reason: String },
    /// Message could not be turned into a datagram.
    Encode { reason: String },
    /// Underlying socket interaction failed.
    Transport(io::Error),
    /// A listener rejected or failed to handle a message.
    Listener { reason: String },
    /// Component was shut down before the operation completed.
    Shutdown,
    /// Generic invalid data or invariant violation.
    InvalidData { reason: String },
}

impl DiscoveryError {
    /// Shorthand for a listener failure.
    pub fn listener(reason: impl Into<String>) -> Self {
        Self::Listener {
            reason: reason.into(),
        }
    }

    /// Shorthand for invalid data.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidData {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode { reason } => write!(f, "Decode failed: {}", reason),
            Self::Encode { reason } => write!(f, "Encode failed: {}", reason),
            Self::Transport(e) => write!(f, "Transport failed: {}", e),
            Self::Listener { reason } => write!(f, "Listener failed: {}", reason),
            Self::Shutdown => write!(f, "Discovery engine shut down"),
            Self::InvalidData { reason } => write!(f, "Invalid data: {}", reason),
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DiscoveryError {
    fn from(e: io::Error) -> Self {
        Self::Transport(e)
    }
}
