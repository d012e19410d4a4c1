// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol constants and engine configuration.
//!
//! Timing constants are the SOAP-over-UDP 1.1 and WS-Discovery 1.1 defaults.
//! Components never read this module implicitly: callers build a
//! [`DiscoveryConfig`] and hand the relevant values to each component.

use crate::responder::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Well-known WS-Discovery UDP port.
pub const DISCOVERY_PORT: u16 = 3702;

/// IPv4 multicast group for WS-Discovery.
pub const MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Resends of a unicast UDP message after the first send.
pub const UNICAST_UDP_REPEAT: u32 = 1;

/// Resends of a multicast UDP message after the first send.
pub const MULTICAST_UDP_REPEAT: u32 = 1;

/// Lower bound of the initial retransmission delay (ms).
pub const UDP_MIN_DELAY_MS: u64 = 50;

/// Upper bound of the initial retransmission delay (ms).
pub const UDP_MAX_DELAY_MS: u64 = 250;

/// Cap applied to the doubled retransmission delay (ms).
pub const UDP_UPPER_DELAY_MS: u64 = 500;

/// Maximum random delay before answering a multicast query (ms).
pub const APP_MAX_DELAY_MS: u64 = 500;

/// Default time a querier waits for matches (ms).
pub const MATCH_TIMEOUT_MS: u64 = 10_000;

/// Default number of recently seen message ids remembered for dedup.
pub const MESSAGE_ID_HISTORY: usize = 200;

/// Largest configurable retransmission or application delay (ms).
pub const MAX_CONFIGURED_DELAY_MS: u64 = 3_600_000;

/// Maximum datagram size accepted by the receiver (SOAP-over-UDP limit).
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Address to bind the discovery socket to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// UDP port (default: 3702)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Multicast group to join (default: 239.255.255.250)
    #[serde(default = "default_multicast_group")]
    pub multicast_group: Ipv4Addr,

    /// Receive our own multicast traffic
    #[serde(default = "default_true")]
    pub multicast_loop: bool,

    /// Capacity of the duplicate-detection history
    #[serde(default = "default_message_id_capacity")]
    pub message_id_capacity: usize,

    /// Worker threads running listener jobs
    #[serde(default = "default_listener_threads")]
    pub listener_threads: usize,

    /// Worker threads running reply retransmission chains
    #[serde(default = "default_reply_threads")]
    pub reply_threads: usize,

    /// Resends of unicast replies
    #[serde(default = "default_unicast_repeat")]
    pub unicast_repeat: u32,

    /// Resends of multicast announcements and queries
    #[serde(default = "default_multicast_repeat")]
    pub multicast_repeat: u32,

    /// Initial retransmission delay lower bound (ms)
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Initial retransmission delay upper bound (ms)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Retransmission delay cap (ms)
    #[serde(default = "default_upper_delay")]
    pub upper_delay_ms: u64,

    /// Maximum random delay before answering multicast queries (ms)
    #[serde(default = "default_app_max_delay")]
    pub app_max_delay_ms: u64,

    /// Default probe/resolve window when the caller gives none (ms)
    #[serde(default = "default_match_timeout")]
    pub match_timeout_ms: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DISCOVERY_PORT
}

fn default_multicast_group() -> Ipv4Addr {
    MULTICAST_IPV4
}

fn default_true() -> bool {
    true
}

fn default_message_id_capacity() -> usize {
    MESSAGE_ID_HISTORY
}

fn default_listener_threads() -> usize {
    4
}

fn default_reply_threads() -> usize {
    2
}

fn default_unicast_repeat() -> u32 {
    UNICAST_UDP_REPEAT
}

fn default_multicast_repeat() -> u32 {
    MULTICAST_UDP_REPEAT
}

fn default_min_delay() -> u64 {
    UDP_MIN_DELAY_MS
}

fn default_max_delay() -> u64 {
    UDP_MAX_DELAY_MS
}

fn default_upper_delay() -> u64 {
    UDP_UPPER_DELAY_MS
}

fn default_app_max_delay() -> u64 {
    APP_MAX_DELAY_MS
}

fn default_match_timeout() -> u64 {
    MATCH_TIMEOUT_MS
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            multicast_group: default_multicast_group(),
            multicast_loop: true,
            message_id_capacity: default_message_id_capacity(),
            listener_threads: default_listener_threads(),
            reply_threads: default_reply_threads(),
            unicast_repeat: default_unicast_repeat(),
            multicast_repeat: default_multicast_repeat(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            upper_delay_ms: default_upper_delay(),
            app_max_delay_ms: default_app_max_delay(),
            match_timeout_ms: default_match_timeout(),
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Multicast destination (group + port).
    pub fn multicast_destination(&self) -> SocketAddr {
        SocketAddr::from((self.multicast_group, self.port))
    }

    /// Retransmission policy for unicast replies.
    pub fn unicast_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.unicast_repeat)
    }

    /// Retransmission policy for multicast announcements and queries.
    pub fn multicast_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.multicast_repeat)
    }

    fn retry_policy(&self, repeat_count: u32) -> RetryPolicy {
        RetryPolicy {
            repeat_count,
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            upper_delay: Duration::from_millis(self.upper_delay_ms),
        }
    }

    /// Maximum application delay before answering a multicast query.
    pub fn app_max_delay(&self) -> Duration {
        Duration::from_millis(self.app_max_delay_ms)
    }

    /// Time a querier waits for replies.
    pub fn match_timeout(&self) -> Duration {
        Duration::from_millis(self.match_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if !self.multicast_group.is_multicast() {
            return Err(ConfigError::InvalidValue(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }
        if self.message_id_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "message_id_capacity cannot be 0".into(),
            ));
        }
        if self.listener_threads == 0 || self.reply_threads == 0 {
            return Err(ConfigError::InvalidValue(
                "worker thread counts cannot be 0".into(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidValue(
                "min_delay_ms cannot exceed max_delay_ms".into(),
            ));
        }
        if self.max_delay_ms > self.upper_delay_ms {
            return Err(ConfigError::InvalidValue(
                "max_delay_ms cannot exceed upper_delay_ms".into(),
            ));
        }
        if self.upper_delay_ms > MAX_CONFIGURED_DELAY_MS
            || self.app_max_delay_ms > MAX_CONFIGURED_DELAY_MS
        {
            return Err(ConfigError::InvalidValue(format!(
                "delays cannot exceed {} ms",
                MAX_CONFIGURED_DELAY_MS
            )));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
