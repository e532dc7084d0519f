//! Configuration for the websocket gossip transport
//!
//! Every operational knob is declared here; nothing is a hidden constant.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default upgrade endpoint path
fn default_route_path() -> String {
    "/gossip/ws".to_string()
}

/// Default maximum entries for the bounded connection cache profile
pub const DEFAULT_CACHE_ENTRIES: usize = 100;

fn default_cache_entries() -> Option<usize> {
    Some(DEFAULT_CACHE_ENTRIES)
}

fn default_true() -> bool {
    true
}

fn default_port_min() -> u16 {
    10_000
}

fn default_port_max() -> u16 {
    65_535
}

fn default_max_message_bytes() -> usize {
    64 << 10 // 64 KB per gossip frame is generous
}

/// Default broadcast payload cap the engine should use on IPv4
pub const DEFAULT_MAX_BROADCAST_BYTES: usize = 1400;

/// Conservative broadcast payload cap for IPv6 listen addresses
pub const IPV6_MAX_BROADCAST_BYTES: usize = 512;

/// Websocket transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Upgrade endpoint path dialed on the remote side
    #[serde(default = "default_route_path")]
    pub route_path: String,

    /// Fixed remote tunnel port for outbound dials. When unset, dials target
    /// the peer address's own port. Used when a deployment separates the
    /// gossip tunnel port from the HTTP listener.
    #[serde(default)]
    pub remote_server_port: Option<u16>,

    /// Connection cache sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Peer identity resolution policy
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Maximum websocket message size accepted on a tunnel
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            route_path: default_route_path(),
            remote_server_port: None,
            cache: CacheConfig::default(),
            identity: IdentityConfig::default(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl WsConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Connection cache sizing
///
/// `max_entries: Some(n)` bounds the cache to `n` peers with LRU eviction;
/// `None` leaves it unbounded. Both profiles expose identical get/set/remove
/// semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

/// Peer identity resolution policy
///
/// The trusted forwarded-identity convention is the single-value `X-Real-IP`
/// header set by the terminating proxy. The trust boundary is exactly one
/// hop: the proxy in front of this process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Require `X-Real-IP` on inbound upgrades. Disable only when peers
    /// connect directly, with no terminating proxy in between.
    #[serde(default = "default_true")]
    pub require_forwarded: bool,

    /// Advertise our own local IPv4 in `X-Real-IP` on outbound dials
    #[serde(default = "default_true")]
    pub advertise: bool,

    /// Ephemeral port range used to distinguish peers behind one gateway IP
    #[serde(default = "default_port_min")]
    pub port_min: u16,

    #[serde(default = "default_port_max")]
    pub port_max: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            require_forwarded: true,
            advertise: true,
            port_min: default_port_min(),
            port_max: default_port_max(),
        }
    }
}

/// Broadcast payload cap for a given listen address. Non-IPv4 listeners are
/// capped at 512 bytes (IPv6 path-MTU conservatism); IPv4 keeps the default.
pub fn max_broadcast_bytes(listen_ip: IpAddr) -> usize {
    match listen_ip {
        IpAddr::V4(_) => DEFAULT_MAX_BROADCAST_BYTES,
        IpAddr::V6(_) => IPV6_MAX_BROADCAST_BYTES,
    }
}
