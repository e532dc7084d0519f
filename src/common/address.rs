//! Address type for gossip transports
//!
//! Every carrier kind resolves to one of these variants. Peer identity in the
//! gossip protocol is host-scoped, so the cache/dedup key is the host
//! component only (see [`Address::host_key`]).

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

/// Network address representation
///
/// A `Tunnel` address carries a resolved identity that may differ from the
/// raw transport-layer peer address: when the websocket is terminated behind
/// a reverse proxy, `transport` is the proxy's socket address and `resolved`
/// is the true peer identity recovered from the forwarded-identity header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Native datagram socket address
    Udp(SocketAddr),
    /// Raw stream (websocket) peer address
    Stream(SocketAddr),
    /// Tunnel address with a resolved-real-IP override
    Tunnel {
        transport: SocketAddr,
        resolved: SocketAddr,
    },
}

impl Address {
    /// Network family name: "udp" or "tcp"
    pub fn network(&self) -> &'static str {
        match self {
            Address::Udp(_) => "udp",
            Address::Stream(_) | Address::Tunnel { .. } => "tcp",
        }
    }

    /// The effective socket address: the resolved identity for tunnels,
    /// the plain address otherwise.
    pub fn socket_addr(&self) -> SocketAddr {
        match self {
            Address::Udp(addr) | Address::Stream(addr) => *addr,
            Address::Tunnel { resolved, .. } => *resolved,
        }
    }

    /// The raw carrier-level peer address, ignoring any identity override.
    pub fn transport_addr(&self) -> SocketAddr {
        match self {
            Address::Udp(addr) | Address::Stream(addr) => *addr,
            Address::Tunnel { transport, .. } => *transport,
        }
    }

    /// Get the IP of the effective address
    pub fn ip(&self) -> IpAddr {
        self.socket_addr().ip()
    }

    /// Get the port of the effective address
    pub fn port(&self) -> u16 {
        self.socket_addr().port()
    }

    /// IPv6 scope id of the effective address, if any
    pub fn zone(&self) -> Option<u32> {
        match self.socket_addr() {
            SocketAddr::V6(v6) => Some(v6.scope_id()),
            SocketAddr::V4(_) => None,
        }
    }

    /// Host component used as the cache/dedup key. Port is discarded.
    pub fn host_key(&self) -> String {
        self.ip().to_string()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Stream(addr)
    }
}

/// Split a textual "host:port" into its parts. Accepts the bracketed IPv6
/// form ("[::1]:7946"). Fails with [`Error::InvalidAddress`] on malformed
/// input; never panics.
pub fn split_host_port(text: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = text.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| Error::InvalidAddress(format!("missing ']' in {}", text)))?;
        let after = &rest[end + 1..];
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| Error::InvalidAddress(format!("missing port in {}", text)))?;
        (&rest[..end], port)
    } else {
        let idx = text
            .rfind(':')
            .ok_or_else(|| Error::InvalidAddress(format!("missing port in {}", text)))?;
        let host = &text[..idx];
        if host.contains(':') {
            return Err(Error::InvalidAddress(format!(
                "unbracketed IPv6 literal in {}",
                text
            )));
        }
        (host, &text[idx + 1..])
    };

    if host.is_empty() {
        return Err(Error::InvalidAddress(format!("empty host in {}", text)));
    }

    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidAddress(format!("bad port in {}", text)))?;

    Ok((host.to_string(), port))
}
