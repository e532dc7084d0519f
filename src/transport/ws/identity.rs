//! Reverse-proxy peer identity resolution
//!
//! When the websocket is terminated by a proxy, the transport-layer remote
//! address belongs to the proxy, not the peer. The trusted convention here is
//! the single-value `X-Real-IP` header set by that one proxy hop. The
//! recovered IP is paired with a freshly generated ephemeral port so that
//! several peers behind one gateway IP stay distinguishable in the cache and
//! multiplexer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use rand::Rng;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tracing::trace;

use crate::common::Address;
use crate::config::IdentityConfig;
use crate::error::{Error, Result};

/// Trusted forwarded-identity header name
pub const FORWARDED_IDENTITY_HEADER: &str = "X-Real-IP";

/// Resolve the identity of an inbound peer.
///
/// - `headers` is `None` when there is no request context (outbound dials):
///   the raw transport remote address is used as-is.
/// - With a request context, a trusted `X-Real-IP` yields a tunnel address
///   overriding the proxy-observed peer; a missing header fails resolution
///   unless `require_forwarded` is disabled.
pub fn resolve_inbound_identity(
    headers: Option<&HeaderMap>,
    raw_remote: SocketAddr,
    config: &IdentityConfig,
) -> Result<Address> {
    let Some(headers) = headers else {
        return Ok(Address::Stream(raw_remote));
    };

    match headers.get(FORWARDED_IDENTITY_HEADER) {
        Some(value) => {
            let ip = value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<IpAddr>().ok())
                .ok_or_else(|| {
                    Error::Protocol(format!("malformed {} header", FORWARDED_IDENTITY_HEADER))
                })?;

            let resolved = SocketAddr::new(ip, ephemeral_port(config));
            trace!("resolved peer identity {} behind proxy {}", resolved, raw_remote);

            Ok(Address::Tunnel {
                transport: raw_remote,
                resolved,
            })
        }
        None if config.require_forwarded => Err(Error::IdentityRequired),
        None => Ok(Address::Stream(raw_remote)),
    }
}

fn ephemeral_port(config: &IdentityConfig) -> u16 {
    let (min, max) = if config.port_min <= config.port_max {
        (config.port_min, config.port_max)
    } else {
        (config.port_max, config.port_min)
    };

    rand::thread_rng().gen_range(min..=max)
}

/// Best-effort discovery of the local IPv4 address advertised on dial.
/// Routes a datagram socket without sending anything.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::tungstenite::http::HeaderValue;

    fn proxy_addr() -> SocketAddr {
        "172.16.0.1:58321".parse().unwrap()
    }

    #[test]
    fn trusted_header_overrides_proxy_address() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_IDENTITY_HEADER, HeaderValue::from_static("10.0.0.5"));

        let config = IdentityConfig::default();
        let addr = resolve_inbound_identity(Some(&headers), proxy_addr(), &config).unwrap();

        assert_eq!(addr.host_key(), "10.0.0.5");
        assert_eq!(addr.transport_addr(), proxy_addr());
        assert!(addr.port() >= config.port_min);
    }

    #[test]
    fn distinct_peers_behind_one_gateway_get_distinct_ports() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_IDENTITY_HEADER, HeaderValue::from_static("10.0.0.5"));
        let config = IdentityConfig::default();

        // Random ephemeral ports collide with probability 1/55536 per pair;
        // sample a few to keep this deterministic in practice.
        let ports: std::collections::HashSet<u16> = (0..8)
            .map(|_| {
                resolve_inbound_identity(Some(&headers), proxy_addr(), &config)
                    .unwrap()
                    .port()
            })
            .collect();
        assert!(ports.len() > 1);
    }

    #[test]
    fn missing_header_fails_when_required() {
        let headers = HeaderMap::new();
        let config = IdentityConfig::default();

        assert!(matches!(
            resolve_inbound_identity(Some(&headers), proxy_addr(), &config),
            Err(Error::IdentityRequired)
        ));
    }

    #[test]
    fn missing_header_allowed_when_not_required() {
        let headers = HeaderMap::new();
        let config = IdentityConfig {
            require_forwarded: false,
            ..Default::default()
        };

        let addr = resolve_inbound_identity(Some(&headers), proxy_addr(), &config).unwrap();
        assert_eq!(addr, Address::Stream(proxy_addr()));
    }

    #[test]
    fn no_request_context_uses_raw_address() {
        let config = IdentityConfig::default();
        let addr = resolve_inbound_identity(None, proxy_addr(), &config).unwrap();
        assert_eq!(addr, Address::Stream(proxy_addr()));
    }

    #[test]
    fn malformed_header_is_a_protocol_error() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_IDENTITY_HEADER, HeaderValue::from_static("not-an-ip"));

        assert!(matches!(
            resolve_inbound_identity(Some(&headers), proxy_addr(), &IdentityConfig::default()),
            Err(Error::Protocol(_))
        ));
    }
}
