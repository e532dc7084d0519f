//! Transport Layer
//!
//! Responsibilities:
//! - Present every carrier kind (native UDP, websocket tunnels) behind one
//!   capability contract the gossip engine can hold for the process lifetime
//! - NO gossip message semantics, NO encryption
//!
//! The engine only ever calls `recv_from` on the connection returned by
//! `listen` and point-to-point `recv`/`send` on connections returned by
//! `dial`.

mod udp;
pub mod ws;

pub use udp::UdpTransport;
pub use ws::WsTransport;

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Address, Conn, Result};

/// Transport capability implemented by each carrier kind
///
/// Stateless descriptor of a carrier: constructed once at process start and
/// held for the process lifetime. No teardown is required beyond releasing
/// the connections it handed out.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind the single logical listening socket the engine reads from
    async fn listen(&self, network: &str, addr: &Address) -> Result<Arc<dyn Conn>>;

    /// Connect (or reuse a connection) to a remote peer
    async fn dial(&self, laddr: Option<&Address>, raddr: &Address) -> Result<Arc<dyn Conn>>;

    /// Parse a textual address into this carrier's address type
    async fn resolve_addr(&self, network: &str, addr: &str) -> Result<Address>;

    /// Whether the carrier supports native multicast group membership
    fn allow_multicast(&self) -> bool;

    /// Network family name: "udp", "tcp", ...
    fn network_name(&self) -> &'static str;
}
