//! Connection capability
//!
//! Every carrier-level connection implements [`Conn`]. The gossip engine
//! holds exactly one listening `Conn` (native datagram socket or the
//! websocket fan-in multiplexer) and one dialed `Conn` per peer exchange; it
//! never sees carrier-specific types or errors.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::Address;
use crate::error::{Error, Result};

/// Largest datagram payload a carrier can hand to the engine.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Duplex connection abstraction with datagram-style reads
///
/// `close` is the protocol-visible (logical) close and is idempotent; for
/// warm-tunnel carriers it is a no-op. `hard_close` releases the underlying
/// carrier and is irreversible; repeated calls are harmless.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Read the next message from the connected peer.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write one message to the connected peer. Concurrent writers are
    /// serialized internally; frame boundaries never interleave.
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Read the next message from any peer, returning the sender's resolved
    /// address. This is the datagram-semantics primitive the engine blocks on.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)>;

    /// Local bound address, if known
    fn local_addr(&self) -> Option<Address>;

    /// Remote peer address, if known
    fn remote_addr(&self) -> Option<Address>;

    /// Limit future `recv` calls; `None` blocks indefinitely (the default).
    fn set_read_timeout(&self, limit: Option<Duration>);

    /// Limit future `send` calls; `None` blocks indefinitely (the default).
    fn set_write_timeout(&self, limit: Option<Duration>);

    /// Protocol-visible close
    async fn close(&self) -> Result<()>;

    /// Physical teardown of the carrier
    async fn hard_close(&self) -> Result<()>;
}

/// Run `fut` under an optional time limit, mapping expiry to [`Error::Timeout`].
pub(crate) async fn maybe_timeout<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| Error::Timeout)?,
        None => fut.await,
    }
}
