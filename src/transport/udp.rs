//! UDP Transport (baseline)
//!
//! Direct pass-through to the native datagram carrier. The socket already
//! supports "receive from any sender", so this transport needs no cache and
//! no multiplexer: one connection per process, multicast-capable.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::common::conn::maybe_timeout;
use crate::common::{Address, Conn, Result};
use crate::error::Error;

use super::Transport;

/// Native datagram transport
#[derive(Default)]
pub struct UdpTransport;

impl UdpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn listen(&self, _network: &str, addr: &Address) -> Result<Arc<dyn Conn>> {
        let socket = UdpSocket::bind(addr.socket_addr()).await?;

        Ok(Arc::new(UdpConn::new(socket)))
    }

    async fn dial(&self, laddr: Option<&Address>, raddr: &Address) -> Result<Arc<dyn Conn>> {
        let remote = raddr.socket_addr();
        let local = match laddr {
            Some(addr) => addr.socket_addr(),
            // OS-chosen ephemeral port, family matched to the remote
            None if remote.is_ipv6() => "[::]:0".parse().unwrap(),
            None => "0.0.0.0:0".parse().unwrap(),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;

        Ok(Arc::new(UdpConn::new(socket)))
    }

    async fn resolve_addr(&self, _network: &str, addr: &str) -> Result<Address> {
        let resolved = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("no addresses for {}", addr)))?;

        Ok(Address::Udp(resolved))
    }

    fn allow_multicast(&self) -> bool {
        true
    }

    fn network_name(&self) -> &'static str {
        "udp"
    }
}

/// Datagram socket wrapped as a [`Conn`]
pub struct UdpConn {
    socket: UdpSocket,
    closed: AtomicBool,
    closed_notify: Notify,
    read_timeout: Mutex<Option<Duration>>,
    write_timeout: Mutex<Option<Duration>>,
}

impl UdpConn {
    fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            read_timeout: Mutex::new(None),
            write_timeout: Mutex::new(None),
        }
    }

    /// Run a socket operation that aborts when the connection is closed.
    /// Close must unblock I/O already in flight, matching native socket
    /// teardown, so the wakeup is registered before the closed flag is read.
    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        let closed = self.closed_notify.notified();
        tokio::pin!(closed);
        closed.as_mut().enable();

        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        tokio::select! {
            _ = closed => Err(Error::ConnectionClosed),
            result = fut => Ok(result?),
        }
    }
}

#[async_trait]
impl Conn for UdpConn {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let limit = *self.read_timeout.lock();

        maybe_timeout(limit, self.guarded(self.socket.recv(buf))).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let limit = *self.write_timeout.lock();

        maybe_timeout(limit, self.guarded(self.socket.send(buf))).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let limit = *self.read_timeout.lock();

        maybe_timeout(limit, async {
            let (n, from) = self.guarded(self.socket.recv_from(buf)).await?;

            Ok((n, Address::Udp(from)))
        })
        .await
    }

    fn local_addr(&self) -> Option<Address> {
        self.socket.local_addr().ok().map(Address::Udp)
    }

    fn remote_addr(&self) -> Option<Address> {
        self.socket.peer_addr().ok().map(Address::Udp)
    }

    fn set_read_timeout(&self, limit: Option<Duration>) {
        *self.read_timeout.lock() = limit;
    }

    fn set_write_timeout(&self, limit: Option<Duration>) {
        *self.write_timeout.lock() = limit;
    }

    async fn close(&self) -> Result<()> {
        // Datagram sockets have no logical/physical distinction
        self.hard_close().await
    }

    async fn hard_close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.closed_notify.notify_waiters();

        Ok(())
    }
}
