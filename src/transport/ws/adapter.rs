//! Message-framed connection adapter
//!
//! Wraps one websocket tunnel as a [`Conn`]. Every gossip payload travels as
//! exactly one text frame; binary frames are a protocol violation and fail
//! the read. `close` is deliberately a no-op so the tunnel stays warm across
//! protocol rounds; only `hard_close` (driven by the disconnect path or
//! explicit teardown) releases the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

use crate::common::conn::maybe_timeout;
use crate::common::{Address, Conn, Result, Stream};
use crate::config::IdentityConfig;
use crate::error::Error;

use super::identity::resolve_inbound_identity;

/// Websocket stream over the unified carrier type
pub type WsStream = WebSocketStream<Stream>;

/// One tunnel connection presented as a [`Conn`]
pub struct WsConnAdapter {
    writer: AsyncMutex<SplitSink<WsStream, Message>>,
    reader: AsyncMutex<SplitStream<WsStream>>,
    local: Option<SocketAddr>,
    peer: Address,
    closed: AtomicBool,
    read_timeout: parking_lot::Mutex<Option<Duration>>,
    write_timeout: parking_lot::Mutex<Option<Duration>>,
}

impl WsConnAdapter {
    pub fn new(stream: WsStream, local: Option<SocketAddr>, peer: Address) -> Self {
        let (writer, reader) = stream.split();

        Self {
            writer: AsyncMutex::new(writer),
            reader: AsyncMutex::new(reader),
            local,
            peer,
            closed: AtomicBool::new(false),
            read_timeout: parking_lot::Mutex::new(None),
            write_timeout: parking_lot::Mutex::new(None),
        }
    }

    /// Build an adapter for an accepted upgrade, resolving the peer identity
    /// from the request headers. Fails when the identity policy requires a
    /// forwarded header and none is present; the connection must then not be
    /// cached or registered.
    pub fn from_upgrade(
        stream: WsStream,
        local: Option<SocketAddr>,
        raw_remote: SocketAddr,
        headers: Option<&HeaderMap>,
        identity: &IdentityConfig,
    ) -> Result<Self> {
        let peer = resolve_inbound_identity(headers, raw_remote, identity)?;

        Ok(Self::new(stream, local, peer))
    }

    /// The resolved peer identity
    pub fn peer(&self) -> Address {
        self.peer
    }

    async fn recv_inner(&self, buf: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.lock().await;

        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    let data = text.as_bytes();
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);

                    return Ok(n);
                }
                Some(Ok(Message::Binary(_))) => {
                    return Err(Error::Protocol(
                        "invalid websocket message type, text frame required".into(),
                    ))
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionClosed),
                Some(Ok(Message::Frame(_))) => {
                    return Err(Error::Protocol("unexpected raw websocket frame".into()))
                }
                Some(Err(e)) => return Err(Error::Transport(format!("websocket read failed: {}", e))),
            }
        }
    }

    async fn send_inner(&self, buf: &[u8]) -> Result<usize> {
        // One message per frame; the payload must survive text framing
        let text = std::str::from_utf8(buf)
            .map_err(|_| Error::Protocol("payload is not valid text for text framing".into()))?;

        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| Error::Transport(format!("websocket write failed: {}", e)))?;

        Ok(buf.len())
    }
}

#[async_trait]
impl Conn for WsConnAdapter {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let limit = *self.read_timeout.lock();

        maybe_timeout(limit, self.recv_inner(buf)).await
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let limit = *self.write_timeout.lock();

        maybe_timeout(limit, self.send_inner(buf)).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let n = self.recv(buf).await?;

        Ok((n, self.peer))
    }

    fn local_addr(&self) -> Option<Address> {
        self.local.map(Address::Stream)
    }

    fn remote_addr(&self) -> Option<Address> {
        Some(self.peer)
    }

    fn set_read_timeout(&self, limit: Option<Duration>) {
        *self.read_timeout.lock() = limit;
    }

    fn set_write_timeout(&self, limit: Option<Duration>) {
        *self.write_timeout.lock() = limit;
    }

    /// Deliberate no-op: the tunnel is kept warm across protocol-level
    /// closes instead of reconnecting per exchange.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn hard_close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        trace!("hard close of tunnel to {}", self.peer);
        let mut writer = self.writer.lock().await;
        // Best effort; the peer may already be gone
        let _ = writer.close().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::common::IntoStream;

    /// Adapter wired to a raw websocket peer over an in-memory pipe
    async fn adapter_pair() -> (WsConnAdapter, WsStream) {
        let (near, far) = tokio::io::duplex(64 * 1024);

        let near_ws =
            WebSocketStream::from_raw_socket(near.into_stream(), Role::Server, None).await;
        let far_ws = WebSocketStream::from_raw_socket(far.into_stream(), Role::Client, None).await;

        let peer = Address::Stream("10.0.0.5:9000".parse().unwrap());
        (WsConnAdapter::new(near_ws, None, peer), far_ws)
    }

    #[tokio::test]
    async fn text_frame_round_trip() {
        let (adapter, mut far) = adapter_pair().await;

        far.send(Message::Text("heartbeat:42".into())).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = adapter.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"heartbeat:42");
        assert_eq!(from.host_key(), "10.0.0.5");
    }

    #[tokio::test]
    async fn binary_frame_is_rejected() {
        let (adapter, mut far) = adapter_pair().await;

        far.send(Message::Binary(vec![0xde, 0xad])).await.unwrap();

        let mut buf = [0u8; 64];
        assert!(matches!(adapter.recv(&mut buf).await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn ping_frames_are_transparent() {
        let (adapter, mut far) = adapter_pair().await;

        far.send(Message::Ping(vec![1])).await.unwrap();
        far.send(Message::Text("after-ping".into())).await.unwrap();

        let mut buf = [0u8; 64];
        let n = adapter.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"after-ping");
    }

    #[tokio::test]
    async fn send_frames_whole_buffer() {
        let (adapter, mut far) = adapter_pair().await;

        let n = adapter.send(b"suspect:10.0.0.7").await.unwrap();
        assert_eq!(n, 16);

        match far.next().await.unwrap().unwrap() {
            Message::Text(text) => assert_eq!(text, "suspect:10.0.0.7"),
            other => panic!("expected one text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn logical_close_keeps_tunnel_warm() {
        let (adapter, mut far) = adapter_pair().await;

        adapter.close().await.unwrap();
        adapter.close().await.unwrap();

        // Still usable after protocol-level close
        adapter.send(b"alive").await.unwrap();
        assert!(matches!(
            far.next().await.unwrap().unwrap(),
            Message::Text(t) if t == "alive"
        ));
    }

    #[tokio::test]
    async fn hard_close_is_final_and_idempotent() {
        let (adapter, _far) = adapter_pair().await;

        adapter.hard_close().await.unwrap();
        adapter.hard_close().await.unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(adapter.recv(&mut buf).await, Err(Error::ConnectionClosed)));
        assert!(matches!(adapter.send(b"x").await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn peer_close_frame_surfaces_as_closed() {
        let (adapter, mut far) = adapter_pair().await;

        far.close(None).await.unwrap();

        let mut buf = [0u8; 8];
        assert!(matches!(adapter.recv(&mut buf).await, Err(Error::ConnectionClosed)));
    }
}
