//! Websocket gossip transport
//!
//! Bridges the connection-oriented, message-framed websocket carrier to the
//! datagram socket model the gossip engine expects. Composition:
//!
//! ```text
//! inbound:  accept → upgrade → identity resolved → cache dedup
//!             → adapter registered with multiplexer → engine recv_from
//! outbound: dial → cache check → connect-or-reuse → cache insert
//!             → register → point-to-point conn returned to the engine
//! ```
//!
//! The engine sees only two outcomes from this layer: a payload with a
//! sender identity, or a receive error tied to one peer's address.

mod adapter;
mod cache;
mod identity;
mod mux;

pub use adapter::{WsConnAdapter, WsStream};
pub use cache::{CacheInsert, ConnStore};
pub use identity::{local_ipv4, resolve_inbound_identity, FORWARDED_IDENTITY_HEADER};
pub use mux::MuxConn;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as TungsteniteConfig;
use tokio_tungstenite::{accept_hdr_async_with_config, client_async_with_config};
use tracing::{debug, warn};

use crate::common::{Address, Conn, IntoStream, Result, Stream};
use crate::config::WsConfig;
use crate::error::Error;

use super::Transport;

const REGISTRATION_BACKLOG: usize = 16;

/// Websocket tunnel transport
///
/// Owns its connection cache and registration channel; no process-wide
/// singletons. Construct once, wrap in an [`Arc`], hold for the process
/// lifetime.
pub struct WsTransport {
    config: WsConfig,
    cache: Arc<ConnStore>,
    conn_tx: mpsc::Sender<Arc<dyn Conn>>,
    conn_rx: parking_lot::Mutex<Option<mpsc::Receiver<Arc<dyn Conn>>>>,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        let (conn_tx, conn_rx) = mpsc::channel(REGISTRATION_BACKLOG);

        Self {
            cache: Arc::new(ConnStore::new(config.cache.max_entries)),
            config,
            conn_tx,
            conn_rx: parking_lot::Mutex::new(Some(conn_rx)),
        }
    }

    /// Number of live cached tunnels
    pub fn cached_connections(&self) -> usize {
        self.cache.len()
    }

    fn frame_limits(&self) -> TungsteniteConfig {
        TungsteniteConfig {
            max_message_size: Some(self.config.max_message_bytes),
            max_frame_size: Some(self.config.max_message_bytes),
            ..Default::default()
        }
    }

    /// Accept loop: converts upgrade events into multiplexer registrations.
    /// A failed upgrade aborts only that request; the listener keeps running.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let transport = Arc::clone(&self);

            tokio::spawn(async move {
                if let Err(e) = transport.upgrade(stream).await {
                    warn!("websocket upgrade from {} failed: {}", peer, e);
                }
            });
        }
    }

    /// Upgrade one inbound TCP connection to a gossip tunnel.
    pub async fn upgrade(&self, stream: TcpStream) -> Result<()> {
        let local = stream.local_addr().ok();
        let raw_remote = stream.peer_addr()?;

        self.upgrade_stream(stream.into_stream(), local, raw_remote).await
    }

    /// Carrier-agnostic upgrade entry point: performs the websocket server
    /// handshake on `stream` (rejecting wrong endpoint paths), resolves the
    /// peer identity, dedups against the cache and registers the adapter.
    pub async fn upgrade_stream(
        &self,
        stream: Stream,
        local: Option<SocketAddr>,
        raw_remote: SocketAddr,
    ) -> Result<()> {
        let captured: Arc<parking_lot::Mutex<Option<HeaderMap>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let captured_cb = Arc::clone(&captured);
        let expected_path = self.config.route_path.clone();

        let callback = move |req: &Request, response: Response| {
            if req.uri().path() != expected_path {
                let mut not_found = ErrorResponse::new(None);
                *not_found.status_mut() = StatusCode::NOT_FOUND;

                return Err(not_found);
            }
            *captured_cb.lock() = Some(req.headers().clone());

            Ok(response)
        };

        let ws = accept_hdr_async_with_config(stream, callback, Some(self.frame_limits()))
            .await
            .map_err(|e| Error::Protocol(format!("websocket handshake failed: {}", e)))?;

        let headers = captured.lock().take();
        let adapter = Arc::new(WsConnAdapter::from_upgrade(
            ws,
            local,
            raw_remote,
            headers.as_ref(),
            &self.config.identity,
        )?);
        let peer = adapter.peer();
        let adapter: Arc<dyn Conn> = adapter;

        match self.cache.insert_or_get(&peer, adapter.clone())? {
            CacheInsert::Inserted { evicted } => {
                if let Some(old) = evicted {
                    let _ = old.hard_close().await;
                }
                debug!("accepted gossip tunnel from {}", peer);

                self.conn_tx
                    .send(adapter)
                    .await
                    .map_err(|_| Error::ConnectionClosed)
            }
            CacheInsert::Existing(_) => {
                debug!("peer {} already connected, dropping duplicate upgrade", peer);
                let _ = adapter.hard_close().await;

                Ok(())
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn listen(&self, _network: &str, addr: &Address) -> Result<Arc<dyn Conn>> {
        warn!("using websocket transport; multicast and direct sends on the listening socket are unavailable");

        let conn_rx = self
            .conn_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Transport("listen already called on this transport".into()))?;

        let (mux, mut disconnect_rx) = MuxConn::new(*addr);

        // Registration pump: accepted and dialed tunnels flow into the
        // multiplexer's control loop.
        let pump_mux = Arc::clone(&mux);
        tokio::spawn(async move {
            let mut conn_rx = conn_rx;
            while let Some(conn) = conn_rx.recv().await {
                if pump_mux.register(conn).await.is_err() {
                    break;
                }
            }
        });

        // Disconnect monitor: a dead reader drives cache eviction paired
        // with exactly one physical close.
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            while let Some(addr) = disconnect_rx.recv().await {
                if let Some(conn) = cache.remove(&addr) {
                    let _ = conn.hard_close().await;
                    debug!("closed dead tunnel to {}", addr);
                }
            }
        });

        let sock: Arc<dyn Conn> = mux;

        Ok(sock)
    }

    async fn dial(&self, _laddr: Option<&Address>, raddr: &Address) -> Result<Arc<dyn Conn>> {
        if let Some(cached) = self.cache.get(raddr)? {
            return Ok(cached);
        }

        // Deployments may run the gossip tunnel on a port separate from the
        // peer's advertised address.
        let port = self.config.remote_server_port.unwrap_or_else(|| raddr.port());
        let target = SocketAddr::new(raddr.ip(), port);

        let stream = TcpStream::connect(target).await?;
        let local = stream.local_addr().ok();
        let peer = Address::Stream(stream.peer_addr()?);

        let host = target.to_string();
        let mut request = Request::builder()
            .uri(format!("ws://{}{}", host, self.config.route_path))
            .header("Host", &host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key());

        if self.config.identity.advertise {
            if let Some(ip) = local_ipv4() {
                request = request.header(FORWARDED_IDENTITY_HEADER, ip.to_string());
            }
        }

        let request = request
            .body(())
            .map_err(|e| Error::Protocol(format!("failed to build upgrade request: {}", e)))?;

        let (ws, _response) =
            client_async_with_config(request, stream.into_stream(), Some(self.frame_limits()))
                .await
                .map_err(|e| Error::Protocol(format!("websocket handshake failed: {}", e)))?;

        let adapter: Arc<dyn Conn> = Arc::new(WsConnAdapter::new(ws, local, peer));

        match self.cache.insert_or_get(&peer, adapter.clone())? {
            CacheInsert::Inserted { evicted } => {
                if let Some(old) = evicted {
                    let _ = old.hard_close().await;
                }
                debug!("dialed gossip tunnel to {}", peer);

                self.conn_tx
                    .send(adapter.clone())
                    .await
                    .map_err(|_| Error::ConnectionClosed)?;

                Ok(adapter)
            }
            // A concurrent dial won the insert; drop our redundant tunnel.
            CacheInsert::Existing(existing) => {
                let _ = adapter.hard_close().await;

                Ok(existing)
            }
        }
    }

    async fn resolve_addr(&self, _network: &str, addr: &str) -> Result<Address> {
        let resolved = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("no addresses for {}", addr)))?;

        Ok(Address::Stream(resolved))
    }

    fn allow_multicast(&self) -> bool {
        false
    }

    fn network_name(&self) -> &'static str {
        "tcp"
    }
}
