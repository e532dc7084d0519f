//! Stream-to-datagram multiplexer
//!
//! Owns the single logical "listening socket" the gossip engine holds. Every
//! registered tunnel connection gets exactly one reader task; readers fan in
//! to one delivery queue consumed by `recv_from`, so per-connection ordering
//! is preserved while nothing is guaranteed across connections. A reader
//! that hits an error reports the peer's address on the disconnect queue
//! once and terminates; it never retries.
//!
//! Closing the multiplexer stops new registrations and cascades: reader
//! tasks are cancelled and every registered connection is hard-closed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use async_trait::async_trait;

use crate::common::{Address, Conn, Result, MAX_DATAGRAM_SIZE};
use crate::error::Error;

const REGISTRATION_BACKLOG: usize = 16;
const DELIVERY_BACKLOG: usize = 64;
const DISCONNECT_BACKLOG: usize = 16;

/// One payload delivered by a reader task
struct Delivery {
    payload: Vec<u8>,
    from: Address,
}

/// Receive-multiplexing connection over many tunnel connections
///
/// Direct `recv`/`send` are unsupported by design: the engine performs
/// point-to-point I/O only on dialed connections, never on the listening
/// socket.
pub struct MuxConn {
    laddr: Address,
    conn_tx: mpsc::Sender<Arc<dyn Conn>>,
    delivery_rx: AsyncMutex<mpsc::Receiver<Delivery>>,
    shutdown: watch::Sender<bool>,
}

impl MuxConn {
    /// Create the multiplexer and its control loop. The returned receiver
    /// reports the address of every connection whose reader died, exactly
    /// once per connection.
    pub fn new(laddr: Address) -> (Arc<Self>, mpsc::Receiver<Address>) {
        let (conn_tx, conn_rx) = mpsc::channel(REGISTRATION_BACKLOG);
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_BACKLOG);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(DISCONNECT_BACKLOG);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mux = Arc::new(Self {
            laddr,
            conn_tx,
            delivery_rx: AsyncMutex::new(delivery_rx),
            shutdown,
        });

        tokio::spawn(control_loop(conn_rx, delivery_tx, disconnect_tx, shutdown_rx));

        (mux, disconnect_rx)
    }

    /// Register a connection; the control loop spawns its reader task.
    pub async fn register(&self, conn: Arc<dyn Conn>) -> Result<()> {
        self.conn_tx
            .send(conn)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

async fn control_loop(
    mut conn_rx: mpsc::Receiver<Arc<dyn Conn>>,
    delivery_tx: mpsc::Sender<Delivery>,
    disconnect_tx: mpsc::Sender<Address>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut registered: Vec<Arc<dyn Conn>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            maybe = conn_rx.recv() => match maybe {
                Some(conn) => {
                    trace!("multiplexer registered connection to {:?}", conn.remote_addr());
                    tokio::spawn(reader_task(
                        conn.clone(),
                        delivery_tx.clone(),
                        disconnect_tx.clone(),
                        shutdown_rx.clone(),
                    ));
                    registered.push(conn);
                }
                None => break,
            },
        }
    }

    // Registrations still buffered in the channel when shutdown fired must
    // join the cascade too
    while let Ok(conn) = conn_rx.try_recv() {
        registered.push(conn);
    }

    // Cascade shutdown to every live connection
    debug!("multiplexer closing, tearing down {} connections", registered.len());
    for conn in registered {
        let _ = conn.hard_close().await;
    }
}

/// Runs until the first read error or shutdown; one task per connection.
async fn reader_task(
    conn: Arc<dyn Conn>,
    delivery_tx: mpsc::Sender<Delivery>,
    disconnect_tx: mpsc::Sender<Address>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return,
            result = conn.recv_from(&mut buf) => match result {
                Ok((n, from)) => {
                    let delivery = Delivery {
                        payload: buf[..n].to_vec(),
                        from,
                    };
                    if delivery_tx.send(delivery).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("reader for {:?} stopped: {}", conn.remote_addr(), e);
                    if let Some(addr) = conn.remote_addr() {
                        let _ = disconnect_tx.send(addr).await;
                    }

                    return;
                }
            },
        }
    }
}

#[async_trait]
impl Conn for MuxConn {
    async fn recv(&self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Unsupported(
            "multiplexer is receive-only, use recv_from".into(),
        ))
    }

    async fn send(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Unsupported(
            "multiplexer is receive-only, dial the peer instead".into(),
        ))
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, Address)> {
        let delivery = self
            .delivery_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::ConnectionClosed)?;

        let n = delivery.payload.len().min(buf.len());
        buf[..n].copy_from_slice(&delivery.payload[..n]);
        trace!("delivered {} bytes from {}", n, delivery.from);

        Ok((n, delivery.from))
    }

    fn local_addr(&self) -> Option<Address> {
        Some(self.laddr)
    }

    fn remote_addr(&self) -> Option<Address> {
        None
    }

    /// Deadlines do not propagate through the fan-in path; the engine blocks
    /// exactly as it would on a native datagram socket.
    fn set_read_timeout(&self, _limit: Option<std::time::Duration>) {}

    fn set_write_timeout(&self, _limit: Option<std::time::Duration>) {}

    async fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);

        Ok(())
    }

    async fn hard_close(&self) -> Result<()> {
        self.close().await
    }
}
