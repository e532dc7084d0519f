//! Swimlane - pluggable transports for SWIM-style gossip
//!
//! A SWIM gossip engine assumes a connectionless, "receive from any peer"
//! datagram socket. Swimlane lets such an engine run unmodified over
//! heterogeneous carriers by bridging connection-oriented, message-framed
//! tunnels (websockets) to that datagram model.
//!
//! # Architecture
//!
//! ```text
//! gossip engine
//! → Transport (Listen / Dial / ResolveAddr)
//! → Conn (recv_from / send)
//! ├── udp:  native datagram socket, passed through
//! └── ws:   tunnels × N → connection cache → fan-in multiplexer
//! ```
//!
//! ## Core principles
//!
//! - The engine holds exactly one listening [`Conn`] and treats it as a
//!   socket; carrier differences never leak through it
//! - Peer identity is host-scoped: one cached tunnel per host, reused by
//!   dials and recognized on inbound accepts
//! - Tunnels stay warm: protocol-level close is a no-op, teardown happens
//!   only on read failure or explicit shutdown
//!
//! ## Module structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Address, Conn, Stream
//! ├── transport/       # Carrier capabilities: udp, ws
//! ├── config.rs        # Operational knobs + broadcast sizing
//! └── error.rs         # Unified error types
//! ```

// Core types
pub mod common;
pub mod error;

// Carrier implementations
pub mod transport;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use common::{split_host_port, Address, Conn, Stream, MAX_DATAGRAM_SIZE};
pub use config::{max_broadcast_bytes, WsConfig};
pub use error::{Error, Result};
pub use transport::{Transport, UdpTransport, WsTransport};
