//! Common types and abstractions
//!
//! This module defines the core types used throughout the crate:
//! - Address: network address representation for every carrier kind
//! - Conn: unified connection capability (byte-stream + datagram reads)
//! - Stream: unified async I/O abstraction for tunnel carriers

mod address;
pub(crate) mod conn;
mod stream;

pub use address::{split_host_port, Address};
pub use conn::{Conn, MAX_DATAGRAM_SIZE};
pub use stream::{IntoStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
