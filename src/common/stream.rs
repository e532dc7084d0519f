//! Stream abstraction
//!
//! Unified stream type for tunnel carriers. The websocket layer operates on
//! this alias so that TCP sockets, TLS-wrapped sockets and in-memory duplex
//! pipes (in tests) all fit the same handshake entry points.

use tokio::io::{AsyncRead, AsyncWrite};

/// The unified carrier stream type.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Trait for types that can be converted into a Stream
pub trait IntoStream {
    fn into_stream(self) -> Stream;
}

impl<T> IntoStream for T
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_stream(self) -> Stream {
        Box::new(self)
    }
}
