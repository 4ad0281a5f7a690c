//! Byte-stream transport to the laser controller.
//!
//! The link runs over any async byte stream. In production that is a TCP
//! socket to the controller; tests use `tokio::io::duplex` pairs driven by
//! [`crate::mock::MockController`].
//!
//! # Types
//!
//! - [`Transport`]: Trait alias combining AsyncRead + AsyncWrite for link streams
//! - [`DynTransport`]: Type-erased boxed transport
//!
//! # Utilities
//!
//! - [`connect_tcp`]: Open a TCP connection bounded by a connect timeout
//! - [`close`]: Shut a transport down, ignoring a peer that is already gone

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

// =============================================================================
// Transport Trait
// =============================================================================

/// Trait alias for async link I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can carry the
/// link. This includes:
/// - `tokio::net::TcpStream` (real controller)
/// - `tokio::io::DuplexStream` (testing)
/// - Any mock implementing the async I/O traits
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Type-erased boxed transport.
pub type DynTransport = Box<dyn Transport>;

// =============================================================================
// Transport Utilities
// =============================================================================

/// Connect to `host:port` over TCP.
///
/// `TCP_NODELAY` is set because every frame is a small request that waits on
/// a reply; Nagle buffering would only add latency.
///
/// # Errors
///
/// Returns `TimedOut` if the connection is not established within `timeout`,
/// or the underlying connect error.
pub async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> std::io::Result<DynTransport> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {}:{} timed out after {:?}", host, port, timeout),
            )
        })??;
    stream.set_nodelay(true)?;
    tracing::debug!(host, port, "TCP connection established");
    Ok(Box::new(stream))
}

/// Shut the write half down and drop the transport.
///
/// A peer that already hung up is not an error here; closing is best effort.
pub async fn close(mut transport: DynTransport) {
    if let Err(e) = transport.shutdown().await {
        tracing::debug!(error = %e, "Transport shutdown reported an error (ignored)");
    }
}
