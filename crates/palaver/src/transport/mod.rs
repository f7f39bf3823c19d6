//! Transports
//!
//! Byte-frame delivery underneath the JSON-RPC layer. Three variants share
//! one contract:
//!
//! - `stdio` - newline-delimited JSON on stdin/stdout
//! - `streamable` - Streamable HTTP (POST request/response + SSE push)
//! - `sse` - legacy SSE pair (GET /sse + POST /message)

pub mod sse;
pub mod stdio;
pub mod streamable;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use streamable::{StreamableHttpTransport, StreamableHttpConfig};

use async_trait::async_trait;

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Errors surfaced by transports.
///
/// Any I/O failure moves the transport to `Closed`; the server loop logs
/// the error and exits its receive cycle.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Underlying I/O failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport is closed (EOF or explicit close).
    #[error("transport is closed")]
    Closed,

    /// The peer violated the framing rules.
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// A bidirectional frame transport.
///
/// `receive` polls: `Ok(None)` means no frame is ready right now and the
/// caller should come back later; it never blocks indefinitely.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> TransportState;

    /// True while frames can still flow.
    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }

    /// Poll for the next inbound frame.
    async fn receive(&mut self) -> Result<Option<String>, TransportError>;

    /// Send one outbound frame.
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}
