//! Stdio Transport
//!
//! Newline-delimited JSON frames over any async reader/writer pair; the
//! production constructor wires the process stdin/stdout. This is the
//! transport for MCP servers running as a child process.
//!
//! Wire format: one JSON document per line, `\n` separator, UTF-8. The
//! codec emits minified documents, so serialized frames never contain an
//! embedded newline.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportState};

/// Stdio transport.
///
/// A reader task feeds inbound lines into a channel so `receive` can poll
/// without blocking the cooperative server loop.
pub struct StdioTransport<W> {
    state: TransportState,
    inbound: mpsc::UnboundedReceiver<String>,
    writer: W,
}

impl StdioTransport<tokio::io::Stdout> {
    /// Create a transport over the process stdin/stdout.
    pub fn new() -> Self {
        Self::from_parts(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for StdioTransport<tokio::io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdioTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Create a transport over an arbitrary reader/writer pair.
    ///
    /// Used by tests to drive the transport over in-memory pipes.
    pub fn from_parts<R>(reader: R, writer: W) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("stdio reader reached EOF");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdio read failed");
                        break;
                    }
                }
            }
            // Dropping tx closes the channel; receive() reports Closed once
            // the buffered frames are drained.
        });

        Self {
            state: TransportState::Disconnected,
            inbound: rx,
            writer,
        }
    }
}

#[async_trait]
impl<W> Transport for StdioTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Connected;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn receive(&mut self) -> Result<Option<String>, TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::Closed);
        }

        match self.inbound.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.state = TransportState::Closed;
                Err(TransportError::Closed)
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::Closed);
        }
        if frame.contains('\n') {
            return Err(TransportError::Protocol(
                "stdio frame contains embedded newline".to_string(),
            ));
        }

        let result: Result<(), std::io::Error> = async {
            self.writer.write_all(frame.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.state = TransportState::Closed;
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Closing;
        let _ = self.writer.shutdown().await;
        self.state = TransportState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_receive_frames_then_eof() {
        let (mut client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut transport = StdioTransport::from_parts(server_read, tokio::io::sink());
        transport.connect().await.unwrap();

        // Nothing buffered yet.
        assert_eq!(transport.receive().await.unwrap(), None);

        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\",\"params\":{}}\n")
            .await
            .unwrap();
        client.flush().await.unwrap();

        let frame = loop {
            if let Some(f) = transport.receive().await.unwrap() {
                break f;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(frame.contains("notifications/initialized"));

        // Peer hangs up; once the buffer drains, receive reports Closed.
        drop(client);
        loop {
            match transport.receive().await {
                Ok(Some(_)) => continue,
                Ok(None) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(TransportError::Closed) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (client, server) = tokio::io::duplex(4096);
        let (_client_read, client_write) = tokio::io::split(client);
        let (server_read, _server_write) = tokio::io::split(server);

        let mut transport = StdioTransport::from_parts(tokio::io::empty(), client_write);
        transport.connect().await.unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#)
            .await
            .unwrap();

        let mut lines = BufReader::new(server_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.starts_with(r#"{"jsonrpc""#));
    }

    #[tokio::test]
    async fn test_embedded_newline_rejected() {
        let mut transport = StdioTransport::from_parts(tokio::io::empty(), tokio::io::sink());
        transport.connect().await.unwrap();

        let err = transport.send("{\n}").await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
