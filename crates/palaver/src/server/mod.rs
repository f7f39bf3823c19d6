//! MCP Server Loop
//!
//! One cooperative loop per connection: receive frames, dispatch, send
//! replies, collect expired pending requests, tick the keep-alive, sleep
//! one millisecond, repeat. Closing the transport externally is the
//! cancellation signal; the loop exits at the next connectivity check.

mod processor;

pub use processor::{JsonRpcProcessor, NotificationListener, Outbound};

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec;
use crate::keepalive::{KeepAlive, PingPolicy};
use crate::pending::PendingBag;
use crate::registry::{CapabilityRegistry, ChangeEvent};
use crate::transport::{Transport, TransportError};
use crate::types::jsonrpc::{Message, Notification, Request, RequestId, Response};
use crate::types::protocol::Implementation;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name reported in the initialize handshake.
    pub name: String,
    /// Server version reported in the initialize handshake.
    pub version: String,
    /// Optional instructions for the LLM.
    pub instructions: Option<String>,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// What to do when a ping goes unanswered.
    pub ping_policy: PingPolicy,
    /// TTL for outbound requests awaiting a reply.
    pub pending_ttl: Duration,
}

impl ServerConfig {
    /// Config with the given identity and default timing.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
            ping_interval: crate::keepalive::DEFAULT_PING_INTERVAL,
            ping_policy: PingPolicy::default(),
            pending_ttl: crate::pending::DEFAULT_TTL,
        }
    }
}

/// An MCP server bound to one transport.
pub struct McpServer<T: Transport> {
    transport: T,
    processor: JsonRpcProcessor,
    registry: Arc<CapabilityRegistry>,
    pending: PendingBag,
    keepalive: KeepAlive,
    changes: mpsc::UnboundedReceiver<ChangeEvent>,
    ping_seq: i64,
    ping_failed: Arc<AtomicBool>,
}

impl<T: Transport> McpServer<T> {
    /// Create a server over a transport and capability registry.
    pub fn new(transport: T, registry: Arc<CapabilityRegistry>, config: ServerConfig) -> Self {
        let mut processor = JsonRpcProcessor::new(
            registry.clone(),
            Implementation::new(&config.name, &config.version),
        );
        if let Some(instructions) = &config.instructions {
            processor = processor.with_instructions(instructions.clone());
        }

        // Change events fire synchronously inside register/unregister; the
        // loop drains this queue into list_changed notifications.
        let (change_tx, changes) = mpsc::unbounded_channel();
        registry.subscribe(move |event| {
            let _ = change_tx.send(event);
        });

        Self {
            transport,
            processor,
            registry,
            pending: PendingBag::with_ttl(config.pending_ttl),
            keepalive: KeepAlive::with_interval(config.ping_interval)
                .with_policy(config.ping_policy),
            changes,
            ping_seq: 0,
            ping_failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The capability registry this server serves.
    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        self.registry.clone()
    }

    /// Register a listener for inbound notifications.
    pub fn on_notification(&mut self, listener: impl Fn(&Notification) + Send + Sync + 'static) {
        self.processor.on_notification(listener);
    }

    /// Run the connection loop until the transport closes.
    pub async fn run(&mut self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        self.keepalive.start();
        tracing::info!("MCP server loop started");

        let exit_error = loop {
            if !self.transport.is_connected() {
                break None;
            }

            // Drain inbound frames.
            let mut receive_failed = None;
            loop {
                match self.transport.receive().await {
                    Ok(Some(frame)) => {
                        let outbound = self.processor.process(&frame, &mut self.pending).await;
                        if let Err(e) = self.emit_all(outbound).await {
                            receive_failed = Some(e);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(TransportError::Closed) => break,
                    Err(e) => {
                        receive_failed = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = receive_failed {
                break Some(e);
            }

            // Capability changes become list_changed notifications.
            while let Ok(event) = self.changes.try_recv() {
                let frame = codec::encode(&Message::Notification(Notification::new(
                    event.method(),
                )));
                if self.transport.send(&frame).await.is_err() {
                    break;
                }
            }

            // Expire stale pending requests.
            self.pending.gc();
            if self.keepalive.policy() == PingPolicy::Strict
                && self.ping_failed.load(Ordering::SeqCst)
            {
                tracing::warn!("Unanswered ping under strict policy, closing connection");
                break None;
            }

            // Keep-alive.
            if self.keepalive.tick() {
                if let Err(e) = self.send_ping().await {
                    tracing::warn!(error = %e, "Failed to send keep-alive ping");
                }
            }

            tokio::time::sleep(Duration::from_millis(1)).await;
        };

        self.keepalive.stop();
        let _ = self.transport.close().await;
        tracing::info!("MCP server loop stopped");

        match exit_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.ping_seq += 1;
        let id = RequestId::String(format!("ping-{}", self.ping_seq));

        let failed = self.ping_failed.clone();
        self.pending.track(
            id.clone(),
            Box::new(move |event| {
                if let Err(error) = event {
                    tracing::warn!(code = error.code, "Keep-alive ping failed");
                    failed.store(true, Ordering::SeqCst);
                }
            }),
        );

        let frame = codec::encode(&Message::Request(Request::new(id, "ping")));
        self.transport.send(&frame).await
    }

    async fn emit_all(&mut self, outbound: Vec<Outbound>) -> Result<(), TransportError> {
        for item in outbound {
            match item {
                Outbound::Frame(frame) => self.transport.send(&frame).await?,
                Outbound::Stream { id, mut stream } => {
                    // One frame per item, all sharing the request id. A
                    // closed transport aborts the stream; remaining output
                    // is discarded.
                    while let Some(value) = stream.next().await {
                        let frame = codec::encode(&Message::Response(Response::success(
                            id.clone(),
                            value,
                        )));
                        self.transport.send(&frame).await?;
                    }
                }
            }
        }
        Ok(())
    }
}
