//! End-to-end loopback tests: a real client against a real server loop,
//! joined by an in-memory channel transport.

use async_trait::async_trait;
use palaver::registry::ToolHandler;
use palaver::{
    CallToolResult, CapabilityRegistry, McpClient, McpServer, ServerConfig, Tool, Transport,
    TransportError, TransportState,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One end of an in-memory duplex frame pipe.
struct PipeTransport {
    state: TransportState,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

fn pipe() -> (PipeTransport, PipeTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        PipeTransport {
            state: TransportState::Disconnected,
            tx: a_tx,
            rx: b_rx,
        },
        PipeTransport {
            state: TransportState::Disconnected,
            tx: b_tx,
            rx: a_rx,
        },
    )
}

#[async_trait]
impl Transport for PipeTransport {
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
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.state = TransportState::Closed;
                Err(TransportError::Closed)
            }
        }
    }

    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.tx
            .send(frame.to_string())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state = TransportState::Closed;
        Ok(())
    }
}

fn registry_with_tools(names: &[&str], page_limit: usize) -> Arc<CapabilityRegistry> {
    let registry = Arc::new(CapabilityRegistry::with_page_limit(page_limit));
    for name in names {
        let reply = name.to_string();
        let handler: ToolHandler = Arc::new(move |_args| {
            let reply = reply.clone();
            Box::pin(async move { Ok(CallToolResult::text(reply)) })
        });
        registry.register_tool(Tool::new(*name, format!("{} tool", name)), handler);
    }
    registry
}

#[tokio::test]
async fn initialize_then_list_tools_across_pages() {
    let (server_end, client_end) = pipe();

    let registry = registry_with_tools(&["alpha", "beta", "gamma"], 2);
    let mut server = McpServer::new(server_end, registry, ServerConfig::new("loopback", "0.1.0"));
    let server_task = tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut client = McpClient::new(client_end);
    let init = client.initialize().await.expect("handshake");
    assert_eq!(init.server_info.name, "loopback");

    // Page limit 2 forces two pages; the client must see registration order.
    let tools = client.list_tools().await.expect("list");
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    drop(client);
    server_task.await.unwrap();
}

#[tokio::test]
async fn call_tool_roundtrip() {
    let (server_end, client_end) = pipe();

    let registry = registry_with_tools(&["greet"], 50);
    let mut server = McpServer::new(server_end, registry, ServerConfig::new("loopback", "0.1.0"));
    let server_task = tokio::spawn(async move {
        let _ = server.run().await;
    });

    let mut client = McpClient::new(client_end);
    client.initialize().await.expect("handshake");

    let content = client.call_tool("greet", None).await.expect("call");
    assert_eq!(content[0].as_text(), Some("greet"));

    drop(client);
    server_task.await.unwrap();
}

#[tokio::test]
async fn batch_with_notification_gets_ordered_batch_reply() {
    let (server_end, mut client_end) = pipe();

    let registry = registry_with_tools(&[], 50);
    let mut server = McpServer::new(server_end, registry, ServerConfig::new("loopback", "0.1.0"));
    let server_task = tokio::spawn(async move {
        let _ = server.run().await;
    });

    client_end.connect().await.unwrap();
    client_end
        .send(r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notifications/initialized"},{"jsonrpc":"2.0","id":2,"method":"ping"}]"#)
        .await
        .unwrap();

    // Poll for the batch reply.
    let frame = loop {
        match client_end.receive().await {
            Ok(Some(frame)) => break frame,
            Ok(None) => tokio::time::sleep(std::time::Duration::from_millis(2)).await,
            Err(e) => panic!("transport closed early: {}", e),
        }
    };

    let reply: serde_json::Value = serde_json::from_str(&frame).unwrap();
    let batch = reply.as_array().expect("batch reply");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0]["id"], 1);
    assert_eq!(batch[0]["result"], serde_json::json!({}));
    assert_eq!(batch[1]["id"], 2);

    drop(client_end);
    server_task.await.unwrap();
}
