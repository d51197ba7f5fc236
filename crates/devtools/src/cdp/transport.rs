//! Transport - the duplex pipe under a session
//!
//! Split into two halves on purpose:
//! - `FrameSink`: owned by exactly one writer task, so frames never interleave.
//! - `FrameStream`: drained by exactly one reader task, in arrival order.
//!
//! The stream ending, or yielding an error, is the close notification.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

/// Inbound text frames
pub type FrameStream = BoxStream<'static, Result<String, TransportError>>;

/// Outbound half. Whole frames only.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A connected transport, ready to hand to [`crate::cdp::CDPClient::start`].
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub inbound: FrameStream,
}

impl Transport {
    pub fn new(sink: impl FrameSink, inbound: FrameStream) -> Self {
        Self {
            sink: Box::new(sink),
            inbound,
        }
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Write half of a WebSocket connection
pub struct WebSocketSink {
    inner: WsSink,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(&mut self.inner).await?;
        Ok(())
    }
}

/// WebSocket transport (the usual DevTools endpoint)
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Connect to a `ws://` or `wss://` endpoint.
    pub async fn connect(ws_url: &str) -> Result<Transport, TransportError> {
        let url = url::Url::parse(ws_url)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {}", ws_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidEndpoint(format!(
                "{}: expected ws or wss scheme",
                ws_url
            )));
        }

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (sink, stream) = ws_stream.split();
        tracing::debug!("WebSocket connected to {}", url);

        let inbound = stream
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Some(Ok(text)),
                        Err(_) => {
                            tracing::warn!("Dropping non-UTF-8 binary frame");
                            None
                        }
                    },
                    Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into())),
                }
            })
            .boxed();

        Ok(Transport::new(WebSocketSink { inner: sink }, inbound))
    }
}

/// Write half of an in-process transport
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// In-process transport. The other end is a [`RemoteEnd`].
pub struct MemoryTransport;

impl MemoryTransport {
    pub fn pair() -> (Transport, RemoteEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        let inbound = futures_util::stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|text| (Ok(text), rx))
        })
        .boxed();

        let transport = Transport::new(MemorySink { tx: Some(out_tx) }, inbound);
        let remote = RemoteEnd {
            outbound: out_rx,
            inbound: Some(in_tx),
        };
        (transport, remote)
    }
}

/// The far side of a [`MemoryTransport`]: sees what the client wrote,
/// delivers what the client reads.
pub struct RemoteEnd {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<String>>,
}

impl RemoteEnd {
    /// Next frame the client wrote, as text. `None` once the sink is closed.
    pub async fn next_text(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next frame the client wrote, parsed.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = self.next_text().await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Client wrote invalid JSON: {}", e);
                None
            }
        }
    }

    /// Push a frame to the client. Returns false once hung up.
    pub fn deliver(&self, text: impl Into<String>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn deliver_json(&self, frame: &Value) -> bool {
        self.deliver(frame.to_string())
    }

    /// End the inbound stream, as if the remote closed the socket.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_pair_carries_both_directions() {
        let (mut transport, mut remote) = MemoryTransport::pair();

        transport
            .sink
            .send_frame(r#"{"id":1,"method":"Page.enable","params":{}}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            remote.next_frame().await,
            Some(json!({"id": 1, "method": "Page.enable", "params": {}}))
        );

        assert!(remote.deliver_json(&json!({"id": 1, "result": {}})));
        let text = transport.inbound.next().await.unwrap().unwrap();
        assert_eq!(text, r#"{"id":1,"result":{}}"#);

        remote.hang_up();
        assert!(transport.inbound.next().await.is_none());
        assert!(!remote.deliver("late"));
    }

    #[tokio::test]
    async fn closed_memory_sink_rejects_writes() {
        let (mut transport, mut remote) = MemoryTransport::pair();
        transport.sink.close().await.unwrap();

        let err = transport.sink.send_frame("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(remote.next_text().await.is_none());
    }

    #[tokio::test]
    async fn rejects_non_websocket_endpoints() {
        for bad in ["http://localhost:9222", "not a url"] {
            match WebSocketTransport::connect(bad).await {
                Err(TransportError::InvalidEndpoint(_)) => {}
                Err(e) => panic!("unexpected error for {}: {}", bad, e),
                Ok(_) => panic!("{} should be rejected", bad),
            }
        }
    }

    #[tokio::test]
    #[ignore] // Needs running Chrome
    async fn connects_to_local_chrome() {
        let transport = WebSocketTransport::connect("ws://localhost:9222/devtools/browser")
            .await
            .unwrap();
        drop(transport);
    }
}
