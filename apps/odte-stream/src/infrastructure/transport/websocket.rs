//! WebSocket Transport
//!
//! `tokio-tungstenite` client split into independent read and write halves.
//! Pings are answered by the library; close frames end the inbound stream.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    FrameSink, FrameSource, TransportConnector, TransportError, TransportHalves,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for `ws://` and `wss://` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<TransportHalves, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket connected");

        let (write, read) = stream.split();
        Ok((
            Box::new(WebSocketSink { write }),
            Box::new(WebSocketSource { read }),
        ))
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.write
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WebSocketSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => {
                    return Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|e| TransportError::Receive(e.to_string())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Server sent close frame");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
