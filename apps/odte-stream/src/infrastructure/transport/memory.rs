//! In-Memory Transport
//!
//! Scripted transport for tests and dry runs. Every connection becomes a
//! `MemoryLink` that records outbound frames and lets the caller inject
//! inbound frames or failures. LOGIN requests are answered automatically
//! with a configurable code unless the connector is silent.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::application::ports::{
    FrameSink, FrameSource, TransportConnector, TransportError, TransportHalves,
};

type Inbound = Result<String, TransportError>;

/// How the connector answers LOGIN.
#[derive(Debug, Clone)]
enum LoginReply {
    Code { code: i64, msg: String },
    Silent,
}

/// One in-memory connection.
#[derive(Debug)]
pub struct MemoryLink {
    sent: Mutex<Vec<String>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Inbound>>>,
}

impl MemoryLink {
    /// Outbound requests, flattened across frames.
    #[must_use]
    pub fn requests(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter_map(|frame| frame.get("requests").and_then(Value::as_array).cloned())
            .flatten()
            .collect()
    }

    /// Outbound commands in send order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.get("command").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Symbols named by each request with `command`, one list per request.
    #[must_use]
    pub fn keys_for(&self, command: &str) -> Vec<Vec<String>> {
        self.requests()
            .iter()
            .filter(|r| r.get("command").and_then(Value::as_str) == Some(command))
            .map(|r| {
                r.pointer("/parameters/keys")
                    .and_then(Value::as_str)
                    .map(|keys| keys.split(',').map(str::to_string).collect())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Deliver an inbound text frame.
    pub fn inject(&self, text: impl Into<String>) {
        self.push(Ok(text.into()));
    }

    /// Deliver a read error and end the stream.
    pub fn fail(&self, reason: impl Into<String>) {
        self.push(Err(TransportError::Receive(reason.into())));
        self.disconnect();
    }

    /// End the inbound stream as if the peer closed.
    pub fn disconnect(&self) {
        self.inbound.lock().take();
    }

    /// Whether the inbound stream is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inbound.lock().is_some()
    }

    fn push(&self, item: Inbound) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(item);
        }
    }
}

#[derive(Debug)]
struct ConnectorState {
    links: Vec<Arc<MemoryLink>>,
    failing_connects: usize,
}

/// Connector producing in-memory links.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    login: LoginReply,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// Connector that accepts every LOGIN.
    #[must_use]
    pub fn new() -> Self {
        Self::with_login_code(0, "server=memory;status=PN")
    }

    /// Connector that answers LOGIN with `code` and `msg`.
    #[must_use]
    pub fn with_login_code(code: i64, msg: impl Into<String>) -> Self {
        Self::build(LoginReply::Code {
            code,
            msg: msg.into(),
        })
    }

    /// Connector that never answers LOGIN.
    #[must_use]
    pub fn silent() -> Self {
        Self::build(LoginReply::Silent)
    }

    fn build(login: LoginReply) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                links: Vec::new(),
                failing_connects: 0,
            })),
            login,
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failing_connects = count;
    }

    /// Link by open order.
    #[must_use]
    pub fn link(&self, index: usize) -> Option<Arc<MemoryLink>> {
        self.state.lock().links.get(index).cloned()
    }

    /// Number of links opened.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.state.lock().links.len()
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<TransportHalves, TransportError> {
        let (link, rx) = {
            let mut state = self.state.lock();
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::Connect(format!("refused: {url}")));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let link = Arc::new(MemoryLink {
                sent: Mutex::new(Vec::new()),
                inbound: Mutex::new(Some(tx)),
            });
            state.links.push(Arc::clone(&link));
            (link, rx)
        };

        Ok((
            Box::new(MemorySink {
                link,
                login: self.login.clone(),
                closed: false,
            }),
            Box::new(MemorySource { rx }),
        ))
    }
}

struct MemorySink {
    link: Arc<MemoryLink>,
    login: LoginReply,
    closed: bool,
}

impl MemorySink {
    fn reply_to_login(&self, text: &str) {
        let LoginReply::Code { code, msg } = &self.login else {
            return;
        };
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let Some(requests) = frame.get("requests").and_then(Value::as_array) else {
            return;
        };

        for request in requests {
            if request.get("command").and_then(Value::as_str) == Some("LOGIN") {
                let requestid = request.get("requestid").cloned().unwrap_or(Value::Null);
                let response = serde_json::json!({
                    "response": [{
                        "service": "ADMIN",
                        "command": "LOGIN",
                        "requestid": requestid,
                        "content": { "code": code, "msg": msg },
                    }]
                });
                self.link.inject(response.to_string());
            }
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Send("link closed".to_string()));
        }
        self.reply_to_login(&text);
        self.link.sent.lock().push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.link.disconnect();
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}
