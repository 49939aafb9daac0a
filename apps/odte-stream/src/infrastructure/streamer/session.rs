//! Streaming Session
//!
//! One live duplex connection to the venue streamer. A session is opened
//! once, subscribes and unsubscribes while it is healthy, and is closed and
//! discarded when it faults. It never reconnects on its own; that is the
//! supervisor's job.
//!
//! # States
//!
//! ```text
//! Disconnected ──open──► Authenticating ──LOGIN ok──► Subscribed ──close──► Draining ──► Closed
//!       │                      │                          │
//!       └──────────────────────┴──────────── fault ───────┴──► Faulted ──close──► Closed
//! ```
//!
//! # Tasks
//!
//! While subscribed the session runs three tasks:
//!
//! - **writer**: owns the outbound half; every write goes through its queue
//!   and is acknowledged to the caller once sent
//! - **reader**: owns the inbound half; decodes frames and offers quotes to
//!   the ingestor without waiting
//! - **keep-alive**: QOS on an interval and read-inactivity detection
//!
//! Any task failure trips the session's fault signal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, StreamCodec, StreamEvent};
use super::keepalive::{ActivityState, KeepaliveConfig, KeepaliveManager};
use super::messages::{Command, StreamRequest, StreamRequests};
use crate::application::ports::{
    FrameSink, FrameSource, StreamerCredentials, TransportConnector, TransportError,
    UpstreamError,
};
use crate::application::services::{IngestSender, Offer};
use crate::domain::subscription::{SubscriptionDiff, SubscriptionState};
use crate::infrastructure::metrics::{self, DropReason};

/// Outbound queue depth.
const WRITER_QUEUE: usize = 64;

/// Grace period for tasks to stop during close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport failure.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// LOGIN was rejected by the server.
    #[error("login rejected (code {code}): {reason}")]
    LoginRejected {
        /// Server code.
        code: i64,
        /// Server message.
        reason: String,
    },

    /// Unexpected or undecodable frame during a protocol exchange.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Codec failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A phase did not complete in time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Operation not valid in the current state.
    #[error("invalid session state for {operation}: {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time.
        state: String,
    },

    /// Session faulted.
    #[error("session faulted: {0}")]
    Faulted(String),

    /// Token or streamer endpoint lookup failed.
    #[error("upstream unavailable: {0}")]
    Upstream(#[from] UpstreamError),
}

// =============================================================================
// State
// =============================================================================

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet opened.
    Disconnected,
    /// Transport open, LOGIN in flight.
    Authenticating,
    /// Logged in and accepting subscription changes.
    Subscribed,
    /// Shutting down.
    Draining,
    /// Released.
    Closed,
    /// Failed; must be closed and replaced.
    Faulted {
        /// Failure description.
        reason: String,
    },
}

impl SessionState {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Faulted { .. } => "faulted",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Faulted { reason } => write!(f, "faulted ({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Shared state cell plus the fault token that tasks trip.
#[derive(Debug, Clone)]
pub struct FaultSignal {
    state: Arc<RwLock<SessionState>>,
    token: CancellationToken,
}

impl FaultSignal {
    fn new(state: Arc<RwLock<SessionState>>) -> Self {
        Self {
            state,
            token: CancellationToken::new(),
        }
    }

    /// Move the session to `Faulted` unless it is already draining or
    /// closed. Only the first fault is recorded.
    pub fn trip(&self, phase: &'static str, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut state = self.state.write();
            if matches!(
                *state,
                SessionState::Draining | SessionState::Closed | SessionState::Faulted { .. }
            ) {
                return;
            }
            *state = SessionState::Faulted {
                reason: reason.clone(),
            };
        }
        tracing::warn!(phase, %reason, "Session faulted");
        metrics::record_session_fault(phase);
        self.token.cancel();
    }

    /// Whether a fault has been recorded.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token cancelled when the session faults.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

// =============================================================================
// Writer
// =============================================================================

struct WriteRequest {
    text: String,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

/// Handle for queueing writes to the session's writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteRequest>,
    credentials: Arc<StreamerCredentials>,
    request_ids: Arc<AtomicU64>,
    codec: StreamCodec,
}

impl WriterHandle {
    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue one frame and wait until it has been written.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer has stopped or the write failed.
    pub async fn send(&self, requests: &StreamRequests) -> Result<(), SessionError> {
        let text = self.codec.encode(requests)?;
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WriteRequest { text, ack })
            .await
            .map_err(|_| SessionError::Transport(TransportError::Closed))?;
        done.await
            .map_err(|_| SessionError::Transport(TransportError::Closed))?
            .map_err(SessionError::from)
    }

    /// Queue a QOS keep-alive.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub async fn send_qos(&self, level: u8) -> Result<(), SessionError> {
        let request = StreamRequest::qos(&self.credentials, level, self.next_request_id());
        self.send(&request.into()).await
    }

    /// Queue a SUBS, ADD or UNSUBS for option symbols.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub async fn send_options(
        &self,
        command: Command,
        symbols: &[String],
    ) -> Result<(), SessionError> {
        let request =
            StreamRequest::options(command, symbols, &self.credentials, self.next_request_id());
        self.send(&request.into()).await
    }

    /// Queue a LOGOUT.
    ///
    /// # Errors
    ///
    /// Returns an error if the write failed.
    pub async fn send_logout(&self) -> Result<(), SessionError> {
        let request = StreamRequest::logout(&self.credentials, self.next_request_id());
        self.send(&request.into()).await
    }
}

async fn run_writer(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<WriteRequest>,
    write_timeout: Duration,
    fault: FaultSignal,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            request = rx.recv() => {
                let Some(WriteRequest { text, ack }) = request else {
                    break;
                };

                let result = match tokio::time::timeout(write_timeout, sink.send_text(text)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Send("write timed out".to_string())),
                };

                let failed = result.as_ref().err().map(ToString::to_string);
                let _ = ack.send(result);

                if let Some(reason) = failed {
                    fault.trip("write", reason);
                    break;
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Transport close failed");
    }
    tracing::debug!("Writer stopped");
}

// =============================================================================
// Reader
// =============================================================================

struct Reader {
    source: Box<dyn FrameSource>,
    codec: StreamCodec,
    ingest: IngestSender,
    activity: Arc<ActivityState>,
    fault: FaultSignal,
    cancel: CancellationToken,
    epoch: u64,
}

impl Reader {
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                next = self.source.next_text() => next,
            };

            match next {
                Some(Ok(text)) => {
                    self.activity.record_inbound();
                    self.dispatch(&text);
                }
                Some(Err(e)) => {
                    self.fault.trip("read", e.to_string());
                    break;
                }
                None => {
                    self.fault.trip("read", TransportError::Closed.to_string());
                    break;
                }
            }
        }
        tracing::debug!("Reader stopped");
    }

    fn dispatch(&self, text: &str) {
        let events = match self.codec.decode(text) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable frame, skipping");
                return;
            }
        };

        for event in events {
            match event {
                StreamEvent::Quotes(frames) => {
                    metrics::record_frames_received(frames.len() as u64);
                    for frame in frames {
                        if self.ingest.offer(self.epoch, frame) == Offer::Full {
                            metrics::record_frame_dropped(DropReason::ChannelFull);
                        }
                    }
                }
                StreamEvent::Response(response) => {
                    if response.content.is_success() {
                        tracing::debug!(
                            command = %response.command,
                            requestid = %response.requestid,
                            "Request acknowledged"
                        );
                    } else if is_subscription_command(&response.command) {
                        // The tracked set no longer matches what the venue streams.
                        self.fault.trip(
                            "subscribe",
                            format!(
                                "{} rejected (code {}): {}",
                                response.command, response.content.code, response.content.msg
                            ),
                        );
                    } else {
                        tracing::warn!(
                            service = %response.service,
                            command = %response.command,
                            requestid = %response.requestid,
                            code = response.content.code,
                            msg = %response.content.msg,
                            "Request rejected"
                        );
                    }
                }
                StreamEvent::Notice(content) => {
                    tracing::warn!(code = content.code, msg = %content.msg, "Server notice");
                }
                StreamEvent::Heartbeat => tracing::trace!("Heartbeat"),
                StreamEvent::OtherData { service } => {
                    tracing::trace!(%service, "Ignoring data for unused service");
                }
            }
        }
    }
}

fn is_subscription_command(command: &str) -> bool {
    [Command::Subs, Command::Add, Command::Unsubs]
        .iter()
        .any(|c| c.as_str() == command)
}

// =============================================================================
// Session
// =============================================================================

/// Timeouts and keep-alive settings for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the LOGIN response.
    pub login_timeout: Duration,
    /// Time allowed for each write.
    pub write_timeout: Duration,
    /// Keep-alive settings.
    pub keepalive: KeepaliveConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// One streaming session.
pub struct StreamSession {
    config: SessionConfig,
    epoch: u64,
    state: Arc<RwLock<SessionState>>,
    fault: FaultSignal,
    subscriptions: SubscriptionState,
    writer: Option<WriterHandle>,
    tasks_cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamSession {
    /// Create a disconnected session for an ingest epoch.
    #[must_use]
    pub fn new(config: SessionConfig, epoch: u64) -> Self {
        let state = Arc::new(RwLock::new(SessionState::Disconnected));
        Self {
            config,
            epoch,
            fault: FaultSignal::new(Arc::clone(&state)),
            state,
            subscriptions: SubscriptionState::new(),
            writer: None,
            tasks_cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Ingest epoch carried by frames from this session.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Contracts currently subscribed.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionState {
        &self.subscriptions
    }

    /// Token cancelled when the session faults.
    #[must_use]
    pub fn fault_token(&self) -> CancellationToken {
        self.fault.token()
    }

    /// Fault reason, if the session has faulted.
    #[must_use]
    pub fn fault_reason(&self) -> Option<String> {
        match &*self.state.read() {
            SessionState::Faulted { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write();
        tracing::debug!(from = %*state, to = %next, "Session state transition");
        *state = next;
    }

    /// Move to `next` only if the state is still `expected`. Session tasks
    /// may fault concurrently, and a recorded fault is never overwritten.
    fn advance(&self, expected: &SessionState, next: SessionState) -> bool {
        let mut state = self.state.write();
        if *state != *expected {
            return false;
        }
        tracing::debug!(from = %*state, to = %next, "Session state transition");
        *state = next;
        true
    }

    /// Connect, LOGIN and start the session tasks.
    ///
    /// On success the session is `Subscribed` with an empty subscription
    /// set. On failure it is `Faulted` and must be closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was already opened, the transport
    /// cannot connect, or LOGIN fails or times out.
    pub async fn open(
        &mut self,
        connector: &dyn TransportConnector,
        credentials: StreamerCredentials,
        token: &str,
        ingest: IngestSender,
    ) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Disconnected {
            return Err(SessionError::InvalidState {
                operation: "open",
                state: current.to_string(),
            });
        }

        self.set_state(SessionState::Authenticating);
        tracing::info!(url = %credentials.socket_url, "Connecting to streamer");

        match self.authenticate(connector, credentials, token, ingest).await {
            Ok(()) => {
                if self.advance(&SessionState::Authenticating, SessionState::Subscribed) {
                    tracing::info!("Streamer session authenticated");
                    Ok(())
                } else {
                    let current = self.state();
                    Err(SessionError::Faulted(
                        self.fault_reason().unwrap_or_else(|| current.to_string()),
                    ))
                }
            }
            Err(e) => {
                self.fault.trip("login", e.to_string());
                Err(e)
            }
        }
    }

    async fn authenticate(
        &mut self,
        connector: &dyn TransportConnector,
        credentials: StreamerCredentials,
        token: &str,
        ingest: IngestSender,
    ) -> Result<(), SessionError> {
        let (mut sink, mut source) =
            tokio::time::timeout(self.config.connect_timeout, connector.connect(&credentials.socket_url))
                .await
                .map_err(|_| SessionError::Timeout("connect"))??;

        let codec = StreamCodec::new();
        let request_ids = Arc::new(AtomicU64::new(0));

        let login = StreamRequest::login(
            &credentials,
            token,
            request_ids.fetch_add(1, Ordering::Relaxed),
        );
        let login_text = codec.encode(&login.into())?;

        let login_result = async {
            tokio::time::timeout(self.config.write_timeout, sink.send_text(login_text))
                .await
                .map_err(|_| SessionError::Timeout("login write"))??;

            tokio::time::timeout(
                self.config.login_timeout,
                await_login_response(source.as_mut(), codec),
            )
            .await
            .map_err(|_| SessionError::Timeout("login"))?
        }
        .await;

        if let Err(e) = login_result {
            let _ = sink.close().await;
            return Err(e);
        }

        let activity = Arc::new(ActivityState::new());
        let (tx, rx) = mpsc::channel(WRITER_QUEUE);
        let writer = WriterHandle {
            tx,
            credentials: Arc::new(credentials),
            request_ids,
            codec,
        };

        self.tasks.push(tokio::spawn(run_writer(
            sink,
            rx,
            self.config.write_timeout,
            self.fault.clone(),
            self.tasks_cancel.child_token(),
        )));

        self.tasks.push(tokio::spawn(
            Reader {
                source,
                codec,
                ingest,
                activity: Arc::clone(&activity),
                fault: self.fault.clone(),
                cancel: self.tasks_cancel.child_token(),
                epoch: self.epoch,
            }
            .run(),
        ));

        self.tasks.push(tokio::spawn(
            KeepaliveManager::new(
                self.config.keepalive,
                activity,
                writer.clone(),
                self.fault.clone(),
                self.tasks_cancel.child_token(),
            )
            .run(),
        ));

        self.writer = Some(writer);
        Ok(())
    }

    /// Apply a subscription diff: UNSUBS for removals, then SUBS (when the
    /// session holds nothing) or ADD for additions. Empty sets send nothing.
    ///
    /// After success the subscription set equals the diff's target set.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not subscribed or a write fails;
    /// the session is faulted in the latter case.
    pub async fn apply(&mut self, diff: &SubscriptionDiff) -> Result<(), SessionError> {
        let current = self.state();
        if current != SessionState::Subscribed {
            return Err(SessionError::InvalidState {
                operation: "apply",
                state: current.to_string(),
            });
        }
        let Some(writer) = self.writer.clone() else {
            return Err(SessionError::InvalidState {
                operation: "apply",
                state: "no writer".to_string(),
            });
        };

        if !diff.to_remove.is_empty() {
            let symbols = diff.remove_symbols();
            tracing::info!(count = symbols.len(), "Unsubscribing contracts");
            self.write_or_fault(&writer, Command::Unsubs, &symbols).await?;
            self.subscriptions.remove(&diff.to_remove);
        }

        if !diff.to_add.is_empty() {
            let command = if self.subscriptions.is_empty() {
                Command::Subs
            } else {
                Command::Add
            };
            let symbols = diff.add_symbols();
            tracing::info!(
                command = command.as_str(),
                count = symbols.len(),
                "Subscribing contracts"
            );
            self.write_or_fault(&writer, command, &symbols).await?;
            self.subscriptions.add(&diff.to_add);
        }

        metrics::set_subscriptions(self.subscriptions.len());
        Ok(())
    }

    async fn write_or_fault(
        &self,
        writer: &WriterHandle,
        command: Command,
        symbols: &[String],
    ) -> Result<(), SessionError> {
        if let Err(e) = writer.send_options(command, symbols).await {
            self.fault.trip("subscribe", e.to_string());
            return Err(e);
        }
        Ok(())
    }

    /// Release the session. Subscribed sessions drain (best-effort LOGOUT)
    /// first; faulted sessions go straight to `Closed`. Idempotent.
    pub async fn close(&mut self) {
        let current = self.state();
        match current {
            SessionState::Closed => return,
            SessionState::Subscribed
                if self.advance(&SessionState::Subscribed, SessionState::Draining) =>
            {
                if let Some(writer) = &self.writer {
                    match tokio::time::timeout(self.config.write_timeout, writer.send_logout()).await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!(error = %e, "Logout not sent"),
                        Err(_) => tracing::debug!("Logout timed out"),
                    }
                }
            }
            _ => {}
        }

        self.writer = None;
        self.tasks_cancel.cancel();
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("Session task did not stop within grace period");
            }
        }

        self.subscriptions = SubscriptionState::new();
        metrics::set_subscriptions(0);
        self.set_state(SessionState::Closed);
        tracing::info!("Streamer session closed");
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.tasks_cancel.cancel();
    }
}

async fn await_login_response(
    source: &mut dyn FrameSource,
    codec: StreamCodec,
) -> Result<(), SessionError> {
    loop {
        let text = match source.next_text().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::Closed.into()),
        };

        for event in codec.decode(&text)? {
            match event {
                StreamEvent::Response(response) if response.command == Command::Login.as_str() => {
                    if response.content.is_success() {
                        return Ok(());
                    }
                    return Err(SessionError::LoginRejected {
                        code: response.content.code,
                        reason: response.content.msg,
                    });
                }
                StreamEvent::Notice(content) if !content.is_success() => {
                    return Err(SessionError::Protocol(format!(
                        "notice during login (code {}): {}",
                        content.code, content.msg
                    )));
                }
                _ => {}
            }
        }
    }
}
