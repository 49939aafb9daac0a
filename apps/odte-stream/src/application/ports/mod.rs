//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSource`: reference price for the underlying
//! - `ContractChainSource`: venue option chain for a trading date
//! - `TokenProvider`: bearer token for venue calls
//! - `StreamerInfoProvider`: streaming endpoint and client identifiers
//! - `TransportConnector`: duplex text-frame transport, split into halves
//! - `QuoteSink`: per-strike upsert target
//! - `IngestObserver`: per-frame processing outcomes

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::contract::ContractId;
use crate::domain::quote::{DiscardReason, StrikeUpdate};

// =============================================================================
// Errors
// =============================================================================

/// Failures reading venue data or credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// No usable credential.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Request failed or returned a non-success status.
    #[error("upstream data unavailable: {0}")]
    DataUnavailable(String),

    /// Response did not have the expected shape.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

/// Failures on the streaming transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Write failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Read failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Peer closed the connection.
    #[error("connection closed")]
    Closed,
}

/// Failures writing to the quote sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// Storage backend unreachable.
    #[error("storage connection failed: {0}")]
    Connection(String),

    /// Statement failed.
    #[error("upsert failed: {0}")]
    Write(String),
}

// =============================================================================
// Market Data
// =============================================================================

/// Port for the underlying's reference price.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current reference price.
    async fn reference_price(&self) -> Result<Decimal, UpstreamError>;
}

/// Port for the venue's option chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractChainSource: Send + Sync {
    /// Contracts listed around the reference price for `as_of`, in venue
    /// order. May include other expiries.
    async fn chain(
        &self,
        reference_price: Decimal,
        as_of: NaiveDate,
    ) -> Result<Vec<ContractId>, UpstreamError>;
}

// =============================================================================
// Credentials
// =============================================================================

/// Port for the venue bearer token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token.
    async fn bearer_token(&self) -> Result<String, UpstreamError>;
}

/// Streaming endpoint and client identifiers for LOGIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerCredentials {
    /// WebSocket URL.
    pub socket_url: String,
    /// Customer identifier sent with every request.
    pub customer_id: String,
    /// Correlation identifier sent with every request.
    pub correl_id: String,
    /// Client channel for LOGIN.
    pub channel: String,
    /// Client function id for LOGIN.
    pub function_id: String,
}

/// Port for streaming connection details.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamerInfoProvider: Send + Sync {
    /// Resolve streaming credentials.
    async fn streamer_credentials(&self) -> Result<StreamerCredentials, UpstreamError>;
}

// =============================================================================
// Transport
// =============================================================================

/// Outbound half of a duplex text transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a duplex text transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame, `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// Connected transport halves.
pub type TransportHalves = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Port for opening a streaming transport.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<TransportHalves, TransportError>;
}

// =============================================================================
// Persistence
// =============================================================================

/// Port for storing normalized quotes keyed by strike.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSink: Send + Sync {
    /// Insert the strike row if new, otherwise update only the present
    /// fields of the update's side.
    async fn upsert(&self, update: &StrikeUpdate) -> Result<(), PersistenceError>;
}

// =============================================================================
// Observability
// =============================================================================

/// Port notified as the ingestor processes frames.
#[cfg_attr(test, mockall::automock)]
pub trait IngestObserver: Send + Sync {
    /// A frame from a superseded session was dropped.
    fn stale_frame(&self);

    /// A quote was rejected before reaching the sink.
    fn discarded(&self, reason: &DiscardReason);

    /// The sink accepted a write that took `elapsed`.
    fn stored(&self, elapsed: Duration);

    /// The sink rejected a write that took `elapsed`.
    fn failed(&self, error: &PersistenceError, elapsed: Duration);
}
