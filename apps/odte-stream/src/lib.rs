#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! 0DTE Options Quote Ingestor
//!
//! Keeps a streaming subscription to the same-day option contracts around
//! the underlying's price and persists per-strike call/put quotes.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: contract identifiers, universes, diffs and quote records
//!   - `contract`: structured `ContractId` and its venue symbol
//!   - `universe`: contract sets and the fallback strike window
//!   - `subscription`: diffs and live subscription state
//!   - `quote`: raw frames, normalization and strike rows
//!
//! - **Application**: use cases and port definitions
//!   - `ports`: price, chain, credentials, transport, sink and observer interfaces
//!   - `services`: universe resolver and epoch-gated quote ingestor
//!
//! - **Infrastructure**: adapters and external integrations
//!   - `streamer`: session state machine, keep-alive and supervisor
//!   - `transport`: WebSocket and in-memory transports
//!   - `schwab`: REST adapters for price, chain and streamer info
//!   - `persistence`: `PostgreSQL` and in-memory sinks
//!   - `credentials`, `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!  price ──► resolver ──► universe ──► diff ──► session ──► SUBS/ADD/UNSUBS
//!                                                  │
//!                                       frames (epoch-tagged)
//!                                                  ▼
//!                                  bounded channel ──► ingestor ──► sink
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::contract::{ContractId, ContractIdError, OptionSide};
pub use domain::quote::{
    DiscardReason, QuoteFrame, QuoteNormalizer, QuoteRecord, SideFields, StrikeRow, StrikeUpdate,
};
pub use domain::subscription::{SubscriptionDiff, SubscriptionState};
pub use domain::universe::{StrikeWindow, Universe};

// Ports
pub use application::ports::{
    ContractChainSource, IngestObserver, PersistenceError, PriceSource, QuoteSink,
    StreamerCredentials, StreamerInfoProvider, TokenProvider, TransportConnector, TransportError,
    UpstreamError,
};

// Services
pub use application::services::{
    ContractUniverseResolver, EpochGate, QuoteIngestor, QuoteOutcome, Resolution,
    ResolutionSource, ResolverSettings,
};

// Streamer
pub use infrastructure::streamer::{
    SessionConfig, SessionError, SessionState, SessionSupervisor, StreamSession,
    SupervisorConfig, SupervisorDeps,
};

// Config
pub use infrastructure::config::{ConfigError, IngestorConfig};

// Metrics
pub use infrastructure::metrics::{MetricsObserver, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
