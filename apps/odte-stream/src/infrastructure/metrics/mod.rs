//! Prometheus Metrics Module
//!
//! Exposes ingestor metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound data frames received and dropped
//! - **Quotes**: normalized quotes stored, discarded or failed
//! - **Sessions**: faults, reconnects and the live subscription count
//! - **Latency**: sink upsert latency
//!
//! # Integration
//!
//! When a listen address is given, metrics are served at `/metrics` by the
//! exporter's own HTTP listener.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::application::ports::{IngestObserver, PersistenceError};
use crate::domain::quote::DiscardReason;

// =============================================================================
// Global Recorder
// =============================================================================

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder, optionally with an HTTP listener.
///
/// Calling this more than once is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<(), BuildError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    match listen {
        Some(addr) => builder.with_http_listener(addr).install()?,
        None => {
            builder.install_recorder()?;
        }
    }

    register_metrics();
    let _ = INSTALLED.set(());
    Ok(())
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "odte_stream_frames_received_total",
        "Total quote entries received from the streaming venue"
    );
    describe_counter!(
        "odte_stream_frames_dropped_total",
        "Total quote entries dropped before reaching the sink"
    );
    describe_counter!(
        "odte_stream_quotes_total",
        "Total normalized quotes by outcome"
    );

    describe_counter!(
        "odte_stream_session_faults_total",
        "Total streaming session faults by phase"
    );
    describe_counter!(
        "odte_stream_reconnects_total",
        "Total supervisor reconnection attempts"
    );
    describe_counter!(
        "odte_stream_universe_resolutions_total",
        "Total universe resolutions by source"
    );

    describe_gauge!(
        "odte_stream_subscriptions",
        "Contracts subscribed on the live session"
    );

    describe_histogram!(
        "odte_stream_upsert_seconds",
        "Time to upsert one quote into the sink"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a processed quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteOutcomeLabel {
    /// Upserted.
    Stored,
    /// Rejected before storage.
    Discarded,
    /// Sink returned an error.
    Failed,
}

impl QuoteOutcomeLabel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Discarded => "discarded",
            Self::Failed => "failed",
        }
    }
}

/// Why a frame never reached the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Ingest channel was full.
    ChannelFull,
    /// Frame came from a session that is no longer current.
    StaleEpoch,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::ChannelFull => "channel_full",
            Self::StaleEpoch => "stale_epoch",
        }
    }
}

/// Record quote entries received on the stream.
pub fn record_frames_received(count: u64) {
    counter!("odte_stream_frames_received_total").increment(count);
}

/// Record a dropped quote entry.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "odte_stream_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a processed quote.
pub fn record_quote(outcome: QuoteOutcomeLabel) {
    counter!(
        "odte_stream_quotes_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record a session fault.
pub fn record_session_fault(phase: &'static str) {
    counter!(
        "odte_stream_session_faults_total",
        "phase" => phase
    )
    .increment(1);
}

/// Record a supervisor reconnection attempt.
pub fn record_reconnect() {
    counter!("odte_stream_reconnects_total").increment(1);
}

/// Record a universe resolution.
pub fn record_resolution(source: &'static str) {
    counter!(
        "odte_stream_universe_resolutions_total",
        "source" => source
    )
    .increment(1);
}

/// Update the live subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("odte_stream_subscriptions").set(count as f64);
}

/// Record sink upsert duration.
pub fn record_upsert_duration(duration: Duration) {
    histogram!("odte_stream_upsert_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Ingest Observer
// =============================================================================

/// Records ingestor outcomes as Prometheus metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl IngestObserver for MetricsObserver {
    fn stale_frame(&self) {
        record_frame_dropped(DropReason::StaleEpoch);
    }

    fn discarded(&self, _reason: &DiscardReason) {
        record_quote(QuoteOutcomeLabel::Discarded);
    }

    fn stored(&self, elapsed: Duration) {
        record_upsert_duration(elapsed);
        record_quote(QuoteOutcomeLabel::Stored);
    }

    fn failed(&self, _error: &PersistenceError, elapsed: Duration) {
        record_upsert_duration(elapsed);
        record_quote(QuoteOutcomeLabel::Failed);
    }
}

// =============================================================================
// Tests
// =============================================================================
