//! Infrastructure Layer
//!
//! Adapters that connect the application layer to external systems.
//!
//! # Modules
//!
//! - `config`: environment-driven configuration
//! - `credentials`: venue access token provider
//! - `metrics`: Prometheus metrics
//! - `persistence`: quote sinks (`PostgreSQL`, in-memory)
//! - `schwab`: venue REST adapters
//! - `streamer`: streaming session, keep-alive and supervisor
//! - `telemetry`: logging and OpenTelemetry tracing
//! - `transport`: WebSocket and in-memory frame transports

/// Configuration loading.
pub mod config;

/// Venue access token provider.
pub mod credentials;

/// Prometheus metrics for monitoring.
pub mod metrics;

/// Quote persistence adapters.
pub mod persistence;

/// Venue REST adapters.
pub mod schwab;

/// Streaming session and supervisor.
pub mod streamer;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Frame transports.
pub mod transport;
