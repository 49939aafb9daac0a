//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for market data, credentials, transport and storage.
pub mod ports;

/// Universe resolution and quote ingestion services.
pub mod services;
