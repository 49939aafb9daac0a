//! Configuration Module
//!
//! Environment-driven configuration for the ingestor.

mod settings;

pub use settings::{
    ConfigError, CredentialSettings, DatabaseSettings, IngestorConfig, RetryStrategy,
    ServerSettings, StreamSettings, SupervisorSettings, UnderlyingSettings,
};
