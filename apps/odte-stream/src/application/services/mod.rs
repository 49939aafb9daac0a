//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ContractUniverseResolver`: price to in-scope contracts, with fallback
//! - `QuoteIngestor`: frame normalization and sink writes on its own task

/// Universe resolution from the chain or a synthesized window.
pub mod resolver;

/// Epoch-gated quote ingestion.
pub mod ingest;

pub use ingest::{EpochGate, IngestEnvelope, IngestSender, Offer, QuoteIngestor, QuoteOutcome};
pub use resolver::{ContractUniverseResolver, Resolution, ResolutionSource, ResolverSettings};
