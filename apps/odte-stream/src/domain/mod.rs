//! Domain Layer - Contract, universe, subscription and quote types.
//!
//! Pure types and functions with no I/O. Everything here is deterministic
//! and unit tested in place.

/// Option contract identifiers.
pub mod contract;

/// Contract universes and fallback strike windows.
pub mod universe;

/// Subscription diffs and live subscription state.
pub mod subscription;

/// Raw quote frames, normalized records and strike rows.
pub mod quote;
