//! Venue Adapters
//!
//! HTTP adapters for the venue's market data and trader APIs.

pub mod rest;

pub use rest::{
    RestConfig, SchwabChainSource, SchwabPriceSource, SchwabRestClient, SchwabStreamerInfo,
};
