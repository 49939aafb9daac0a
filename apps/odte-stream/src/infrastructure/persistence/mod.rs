//! Quote Persistence
//!
//! `QuoteSink` adapters: `PostgreSQL` for production and an in-memory map
//! for tests and runs without `DATABASE_URL`.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryQuoteSink;
pub use postgres::PostgresQuoteSink;
