//! In-Memory Quote Sink
//!
//! Strike rows held in process, for tests and dry runs without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::{PersistenceError, QuoteSink};
use crate::domain::quote::{StrikeRow, StrikeUpdate};

/// Quote sink keeping rows ordered by strike.
#[derive(Debug, Default)]
pub struct InMemoryQuoteSink {
    rows: Mutex<BTreeMap<Decimal, StrikeRow>>,
}

impl InMemoryQuoteSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Row for a strike.
    #[must_use]
    pub fn row(&self, strike: Decimal) -> Option<StrikeRow> {
        self.rows.lock().get(&strike).cloned()
    }

    /// All rows in ascending strike order.
    #[must_use]
    pub fn rows(&self) -> Vec<StrikeRow> {
        self.rows.lock().values().cloned().collect()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether no row exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

#[async_trait]
impl QuoteSink for InMemoryQuoteSink {
    async fn upsert(&self, update: &StrikeUpdate) -> Result<(), PersistenceError> {
        self.rows
            .lock()
            .entry(update.strike)
            .or_insert_with(|| StrikeRow::new(update.strike))
            .apply(update);
        Ok(())
    }
}
