//! `PostgreSQL` Quote Sink
//!
//! One row per strike with a column group per side. Each side has a fixed
//! upsert statement; absent fields bind as NULL and `COALESCE` keeps the
//! stored value, so a frame never clears data it did not carry.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::application::ports::{PersistenceError, QuoteSink};
use crate::domain::contract::OptionSide;
use crate::domain::quote::StrikeUpdate;

const CREATE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS odte_strike_quotes (
        strike              NUMERIC PRIMARY KEY,
        expiry              TEXT,
        call_last           NUMERIC,
        call_bid            NUMERIC,
        call_ask            NUMERIC,
        call_net_change     NUMERIC,
        call_delta          DOUBLE PRECISION,
        call_gamma          DOUBLE PRECISION,
        call_theta          DOUBLE PRECISION,
        call_vega           DOUBLE PRECISION,
        call_implied_vol    DOUBLE PRECISION,
        call_open_interest  BIGINT,
        put_last            NUMERIC,
        put_bid             NUMERIC,
        put_ask             NUMERIC,
        put_net_change      NUMERIC,
        put_delta           DOUBLE PRECISION,
        put_gamma           DOUBLE PRECISION,
        put_theta           DOUBLE PRECISION,
        put_vega            DOUBLE PRECISION,
        put_implied_vol     DOUBLE PRECISION,
        put_open_interest   BIGINT,
        updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
";

const UPSERT_CALL: &str = r"
    INSERT INTO odte_strike_quotes (
        strike, expiry,
        call_last, call_bid, call_ask, call_net_change,
        call_delta, call_gamma, call_theta, call_vega, call_implied_vol,
        call_open_interest, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
    ON CONFLICT (strike) DO UPDATE SET
        expiry = COALESCE(EXCLUDED.expiry, odte_strike_quotes.expiry),
        call_last = COALESCE(EXCLUDED.call_last, odte_strike_quotes.call_last),
        call_bid = COALESCE(EXCLUDED.call_bid, odte_strike_quotes.call_bid),
        call_ask = COALESCE(EXCLUDED.call_ask, odte_strike_quotes.call_ask),
        call_net_change = COALESCE(EXCLUDED.call_net_change, odte_strike_quotes.call_net_change),
        call_delta = COALESCE(EXCLUDED.call_delta, odte_strike_quotes.call_delta),
        call_gamma = COALESCE(EXCLUDED.call_gamma, odte_strike_quotes.call_gamma),
        call_theta = COALESCE(EXCLUDED.call_theta, odte_strike_quotes.call_theta),
        call_vega = COALESCE(EXCLUDED.call_vega, odte_strike_quotes.call_vega),
        call_implied_vol = COALESCE(EXCLUDED.call_implied_vol, odte_strike_quotes.call_implied_vol),
        call_open_interest = COALESCE(EXCLUDED.call_open_interest, odte_strike_quotes.call_open_interest),
        updated_at = NOW()
";

const UPSERT_PUT: &str = r"
    INSERT INTO odte_strike_quotes (
        strike, expiry,
        put_last, put_bid, put_ask, put_net_change,
        put_delta, put_gamma, put_theta, put_vega, put_implied_vol,
        put_open_interest, updated_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
    ON CONFLICT (strike) DO UPDATE SET
        expiry = COALESCE(EXCLUDED.expiry, odte_strike_quotes.expiry),
        put_last = COALESCE(EXCLUDED.put_last, odte_strike_quotes.put_last),
        put_bid = COALESCE(EXCLUDED.put_bid, odte_strike_quotes.put_bid),
        put_ask = COALESCE(EXCLUDED.put_ask, odte_strike_quotes.put_ask),
        put_net_change = COALESCE(EXCLUDED.put_net_change, odte_strike_quotes.put_net_change),
        put_delta = COALESCE(EXCLUDED.put_delta, odte_strike_quotes.put_delta),
        put_gamma = COALESCE(EXCLUDED.put_gamma, odte_strike_quotes.put_gamma),
        put_theta = COALESCE(EXCLUDED.put_theta, odte_strike_quotes.put_theta),
        put_vega = COALESCE(EXCLUDED.put_vega, odte_strike_quotes.put_vega),
        put_implied_vol = COALESCE(EXCLUDED.put_implied_vol, odte_strike_quotes.put_implied_vol),
        put_open_interest = COALESCE(EXCLUDED.put_open_interest, odte_strike_quotes.put_open_interest),
        updated_at = NOW()
";

const fn upsert_statement(side: OptionSide) -> &'static str {
    match side {
        OptionSide::Call => UPSERT_CALL,
        OptionSide::Put => UPSERT_PUT,
    }
}

/// Quote sink backed by a `PostgreSQL` pool.
pub struct PostgresQuoteSink {
    pool: PgPool,
}

impl PostgresQuoteSink {
    /// Connect and ensure the table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached or the table
    /// cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        tracing::info!(max_connections, "PostgreSQL connection pool initialized");

        let sink = Self::with_pool(pool);
        sink.ensure_schema().await?;
        Ok(sink)
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the quotes table if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Write(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl QuoteSink for PostgresQuoteSink {
    async fn upsert(&self, update: &StrikeUpdate) -> Result<(), PersistenceError> {
        let fields = &update.fields;

        sqlx::query(upsert_statement(update.side))
            .bind(update.strike)
            .bind(update.expiry.as_deref())
            .bind(fields.last)
            .bind(fields.bid)
            .bind(fields.ask)
            .bind(fields.net_change)
            .bind(fields.delta)
            .bind(fields.gamma)
            .bind(fields.theta)
            .bind(fields.vega)
            .bind(fields.implied_vol)
            .bind(fields.open_interest)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Write(e.to_string()))?;

        tracing::trace!(strike = %update.strike, side = update.side.as_str(), "Strike upserted");
        Ok(())
    }
}
