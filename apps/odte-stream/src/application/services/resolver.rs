//! Contract Universe Resolver
//!
//! Maps a reference price and trading date to the contracts in scope.
//! The venue chain is tried first; any failure falls back to a synthesized
//! strike window so the session always has something to subscribe to.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::application::ports::{ContractChainSource, PriceSource, UpstreamError};
use crate::domain::universe::{StrikeWindow, Universe};

/// Reference price used when the price source has nothing.
pub const DEFAULT_REFERENCE_PRICE: Decimal = Decimal::from_parts(5440, 0, 0, false, 0);

/// Where a resolved universe came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Venue contract chain.
    Chain,
    /// Synthesized strike window.
    Synthesized,
}

impl ResolutionSource {
    /// Log and metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chain => "chain",
            Self::Synthesized => "synthesized",
        }
    }
}

/// Result of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Contracts in scope.
    pub universe: Universe,
    /// How they were obtained.
    pub source: ResolutionSource,
    /// Price the universe was built around.
    pub reference_price: Decimal,
}

/// Resolver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Option root used for synthesized contracts.
    pub option_root: String,
    /// Fallback strike window.
    pub window: StrikeWindow,
    /// Price used when the price source fails.
    pub default_price: Decimal,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            option_root: "SPXW".to_string(),
            window: StrikeWindow::default(),
            default_price: DEFAULT_REFERENCE_PRICE,
        }
    }
}

/// Resolves the in-scope contract universe.
pub struct ContractUniverseResolver {
    prices: Arc<dyn PriceSource>,
    chain: Arc<dyn ContractChainSource>,
    settings: ResolverSettings,
}

impl ContractUniverseResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        prices: Arc<dyn PriceSource>,
        chain: Arc<dyn ContractChainSource>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            prices,
            chain,
            settings,
        }
    }

    /// Current reference price, or the configured default when the price
    /// source or its credential is unavailable.
    pub async fn reference_price(&self) -> Decimal {
        match self.prices.reference_price().await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                tracing::warn!(
                    %price,
                    default = %self.settings.default_price,
                    "Non-positive reference price, using default"
                );
                self.settings.default_price
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    default = %self.settings.default_price,
                    "Reference price unavailable, using default"
                );
                self.settings.default_price
            }
        }
    }

    /// Query the price source and resolve around it.
    pub async fn resolve_current(&self, as_of: NaiveDate) -> Resolution {
        let price = self.reference_price().await;
        self.resolve(price, as_of).await
    }

    /// Resolve the universe for a reference price and trading date.
    ///
    /// Chain contracts are filtered to `as_of` and ordered by ascending
    /// strike with the call before the put.
    pub async fn resolve(&self, reference_price: Decimal, as_of: NaiveDate) -> Resolution {
        let resolution = match self.chain_universe(reference_price, as_of).await {
            Ok(universe) => Resolution {
                universe,
                source: ResolutionSource::Chain,
                reference_price,
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    %reference_price,
                    %as_of,
                    "Contract chain unavailable, synthesizing strike window"
                );
                Resolution {
                    universe: self.settings.window.synthesize(
                        &self.settings.option_root,
                        reference_price,
                        as_of,
                    ),
                    source: ResolutionSource::Synthesized,
                    reference_price,
                }
            }
        };

        if resolution.universe.is_empty() {
            tracing::warn!(
                %reference_price,
                %as_of,
                source = resolution.source.as_str(),
                "Resolved universe is empty"
            );
        } else {
            tracing::debug!(
                %reference_price,
                %as_of,
                source = resolution.source.as_str(),
                contracts = resolution.universe.len(),
                "Resolved contract universe"
            );
        }

        resolution
    }

    async fn chain_universe(
        &self,
        reference_price: Decimal,
        as_of: NaiveDate,
    ) -> Result<Universe, UpstreamError> {
        let mut contracts = self.chain.chain(reference_price, as_of).await?;
        contracts.retain(|c| c.expiry() == as_of);
        contracts.sort_by(|a, b| a.strike().cmp(&b.strike()).then(a.side().cmp(&b.side())));

        let universe = Universe::from_contracts(contracts);
        if universe.is_empty() {
            return Err(UpstreamError::DataUnavailable(format!(
                "chain has no contracts expiring {as_of}"
            )));
        }
        Ok(universe)
    }
}
