//! Contract Universe
//!
//! The set of contracts in scope for one reference price and trading date.
//! A `Universe` is an immutable, ordered, duplicate-free snapshot; a price
//! move produces a new universe rather than editing the old one.
//!
//! `StrikeWindow` builds the deterministic fallback universe: the reference
//! price is rounded to the nearest strike increment and a symmetric band of
//! strikes around it gets one call and one put each.

use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use super::contract::{ContractId, OptionSide};

// =============================================================================
// Universe
// =============================================================================

/// Ordered, duplicate-free set of contracts.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    contracts: Vec<ContractId>,
    index: HashSet<ContractId>,
}

impl Universe {
    /// An empty universe.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a universe, keeping the first occurrence of each contract.
    #[must_use]
    pub fn from_contracts(contracts: impl IntoIterator<Item = ContractId>) -> Self {
        let mut universe = Self::default();
        for contract in contracts {
            if universe.index.insert(contract.clone()) {
                universe.contracts.push(contract);
            }
        }
        universe
    }

    /// Number of contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// Whether the universe has no contracts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Membership test by identifier equality.
    #[must_use]
    pub fn contains(&self, contract: &ContractId) -> bool {
        self.index.contains(contract)
    }

    /// Contracts in order.
    pub fn iter(&self) -> impl Iterator<Item = &ContractId> {
        self.contracts.iter()
    }

    /// Contracts as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[ContractId] {
        &self.contracts
    }

    /// Canonical venue symbols in order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.contracts.iter().map(ContractId::symbol).collect()
    }

    /// Distinct strikes in order of first appearance.
    #[must_use]
    pub fn strikes(&self) -> Vec<Decimal> {
        let mut seen = HashSet::new();
        self.contracts
            .iter()
            .map(ContractId::strike)
            .filter(|strike| seen.insert(*strike))
            .collect()
    }
}

impl PartialEq for Universe {
    fn eq(&self, other: &Self) -> bool {
        self.contracts == other.contracts
    }
}

impl Eq for Universe {}

impl FromIterator<ContractId> for Universe {
    fn from_iter<I: IntoIterator<Item = ContractId>>(iter: I) -> Self {
        Self::from_contracts(iter)
    }
}

impl<'a> IntoIterator for &'a Universe {
    type Item = &'a ContractId;
    type IntoIter = std::slice::Iter<'a, ContractId>;

    fn into_iter(self) -> Self::IntoIter {
        self.contracts.iter()
    }
}

// =============================================================================
// Strike Window
// =============================================================================

/// Symmetric band of strikes around a rounded reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikeWindow {
    /// Distance between listed strikes.
    pub increment: Decimal,
    /// Distance from the centre strike to either edge.
    pub half_width: Decimal,
}

impl Default for StrikeWindow {
    fn default() -> Self {
        Self {
            increment: Decimal::from(5),
            half_width: Decimal::from(75),
        }
    }
}

impl StrikeWindow {
    /// Create a window with custom spacing.
    #[must_use]
    pub const fn new(increment: Decimal, half_width: Decimal) -> Self {
        Self {
            increment,
            half_width,
        }
    }

    /// Round a price to the nearest strike increment. Midpoints round away
    /// from zero.
    #[must_use]
    pub fn centre(&self, reference_price: Decimal) -> Decimal {
        if self.increment <= Decimal::ZERO {
            return reference_price;
        }
        (reference_price / self.increment)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * self.increment
    }

    /// Positive strikes from `centre - half_width` to `centre + half_width`
    /// inclusive, ascending.
    #[must_use]
    pub fn strikes(&self, reference_price: Decimal) -> Vec<Decimal> {
        let centre = self.centre(reference_price);
        if self.increment <= Decimal::ZERO {
            return if centre > Decimal::ZERO {
                vec![centre]
            } else {
                vec![]
            };
        }

        let low = centre - self.half_width;
        let high = centre + self.half_width;

        let mut strikes = Vec::new();
        let mut strike = low;
        while strike <= high {
            if strike > Decimal::ZERO {
                strikes.push(strike.normalize());
            }
            strike += self.increment;
        }
        strikes
    }

    /// Build the fallback universe: for each strike, the call then the put,
    /// all expiring on `as_of`.
    #[must_use]
    pub fn synthesize(&self, root: &str, reference_price: Decimal, as_of: NaiveDate) -> Universe {
        self.strikes(reference_price)
            .into_iter()
            .flat_map(|strike| {
                [OptionSide::Call, OptionSide::Put]
                    .into_iter()
                    .filter_map(move |side| ContractId::new(root, as_of, side, strike).ok())
            })
            .collect()
    }
}
