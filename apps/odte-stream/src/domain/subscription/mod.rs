//! Subscription Tracking
//!
//! Computes the minimal change between two contract sets and tracks what a
//! live session is currently subscribed to.
//!
//! # Design
//!
//! - `SubscriptionDiff::between` is a pure function of its inputs. Output
//!   order follows input order so repeated calls with the same inputs yield
//!   identical command sequences.
//! - `SubscriptionState` is only mutated by applying a diff. After
//!   `apply(&diff)` the state holds exactly the `next` set the diff was
//!   computed against.

use std::collections::HashSet;

use super::contract::ContractId;
use super::universe::Universe;

// =============================================================================
// Subscription Diff
// =============================================================================

/// Contracts to add and remove to move from one set to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    /// Present in `next` but not in `previous`, in `next` order.
    pub to_add: Vec<ContractId>,
    /// Present in `previous` but not in `next`, in `previous` order.
    pub to_remove: Vec<ContractId>,
}

impl SubscriptionDiff {
    /// Diff two contract sequences by identifier equality.
    #[must_use]
    pub fn between<'a, P, N>(previous: P, next: N) -> Self
    where
        P: IntoIterator<Item = &'a ContractId>,
        N: IntoIterator<Item = &'a ContractId>,
    {
        let previous: Vec<&ContractId> = previous.into_iter().collect();
        let next: Vec<&ContractId> = next.into_iter().collect();

        let previous_set: HashSet<&ContractId> = previous.iter().copied().collect();
        let next_set: HashSet<&ContractId> = next.iter().copied().collect();

        let mut added = HashSet::new();
        let to_add = next
            .iter()
            .filter(|c| !previous_set.contains(*c) && added.insert(**c))
            .map(|c| (*c).clone())
            .collect();

        let mut removed = HashSet::new();
        let to_remove = previous
            .iter()
            .filter(|c| !next_set.contains(*c) && removed.insert(**c))
            .map(|c| (*c).clone())
            .collect();

        Self { to_add, to_remove }
    }

    /// Diff two universes.
    #[must_use]
    pub fn universes(previous: &Universe, next: &Universe) -> Self {
        Self::between(previous.iter(), next.iter())
    }

    /// Whether there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Symbols to add.
    #[must_use]
    pub fn add_symbols(&self) -> Vec<String> {
        self.to_add.iter().map(ContractId::symbol).collect()
    }

    /// Symbols to remove.
    #[must_use]
    pub fn remove_symbols(&self) -> Vec<String> {
        self.to_remove.iter().map(ContractId::symbol).collect()
    }
}

// =============================================================================
// Subscription State
// =============================================================================

/// Contracts currently subscribed on one live session.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionState {
    contracts: Vec<ContractId>,
    index: HashSet<ContractId>,
}

impl SubscriptionState {
    /// Empty state for a freshly authenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a diff: drop `to_remove`, then append `to_add`.
    pub fn apply(&mut self, diff: &SubscriptionDiff) {
        if !diff.to_remove.is_empty() {
            let removed: HashSet<&ContractId> = diff.to_remove.iter().collect();
            self.contracts.retain(|c| !removed.contains(c));
            for contract in &diff.to_remove {
                self.index.remove(contract);
            }
        }

        for contract in &diff.to_add {
            if self.index.insert(contract.clone()) {
                self.contracts.push(contract.clone());
            }
        }
    }

    /// Remove only the given contracts.
    pub fn remove(&mut self, contracts: &[ContractId]) {
        self.apply(&SubscriptionDiff {
            to_add: Vec::new(),
            to_remove: contracts.to_vec(),
        });
    }

    /// Add only the given contracts.
    pub fn add(&mut self, contracts: &[ContractId]) {
        self.apply(&SubscriptionDiff {
            to_add: contracts.to_vec(),
            to_remove: Vec::new(),
        });
    }

    /// Number of subscribed contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, contract: &ContractId) -> bool {
        self.index.contains(contract)
    }

    /// Subscribed contracts in subscription order.
    pub fn iter(&self) -> impl Iterator<Item = &ContractId> {
        self.contracts.iter()
    }

    /// Whether the subscribed set equals the universe's set.
    #[must_use]
    pub fn matches(&self, universe: &Universe) -> bool {
        self.len() == universe.len() && universe.iter().all(|c| self.index.contains(c))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::OptionSide;
    use crate::domain::universe::StrikeWindow;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 3).unwrap()
    }

    fn contract(strike: i64, side: OptionSide) -> ContractId {
        ContractId::new("SPXW", as_of(), side, Decimal::from(strike)).unwrap()
    }

    fn universe_from(strikes: &[(i64, bool)]) -> Universe {
        strikes
            .iter()
            .map(|(strike, call)| {
                contract(
                    *strike,
                    if *call {
                        OptionSide::Call
                    } else {
                        OptionSide::Put
                    },
                )
            })
            .collect()
    }

    #[test]
    fn identical_universes_produce_empty_diff() {
        let universe = StrikeWindow::default().synthesize("SPXW", Decimal::from(5440), as_of());
        let diff = SubscriptionDiff::universes(&universe, &universe);
        assert!(diff.is_empty());
    }

    #[test]
    fn empty_inputs_produce_empty_diff() {
        let diff = SubscriptionDiff::universes(&Universe::empty(), &Universe::empty());
        assert!(diff.is_empty());
    }

    #[test]
    fn window_shift_adds_and_removes_edges() {
        let window = StrikeWindow::default();
        let before = window.synthesize("SPXW", Decimal::from(5440), as_of());
        let after = window.synthesize("SPXW", Decimal::from(5450), as_of());

        let diff = SubscriptionDiff::universes(&before, &after);

        assert_eq!(
            diff.to_remove,
            vec![
                contract(5365, OptionSide::Call),
                contract(5365, OptionSide::Put),
                contract(5370, OptionSide::Call),
                contract(5370, OptionSide::Put),
            ]
        );
        assert_eq!(
            diff.to_add,
            vec![
                contract(5520, OptionSide::Call),
                contract(5520, OptionSide::Put),
                contract(5525, OptionSide::Call),
                contract(5525, OptionSide::Put),
            ]
        );
    }

    #[test]
    fn diff_is_stable_across_calls() {
        let a = universe_from(&[(5400, true), (5405, false), (5410, true)]);
        let b = universe_from(&[(5410, true), (5415, true), (5420, false)]);

        assert_eq!(
            SubscriptionDiff::universes(&a, &b),
            SubscriptionDiff::universes(&a, &b)
        );
    }

    #[test]
    fn state_starts_empty_and_tracks_applied_diffs() {
        let mut state = SubscriptionState::new();
        assert!(state.is_empty());

        let first = universe_from(&[(5400, true), (5400, false)]);
        let diff = SubscriptionDiff::between(state.iter(), first.iter());
        state.apply(&diff);
        assert!(state.matches(&first));

        let second = universe_from(&[(5400, false), (5405, true)]);
        let diff = SubscriptionDiff::between(state.iter(), second.iter());
        state.apply(&diff);
        assert!(state.matches(&second));
        assert!(!state.contains(&contract(5400, OptionSide::Call)));
    }

    #[test]
    fn add_and_remove_helpers() {
        let mut state = SubscriptionState::new();
        let c = contract(5400, OptionSide::Call);
        state.add(std::slice::from_ref(&c));
        state.add(std::slice::from_ref(&c));
        assert_eq!(state.len(), 1);
        state.remove(std::slice::from_ref(&c));
        assert!(state.is_empty());
    }

    fn arb_universe() -> impl Strategy<Value = Universe> {
        prop::collection::vec((5300i64..5600, any::<bool>()), 0..60).prop_map(|raw| {
            let rounded: Vec<(i64, bool)> = raw.into_iter().map(|(s, c)| (s / 5 * 5, c)).collect();
            universe_from(&rounded)
        })
    }

    proptest! {
        #[test]
        fn diff_of_self_is_empty(u in arb_universe()) {
            prop_assert!(SubscriptionDiff::universes(&u, &u).is_empty());
        }

        #[test]
        fn add_and_remove_are_disjoint_and_reconstruct_next(a in arb_universe(), b in arb_universe()) {
            let diff = SubscriptionDiff::universes(&a, &b);

            let adds: HashSet<&ContractId> = diff.to_add.iter().collect();
            let removes: HashSet<&ContractId> = diff.to_remove.iter().collect();
            prop_assert!(adds.is_disjoint(&removes));

            let mut rebuilt: HashSet<ContractId> = a
                .iter()
                .filter(|c| !removes.contains(c))
                .cloned()
                .collect();
            rebuilt.extend(diff.to_add.iter().cloned());
            let expected: HashSet<ContractId> = b.iter().cloned().collect();
            prop_assert_eq!(rebuilt, expected);
        }

        #[test]
        fn applying_diff_reaches_next(a in arb_universe(), b in arb_universe()) {
            let mut state = SubscriptionState::new();
            state.apply(&SubscriptionDiff::universes(&Universe::empty(), &a));
            prop_assert!(state.matches(&a));

            let diff = SubscriptionDiff::between(state.iter(), b.iter());
            state.apply(&diff);
            prop_assert!(state.matches(&b));
        }
    }
}
