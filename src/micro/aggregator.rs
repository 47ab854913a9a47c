//! Reduction of per-market outcomes into the averaged moment vector.
//!
//! Key invariants:
//! - Each market's raw contribution is divided by its own normalization count
//!   before anything is summed across markets.
//! - Normalized contributions are folded in canonical market order, so the
//!   result does not depend on completion order.
//! - Every market is absorbed exactly once.

use std::collections::HashMap;

use crate::error::{ContractViolation, MarketError};
use crate::market::MarketId;
use crate::moments::MomentSet;

use super::computation::MarketOutcome;

/// Single-writer accumulator for one moment computation.
#[derive(Debug)]
pub struct Aggregator<'a> {
    moments: &'a MomentSet,
    markets: &'a [MarketId],
    positions: HashMap<&'a MarketId, usize>,
    normalized: Vec<Option<Vec<f64>>>,
    errors: Vec<MarketError>,
}

impl<'a> Aggregator<'a> {
    /// Create an aggregator over markets in canonical order.
    #[must_use]
    pub fn new(moments: &'a MomentSet, markets: &'a [MarketId]) -> Self {
        Self {
            moments,
            markets,
            positions: markets.iter().enumerate().map(|(pos, m)| (m, pos)).collect(),
            normalized: vec![None; markets.len()],
            errors: Vec::new(),
        }
    }

    /// Absorb one market's outcome.
    ///
    /// # Errors
    ///
    /// Returns a contract violation if the market is unknown, was already
    /// absorbed, or its outcome is not shaped like the moment vector.
    pub fn absorb(&mut self, market: &MarketId, outcome: MarketOutcome) -> Result<(), ContractViolation> {
        let Some(&pos) = self.positions.get(market) else {
            return Err(ContractViolation::UnexpectedMarket {
                market: market.clone(),
            });
        };
        if self.normalized[pos].is_some() {
            return Err(ContractViolation::DuplicateMarket {
                market: market.clone(),
            });
        }
        if outcome.contributions.len() != self.moments.rows() {
            return Err(ContractViolation::LengthMismatch {
                what: "market contributions",
                expected: self.moments.rows(),
                actual: outcome.contributions.len(),
            });
        }

        let normalized = self
            .moments
            .market_indices(market)
            .iter()
            .zip(self.moments.market_counts(market))
            .map(|(&row, &count)| outcome.contributions[row] / count)
            .collect();
        self.normalized[pos] = Some(normalized);
        self.errors.extend(outcome.errors);
        Ok(())
    }

    /// Soft errors collected so far, in completion order.
    #[must_use]
    pub fn errors(&self) -> &[MarketError] {
        &self.errors
    }

    /// Sum the normalized contributions into the global moment vector.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation::MarketNotVisited` if any market was never absorbed.
    pub fn finish(self) -> Result<(Vec<f64>, Vec<MarketError>), ContractViolation> {
        let missing: Vec<&MarketId> = self
            .markets
            .iter()
            .zip(&self.normalized)
            .filter(|(_, slot)| slot.is_none())
            .map(|(market, _)| market)
            .collect();
        if let Some(first) = missing.first() {
            return Err(ContractViolation::MarketNotVisited {
                missing: missing.len(),
                first: (*first).clone(),
            });
        }

        let mut micro = vec![0.0; self.moments.rows()];
        for (market, slot) in self.markets.iter().zip(self.normalized) {
            let Some(values) = slot else { continue };
            for (&row, value) in self.moments.market_indices(market).iter().zip(values) {
                micro[row] += value;
            }
        }
        Ok((micro, self.errors))
    }
}
