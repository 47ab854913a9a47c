//! Market-scoped work items and the partitioner that builds them.

use std::sync::Arc;

use crate::config::Precision;
use crate::economy::{EconomyParameters, Simulation};
use crate::market::MarketId;
use crate::moments::MomentSet;

/// Everything needed to compute one market's contribution.
///
/// Built once per market by the [`Partitioner`] and never mutated afterwards.
/// Row-level data is sliced down to the market; economy-level data is shared.
#[derive(Debug, Clone)]
pub struct MarketWorkItem {
    market_id: MarketId,
    prices: Vec<f64>,
    shares: Vec<f64>,
    delta: Vec<f64>,
    x2: Vec<Vec<f64>>,
    agent_weights: Vec<f64>,
    agent_nodes: Vec<Vec<f64>>,
    agent_demographics: Vec<Vec<f64>>,
    parameters: Arc<EconomyParameters>,
    moments: Arc<MomentSet>,
    precision: Precision,
}

impl MarketWorkItem {
    /// The market this item covers.
    #[must_use]
    pub fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    /// Prices of the market's products.
    #[must_use]
    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// Shares of the market's products.
    #[must_use]
    pub fn shares(&self) -> &[f64] {
        &self.shares
    }

    /// Mean utilities of the market's products.
    #[must_use]
    pub fn delta(&self) -> &[f64] {
        &self.delta
    }

    /// X2 rows of the market's products, evaluated with the overlaid prices.
    #[must_use]
    pub fn x2(&self) -> &[Vec<f64>] {
        &self.x2
    }

    /// Integration weights of the market's agents.
    #[must_use]
    pub fn agent_weights(&self) -> &[f64] {
        &self.agent_weights
    }

    /// Taste draws of the market's agents.
    #[must_use]
    pub fn agent_nodes(&self) -> &[Vec<f64>] {
        &self.agent_nodes
    }

    /// Demographics of the market's agents.
    #[must_use]
    pub fn agent_demographics(&self) -> &[Vec<f64>] {
        &self.agent_demographics
    }

    /// Shared structural parameters.
    #[must_use]
    pub fn parameters(&self) -> &EconomyParameters {
        &self.parameters
    }

    /// Shared validated moments.
    #[must_use]
    pub fn moments(&self) -> &MomentSet {
        &self.moments
    }

    /// Numeric precision for contributions.
    #[must_use]
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Number of products in the market.
    #[must_use]
    pub fn products(&self) -> usize {
        self.delta.len()
    }
}

/// Splits economy-wide arrays into per-market work items.
#[derive(Debug)]
pub struct Partitioner<'a> {
    simulation: &'a Simulation,
    prices: &'a [f64],
    shares: &'a [f64],
    delta: &'a [f64],
    x2: Vec<Vec<f64>>,
    moments: Arc<MomentSet>,
    precision: Precision,
}

impl<'a> Partitioner<'a> {
    /// Create a partitioner over overlaid prices, shares and mean utilities.
    ///
    /// All three slices must be row-aligned with the simulation's product panel.
    #[must_use]
    pub fn new(
        simulation: &'a Simulation,
        prices: &'a [f64],
        shares: &'a [f64],
        delta: &'a [f64],
        moments: Arc<MomentSet>,
        precision: Precision,
    ) -> Self {
        Self {
            simulation,
            prices,
            shares,
            delta,
            x2: simulation.compute_true_x2(prices),
            moments,
            precision,
        }
    }

    /// Markets in canonical order.
    #[must_use]
    pub fn market_ids(&self) -> &'a [MarketId] {
        self.simulation.unique_market_ids()
    }

    /// The validated moments shared by every work item.
    #[must_use]
    pub fn moments(&self) -> &MomentSet {
        &self.moments
    }

    /// Build the work item for one market.
    #[must_use]
    pub fn work_item(&self, market: &MarketId) -> MarketWorkItem {
        let rows = self.simulation.product_rows(market);
        let agents = self.simulation.agent_data();
        let agent_rows = self.simulation.agent_rows(market);
        MarketWorkItem {
            market_id: market.clone(),
            prices: pick(self.prices, rows),
            shares: pick(self.shares, rows),
            delta: pick(self.delta, rows),
            x2: rows.iter().map(|&r| self.x2[r].clone()).collect(),
            agent_weights: pick(&agents.weights, agent_rows),
            agent_nodes: agent_rows.iter().map(|&r| agents.nodes[r].clone()).collect(),
            agent_demographics: agent_rows.iter().map(|&r| agents.demographics[r].clone()).collect(),
            parameters: Arc::clone(self.simulation.parameters()),
            moments: Arc::clone(&self.moments),
            precision: self.precision,
        }
    }
}

fn pick(values: &[f64], rows: &[usize]) -> Vec<f64> {
    rows.iter().map(|&r| values[r]).collect()
}
