//! The source simulation: product and agent panels plus structural parameters.
//!
//! A [`Simulation`] is the immutable parent of every [`crate::SimulationResults`].
//! It owns the canonical market ordering and the per-market row indices that
//! the partitioner uses to slice the panels.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::formulation::Formulation;
use crate::market::MarketId;

/// One column of a design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesignColumn {
    /// A column of ones.
    Constant,
    /// The (possibly overlaid) price column.
    Prices,
    /// A column taken from the product characteristics by position.
    Characteristic(usize),
}

/// Product panel: one row per product-market observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProductData {
    /// Market of each row.
    pub market_ids: Vec<MarketId>,
    /// Prices.
    pub prices: Vec<f64>,
    /// Market shares.
    pub shares: Vec<f64>,
    /// Exogenous product characteristics, one vector per row.
    pub characteristics: Vec<Vec<f64>>,
}

impl ProductData {
    /// Number of product-market rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.market_ids.len()
    }

    /// Returns true if the panel has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.market_ids.is_empty()
    }
}

/// Agent panel used for numerical integration within markets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentData {
    /// Market of each agent.
    pub market_ids: Vec<MarketId>,
    /// Integration weights.
    pub weights: Vec<f64>,
    /// Unobserved taste draws, one entry per X2 column.
    pub nodes: Vec<Vec<f64>>,
    /// Observed demographics.
    pub demographics: Vec<Vec<f64>>,
}

impl AgentData {
    /// Number of agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.market_ids.len()
    }

    /// Returns true if there are no agents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.market_ids.is_empty()
    }
}

/// Economy-level structural parameters shared read-only by every market.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EconomyParameters {
    /// Linear coefficients on X1.
    pub beta: Vec<f64>,
    /// Cholesky root of the covariance of unobserved tastes, `K2 x K2`.
    pub sigma: Vec<Vec<f64>>,
    /// Interactions of X2 with demographics, `K2 x D`.
    pub pi: Vec<Vec<f64>>,
}

impl EconomyParameters {
    /// Agent-specific taste deviations `sigma * nodes + pi * demographics`.
    #[must_use]
    pub fn agent_tastes(&self, nodes: &[f64], demographics: &[f64]) -> Vec<f64> {
        let k2 = self.sigma.len();
        let mut tastes = vec![0.0; k2];
        for (k, taste) in tastes.iter_mut().enumerate() {
            *taste = dot(&self.sigma[k], nodes);
            if let Some(row) = self.pi.get(k) {
                *taste += dot(row, demographics);
            }
        }
        tastes
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A solved-for simulation of synthetic BLP data.
#[derive(Debug, Clone)]
pub struct Simulation {
    products: ProductData,
    agents: AgentData,
    x1: Vec<DesignColumn>,
    x2: Vec<DesignColumn>,
    parameters: Arc<EconomyParameters>,
    xi: Vec<f64>,
    product_formulations: Vec<Option<Formulation>>,
    agent_formulation: Option<Formulation>,
    unique_market_ids: Vec<MarketId>,
    product_market_indices: HashMap<MarketId, Vec<usize>>,
    agent_market_indices: HashMap<MarketId, Vec<usize>>,
}

impl Simulation {
    /// Start building a simulation.
    #[must_use]
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::default()
    }

    /// Product panel as simulated (before any price/share overlay).
    #[must_use]
    pub fn product_data(&self) -> &ProductData {
        &self.products
    }

    /// Agent panel.
    #[must_use]
    pub fn agent_data(&self) -> &AgentData {
        &self.agents
    }

    /// Shared structural parameters.
    #[must_use]
    pub fn parameters(&self) -> &Arc<EconomyParameters> {
        &self.parameters
    }

    /// Latent structural error term, one entry per product row.
    #[must_use]
    pub fn xi(&self) -> &[f64] {
        &self.xi
    }

    /// Number of X2 columns.
    #[must_use]
    pub fn k2(&self) -> usize {
        self.x2.len()
    }

    /// Number of demographic variables per agent.
    #[must_use]
    pub fn demographics_width(&self) -> usize {
        self.agents.demographics.first().map_or(0, Vec::len)
    }

    /// Product formulations, passed through untouched to problem construction.
    #[must_use]
    pub fn product_formulations(&self) -> &[Option<Formulation>] {
        &self.product_formulations
    }

    /// Agent formulation, if any.
    #[must_use]
    pub fn agent_formulation(&self) -> Option<&Formulation> {
        self.agent_formulation.as_ref()
    }

    /// Distinct market identifiers in canonical (sorted) order.
    #[must_use]
    pub fn unique_market_ids(&self) -> &[MarketId] {
        &self.unique_market_ids
    }

    /// Product rows belonging to a market.
    #[must_use]
    pub fn product_rows(&self, market: &MarketId) -> &[usize] {
        self.product_market_indices.get(market).map_or(&[], Vec::as_slice)
    }

    /// Agent rows belonging to a market.
    #[must_use]
    pub fn agent_rows(&self, market: &MarketId) -> &[usize] {
        self.agent_market_indices.get(market).map_or(&[], Vec::as_slice)
    }

    /// Returns true if the market appears in the product panel.
    #[must_use]
    pub fn has_market(&self, market: &MarketId) -> bool {
        self.product_market_indices.contains_key(market)
    }

    /// The true X1 design matrix evaluated with the given prices.
    #[must_use]
    pub fn compute_true_x1(&self, prices: &[f64]) -> Vec<Vec<f64>> {
        self.evaluate(&self.x1, prices)
    }

    /// The true X2 design matrix evaluated with the given prices.
    #[must_use]
    pub fn compute_true_x2(&self, prices: &[f64]) -> Vec<Vec<f64>> {
        self.evaluate(&self.x2, prices)
    }

    fn evaluate(&self, columns: &[DesignColumn], prices: &[f64]) -> Vec<Vec<f64>> {
        self.products
            .characteristics
            .iter()
            .zip(prices)
            .map(|(row, &price)| {
                columns
                    .iter()
                    .map(|column| match column {
                        DesignColumn::Constant => 1.0,
                        DesignColumn::Prices => price,
                        DesignColumn::Characteristic(idx) => row[*idx],
                    })
                    .collect()
            })
            .collect()
    }
}

fn index_by_market(market_ids: &[MarketId]) -> HashMap<MarketId, Vec<usize>> {
    let mut indices: HashMap<MarketId, Vec<usize>> = HashMap::new();
    for (row, market) in market_ids.iter().enumerate() {
        indices.entry(market.clone()).or_default().push(row);
    }
    indices
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidSimulation {
        reason: reason.into(),
    }
}

/// Builder for [`Simulation`].
#[derive(Debug, Clone, Default)]
pub struct SimulationBuilder {
    products: Option<ProductData>,
    agents: Option<AgentData>,
    x1: Vec<DesignColumn>,
    x2: Vec<DesignColumn>,
    beta: Vec<f64>,
    sigma: Option<Vec<Vec<f64>>>,
    pi: Option<Vec<Vec<f64>>>,
    xi: Option<Vec<f64>>,
    product_formulations: Vec<Option<Formulation>>,
    agent_formulation: Option<Formulation>,
}

impl SimulationBuilder {
    /// Set the product panel.
    #[must_use]
    pub fn products(mut self, products: ProductData) -> Self {
        self.products = Some(products);
        self
    }

    /// Set the agent panel.
    #[must_use]
    pub fn agents(mut self, agents: AgentData) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Set the X1 layout and its coefficients.
    #[must_use]
    pub fn linear(mut self, x1: Vec<DesignColumn>, beta: Vec<f64>) -> Self {
        self.x1 = x1;
        self.beta = beta;
        self
    }

    /// Set the X2 layout.
    #[must_use]
    pub fn nonlinear(mut self, x2: Vec<DesignColumn>) -> Self {
        self.x2 = x2;
        self
    }

    /// Set sigma (`K2 x K2`). Defaults to zeros.
    #[must_use]
    pub fn sigma(mut self, sigma: Vec<Vec<f64>>) -> Self {
        self.sigma = Some(sigma);
        self
    }

    /// Set pi (`K2 x D`). Defaults to zeros.
    #[must_use]
    pub fn pi(mut self, pi: Vec<Vec<f64>>) -> Self {
        self.pi = Some(pi);
        self
    }

    /// Set the structural error term. Defaults to zeros.
    #[must_use]
    pub fn xi(mut self, xi: Vec<f64>) -> Self {
        self.xi = Some(xi);
        self
    }

    /// Set the product formulations.
    #[must_use]
    pub fn product_formulations(mut self, formulations: Vec<Option<Formulation>>) -> Self {
        self.product_formulations = formulations;
        self
    }

    /// Set the agent formulation.
    #[must_use]
    pub fn agent_formulation(mut self, formulation: Formulation) -> Self {
        self.agent_formulation = Some(formulation);
        self
    }

    /// Validate shapes and build the simulation.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidSimulation` if product data is missing or empty,
    /// columns are misaligned, parameter shapes do not match the design, no
    /// product formulation is given, or agents reference a market without products.
    pub fn build(self) -> Result<Simulation, ValidationError> {
        let products = self.products.ok_or_else(|| invalid("product data is required"))?;
        if products.is_empty() {
            return Err(invalid("product data has no rows"));
        }
        let n = products.len();
        if products.prices.len() != n || products.shares.len() != n || products.characteristics.len() != n {
            return Err(invalid(format!(
                "product columns must all have {n} rows (prices {}, shares {}, characteristics {})",
                products.prices.len(),
                products.shares.len(),
                products.characteristics.len()
            )));
        }
        if self.x1.is_empty() {
            return Err(invalid("X1 must have at least one column"));
        }
        if self.beta.len() != self.x1.len() {
            return Err(invalid(format!(
                "beta has {} entries but X1 has {} columns",
                self.beta.len(),
                self.x1.len()
            )));
        }
        for column in self.x1.iter().chain(&self.x2) {
            if let DesignColumn::Characteristic(idx) = column {
                if products.characteristics.iter().any(|row| row.len() <= *idx) {
                    return Err(invalid(format!("characteristic {idx} is missing from some rows")));
                }
            }
        }
        if self.product_formulations.iter().all(Option::is_none) {
            return Err(invalid("at least one product formulation is required"));
        }

        let xi = self.xi.unwrap_or_else(|| vec![0.0; n]);
        if xi.len() != n {
            return Err(invalid(format!("xi has {} entries, expected {n}", xi.len())));
        }

        let agents = self.agents.unwrap_or_default();
        let a = agents.len();
        if agents.weights.len() != a || agents.nodes.len() != a || agents.demographics.len() != a {
            return Err(invalid("agent columns must all have the same number of rows"));
        }
        let k2 = self.x2.len();
        let d = agents.demographics.first().map_or(0, Vec::len);
        if agents.nodes.iter().any(|row| row.len() != k2) {
            return Err(invalid(format!("agent nodes must have {k2} columns")));
        }
        if agents.demographics.iter().any(|row| row.len() != d) {
            return Err(invalid("agent demographics must have a constant width"));
        }

        let sigma = self.sigma.unwrap_or_else(|| vec![vec![0.0; k2]; k2]);
        if sigma.len() != k2 || sigma.iter().any(|row| row.len() != k2) {
            return Err(invalid(format!("sigma must be {k2} x {k2}")));
        }
        let pi = self.pi.unwrap_or_else(|| vec![vec![0.0; d]; k2]);
        if pi.len() != k2 || pi.iter().any(|row| row.len() != d) {
            return Err(invalid(format!("pi must be {k2} x {d}")));
        }

        let unique_market_ids: Vec<MarketId> = products
            .market_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let product_market_indices = index_by_market(&products.market_ids);
        let agent_market_indices = index_by_market(&agents.market_ids);
        if let Some(orphan) = agent_market_indices.keys().find(|m| !product_market_indices.contains_key(*m)) {
            return Err(invalid(format!("agents reference market {orphan} which has no products")));
        }

        Ok(Simulation {
            products,
            agents,
            x1: self.x1,
            x2: self.x2,
            parameters: Arc::new(EconomyParameters {
                beta: self.beta,
                sigma,
                pi,
            }),
            xi,
            product_formulations: self.product_formulations,
            agent_formulation: self.agent_formulation,
            unique_market_ids,
            product_market_indices,
            agent_market_indices,
        })
    }
}
