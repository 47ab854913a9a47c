//! Opaque configuration objects and the downstream problem factory.
//!
//! Formulations and integration rules are parsed and interpreted elsewhere.
//! This crate only carries them through to a [`ProblemFactory`].

use serde::{Deserialize, Serialize};

use crate::economy::{AgentData, ProductData};
use crate::error::BlpResult;

/// A model formulation, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formulation {
    /// Formula text.
    pub formula: String,
    /// Fixed effects to absorb, if any.
    pub absorb: Option<String>,
}

impl Formulation {
    /// Create a formulation without absorbed fixed effects.
    #[must_use]
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            absorb: None,
        }
    }

    /// Absorb fixed effects.
    #[must_use]
    pub fn absorb(mut self, absorb: impl Into<String>) -> Self {
        self.absorb = Some(absorb.into());
        self
    }
}

/// An integration rule, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    /// Rule name, e.g. `"monte_carlo"` or `"product"`.
    pub specification: String,
    /// Number of draws or the rule's level.
    pub size: usize,
    /// Seed for random rules.
    pub seed: Option<u64>,
}

/// Inputs handed to a [`ProblemFactory`].
#[derive(Debug, Clone, Copy)]
pub struct ProblemInputs<'a> {
    /// Product formulations.
    pub product_formulations: &'a [Option<Formulation>],
    /// Product data.
    pub product_data: &'a ProductData,
    /// Agent formulation.
    pub agent_formulation: Option<&'a Formulation>,
    /// Agent data.
    pub agent_data: Option<&'a AgentData>,
    /// Integration rule. Unspecified unless overridden.
    pub integration: Option<&'a Integration>,
}

/// Builds an estimation problem from simulated data.
pub trait ProblemFactory {
    /// The problem type produced.
    type Problem;

    /// Construct the problem.
    fn build(&self, inputs: ProblemInputs<'_>) -> BlpResult<Self::Problem>;
}

/// Optional replacements for the inputs of [`crate::SimulationResults::to_problem`].
///
/// Every unset field defaults to the value held by the results or their parent simulation.
#[derive(Debug, Clone, Default)]
pub struct ProblemOverrides {
    pub(crate) product_formulations: Option<Vec<Option<Formulation>>>,
    pub(crate) product_data: Option<ProductData>,
    pub(crate) agent_formulation: Option<Formulation>,
    pub(crate) agent_data: Option<AgentData>,
    pub(crate) integration: Option<Integration>,
}

impl ProblemOverrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the product formulations.
    #[must_use]
    pub fn product_formulations(mut self, formulations: Vec<Option<Formulation>>) -> Self {
        self.product_formulations = Some(formulations);
        self
    }

    /// Override the product data.
    #[must_use]
    pub fn product_data(mut self, data: ProductData) -> Self {
        self.product_data = Some(data);
        self
    }

    /// Override the agent formulation.
    #[must_use]
    pub fn agent_formulation(mut self, formulation: Formulation) -> Self {
        self.agent_formulation = Some(formulation);
        self
    }

    /// Override the agent data.
    #[must_use]
    pub fn agent_data(mut self, data: AgentData) -> Self {
        self.agent_data = Some(data);
        self
    }

    /// Specify an integration rule.
    #[must_use]
    pub fn integration(mut self, integration: Integration) -> Self {
        self.integration = Some(integration);
        self
    }
}
