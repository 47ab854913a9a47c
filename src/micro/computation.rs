//! Per-market micro moment computation.
//!
//! A [`MarketComputation`] turns one [`MarketWorkItem`] into a [`MarketOutcome`].
//! Numeric failures never escape as errors: they are recorded as
//! [`MarketError`]s and the affected rows are left at zero.

use crate::economy::dot;
use crate::error::MarketError;
use crate::market::MarketId;
use crate::moments::MomentKind;

use super::work_item::MarketWorkItem;

/// Partial result of one market.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketOutcome {
    /// Raw (unnormalized) contributions, shaped like the global moment vector.
    /// Only rows the market contributes to are read.
    pub contributions: Vec<f64>,
    /// Soft errors encountered in this market.
    pub errors: Vec<MarketError>,
}

impl MarketOutcome {
    /// An all-zero outcome with no errors.
    #[must_use]
    pub fn zeros(rows: usize) -> Self {
        Self {
            contributions: vec![0.0; rows],
            errors: Vec::new(),
        }
    }
}

/// Computes one market's contribution to the micro moments.
///
/// Implementations must be pure with respect to other markets and must report
/// recoverable numeric failures through [`MarketOutcome::errors`].
pub trait MarketComputation: Send + Sync {
    /// Compute the market's outcome.
    fn compute(&self, item: &MarketWorkItem) -> MarketOutcome;
}

impl<F> MarketComputation for F
where
    F: Fn(&MarketWorkItem) -> MarketOutcome + Send + Sync,
{
    fn compute(&self, item: &MarketWorkItem) -> MarketOutcome {
        self(item)
    }
}

/// Default computation: random-coefficients logit choice probabilities
/// integrated over the market's agents.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicroComputation;

impl MarketComputation for MicroComputation {
    fn compute(&self, item: &MarketWorkItem) -> MarketOutcome {
        let moments = item.moments();
        let market = item.market_id();
        let mut outcome = MarketOutcome::zeros(moments.rows());
        if moments.market_indices(market).is_empty() {
            return outcome;
        }

        let total_weight: f64 = item.agent_weights().iter().sum();
        if !(total_weight.is_finite() && total_weight > 0.0) {
            outcome.errors.push(MarketError::DegenerateAgentWeights {
                market: market.clone(),
                total: total_weight,
            });
            return outcome;
        }

        let probabilities = match choice_probabilities(item) {
            Ok(p) => p,
            Err(err) => {
                outcome.errors.push(err);
                return outcome;
            }
        };

        for (index, moment) in moments.moments().iter().enumerate() {
            if !moments.draws_from(index, market) {
                continue;
            }
            let statistic = match moment.kind {
                MomentKind::ProductsAgentsCovariance {
                    x2_index,
                    demographics_index,
                } => Ok(products_agents_covariance(
                    item,
                    &probabilities,
                    total_weight,
                    x2_index,
                    demographics_index,
                )),
                MomentKind::DemographicExpectation {
                    product_position,
                    demographics_index,
                } => demographic_expectation(item, &probabilities, product_position, demographics_index),
            };
            match statistic.map(|value| item.precision().round(value - moment.value)) {
                Ok(contribution) if contribution.is_finite() => {
                    for row in moments.moment_rows(index) {
                        outcome.contributions[row] = contribution;
                    }
                }
                Ok(_) => outcome.errors.push(MarketError::NonFiniteMoment {
                    market: market.clone(),
                    moment: index,
                }),
                Err(err) => outcome.errors.push(err),
            }
        }
        outcome
    }
}

/// Choice probabilities indexed `[product][agent]`, with an outside good of utility zero.
fn choice_probabilities(item: &MarketWorkItem) -> Result<Vec<Vec<f64>>, MarketError> {
    let products = item.products();
    let agents = item.agent_weights().len();
    let tastes: Vec<Vec<f64>> = item
        .agent_nodes()
        .iter()
        .zip(item.agent_demographics())
        .map(|(nodes, demographics)| item.parameters().agent_tastes(nodes, demographics))
        .collect();

    let mut utilities = vec![vec![0.0; agents]; products];
    let mut non_finite = 0;
    for (j, row) in utilities.iter_mut().enumerate() {
        for (i, utility) in row.iter_mut().enumerate() {
            *utility = item.delta()[j] + dot(&item.x2()[j], &tastes[i]);
            if !utility.is_finite() {
                non_finite += 1;
            }
        }
    }
    if non_finite > 0 {
        return Err(MarketError::NonFiniteUtilities {
            market: item.market_id().clone(),
            count: non_finite,
        });
    }

    for i in 0..agents {
        let shift = utilities.iter().map(|row| row[i]).fold(0.0_f64, f64::max);
        let mut denominator = (-shift).exp();
        for row in &mut utilities {
            row[i] = (row[i] - shift).exp();
            denominator += row[i];
        }
        for row in &mut utilities {
            row[i] /= denominator;
        }
    }
    Ok(utilities)
}

/// Weighted covariance between the probability-averaged X2 column and a demographic.
fn products_agents_covariance(
    item: &MarketWorkItem,
    probabilities: &[Vec<f64>],
    total_weight: f64,
    x2_index: usize,
    demographics_index: usize,
) -> f64 {
    let weights = item.agent_weights();
    let z: Vec<f64> = (0..weights.len())
        .map(|i| {
            probabilities
                .iter()
                .zip(item.x2())
                .map(|(s, x2)| s[i] * x2[x2_index])
                .sum()
        })
        .collect();
    let d: Vec<f64> = item
        .agent_demographics()
        .iter()
        .map(|row| row[demographics_index])
        .collect();

    let z_mean = dot(weights, &z) / total_weight;
    let d_mean = dot(weights, &d) / total_weight;
    weights
        .iter()
        .zip(z.iter().zip(&d))
        .map(|(w, (z, d))| w * (z - z_mean) * (d - d_mean))
        .sum::<f64>()
        / total_weight
}

/// Expected demographic among agents choosing the product at `product_position`.
fn demographic_expectation(
    item: &MarketWorkItem,
    probabilities: &[Vec<f64>],
    product_position: usize,
    demographics_index: usize,
) -> Result<f64, MarketError> {
    let s = &probabilities[product_position];
    let weights = item.agent_weights();
    let mass: f64 = weights.iter().zip(s).map(|(w, s)| w * s).sum();
    if mass <= 0.0 {
        return Err(zero_mass(item.market_id(), product_position));
    }
    let weighted: f64 = weights
        .iter()
        .zip(s)
        .zip(item.agent_demographics())
        .map(|((w, s), d)| w * s * d[demographics_index])
        .sum();
    Ok(weighted / mass)
}

fn zero_mass(market: &MarketId, position: usize) -> MarketError {
    MarketError::ZeroProbabilityMass {
        market: market.clone(),
        position,
    }
}
