//! Economy-level structuring of simulation results.
//!
//! [`SimulationResults`] is built once from the fixed-point solver's outputs.
//! It holds a copy of the product panel with the solved prices and shares,
//! the implied mean utility, and per-market convergence diagnostics in
//! canonical market order. Micro moments are computed on demand from it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ComputeConfig;
use crate::economy::{dot, ProductData, Simulation};
use crate::error::{BlpResult, ContractViolation};
use crate::format::{format_seconds, TableFormatter};
use crate::formulation::{ProblemFactory, ProblemInputs, ProblemOverrides};
use crate::market::{MarketId, SolverStats};
use crate::micro::{compute_micro_moments, MarketComputation, MicroComputation, MicroMoments};
use crate::moments::MicroMoment;

/// Results of a solved simulation of synthetic BLP data.
#[derive(Debug, Clone)]
pub struct SimulationResults {
    simulation: Arc<Simulation>,
    product_data: ProductData,
    delta: Vec<f64>,
    computation_time: TimeDelta,
    fp_converged: Vec<bool>,
    fp_iterations: Vec<u64>,
    contraction_evaluations: Vec<u64>,
}

/// Totals shown in the results summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    /// Seconds spent computing prices and shares.
    pub computation_seconds: f64,
    /// Fixed point iterations summed over markets.
    pub fp_iterations: u64,
    /// Contraction evaluations summed over markets.
    pub contraction_evaluations: u64,
    /// Markets whose fixed point did not converge.
    pub unconverged_markets: usize,
}

impl SimulationResults {
    /// Structure solver outputs.
    ///
    /// # Errors
    ///
    /// Contract violations if `prices` or `shares` are not row-aligned with the
    /// simulation's products, if `end` precedes `start`, or if `iteration_stats`
    /// lacks an entry for any market.
    pub fn new(
        simulation: Arc<Simulation>,
        prices: Vec<f64>,
        shares: Vec<f64>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        iteration_stats: &HashMap<MarketId, SolverStats>,
    ) -> BlpResult<Self> {
        let rows = simulation.product_data().len();
        for (what, actual) in [("prices", prices.len()), ("shares", shares.len())] {
            if actual != rows {
                return Err(ContractViolation::LengthMismatch {
                    what,
                    expected: rows,
                    actual,
                }
                .into());
            }
        }

        let computation_time = end - start;
        if computation_time < TimeDelta::zero() {
            return Err(ContractViolation::NegativeElapsed {
                elapsed: computation_time,
            }
            .into());
        }

        let stats = simulation
            .unique_market_ids()
            .iter()
            .map(|market| {
                iteration_stats
                    .get(market)
                    .copied()
                    .ok_or_else(|| ContractViolation::MissingMarketStats { market: market.clone() })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut product_data = simulation.product_data().clone();
        product_data.prices = prices;
        product_data.shares = shares;

        let beta = &simulation.parameters().beta;
        let delta = simulation
            .compute_true_x1(&product_data.prices)
            .iter()
            .zip(simulation.xi())
            .map(|(x1, xi)| dot(x1, beta) + xi)
            .collect();

        Ok(Self {
            product_data,
            delta,
            computation_time,
            fp_converged: stats.iter().map(|s| s.converged).collect(),
            fp_iterations: stats.iter().map(|s| s.iterations).collect(),
            contraction_evaluations: stats.iter().map(|s| s.evaluations).collect(),
            simulation,
        })
    }

    /// The simulation that produced these results.
    #[must_use]
    pub fn simulation(&self) -> &Arc<Simulation> {
        &self.simulation
    }

    /// Product data updated with the solved prices and shares.
    #[must_use]
    pub fn product_data(&self) -> &ProductData {
        &self.product_data
    }

    /// Simulated mean utility, row-aligned with the product panel.
    #[must_use]
    pub fn delta(&self) -> &[f64] {
        &self.delta
    }

    /// Time spent computing prices and shares.
    #[must_use]
    pub fn computation_time(&self) -> TimeDelta {
        self.computation_time
    }

    /// Time spent computing prices and shares, in seconds.
    #[must_use]
    pub fn computation_seconds(&self) -> f64 {
        let micros = self.computation_time.num_microseconds().unwrap_or(i64::MAX);
        #[allow(clippy::cast_precision_loss)]
        let seconds = micros as f64 / 1e6;
        seconds
    }

    /// Convergence flags per market, in canonical market order.
    #[must_use]
    pub fn fp_converged(&self) -> &[bool] {
        &self.fp_converged
    }

    /// Fixed point iterations per market, in canonical market order.
    #[must_use]
    pub fn fp_iterations(&self) -> &[u64] {
        &self.fp_iterations
    }

    /// Contraction evaluations per market, in canonical market order.
    #[must_use]
    pub fn contraction_evaluations(&self) -> &[u64] {
        &self.contraction_evaluations
    }

    /// Summary totals.
    #[must_use]
    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            computation_seconds: self.computation_seconds(),
            fp_iterations: self.fp_iterations.iter().sum(),
            contraction_evaluations: self.contraction_evaluations.iter().sum(),
            unconverged_markets: self.fp_converged.iter().filter(|c| !**c).count(),
        }
    }

    /// Convert the solved simulation into an estimation problem.
    ///
    /// Unset overrides default to the simulation's product formulations, these
    /// results' product data, and the simulation's agent formulation and agent
    /// data. The integration rule is unspecified unless overridden.
    ///
    /// # Errors
    ///
    /// Whatever the factory reports when the problem cannot be constructed.
    pub fn to_problem<F: ProblemFactory>(&self, overrides: &ProblemOverrides, factory: &F) -> BlpResult<F::Problem> {
        let agent_data = overrides
            .agent_data
            .as_ref()
            .or_else(|| Some(self.simulation.agent_data()).filter(|a| !a.is_empty()));
        factory.build(ProblemInputs {
            product_formulations: overrides
                .product_formulations
                .as_deref()
                .unwrap_or_else(|| self.simulation.product_formulations()),
            product_data: overrides.product_data.as_ref().unwrap_or(&self.product_data),
            agent_formulation: overrides
                .agent_formulation
                .as_ref()
                .or_else(|| self.simulation.agent_formulation()),
            agent_data,
            integration: overrides.integration.as_ref(),
        })
    }

    /// Compute averaged micro moment values, `g_M`.
    ///
    /// Typically used to compute the values that micro moments aim to match,
    /// by giving each moment a target value of zero.
    ///
    /// # Errors
    ///
    /// `ValidationError::NoMoments` for an empty list, with nothing dispatched.
    pub fn compute_micro(&self, micro_moments: &[MicroMoment], config: &ComputeConfig) -> BlpResult<MicroMoments> {
        self.compute_micro_with(micro_moments, config, &MicroComputation)
    }

    /// Compute micro moments with a custom per-market computation.
    ///
    /// # Errors
    ///
    /// Same as [`SimulationResults::compute_micro`], plus an execution error if
    /// `computation` panics for any market.
    pub fn compute_micro_with<C>(
        &self,
        micro_moments: &[MicroMoment],
        config: &ComputeConfig,
        computation: &C,
    ) -> BlpResult<MicroMoments>
    where
        C: MarketComputation + ?Sized,
    {
        compute_micro_moments(
            &self.simulation,
            &self.product_data.prices,
            &self.product_data.shares,
            &self.delta,
            micro_moments,
            config,
            computation,
        )
    }
}

impl fmt::Display for SimulationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = [("Computation", "Time"), ("Fixed Point", "Iterations"), ("Contraction", "Evaluations")];
        let widths = header.iter().map(|(a, b)| a.len().max(b.len())).collect();
        let formatter = TableFormatter::new(widths);
        let summary = self.summary();
        let lines = [
            "Simulation Results Summary:".to_string(),
            formatter.line(),
            formatter.row(&header.map(|(a, _)| a), false),
            formatter.row(&header.map(|(_, b)| b), true),
            formatter.row(
                &[
                    format_seconds(summary.computation_seconds),
                    summary.fp_iterations.to_string(),
                    summary.contraction_evaluations.to_string(),
                ],
                false,
            ),
            formatter.line(),
        ];
        f.write_str(&lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::{AgentData, DesignColumn};
    use crate::error::{BlpError, ExecutionError};
    use crate::formulation::{Formulation, Integration};

    fn simulation() -> Arc<Simulation> {
        Arc::new(
            Simulation::builder()
                .products(ProductData {
                    market_ids: vec![MarketId::from(2), MarketId::from(1), MarketId::from(2)],
                    prices: vec![1.0, 1.0, 1.0],
                    shares: vec![0.1, 0.1, 0.1],
                    characteristics: vec![vec![2.0], vec![3.0], vec![4.0]],
                })
                .agents(AgentData {
                    market_ids: vec![MarketId::from(1), MarketId::from(2)],
                    weights: vec![1.0, 1.0],
                    nodes: vec![vec![0.0], vec![0.0]],
                    demographics: vec![vec![1.0], vec![2.0]],
                })
                .linear(
                    vec![DesignColumn::Constant, DesignColumn::Prices, DesignColumn::Characteristic(0)],
                    vec![1.0, -2.0, 0.5],
                )
                .nonlinear(vec![DesignColumn::Prices])
                .xi(vec![0.1, 0.2, 0.3])
                .product_formulations(vec![Some(Formulation::new("1 + prices + x")), None])
                .agent_formulation(Formulation::new("income"))
                .build()
                .unwrap(),
        )
    }

    fn stats() -> HashMap<MarketId, SolverStats> {
        HashMap::from([
            (MarketId::from(1), SolverStats::new(true, 5, 7)),
            (MarketId::from(2), SolverStats::new(false, 11, 13)),
        ])
    }

    fn results() -> SimulationResults {
        let start = Utc::now();
        SimulationResults::new(
            simulation(),
            vec![3.0, 4.0, 5.0],
            vec![0.2, 0.3, 0.4],
            start,
            start + TimeDelta::milliseconds(2500),
            &stats(),
        )
        .unwrap()
    }

    #[test]
    fn overlays_prices_and_shares_without_touching_parent() {
        let results = results();
        assert_eq!(results.product_data().prices, vec![3.0, 4.0, 5.0]);
        assert_eq!(results.product_data().shares, vec![0.2, 0.3, 0.4]);
        assert_eq!(results.simulation().product_data().prices, vec![1.0, 1.0, 1.0]);
        assert_eq!(results.simulation().product_data().shares, vec![0.1, 0.1, 0.1]);
    }

    #[test]
    fn delta_uses_overlaid_prices() {
        let results = results();
        let expected = [1.0 - 6.0 + 1.0 + 0.1, 1.0 - 8.0 + 1.5 + 0.2, 1.0 - 10.0 + 2.0 + 0.3];
        for (got, want) in results.delta().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn diagnostics_follow_canonical_market_order() {
        let results = results();
        assert_eq!(results.fp_converged(), &[true, false]);
        assert_eq!(results.fp_iterations(), &[5, 11]);
        assert_eq!(results.contraction_evaluations(), &[7, 13]);
    }

    #[test]
    fn computation_time_is_exact_difference() {
        let results = results();
        assert_eq!(results.computation_time(), TimeDelta::milliseconds(2500));
        assert!((results.computation_seconds() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn negative_elapsed_is_rejected() {
        let start = Utc::now();
        let err = SimulationResults::new(
            simulation(),
            vec![1.0; 3],
            vec![0.1; 3],
            start,
            start - TimeDelta::seconds(1),
            &stats(),
        )
        .unwrap_err();
        assert!(matches!(err, BlpError::Contract(ContractViolation::NegativeElapsed { .. })));
    }

    #[test]
    fn missing_market_stats_is_rejected() {
        let start = Utc::now();
        let mut partial = stats();
        partial.remove(&MarketId::from(2));
        let err = SimulationResults::new(simulation(), vec![1.0; 3], vec![0.1; 3], start, start, &partial)
            .unwrap_err();
        assert_eq!(
            err,
            BlpError::Contract(ContractViolation::MissingMarketStats {
                market: MarketId::from(2)
            })
        );
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let start = Utc::now();
        let err = SimulationResults::new(simulation(), vec![1.0; 2], vec![0.1; 3], start, start, &stats())
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn summary_sums_diagnostics() {
        let summary = results().summary();
        assert_eq!(summary.fp_iterations, 16);
        assert_eq!(summary.contraction_evaluations, 20);
        assert_eq!(summary.unconverged_markets, 1);
    }

    #[test]
    fn display_renders_summary_table() {
        let text = results().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Simulation Results Summary:");
        assert_eq!(lines[1], "===========  ===========  ===========");
        assert_eq!(lines[2], "Computation  Fixed Point  Contraction");
        assert_eq!(lines[3], "   Time      Iterations   Evaluations");
        assert_eq!(lines[5], "  0:00:03        16           20     ");
        assert_eq!(lines.len(), 7);
    }

    struct RecordingFactory;

    #[derive(Debug)]
    struct Recorded {
        formulations: usize,
        prices: Vec<f64>,
        agent_formulation: Option<String>,
        agents: Option<usize>,
        integration: Option<String>,
    }

    impl ProblemFactory for RecordingFactory {
        type Problem = Recorded;

        fn build(&self, inputs: ProblemInputs<'_>) -> BlpResult<Recorded> {
            if inputs.product_formulations.iter().all(Option::is_none) {
                return Err(ExecutionError::ProblemConstruction {
                    reason: "no product formulation".to_string(),
                }
                .into());
            }
            Ok(Recorded {
                formulations: inputs.product_formulations.len(),
                prices: inputs.product_data.prices.clone(),
                agent_formulation: inputs.agent_formulation.map(|f| f.formula.clone()),
                agents: inputs.agent_data.map(AgentData::len),
                integration: inputs.integration.map(|i| i.specification.clone()),
            })
        }
    }

    #[test]
    fn to_problem_defaults_to_held_fields() {
        let results = results();
        let problem = results.to_problem(&ProblemOverrides::new(), &RecordingFactory).unwrap();
        assert_eq!(problem.formulations, 2);
        assert_eq!(problem.prices, vec![3.0, 4.0, 5.0]);
        assert_eq!(problem.agent_formulation.as_deref(), Some("income"));
        assert_eq!(problem.agents, Some(2));
        assert_eq!(problem.integration, None);
    }

    #[test]
    fn to_problem_applies_overrides() {
        let results = results();
        let overrides = ProblemOverrides::new()
            .product_formulations(vec![Some(Formulation::new("prices"))])
            .product_data(results.simulation().product_data().clone())
            .integration(Integration {
                specification: "product".to_string(),
                size: 5,
                seed: None,
            });
        let problem = results.to_problem(&overrides, &RecordingFactory).unwrap();
        assert_eq!(problem.formulations, 1);
        assert_eq!(problem.prices, vec![1.0, 1.0, 1.0]);
        assert_eq!(problem.integration.as_deref(), Some("product"));

        let err = results
            .to_problem(&ProblemOverrides::new().product_formulations(vec![None]), &RecordingFactory)
            .unwrap_err();
        assert!(err.is_execution());
    }
}
