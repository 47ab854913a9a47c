use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};

use blpsim::{
    AgentData, BlpError, BlpResult, ContractViolation, DesignColumn, Formulation, Integration, MarketId,
    ProblemFactory, ProblemInputs, ProblemOverrides, ProductData, Simulation, SimulationResults, SimulationSummary,
    SolverStats,
};

fn named_market_simulation(with_agents: bool) -> Arc<Simulation> {
    let markets = ["delta", "alpha", "charlie", "bravo"];
    let mut products = ProductData::default();
    let mut agents = AgentData::default();
    for (t, market) in markets.iter().enumerate() {
        for j in 0..2 {
            products.market_ids.push(MarketId::from(*market));
            products.prices.push(2.0);
            products.shares.push(0.25);
            products.characteristics.push(vec![(t * 2 + j) as f64]);
        }
        if with_agents {
            agents.market_ids.push(MarketId::from(*market));
            agents.weights.push(1.0);
            agents.nodes.push(vec![0.0]);
            agents.demographics.push(vec![1.0]);
        }
    }
    let mut builder = Simulation::builder()
        .products(products)
        .linear(vec![DesignColumn::Prices, DesignColumn::Characteristic(0)], vec![-1.0, 0.25])
        .nonlinear(vec![DesignColumn::Prices])
        .product_formulations(vec![Some(Formulation::new("0 + prices + x").absorb("C(market_ids)"))]);
    if with_agents {
        builder = builder.agents(agents).agent_formulation(Formulation::new("0 + income"));
    }
    Arc::new(builder.build().unwrap())
}

fn stats_for(simulation: &Simulation) -> HashMap<MarketId, SolverStats> {
    simulation
        .unique_market_ids()
        .iter()
        .enumerate()
        .map(|(t, m)| {
            let t = t as u64;
            (m.clone(), SolverStats::new(t != 2, 10 + t, 20 + t))
        })
        .collect()
}

#[test]
fn diagnostics_have_one_entry_per_market_in_canonical_order() {
    let simulation = named_market_simulation(true);
    let stats = HashMap::from([
        (MarketId::from("alpha"), SolverStats::new(true, 1, 2)),
        (MarketId::from("bravo"), SolverStats::new(true, 3, 4)),
        (MarketId::from("charlie"), SolverStats::new(false, 5, 6)),
        (MarketId::from("delta"), SolverStats::new(true, 7, 8)),
    ]);
    let now = Utc::now();
    let prices = simulation.product_data().prices.clone();
    let shares = simulation.product_data().shares.clone();
    let results = SimulationResults::new(simulation, prices, shares, now, now, &stats).unwrap();

    assert_eq!(results.fp_converged(), &[true, true, false, true]);
    assert_eq!(results.fp_iterations(), &[1, 3, 5, 7]);
    assert_eq!(results.contraction_evaluations(), &[2, 4, 6, 8]);
    assert_eq!(results.computation_time(), TimeDelta::zero());
}

#[test]
fn results_own_an_independent_copy_of_the_product_panel() {
    let simulation = named_market_simulation(true);
    let n = simulation.product_data().len();
    let prices: Vec<f64> = (0..n).map(|i| 3.0 + i as f64).collect();
    let shares = vec![0.05; n];
    let now = Utc::now();
    let results = SimulationResults::new(
        Arc::clone(&simulation),
        prices.clone(),
        shares.clone(),
        now,
        now + TimeDelta::milliseconds(1500),
        &stats_for(&simulation),
    )
    .unwrap();

    assert_eq!(results.product_data().prices, prices);
    assert_eq!(results.product_data().shares, shares);
    assert_eq!(results.product_data().market_ids, simulation.product_data().market_ids);
    assert_eq!(results.product_data().characteristics, simulation.product_data().characteristics);
    assert!(simulation.product_data().prices.iter().all(|&p| p == 2.0));
    assert!(simulation.product_data().shares.iter().all(|&s| s == 0.25));

    for (row, delta) in results.delta().iter().enumerate() {
        let x = simulation.product_data().characteristics[row][0];
        assert!((delta - (-prices[row] + 0.25 * x)).abs() < 1e-12);
    }
    assert!((results.computation_seconds() - 1.5).abs() < 1e-12);
}

#[test]
fn invalid_solver_outputs_are_contract_violations() {
    let simulation = named_market_simulation(true);
    let n = simulation.product_data().len();
    let stats = stats_for(&simulation);
    let now = Utc::now();

    let err = SimulationResults::new(
        Arc::clone(&simulation),
        vec![1.0; n],
        vec![0.1; n],
        now,
        now - TimeDelta::milliseconds(1),
        &stats,
    )
    .unwrap_err();
    assert!(matches!(err, BlpError::Contract(ContractViolation::NegativeElapsed { .. })));

    let err = SimulationResults::new(Arc::clone(&simulation), vec![1.0; n], vec![0.1; n + 1], now, now, &stats)
        .unwrap_err();
    assert_eq!(
        err,
        BlpError::Contract(ContractViolation::LengthMismatch {
            what: "shares",
            expected: n,
            actual: n + 1,
        })
    );

    let mut partial = stats;
    partial.remove(&MarketId::from("bravo"));
    let err = SimulationResults::new(simulation, vec![1.0; n], vec![0.1; n], now, now, &partial).unwrap_err();
    assert!(err.is_contract_violation());
    assert!(err.to_string().contains("bravo"));
}

#[test]
fn summary_and_display_report_totals() {
    let simulation = named_market_simulation(true);
    let n = simulation.product_data().len();
    let start = Utc::now();
    let results = SimulationResults::new(
        Arc::clone(&simulation),
        vec![2.0; n],
        vec![0.25; n],
        start,
        start + TimeDelta::seconds(3725),
        &stats_for(&simulation),
    )
    .unwrap();

    let summary = results.summary();
    assert_eq!(summary.fp_iterations, 10 + 11 + 12 + 13);
    assert_eq!(summary.contraction_evaluations, 20 + 21 + 22 + 23);
    assert_eq!(summary.unconverged_markets, 1);

    let json = serde_json::to_string(&summary).unwrap();
    let back: SimulationSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summary);

    let text = results.to_string();
    assert!(text.starts_with("Simulation Results Summary:"));
    assert!(text.contains("1:02:05"));
    assert!(text.contains("46"));
    assert!(text.contains("86"));
}

/// Records what it was handed instead of building a real problem.
struct EchoFactory;

#[derive(Debug)]
struct Echo {
    formulas: Vec<Option<String>>,
    prices: Vec<f64>,
    agent_formula: Option<String>,
    agent_count: Option<usize>,
    integration: Option<Integration>,
}

impl ProblemFactory for EchoFactory {
    type Problem = Echo;

    fn build(&self, inputs: ProblemInputs<'_>) -> BlpResult<Echo> {
        Ok(Echo {
            formulas: inputs
                .product_formulations
                .iter()
                .map(|f| f.as_ref().map(|f| f.formula.clone()))
                .collect(),
            prices: inputs.product_data.prices.clone(),
            agent_formula: inputs.agent_formulation.map(|f| f.formula.clone()),
            agent_count: inputs.agent_data.map(AgentData::len),
            integration: inputs.integration.cloned(),
        })
    }
}

#[test]
fn to_problem_defaults_and_overrides() {
    let simulation = named_market_simulation(true);
    let n = simulation.product_data().len();
    let now = Utc::now();
    let results = SimulationResults::new(
        Arc::clone(&simulation),
        vec![4.0; n],
        vec![0.2; n],
        now,
        now,
        &stats_for(&simulation),
    )
    .unwrap();

    let problem = results.to_problem(&ProblemOverrides::new(), &EchoFactory).unwrap();
    assert_eq!(problem.formulas, vec![Some("0 + prices + x".to_string())]);
    assert_eq!(problem.prices, vec![4.0; n]);
    assert_eq!(problem.agent_formula.as_deref(), Some("0 + income"));
    assert_eq!(problem.agent_count, Some(4));
    assert!(problem.integration.is_none());

    let integration = Integration {
        specification: "monte_carlo".to_string(),
        size: 50,
        seed: Some(0),
    };
    let overrides = ProblemOverrides::new()
        .agent_formulation(Formulation::new("0 + age"))
        .agent_data(AgentData::default())
        .integration(integration.clone());
    let problem = results.to_problem(&overrides, &EchoFactory).unwrap();
    assert_eq!(problem.agent_formula.as_deref(), Some("0 + age"));
    assert_eq!(problem.agent_count, Some(0));
    assert_eq!(problem.integration, Some(integration));
    assert_eq!(problem.prices, vec![4.0; n]);
}

#[test]
fn to_problem_without_agents_passes_none() {
    let simulation = named_market_simulation(false);
    let n = simulation.product_data().len();
    let now = Utc::now();
    let results = SimulationResults::new(
        Arc::clone(&simulation),
        vec![1.0; n],
        vec![0.2; n],
        now,
        now,
        &stats_for(&simulation),
    )
    .unwrap();
    let problem = results.to_problem(&ProblemOverrides::new(), &EchoFactory).unwrap();
    assert!(problem.agent_formula.is_none());
    assert!(problem.agent_count.is_none());
}
