use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use blpsim::{
    AgentData, ComputeConfig, DesignColumn, Formulation, MarketId, MicroMoment, ProductData, Simulation,
    SimulationResults, SolverStats,
};

const MARKETS: i64 = 200;
const PRODUCTS: usize = 10;
const AGENTS: usize = 200;

fn make_results() -> SimulationResults {
    let mut products = ProductData::default();
    let mut agents = AgentData::default();
    for market in 0..MARKETS {
        for j in 0..PRODUCTS {
            let seed = market as f64 * 0.37 + j as f64;
            products.market_ids.push(MarketId::from(market));
            products.prices.push(1.0 + seed.sin().abs());
            products.shares.push(0.05);
            products.characteristics.push(vec![seed.cos()]);
        }
        for i in 0..AGENTS {
            let seed = market as f64 * 1.3 + i as f64 * 0.11;
            agents.market_ids.push(MarketId::from(market));
            agents.weights.push(1.0 / AGENTS as f64);
            agents.nodes.push(vec![seed.sin(), seed.cos()]);
            agents.demographics.push(vec![(3.0 * seed).sin()]);
        }
    }
    let simulation = Arc::new(
        Simulation::builder()
            .products(products)
            .agents(agents)
            .linear(
                vec![DesignColumn::Constant, DesignColumn::Prices, DesignColumn::Characteristic(0)],
                vec![-1.0, -2.0, 1.0],
            )
            .nonlinear(vec![DesignColumn::Constant, DesignColumn::Prices])
            .sigma(vec![vec![1.0, 0.0], vec![0.0, 0.5]])
            .pi(vec![vec![0.3], vec![0.0]])
            .product_formulations(vec![Some(Formulation::new("1 + prices + x"))])
            .build()
            .unwrap(),
    );

    let prices = simulation.product_data().prices.clone();
    let shares = simulation.product_data().shares.clone();
    let stats: HashMap<MarketId, SolverStats> = simulation
        .unique_market_ids()
        .iter()
        .map(|m| (m.clone(), SolverStats::new(true, 1, 1)))
        .collect();
    let now = Utc::now();
    SimulationResults::new(simulation, prices, shares, now, now, &stats).unwrap()
}

fn bench_compute_micro(c: &mut Criterion) {
    let results = make_results();
    let moments = [
        MicroMoment::products_agents_covariance(1, 0, 0.0),
        MicroMoment::demographic_expectation(0, 0, 0.0),
    ];

    let mut group = c.benchmark_group("compute_micro");
    group.throughput(Throughput::Elements(MARKETS as u64));

    for (name, config) in [
        ("sequential", ComputeConfig::sequential()),
        ("pool_4", ComputeConfig::pooled(4, 16)),
        ("pool_available", ComputeConfig {
            scheduling: blpsim::Scheduling::available_pool(),
            ..ComputeConfig::default()
        }),
    ] {
        group.bench_function(name, |b| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    let micro = results.compute_micro(&moments, &config).unwrap();
                    criterion::black_box(micro);
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

criterion_group!(micro, bench_compute_micro);
criterion_main!(micro);
