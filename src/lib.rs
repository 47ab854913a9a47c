//! # blpsim - Structured results for simulated BLP economies
//!
//! blpsim takes the prices and shares solved for a simulated random-coefficients
//! logit economy and turns them into an analyzable result: an updated product
//! panel, the implied mean utility, per-market convergence diagnostics, and
//! micro moments reduced market by market.
//!
//! ## Core Concepts
//!
//! - **Simulation**: The parent economy: products, agents and true parameters
//! - **SimulationResults**: Solved prices and shares overlaid on a copy of the product panel
//! - **MicroMoment**: A statistic over agents and products, averaged across the markets it draws from
//! - **MarketComputation**: The per-market unit of work, run sequentially or on a worker pool
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blpsim::{ComputeConfig, MicroMoment, SimulationResults};
//!
//! let results = SimulationResults::new(simulation, prices, shares, start, end, &stats)?;
//! println!("{results}");
//!
//! let moments = [MicroMoment::products_agents_covariance(0, 0, 0.0)];
//! let values = results.compute_micro(&moments, &ComputeConfig::pooled(8, 32))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod economy;
pub mod error;
pub mod format;
pub mod formulation;
pub mod market;
pub mod micro;
pub mod moments;
pub mod results;

// Re-export primary types at crate root for convenience
pub use config::{ComputeConfig, Precision, Scheduling};
pub use economy::{AgentData, DesignColumn, EconomyParameters, ProductData, Simulation, SimulationBuilder};
pub use error::{
    BlpError, BlpResult, ContractViolation, ExecutionError, MarketError, MultipleErrors, ValidationError,
};
pub use formulation::{Formulation, Integration, ProblemFactory, ProblemInputs, ProblemOverrides};
pub use market::{MarketId, SolverStats};
pub use micro::{
    compute_micro_moments, MarketComputation, MarketOutcome, MarketWorkItem, MicroComputation, MicroMoments,
    RequestId,
};
pub use moments::{MicroMoment, MomentKind, MomentSet};
pub use results::{SimulationResults, SimulationSummary};
