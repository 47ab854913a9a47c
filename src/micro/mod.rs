//! Market-partitioned computation of averaged micro moments.
//!
//! One request moves through `Validating → Dispatching → Aggregating →
//! Reporting → Done`. Validation failures return before any market work is
//! scheduled. Soft market errors never leave `Aggregating` early: every market
//! is processed, then a single warning reports them all.

pub mod aggregator;
pub mod computation;
pub mod dispatcher;
pub mod work_item;

pub use aggregator::Aggregator;
pub use computation::{MarketComputation, MarketOutcome, MicroComputation};
pub use dispatcher::Dispatcher;
pub use work_item::{MarketWorkItem, Partitioner};

use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::ComputeConfig;
use crate::economy::Simulation;
use crate::error::{BlpError, BlpResult, ContractViolation, MarketError, MultipleErrors};
use crate::format::format_seconds;
use crate::moments::{MicroMoment, MomentSet};

/// Identifier attached to one micro moment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phases of a micro moment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroPhase {
    /// Checking configuration and moments.
    Validating,
    /// Scheduling market computations.
    Dispatching,
    /// Absorbing market outcomes.
    Aggregating,
    /// Reporting soft errors and timing.
    Reporting,
    /// Finished.
    Done,
}

/// Averaged micro moment values, `g_M`, with batch diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct MicroMoments {
    request_id: RequestId,
    values: Vec<f64>,
    errors: Vec<MarketError>,
    elapsed: TimeDelta,
}

impl MicroMoments {
    /// The request that produced these values.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Moment values, one per row of the column vector.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Consume into the raw column vector.
    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for a successful computation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Soft errors collected across markets, in completion order.
    #[must_use]
    pub fn errors(&self) -> &[MarketError] {
        &self.errors
    }

    /// The aggregate warning emitted for this batch, if any market failed.
    #[must_use]
    pub fn warning(&self) -> Option<MultipleErrors> {
        (!self.errors.is_empty()).then(|| MultipleErrors(self.errors.clone()))
    }

    /// Wall-clock time spent on the request.
    #[must_use]
    pub fn elapsed(&self) -> TimeDelta {
        self.elapsed
    }

    /// Stable hash of the exact bit patterns of the values.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for value in &self.values {
            hasher.update(&value.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl Index<usize> for MicroMoments {
    type Output = f64;

    fn index(&self, row: usize) -> &f64 {
        &self.values[row]
    }
}

/// Compute averaged micro moments market by market.
///
/// `prices`, `shares` and `delta` must be row-aligned with the simulation's
/// product panel.
///
/// # Errors
///
/// Validation errors for bad configuration or moments (nothing is dispatched),
/// execution errors if a market computation panics, and contract violations
/// if the dispatcher and aggregator disagree about the market set.
pub fn compute_micro_moments<C>(
    simulation: &Simulation,
    prices: &[f64],
    shares: &[f64],
    delta: &[f64],
    micro_moments: &[MicroMoment],
    config: &ComputeConfig,
    computation: &C,
) -> BlpResult<MicroMoments>
where
    C: MarketComputation + ?Sized,
{
    let request_id = RequestId::new();
    let span = info_span!("compute_micro", request = %request_id);
    let _guard = span.enter();

    info!("Computing micro moment values ...");
    let started = Utc::now();

    debug!(phase = ?MicroPhase::Validating, "micro moment phase");
    config.validate()?;
    let rows = simulation.product_data().len();
    for (what, actual) in [("prices", prices.len()), ("shares", shares.len()), ("delta", delta.len())] {
        if actual != rows {
            return Err(ContractViolation::LengthMismatch {
                what,
                expected: rows,
                actual,
            }
            .into());
        }
    }
    let moments = Arc::new(MomentSet::new(simulation, micro_moments)?);
    info!("\n{}", moments.format("Micro Moments"));

    debug!(phase = ?MicroPhase::Dispatching, markets = simulation.unique_market_ids().len(), "micro moment phase");
    let partitioner = Partitioner::new(simulation, prices, shares, delta, Arc::clone(&moments), config.precision);
    let mut aggregator = Aggregator::new(&moments, simulation.unique_market_ids());

    debug!(phase = ?MicroPhase::Aggregating, "micro moment phase");
    Dispatcher::new(config.scheduling).run(&partitioner, computation, |market, outcome| {
        debug!(market = %market, errors = outcome.errors.len(), "market completed");
        aggregator.absorb(&market, outcome).map_err(BlpError::from)
    })?;
    let (values, errors) = aggregator.finish()?;

    debug!(phase = ?MicroPhase::Reporting, "micro moment phase");
    if !errors.is_empty() {
        warn!("{}", MultipleErrors(errors.clone()));
    }
    let elapsed = Utc::now() - started;
    #[allow(clippy::cast_precision_loss)]
    let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
    info!("Finished after {}.", format_seconds(seconds));

    debug!(phase = ?MicroPhase::Done, "micro moment phase");
    Ok(MicroMoments {
        request_id,
        values,
        errors,
        elapsed,
    })
}
