//! Error types for blpsim.
//!
//! Errors fall into three fatal families and one recoverable one:
//! - [`ValidationError`]: bad configuration, surfaced before any market work starts.
//! - [`ContractViolation`]: a producer/consumer mismatch with the solver layer.
//! - [`ExecutionError`]: the batch itself broke (a market computation panicked).
//! - [`MarketError`]: a soft numeric failure local to one market; collected, never raised.

use std::fmt;

use chrono::TimeDelta;
use thiserror::Error;

use crate::market::MarketId;

/// Validation errors that occur before any computation is dispatched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("At least one micro moment should be specified: no moments specified")]
    NoMoments,

    #[error("Micro moment {index} is invalid: {reason}")]
    InvalidMoment {
        index: usize,
        reason: String,
    },

    #[error("Micro moment {index} references unknown market {market}")]
    UnknownMarket {
        index: usize,
        market: MarketId,
    },

    #[error("Invalid compute configuration: {reason}")]
    InvalidComputeConfig {
        reason: String,
    },

    #[error("Invalid simulation: {reason}")]
    InvalidSimulation {
        reason: String,
    },
}

/// Broken assumptions between this crate and its collaborators.
///
/// These indicate programmer defects, not user-recoverable conditions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("Solver statistics are missing for market {market}")]
    MissingMarketStats {
        market: MarketId,
    },

    #[error("Length mismatch for {what}: expected {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Computation ended before it started (elapsed {elapsed})")]
    NegativeElapsed {
        elapsed: TimeDelta,
    },

    #[error("Market {market} was delivered to the aggregator more than once")]
    DuplicateMarket {
        market: MarketId,
    },

    #[error("Market {market} is not part of this moment computation")]
    UnexpectedMarket {
        market: MarketId,
    },

    #[error("{missing} market(s) never completed, first missing: {first}")]
    MarketNotVisited {
        missing: usize,
        first: MarketId,
    },
}

/// Errors raised while running a batch of market computations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Computation for market {market} panicked: {message}")]
    MarketPanicked {
        market: MarketId,
        message: String,
    },

    #[error("Market worker pool disconnected before all markets completed")]
    Disconnected,

    #[error("Failed to construct problem: {reason}")]
    ProblemConstruction {
        reason: String,
    },
}

/// A recoverable numeric failure local to one market.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("Market {market}: utilities are not finite for {count} product-agent pair(s)")]
    NonFiniteUtilities {
        market: MarketId,
        count: usize,
    },

    #[error("Market {market}: agent integration weights sum to {total}, expected a positive total")]
    DegenerateAgentWeights {
        market: MarketId,
        total: f64,
    },

    #[error("Market {market}: product at position {position} has zero choice probability mass")]
    ZeroProbabilityMass {
        market: MarketId,
        position: usize,
    },

    #[error("Market {market}: micro moment {moment} evaluated to a non-finite value")]
    NonFiniteMoment {
        market: MarketId,
        moment: usize,
    },
}

impl MarketError {
    /// The market in which the failure occurred.
    #[must_use]
    pub const fn market(&self) -> &MarketId {
        match self {
            Self::NonFiniteUtilities { market, .. }
            | Self::DegenerateAgentWeights { market, .. }
            | Self::ZeroProbabilityMass { market, .. }
            | Self::NonFiniteMoment { market, .. } => market,
        }
    }
}

/// Aggregate of every soft error collected during one batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipleErrors(pub Vec<MarketError>);

impl fmt::Display for MultipleErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "Encountered a numerical error: {}", self.0[0]);
        }
        write!(f, "Encountered {} numerical errors:", self.0.len())?;
        for (idx, err) in self.0.iter().enumerate() {
            write!(f, "\n{}. {err}", idx + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultipleErrors {}

/// Top-level error type for blpsim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlpError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl BlpError {
    /// Returns true if this is a validation (configuration) error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a contract violation.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::Contract(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

/// Result type alias for blpsim operations.
pub type BlpResult<T> = Result<T, BlpError>;
