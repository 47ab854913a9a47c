//! Market identifiers and per-market solver diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque market identifier.
///
/// Identifiers are totally ordered: numeric ids sort numerically and come
/// before named ids, which sort lexicographically. This ordering defines the
/// canonical market sequence of a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarketId {
    /// Numeric identifier.
    Num(i64),
    /// Named identifier.
    Name(String),
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MarketId {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<i32> for MarketId {
    fn from(value: i32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl From<&str> for MarketId {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for MarketId {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

/// Statistics reported by the fixed-point solver for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolverStats {
    /// Whether the fixed-point iteration converged.
    pub converged: bool,
    /// Number of major iterations completed.
    pub iterations: u64,
    /// Number of contraction evaluations.
    pub evaluations: u64,
}

impl SolverStats {
    /// Convenience constructor.
    #[must_use]
    pub const fn new(converged: bool, iterations: u64, evaluations: u64) -> Self {
        Self {
            converged,
            iterations,
            evaluations,
        }
    }
}
