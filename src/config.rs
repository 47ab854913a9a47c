//! Computation configuration: numeric precision and market scheduling.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Floating-point precision of per-market contributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 64-bit floats.
    #[default]
    Double,
    /// Contributions are rounded through 32-bit floats.
    Single,
}

impl Precision {
    /// Round a value to this precision.
    #[must_use]
    pub fn round(self, value: f64) -> f64 {
        match self {
            Self::Double => value,
            #[allow(clippy::cast_possible_truncation)]
            Self::Single => f64::from(value as f32),
        }
    }
}

/// How market computations are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheduling {
    /// One market after another on the calling thread.
    #[default]
    Sequential,
    /// A bounded pool of worker threads.
    Pool {
        /// Number of worker threads.
        workers: usize,
        /// Maximum queued work items.
        queue_capacity: usize,
    },
}

impl Scheduling {
    /// A pool sized to the available parallelism.
    #[must_use]
    pub fn available_pool() -> Self {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self::Pool {
            workers,
            queue_capacity: workers * 4,
        }
    }
}

/// Configuration threaded into every micro moment computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Numeric precision.
    pub precision: Precision,
    /// Scheduling of market computations.
    pub scheduling: Scheduling,
}

impl ComputeConfig {
    /// Sequential double-precision computation.
    #[must_use]
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Pooled computation with the given number of workers.
    #[must_use]
    pub fn pooled(workers: usize, queue_capacity: usize) -> Self {
        Self {
            precision: Precision::Double,
            scheduling: Scheduling::Pool {
                workers,
                queue_capacity,
            },
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidComputeConfig` if the JSON is malformed or the
    /// parsed configuration fails [`ComputeConfig::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidComputeConfig {
            reason: format!("failed to parse configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// This must be called before dispatching any market work.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidComputeConfig` for a pool with zero workers or
    /// zero queue capacity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Scheduling::Pool {
            workers,
            queue_capacity,
        } = self.scheduling
        {
            if workers == 0 {
                return Err(ValidationError::InvalidComputeConfig {
                    reason: "workers must be > 0".to_string(),
                });
            }
            if queue_capacity == 0 {
                return Err(ValidationError::InvalidComputeConfig {
                    reason: "queue_capacity must be > 0".to_string(),
                });
            }
        }
        Ok(())
    }
}
