//! Micro moment specifications and their validated, market-indexed structure.
//!
//! A [`MicroMoment`] names a statistic to compute. [`MomentSet::new`] checks a
//! list of them against a [`Simulation`], assigns each a range of global rows,
//! and records, per market, which rows that market feeds and the count used to
//! normalize its contribution.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::economy::Simulation;
use crate::error::ValidationError;
use crate::format::TableFormatter;
use crate::market::MarketId;

/// The statistic a micro moment measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MomentKind {
    /// Covariance between an X2 characteristic, averaged over each agent's
    /// choice probabilities, and an agent demographic.
    ProductsAgentsCovariance {
        /// Column of X2.
        x2_index: usize,
        /// Column of the agent demographics.
        demographics_index: usize,
    },
    /// Expected value of a demographic among agents who choose a product.
    DemographicExpectation {
        /// Position of the product within each market.
        product_position: usize,
        /// Column of the agent demographics.
        demographics_index: usize,
    },
}

impl MomentKind {
    /// Number of rows this kind occupies in the moment vector.
    #[must_use]
    pub const fn rows(&self) -> usize {
        match self {
            Self::ProductsAgentsCovariance { .. } | Self::DemographicExpectation { .. } => 1,
        }
    }

    /// Short label used in formatted output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ProductsAgentsCovariance { .. } => "Covariance",
            Self::DemographicExpectation { .. } => "Expectation",
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::ProductsAgentsCovariance {
                x2_index,
                demographics_index,
            } => format!("Cov(X2 #{x2_index}, Demographic #{demographics_index})"),
            Self::DemographicExpectation {
                product_position,
                demographics_index,
            } => format!("E[Demographic #{demographics_index} | Product #{product_position}]"),
        }
    }
}

/// Configuration of one micro moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicroMoment {
    /// What is measured.
    pub kind: MomentKind,
    /// Target value subtracted from the computed statistic. Use zero to compute raw values.
    pub value: f64,
    /// Markets the moment draws from. `None` means every market.
    pub market_ids: Option<Vec<MarketId>>,
    /// Observations backing the moment in each market. Markets without an entry
    /// are normalized by the number of markets the moment draws from.
    /// Serialized as `[market, count]` pairs so numeric market ids survive JSON.
    #[serde(default, with = "observation_pairs")]
    pub observations: HashMap<MarketId, u64>,
}

impl MicroMoment {
    /// A moment of the given kind over every market.
    #[must_use]
    pub fn new(kind: MomentKind, value: f64) -> Self {
        Self {
            kind,
            value,
            market_ids: None,
            observations: HashMap::new(),
        }
    }

    /// Covariance between X2 column `x2_index` and demographic `demographics_index`.
    #[must_use]
    pub fn products_agents_covariance(x2_index: usize, demographics_index: usize, value: f64) -> Self {
        Self::new(
            MomentKind::ProductsAgentsCovariance {
                x2_index,
                demographics_index,
            },
            value,
        )
    }

    /// Expected demographic `demographics_index` among buyers of the product at `product_position`.
    #[must_use]
    pub fn demographic_expectation(product_position: usize, demographics_index: usize, value: f64) -> Self {
        Self::new(
            MomentKind::DemographicExpectation {
                product_position,
                demographics_index,
            },
            value,
        )
    }

    /// Restrict the moment to a set of markets.
    #[must_use]
    pub fn markets<I, M>(mut self, markets: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MarketId>,
    {
        self.market_ids = Some(markets.into_iter().map(Into::into).collect());
        self
    }

    /// Set the number of observations backing the moment in one market.
    #[must_use]
    pub fn observations(mut self, market: impl Into<MarketId>, count: u64) -> Self {
        self.observations.insert(market.into(), count);
        self
    }
}

mod observation_pairs {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::market::MarketId;

    pub fn serialize<S: Serializer>(observations: &HashMap<MarketId, u64>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut pairs: Vec<(&MarketId, &u64)> = observations.iter().collect();
        pairs.sort_unstable();
        serializer.collect_seq(pairs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<HashMap<MarketId, u64>, D::Error> {
        let pairs = Vec::<(MarketId, u64)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Validated micro moments, indexed by market.
#[derive(Debug, Clone)]
pub struct MomentSet {
    moments: Vec<MicroMoment>,
    row_offsets: Vec<usize>,
    rows: usize,
    moment_markets: Vec<Vec<MarketId>>,
    market_indices: HashMap<MarketId, Vec<usize>>,
    market_counts: HashMap<MarketId, Vec<f64>>,
}

impl MomentSet {
    /// Validate and structure micro moments.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::NoMoments` for an empty list, and other
    /// validation errors for moments that do not fit the simulation.
    pub fn new(simulation: &Simulation, moments: &[MicroMoment]) -> Result<Self, ValidationError> {
        if moments.is_empty() {
            return Err(ValidationError::NoMoments);
        }

        let mut row_offsets = Vec::with_capacity(moments.len());
        let mut moment_markets = Vec::with_capacity(moments.len());
        let mut market_indices: HashMap<MarketId, Vec<usize>> = HashMap::new();
        let mut market_counts: HashMap<MarketId, Vec<f64>> = HashMap::new();
        let mut rows = 0;

        for (index, moment) in moments.iter().enumerate() {
            let markets = resolve_markets(simulation, index, moment)?;
            check_kind(simulation, index, moment, &markets)?;
            if !moment.value.is_finite() {
                return Err(invalid(index, format!("target value {} is not finite", moment.value)));
            }
            for (market, &count) in &moment.observations {
                if count == 0 {
                    return Err(invalid(index, format!("observation count for market {market} is zero")));
                }
                if markets.binary_search(market).is_err() {
                    return Err(invalid(
                        index,
                        format!("observations given for market {market}, which the moment does not draw from"),
                    ));
                }
            }

            #[allow(clippy::cast_precision_loss)]
            let default_count = markets.len() as f64;
            row_offsets.push(rows);
            for market in &markets {
                #[allow(clippy::cast_precision_loss)]
                let count = moment.observations.get(market).map_or(default_count, |&c| c as f64);
                for row in rows..rows + moment.kind.rows() {
                    market_indices.entry(market.clone()).or_default().push(row);
                    market_counts.entry(market.clone()).or_default().push(count);
                }
            }
            rows += moment.kind.rows();
            moment_markets.push(markets);
        }

        Ok(Self {
            moments: moments.to_vec(),
            row_offsets,
            rows,
            moment_markets,
            market_indices,
            market_counts,
        })
    }

    /// Validated moment configurations, in input order.
    #[must_use]
    pub fn moments(&self) -> &[MicroMoment] {
        &self.moments
    }

    /// Total number of rows in the moment vector.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Global rows assigned to moment `index`.
    #[must_use]
    pub fn moment_rows(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.row_offsets[index];
        start..start + self.moments[index].kind.rows()
    }

    /// Markets moment `index` draws from, in canonical order.
    #[must_use]
    pub fn moment_markets(&self, index: usize) -> &[MarketId] {
        &self.moment_markets[index]
    }

    /// Rows a market contributes to. Empty for markets that contribute nothing.
    #[must_use]
    pub fn market_indices(&self, market: &MarketId) -> &[usize] {
        self.market_indices.get(market).map_or(&[], Vec::as_slice)
    }

    /// Normalization counts aligned with [`MomentSet::market_indices`].
    #[must_use]
    pub fn market_counts(&self, market: &MarketId) -> &[f64] {
        self.market_counts.get(market).map_or(&[], Vec::as_slice)
    }

    /// Returns true if moment `index` draws from `market`.
    #[must_use]
    pub fn draws_from(&self, index: usize, market: &MarketId) -> bool {
        self.moment_markets[index].binary_search(market).is_ok()
    }

    /// Format the moments as a fixed-width table.
    #[must_use]
    pub fn format(&self, title: &str) -> String {
        let header = ["Index", "Type", "Description", "Markets", "Value"];
        let cells: Vec<[String; 5]> = self
            .moments
            .iter()
            .enumerate()
            .map(|(index, moment)| {
                [
                    index.to_string(),
                    moment.kind.label().to_string(),
                    moment.kind.describe(),
                    self.moment_markets[index].len().to_string(),
                    format!("{:+.6E}", moment.value),
                ]
            })
            .collect();
        let widths = (0..header.len())
            .map(|col| cells.iter().map(|row| row[col].len()).chain([header[col].len()]).max().unwrap_or(0))
            .collect();
        let formatter = TableFormatter::new(widths);

        let mut lines = vec![format!("{title}:"), formatter.line(), formatter.row(&header, true)];
        lines.extend(cells.iter().map(|row| formatter.row(row, false)));
        lines.push(formatter.line());
        lines.join("\n")
    }
}

fn invalid(index: usize, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidMoment {
        index,
        reason: reason.into(),
    }
}

fn resolve_markets(
    simulation: &Simulation,
    index: usize,
    moment: &MicroMoment,
) -> Result<Vec<MarketId>, ValidationError> {
    let Some(requested) = &moment.market_ids else {
        return Ok(simulation.unique_market_ids().to_vec());
    };
    if requested.is_empty() {
        return Err(invalid(index, "market list is empty"));
    }
    if let Some(market) = requested.iter().find(|m| !simulation.has_market(m)) {
        return Err(ValidationError::UnknownMarket {
            index,
            market: market.clone(),
        });
    }
    Ok(requested.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect())
}

fn check_kind(
    simulation: &Simulation,
    index: usize,
    moment: &MicroMoment,
    markets: &[MarketId],
) -> Result<(), ValidationError> {
    let demographics = simulation.demographics_width();
    match moment.kind {
        MomentKind::ProductsAgentsCovariance {
            x2_index,
            demographics_index,
        } => {
            if x2_index >= simulation.k2() {
                return Err(invalid(
                    index,
                    format!("X2 index {x2_index} is out of range for {} columns", simulation.k2()),
                ));
            }
            if demographics_index >= demographics {
                return Err(invalid(
                    index,
                    format!("demographics index {demographics_index} is out of range for {demographics} columns"),
                ));
            }
        }
        MomentKind::DemographicExpectation {
            product_position,
            demographics_index,
        } => {
            if demographics_index >= demographics {
                return Err(invalid(
                    index,
                    format!("demographics index {demographics_index} is out of range for {demographics} columns"),
                ));
            }
            if let Some(market) = markets.iter().find(|m| simulation.product_rows(m).len() <= product_position) {
                return Err(invalid(
                    index,
                    format!("market {market} has no product at position {product_position}"),
                ));
            }
        }
    }
    Ok(())
}
