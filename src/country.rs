//! Countries, their market nodes and the geographic lookups between them.
use crate::id::{define_id_getter, define_id_type};
use crate::technology::TechnologyID;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

define_id_type! {CountryCode}
define_id_type! {MarketNodeID}

impl MarketNodeID {
    /// The country code embedded in the first two characters of the market node identifier
    pub fn country_code(&self) -> CountryCode {
        self.0.chars().take(2).collect::<String>().into()
    }
}

/// A capacity figure given per country, either as a country total or per market node (MW)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CapacityValue {
    /// A single value for the whole country
    Total(f64),
    /// Separate values for individual market nodes
    PerMarketNode(IndexMap<MarketNodeID, f64>),
}

impl CapacityValue {
    /// The part of this capacity attributed to one market node.
    ///
    /// A country total is split according to the market node's share of the country's demand.
    /// Market nodes absent from a per-node mapping get nothing.
    pub fn for_market_node(&self, market_node: &MarketNodeID, demand_share: f64) -> f64 {
        match self {
            Self::Total(value) => value * demand_share,
            Self::PerMarketNode(values) => values.get(market_node).copied().unwrap_or(0.0),
        }
    }

    fn validate(&self) -> Result<()> {
        let valid = |value: f64| !value.is_nan() && value >= 0.0;
        match self {
            Self::Total(value) => ensure!(valid(*value), "Capacity must be non-negative"),
            Self::PerMarketNode(values) => ensure!(
                values.values().all(|value| valid(*value)),
                "Capacities must be non-negative"
            ),
        }

        Ok(())
    }
}

/// A country and the market nodes it contains
#[derive(Debug, Clone, PartialEq)]
pub struct Country {
    /// Two-letter country code
    pub id: CountryCode,
    /// Country name
    pub name: String,
    /// Three-letter ISO code
    pub alpha3: String,
    /// Flag emoji
    pub flag: String,
    /// The market nodes in this country, in order
    pub market_nodes: Vec<MarketNodeID>,
    /// Currently installed capacity per technology
    pub current_capacity: IndexMap<TechnologyID, CapacityValue>,
    /// Technical potential per technology
    pub potential_capacity: IndexMap<TechnologyID, CapacityValue>,
}
define_id_getter! {Country, CountryCode}

impl Country {
    /// Check the country record is internally consistent
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.market_nodes.is_empty(),
            "Country {} has no market nodes",
            self.id
        );
        for market_node in &self.market_nodes {
            ensure!(
                market_node.country_code() == self.id,
                "Market node {market_node} does not belong to country {}",
                self.id
            );
        }
        for (technology, value) in self
            .current_capacity
            .iter()
            .chain(self.potential_capacity.iter())
        {
            value.validate().with_context(|| {
                format!("Invalid capacity for {technology} in country {}", self.id)
            })?;
        }

        Ok(())
    }
}

/// A map of countries, keyed by country code
pub type CountryMap = IndexMap<CountryCode, Country>;

/// The market nodes of a country
pub fn market_nodes_for_country<'a>(
    countries: &'a CountryMap,
    country_code: &str,
) -> Result<&'a [MarketNodeID]> {
    let country = countries
        .get(country_code)
        .with_context(|| format!("Unknown country code {country_code}"))?;

    Ok(&country.market_nodes)
}

/// The country a market node belongs to
pub fn country_for_market_node(
    countries: &CountryMap,
    market_node: &MarketNodeID,
) -> Result<CountryCode> {
    let code = market_node.country_code();
    let country = countries
        .get(&code)
        .with_context(|| format!("Market node {market_node} belongs to unknown country {code}"))?;
    ensure!(
        country.market_nodes.contains(market_node),
        "Market node {market_node} is not listed for country {code}"
    );

    Ok(code)
}
