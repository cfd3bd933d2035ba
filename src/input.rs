//! Common routines for handling input data.
//!
//! A run's inputs are the country and technology catalogs in the input directory plus the time
//! series of one scenario. Every time series is brought onto the model's [`Timeline`] when it is
//! loaded, so the model builder never sees native-resolution data.
use crate::config::{ClimateYears, Config, TechnologyConfig};
use crate::country::{CountryCode, CountryMap, MarketNodeID, market_nodes_for_country};
use crate::error::InputError;
use crate::technology::{TechnologyCatalog, TechnologyID};
use crate::time_series::{Resolution, Timeline};
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use log::{debug, info};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

mod cache;
pub use cache::clear_frame_cache;
mod countries;
pub use countries::read_countries;
mod demand;
mod hydropower;
pub use hydropower::{HydropowerCapacity, HydropowerUnit};
mod interconnections;
pub use interconnections::{InterconnectionLimits, InterconnectionPair, InterconnectionType};
mod ires;
pub use ires::IresNode;
mod technologies;
pub use technologies::read_technologies;

/// Read and deserialise a YAML file.
///
/// # Arguments
///
/// * `file_path` - Path to the YAML file
pub fn read_yaml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    ensure!(file_path.is_file(), InputError::missing_file(file_path));
    let contents = fs::read_to_string(file_path)
        .with_context(|| format!("Could not read {}", file_path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("Error parsing {}", file_path.display()))
}

/// Read a CSV file into a `Vec<T>`, one item per row
pub fn read_csv<T: DeserializeOwned>(file_path: &Path) -> Result<Vec<T>> {
    ensure!(file_path.is_file(), InputError::missing_file(file_path));
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path)
        .with_context(|| format!("Could not open {}", file_path.display()))?;

    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: T = result.with_context(|| format!("Error parsing {}", file_path.display()))?;
        rows.push(row);
    }

    Ok(rows)
}

/// A market node and all of its time series, on the model timeline
#[derive(Debug, Clone, PartialEq)]
pub struct MarketNode {
    /// Market node identifier
    pub id: MarketNodeID,
    /// The country the market node belongs to
    pub country: CountryCode,
    /// Electricity demand (MW)
    pub demand: Vec<f64>,
    /// IRES nodes per IRES technology
    pub ires: IndexMap<TechnologyID, Vec<IresNode>>,
    /// Hydropower units per hydropower technology
    pub hydropower: IndexMap<TechnologyID, HydropowerUnit>,
}

impl MarketNode {
    /// Total electricity demand over the horizon (MWh)
    pub fn total_demand(&self, interval_hours: f64) -> f64 {
        self.demand.iter().sum::<f64>() * interval_hours
    }
}

/// All time-dependent inputs of a model run
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    /// The modelled time steps
    pub timeline: Timeline,
    /// The modelled market nodes, grouped by country in configuration order
    pub market_nodes: IndexMap<MarketNodeID, MarketNode>,
    /// Transfer limits between modelled market nodes
    pub interconnections: IndexMap<InterconnectionType, InterconnectionLimits>,
}

impl Scenario {
    /// The market nodes of one country
    pub fn market_nodes_in_country<'a>(
        &'a self,
        country: &'a CountryCode,
    ) -> impl Iterator<Item = &'a MarketNode> {
        self.market_nodes
            .values()
            .filter(move |node| &node.country == country)
    }

    /// The modelled countries, in order of first appearance
    pub fn countries(&self) -> Vec<CountryCode> {
        let mut countries: Vec<CountryCode> = Vec::new();
        for node in self.market_nodes.values() {
            if !countries.contains(&node.country) {
                countries.push(node.country.clone());
            }
        }
        countries
    }
}

/// The catalogs and scenario of a model run
#[derive(Debug, Clone, PartialEq)]
pub struct Inputs {
    /// All known countries
    pub countries: CountryMap,
    /// All known technologies
    pub catalog: TechnologyCatalog,
    /// The time series of the modelled market nodes
    pub scenario: Scenario,
}

/// Load all inputs for a validated configuration
pub fn load_inputs(config: &Config) -> Result<Inputs> {
    let input_dir = config.input_directory();
    info!("Loading inputs from {}", input_dir.display());
    let countries = read_countries(&input_dir)?;
    let catalog = read_technologies(&input_dir)?;
    config.validate_technologies(&catalog)?;

    let scenario = load_scenario(
        &config.scenario_directory(),
        &countries,
        &config.country_codes,
        &config.technologies,
        config.climate_years,
        config.resolution,
    )?;

    Ok(Inputs {
        countries,
        catalog,
        scenario,
    })
}

/// Load the time series of the market nodes of `country_codes` from a scenario directory.
///
/// Every series is restricted to the climate years, resampled to `resolution` by averaging and
/// stripped of February 29th, so all of them share one [`Timeline`].
pub fn load_scenario(
    scenario_dir: &Path,
    countries: &CountryMap,
    country_codes: &[CountryCode],
    technologies: &TechnologyConfig,
    climate_years: ClimateYears,
    resolution: Resolution,
) -> Result<Scenario> {
    ensure!(
        scenario_dir.is_dir(),
        InputError::missing_file(scenario_dir)
    );
    let timeline = Timeline::new(climate_years.start, climate_years.end, resolution)?;

    let mut node_countries: IndexMap<MarketNodeID, CountryCode> = IndexMap::new();
    for code in country_codes {
        for node in market_nodes_for_country(countries, &code.0)? {
            node_countries.insert(node.clone(), code.clone());
        }
    }
    let node_ids: Vec<MarketNodeID> = node_countries.keys().cloned().collect();
    debug!("Modelling {} market nodes", node_ids.len());

    let demand = demand::read_demand(scenario_dir, &node_ids, &timeline)?;
    let demand_shares = demand_shares(&node_countries, &demand);

    let hydropower_capacities = technologies
        .hydropower
        .iter()
        .map(|technology| {
            let capacities = hydropower::read_hydropower_capacities(scenario_dir, technology)?;
            Ok((technology.clone(), capacities))
        })
        .collect::<Result<IndexMap<_, _>>>()?;

    let mut market_nodes = IndexMap::new();
    for (id, country_code) in node_countries {
        let country = &countries[&country_code];
        let share = demand_shares[&id];
        let ires = if technologies.ires.is_empty() {
            IndexMap::new()
        } else {
            ires::read_ires_nodes(
                scenario_dir,
                &id,
                &technologies.ires,
                country,
                share,
                &timeline,
            )?
        };

        let mut hydropower = IndexMap::new();
        for (technology, capacities) in &hydropower_capacities {
            let Some(capacity) = capacities.get(&id) else {
                continue;
            };
            if !capacity.has_generation() {
                continue;
            }
            let unit = hydropower::read_hydropower_unit(
                scenario_dir,
                technology,
                &id,
                *capacity,
                &timeline,
            )?;
            hydropower.insert(technology.clone(), unit);
        }

        let node = MarketNode {
            demand: demand[&id].clone(),
            id: id.clone(),
            country: country_code,
            ires,
            hydropower,
        };
        market_nodes.insert(id, node);
    }

    let interconnections =
        interconnections::read_interconnections(scenario_dir, &node_ids, &timeline)?;

    Ok(Scenario {
        timeline,
        market_nodes,
        interconnections,
    })
}

/// Each market node's share of its country's total demand.
///
/// Countries without any demand split evenly between their market nodes.
fn demand_shares(
    node_countries: &IndexMap<MarketNodeID, CountryCode>,
    demand: &IndexMap<MarketNodeID, Vec<f64>>,
) -> IndexMap<MarketNodeID, f64> {
    let totals: IndexMap<&MarketNodeID, f64> = demand
        .iter()
        .map(|(node, values)| (node, values.iter().sum()))
        .collect();

    node_countries
        .iter()
        .map(|(node, country)| {
            let siblings: Vec<&MarketNodeID> = node_countries
                .iter()
                .filter(|(_, other)| *other == country)
                .map(|(other, _)| other)
                .collect();
            let country_total: f64 = siblings.iter().map(|other| totals[other]).sum();
            let share = if country_total > 0.0 {
                totals[node] / country_total
            } else {
                1.0 / siblings.len() as f64
            };
            (node.clone(), share)
        })
        .collect()
}
