//! Code for reading IRES capacity factors and allocating country capacities to IRES nodes.
use super::cache::load_frame;
use super::*;
use crate::country::{CapacityValue, Country};
use log::warn;

const IRES_DIRECTORY: &str = "ires";
const CAPACITY_FACTOR_SUFFIX: &str = "_cf";

/// A sub-market-node location with its own capacity factor series
#[derive(Debug, Clone, PartialEq)]
pub struct IresNode {
    /// Identifier, unique within a market node and technology
    pub id: String,
    /// Capacity factor per time step
    pub capacity_factor: Vec<f64>,
    /// Capacity which is already installed (MW)
    pub current_capacity: f64,
    /// Technical potential (MW)
    pub potential_capacity: f64,
}

/// Split a `<technology>_<ires_node>_cf` column name.
///
/// Where several technology names match, the longest wins (so `offshore_wind_n1_cf` is not read
/// as technology `offshore` at IRES node `wind_n1`).
fn parse_column<'a>(
    column: &'a str,
    technologies: &'a [TechnologyID],
) -> Option<(&'a TechnologyID, &'a str)> {
    let stem = column.strip_suffix(CAPACITY_FACTOR_SUFFIX)?;
    technologies
        .iter()
        .filter_map(|technology| {
            let node = stem.strip_prefix(&*technology.0)?.strip_prefix('_')?;
            (!node.is_empty()).then_some((technology, node))
        })
        .max_by_key(|(technology, _)| technology.0.len())
}

/// The share of a country-level capacity value which falls to one IRES node
fn allocate(
    value: Option<&CapacityValue>,
    market_node: &MarketNodeID,
    demand_share: f64,
    num_nodes: usize,
    default: f64,
) -> f64 {
    value.map_or(default, |value| {
        value.for_market_node(market_node, demand_share) / num_nodes as f64
    })
}

/// Read the IRES nodes of a market node from `ires/<market_node>.csv`.
///
/// Each node's current capacity and potential are derived from the country's figures: a country
/// total is pro-rated by the market node's share of the country's demand and then split evenly
/// between the IRES nodes of the technology in the market node.
pub fn read_ires_nodes(
    scenario_dir: &Path,
    market_node: &MarketNodeID,
    technologies: &[TechnologyID],
    country: &Country,
    demand_share: f64,
    timeline: &Timeline,
) -> Result<IndexMap<TechnologyID, Vec<IresNode>>> {
    let file_path = scenario_dir
        .join(IRES_DIRECTORY)
        .join(format!("{market_node}.csv"));
    let frame = load_frame(&file_path, 1, timeline)?;
    frame.check_complete(&file_path, &[])?;

    let mut series: IndexMap<&TechnologyID, Vec<(&str, &[f64])>> = IndexMap::new();
    for (column, values) in frame.columns() {
        let Some((technology, node)) = parse_column(column, technologies) else {
            continue;
        };
        ensure!(
            values.iter().all(|value| (0.0..=1.0).contains(value)),
            InputError::inconsistent(
                &file_path,
                format!("capacity factors in column '{column}' must be between 0 and 1")
            )
        );
        series.entry(technology).or_default().push((node, values));
    }

    let mut nodes = IndexMap::new();
    for (technology, columns) in series {
        let num_nodes = columns.len();
        let current = country.current_capacity.get(technology);
        let potential = country.potential_capacity.get(technology);
        let ires_nodes = columns
            .into_iter()
            .map(|(id, values)| {
                let current_capacity = allocate(current, market_node, demand_share, num_nodes, 0.0);
                let mut potential_capacity = allocate(
                    potential,
                    market_node,
                    demand_share,
                    num_nodes,
                    f64::INFINITY,
                );
                if current_capacity > potential_capacity {
                    warn!(
                        "Current {technology} capacity at {market_node} ({id}) exceeds its \
                         potential; raising the potential to {current_capacity} MW"
                    );
                    potential_capacity = current_capacity;
                }

                IresNode {
                    id: id.to_string(),
                    capacity_factor: values.to_vec(),
                    current_capacity,
                    potential_capacity,
                }
            })
            .collect();
        nodes.insert(technology.clone(), ires_nodes);
    }

    Ok(nodes)
}
