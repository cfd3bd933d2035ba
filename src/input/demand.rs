//! Code for reading electricity demand.
use super::cache::load_frame;
use super::*;

const DEMAND_FILE_NAME: &str = "demand.csv";

/// Read the electricity demand (MW) of each market node from `demand.csv`.
///
/// The file has one column per market node. Columns for market nodes which are not modelled are
/// ignored.
pub fn read_demand(
    scenario_dir: &Path,
    market_nodes: &[MarketNodeID],
    timeline: &Timeline,
) -> Result<IndexMap<MarketNodeID, Vec<f64>>> {
    let file_path = scenario_dir.join(DEMAND_FILE_NAME);
    let frame = load_frame(&file_path, 1, timeline)?;

    let mut demand = IndexMap::new();
    for node in market_nodes {
        let values = frame.required_column(&file_path, &node.0)?;
        ensure!(
            values.iter().all(|value| *value >= 0.0),
            InputError::inconsistent(&file_path, format!("demand of {node} is negative"))
        );
        demand.insert(node.clone(), values.to_vec());
    }

    Ok(demand)
}
