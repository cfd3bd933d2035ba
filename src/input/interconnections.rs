//! Code for reading interconnection transfer limits.
use super::cache::load_frame;
use super::*;
use crate::time_series::COLUMN_LEVEL_SEPARATOR;
use strum::{Display, EnumIter, IntoEnumIterator};

const INTERCONNECTIONS_DIRECTORY: &str = "interconnections";

/// The kind of an interconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum InterconnectionType {
    /// High-voltage alternating current
    Hvac,
    /// High-voltage direct current
    Hvdc,
}

/// An ordered pair of market nodes: power flows from the first to the second
pub type InterconnectionPair = (MarketNodeID, MarketNodeID);

/// Per-time-step export limits (MW) of one interconnection type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterconnectionLimits {
    limits: IndexMap<InterconnectionPair, Vec<f64>>,
}

impl InterconnectionLimits {
    /// Create limits from a map of ordered pairs to limit series
    pub fn new(limits: IndexMap<InterconnectionPair, Vec<f64>>) -> Self {
        Self { limits }
    }

    /// Iterate over the pairs and their limits
    pub fn iter(&self) -> impl Iterator<Item = (&InterconnectionPair, &[f64])> {
        self.limits
            .iter()
            .map(|(pair, values)| (pair, values.as_slice()))
    }

    /// The limits of one pair
    pub fn get(&self, pair: &InterconnectionPair) -> Option<&[f64]> {
        self.limits.get(pair).map(Vec::as_slice)
    }

    /// The mean limit of a pair over the horizon
    pub fn mean_capacity(&self, pair: &InterconnectionPair) -> f64 {
        self.get(pair).map_or(0.0, |values| {
            values.iter().sum::<f64>() / values.len().max(1) as f64
        })
    }

    /// The number of pairs
    pub fn len(&self) -> usize {
        self.limits.len()
    }

    /// Whether there are no pairs
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

/// Parse a `<from>::<to>` column name
fn parse_pair(column: &str) -> Option<InterconnectionPair> {
    let (from, to) = column.split_once(COLUMN_LEVEL_SEPARATOR)?;
    (!from.is_empty() && !to.is_empty()).then(|| (from.into(), to.into()))
}

/// Read the transfer limits of every interconnection type from
/// `interconnections/{hvac,hvdc}.csv`.
///
/// The files have a two-level header (from market node, to market node). Only pairs between two
/// distinct modelled market nodes are kept. A missing file means there are no interconnections
/// of that type.
pub fn read_interconnections(
    scenario_dir: &Path,
    market_nodes: &[MarketNodeID],
    timeline: &Timeline,
) -> Result<IndexMap<InterconnectionType, InterconnectionLimits>> {
    let mut interconnections = IndexMap::new();
    for kind in InterconnectionType::iter() {
        let file_path = scenario_dir
            .join(INTERCONNECTIONS_DIRECTORY)
            .join(format!("{kind}.csv"));
        let limits = if file_path.is_file() {
            read_limits(&file_path, market_nodes, timeline)?
        } else {
            debug!("No {kind} interconnections: {} not found", file_path.display());
            InterconnectionLimits::default()
        };
        interconnections.insert(kind, limits);
    }

    Ok(interconnections)
}

fn read_limits(
    file_path: &Path,
    market_nodes: &[MarketNodeID],
    timeline: &Timeline,
) -> Result<InterconnectionLimits> {
    let frame = load_frame(file_path, 2, timeline)?;

    let mut limits = IndexMap::new();
    for column in frame.column_names() {
        let pair = parse_pair(column).ok_or_else(|| {
            InputError::inconsistent(
                file_path,
                format!("column '{column}' is not a pair of market nodes"),
            )
        })?;
        if pair.0 == pair.1 || !market_nodes.contains(&pair.0) || !market_nodes.contains(&pair.1)
        {
            continue;
        }

        let values = frame.required_column(file_path, column)?;
        ensure!(
            values.iter().all(|value| *value >= 0.0),
            InputError::inconsistent(
                file_path,
                format!("limits from {} to {} must be non-negative", pair.0, pair.1)
            )
        );
        limits.insert(pair, values.to_vec());
    }

    Ok(InterconnectionLimits::new(limits))
}
