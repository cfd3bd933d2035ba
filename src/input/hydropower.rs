//! Code for reading hydropower nameplates and time series.
use super::cache::load_frame;
use super::*;
use serde::Deserialize;

const HYDROPOWER_DIRECTORY: &str = "hydropower";
const CAPACITY_FILE_NAME: &str = "capacity.csv";

const INFLOW_COLUMN: &str = "inflow_MWh";
const MIN_GENERATION_COLUMN: &str = "min_generation_MW";
const MAX_GENERATION_COLUMN: &str = "max_generation_MW";
const MIN_PUMPING_COLUMN: &str = "min_pumping_MW";
const MAX_PUMPING_COLUMN: &str = "max_pumping_MW";
const RESERVOIR_SOC_COLUMN: &str = "reservoir_soc";
const MIN_RESERVOIR_SOC_COLUMN: &str = "min_reservoir_soc";
const MAX_RESERVOIR_SOC_COLUMN: &str = "max_reservoir_soc";

/// The nameplate of the hydropower fleet of one technology in one market node
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HydropowerCapacity {
    /// Turbine capacity (MW)
    pub turbine: f64,
    /// Pump capacity (MW)
    pub pump: f64,
    /// Reservoir capacity (MWh)
    pub reservoir: f64,
}

impl HydropowerCapacity {
    /// Whether there is any turbine capacity to model
    pub fn has_generation(&self) -> bool {
        self.turbine > 0.0
    }

    /// Whether the fleet has a reservoir
    pub fn has_reservoir(&self) -> bool {
        self.reservoir > 0.0
    }
}

#[derive(Debug, Deserialize)]
struct HydropowerCapacityRaw {
    market_node: MarketNodeID,
    turbine: f64,
    #[serde(default)]
    pump: f64,
    #[serde(default)]
    reservoir: f64,
}

/// The hydropower fleet of one technology in one market node
#[derive(Debug, Clone, PartialEq)]
pub struct HydropowerUnit {
    /// Nameplate capacities
    pub capacity: HydropowerCapacity,
    /// Natural inflow (MWh per hour)
    pub inflow: Vec<f64>,
    /// Lower bound on turbine flow (MW)
    pub min_generation: Vec<f64>,
    /// Upper bound on turbine flow (MW), never above the turbine capacity
    pub max_generation: Vec<f64>,
    /// Lower bound on pump flow (MW)
    pub min_pumping: Vec<f64>,
    /// Upper bound on pump flow (MW), never above the pump capacity
    pub max_pumping: Vec<f64>,
    /// Observed reservoir state of charge as a fraction of the reservoir capacity
    pub reservoir_soc: Vec<Option<f64>>,
    /// Lower bound on the reservoir state of charge as a fraction of the reservoir capacity
    pub min_reservoir_soc: Vec<f64>,
    /// Upper bound on the reservoir state of charge as a fraction of the reservoir capacity
    pub max_reservoir_soc: Vec<f64>,
}

impl HydropowerUnit {
    /// Build a unit from its raw series, making the bounds consistent with each other.
    ///
    /// Upstream data occasionally has a minimum above the maximum, or an observed state of
    /// charge outside its band, so every lower bound is clipped to its upper bound and every
    /// observed state of charge into its band.
    pub fn new(
        capacity: HydropowerCapacity,
        inflow: Vec<f64>,
        generation: (Vec<f64>, Vec<f64>),
        pumping: (Vec<f64>, Vec<f64>),
        reservoir_soc: Vec<Option<f64>>,
        reservoir_soc_band: (Vec<f64>, Vec<f64>),
    ) -> Self {
        let (min_generation, max_generation) = clip_band(generation, 0.0, capacity.turbine);
        let (min_pumping, max_pumping) = clip_band(pumping, 0.0, capacity.pump);
        let (min_reservoir_soc, max_reservoir_soc) = clip_band(reservoir_soc_band, 0.0, 1.0);
        let reservoir_soc = reservoir_soc
            .into_iter()
            .zip(min_reservoir_soc.iter().zip(&max_reservoir_soc))
            .map(|(soc, (min, max))| soc.map(|soc| soc.clamp(*min, *max)))
            .collect();

        Self {
            capacity,
            inflow,
            min_generation,
            max_generation,
            min_pumping,
            max_pumping,
            reservoir_soc,
            min_reservoir_soc,
            max_reservoir_soc,
        }
    }

    /// The same fleet scaled in size by `factor`.
    ///
    /// Capacities, flow bounds and inflow scale; state-of-charge fractions don't.
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |values: &[f64]| values.iter().map(|value| value * factor).collect();
        Self {
            capacity: HydropowerCapacity {
                turbine: self.capacity.turbine * factor,
                pump: self.capacity.pump * factor,
                reservoir: self.capacity.reservoir * factor,
            },
            inflow: scale(&self.inflow),
            min_generation: scale(&self.min_generation),
            max_generation: scale(&self.max_generation),
            min_pumping: scale(&self.min_pumping),
            max_pumping: scale(&self.max_pumping),
            ..self.clone()
        }
    }
}

/// Clip a lower and upper bound series into `[floor, ceiling]` with lower ≤ upper
fn clip_band(
    (lower, upper): (Vec<f64>, Vec<f64>),
    floor: f64,
    ceiling: f64,
) -> (Vec<f64>, Vec<f64>) {
    let upper: Vec<f64> = upper
        .into_iter()
        .map(|value| value.clamp(floor, ceiling))
        .collect();
    let lower = lower
        .into_iter()
        .zip(&upper)
        .map(|(value, upper)| value.clamp(floor, *upper))
        .collect();
    (lower, upper)
}

/// Read the nameplates of a hydropower technology from `hydropower/<technology>/capacity.csv`
pub fn read_hydropower_capacities(
    scenario_dir: &Path,
    technology: &TechnologyID,
) -> Result<IndexMap<MarketNodeID, HydropowerCapacity>> {
    let file_path = scenario_dir
        .join(HYDROPOWER_DIRECTORY)
        .join(&*technology.0)
        .join(CAPACITY_FILE_NAME);

    let mut capacities = IndexMap::new();
    for raw in read_csv::<HydropowerCapacityRaw>(&file_path)? {
        ensure!(
            [raw.turbine, raw.pump, raw.reservoir]
                .iter()
                .all(|value| *value >= 0.0),
            InputError::inconsistent(
                &file_path,
                format!("capacities of {} must be non-negative", raw.market_node)
            )
        );
        let capacity = HydropowerCapacity {
            turbine: raw.turbine,
            pump: raw.pump,
            reservoir: raw.reservoir,
        };
        ensure!(
            capacities.insert(raw.market_node.clone(), capacity).is_none(),
            InputError::inconsistent(
                &file_path,
                format!("market node {} is listed more than once", raw.market_node)
            )
        );
    }

    Ok(capacities)
}

/// Read the series of a hydropower technology in one market node from
/// `hydropower/<technology>/<market_node>.csv`.
///
/// Only the inflow is required. Without bounds, flows are limited by the nameplate and the
/// reservoir may use its whole capacity; an observed state of charge may be given for some time
/// steps only.
pub fn read_hydropower_unit(
    scenario_dir: &Path,
    technology: &TechnologyID,
    market_node: &MarketNodeID,
    capacity: HydropowerCapacity,
    timeline: &Timeline,
) -> Result<HydropowerUnit> {
    let file_path = scenario_dir
        .join(HYDROPOWER_DIRECTORY)
        .join(&*technology.0)
        .join(format!("{market_node}.csv"));
    let frame = load_frame(&file_path, 1, timeline)?;
    frame.check_complete(&file_path, &[RESERVOIR_SOC_COLUMN])?;

    let inflow = frame.required_column(&file_path, INFLOW_COLUMN)?.to_vec();
    ensure!(
        inflow.iter().all(|value| *value >= 0.0),
        InputError::inconsistent(&file_path, "inflow must be non-negative")
    );
    let column_or = |name: &str, default: f64| {
        frame
            .column(name)
            .map_or_else(|| vec![default; timeline.len()], <[f64]>::to_vec)
    };
    let reservoir_soc = frame.column(RESERVOIR_SOC_COLUMN).map_or_else(
        || vec![None; timeline.len()],
        |values| {
            values
                .iter()
                .map(|value| (!value.is_nan()).then_some(*value))
                .collect()
        },
    );

    Ok(HydropowerUnit::new(
        capacity,
        inflow,
        (
            column_or(MIN_GENERATION_COLUMN, 0.0),
            column_or(MAX_GENERATION_COLUMN, capacity.turbine),
        ),
        (
            column_or(MIN_PUMPING_COLUMN, 0.0),
            column_or(MAX_PUMPING_COLUMN, capacity.pump),
        ),
        reservoir_soc,
        (
            column_or(MIN_RESERVOIR_SOC_COLUMN, 0.0),
            column_or(MAX_RESERVOIR_SOC_COLUMN, 1.0),
        ),
    ))
}
