//! Materialising results from an optimal solution.
//!
//! Every [`Series`](crate::optimisation::Series) in the model is evaluated once against the
//! solution. Derived columns such as curtailment and net flows are then computed from the
//! materialised values.
use crate::country::{CountryCode, MarketNodeID};
use crate::input::InterconnectionType;
use crate::optimisation::{CostComponent, CostMap, MarketNodeModel, ModelBundle};
use crate::solver::Solution;
use crate::technology::TechnologyID;
use crate::time_series::{COLUMN_LEVEL_SEPARATOR, TimeSeriesFrame};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;

pub mod metrics;
pub use metrics::{CountryMetrics, SystemMetrics};

/// Smallest net storage flow (MW) used as the divisor of the time energy is stored
pub const MIN_STORAGE_FLOW: f64 = 1e-3;

/// Installed capacity of one IRES node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IresCapacityRow {
    /// IRES technology
    pub technology: TechnologyID,
    /// IRES node within the market node
    pub ires_node: String,
    /// Capacity (MW)
    pub capacity: f64,
}

/// Installed capacity of one storage technology in a market node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageCapacityRow {
    /// Storage technology
    pub technology: TechnologyID,
    /// Energy capacity (MWh)
    pub energy: f64,
    /// Power capacity (MW)
    pub power: f64,
}

/// Capacity of one hydropower technology in a market node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydropowerCapacityRow {
    /// Hydropower technology
    pub technology: TechnologyID,
    /// Turbine capacity (MW)
    pub turbine: f64,
    /// Pump capacity (MW)
    pub pump: f64,
    /// Reservoir size (MWh)
    pub reservoir: f64,
}

/// Capacity of a technology which has a single capacity per market node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityRow {
    /// Market node
    pub market_node: MarketNodeID,
    /// Technology
    pub technology: TechnologyID,
    /// Capacity (MW)
    pub capacity: f64,
}

/// Transfer capacity of one ordered interconnection pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterconnectionCapacityRow {
    /// Sending market node
    pub from: MarketNodeID,
    /// Receiving market node
    pub to: MarketNodeID,
    /// Mean transfer limit of the scenario (MW)
    pub current: f64,
    /// Capacity added by the optimiser (MW)
    pub extra: f64,
}

/// The mean of every column shared by all market node tables
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeanSummary {
    /// Column names
    pub columns: Vec<String>,
    /// One row of column means per market node
    pub rows: IndexMap<MarketNodeID, Vec<f64>>,
}

/// Wall-clock time spent in each stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunDurations {
    /// Loading inputs and building the model
    pub initializing: Duration,
    /// Solving the model
    pub optimizing: Duration,
    /// Extracting and writing results
    pub storing: Duration,
}

impl RunDurations {
    /// The stages as (name, seconds) pairs
    pub fn to_records(&self) -> [(&'static str, f64); 3] {
        [
            ("initializing", self.initializing.as_secs_f64()),
            ("optimizing", self.optimizing.as_secs_f64()),
            ("storing", self.storing.as_secs_f64()),
        ]
    }
}

/// Everything materialised from a solved model
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    /// Hourly table per market node
    pub market_nodes: IndexMap<MarketNodeID, TimeSeriesFrame>,
    /// Hourly flows per interconnection type, one `<from>::<to>` column per ordered pair
    pub interconnection_flows: IndexMap<InterconnectionType, TimeSeriesFrame>,
    /// IRES capacity per market node
    pub ires_capacity: IndexMap<MarketNodeID, Vec<IresCapacityRow>>,
    /// Storage capacity per market node
    pub storage_capacity: IndexMap<MarketNodeID, Vec<StorageCapacityRow>>,
    /// Hydropower capacity per market node
    pub hydropower_capacity: IndexMap<MarketNodeID, Vec<HydropowerCapacityRow>>,
    /// Dispatchable capacity of every market node
    pub dispatchable_capacity: Vec<CapacityRow>,
    /// Electrolysis capacity of every market node
    pub electrolysis_capacity: Vec<CapacityRow>,
    /// Transfer capacity per interconnection type
    pub interconnection_capacity: IndexMap<InterconnectionType, Vec<InterconnectionCapacityRow>>,
    /// Annual cost (EUR) per component
    pub costs: IndexMap<CostComponent, f64>,
    /// Annual cost (EUR) per component of each market node
    pub node_costs: IndexMap<MarketNodeID, IndexMap<CostComponent, f64>>,
    /// The objective value (EUR)
    pub objective: f64,
    /// The length of one time step in hours
    pub interval_hours: f64,
    /// The number of climate years
    pub num_years: usize,
    /// The country of each market node
    pub countries: IndexMap<MarketNodeID, CountryCode>,
}

impl ResultSet {
    /// The mean of the columns which every market node table has
    pub fn mean_summary(&self) -> MeanSummary {
        let mut tables = self.market_nodes.values();
        let Some(first) = tables.next() else {
            return MeanSummary::default();
        };
        let mut columns: Vec<String> = first.column_names().map(str::to_string).collect();
        for table in tables {
            columns.retain(|column| table.has_column(column));
        }

        let rows = self
            .market_nodes
            .iter()
            .map(|(id, table)| {
                let means = table.column_means();
                let row = columns.iter().map(|column| means[column.as_str()]).collect();
                (id.clone(), row)
            })
            .collect();

        MeanSummary { columns, rows }
    }

    /// Sum a column of a market node table over the horizon and convert it to an annual energy
    /// (MWh per year)
    pub fn annual_total(&self, market_node: &MarketNodeID, column: &str) -> f64 {
        self.market_nodes
            .get(market_node)
            .and_then(|table| table.column(column))
            .map_or(0.0, |values| {
                values.iter().sum::<f64>() * self.interval_hours / self.num_years.max(1) as f64
            })
    }
}

/// Element-wise sum of several series of the same length
fn total<I>(steps: usize, series: I) -> Vec<f64>
where
    I: IntoIterator<Item = Vec<f64>>,
{
    series.into_iter().fold(vec![0.0; steps], |mut total, values| {
        for (total, value) in total.iter_mut().zip(values) {
            *total += value;
        }
        total
    })
}

fn difference(lhs: &[f64], rhs: &[f64]) -> Vec<f64> {
    lhs.iter().zip(rhs).map(|(lhs, rhs)| lhs - rhs).collect()
}

/// The hourly table of one market node
fn node_table(
    bundle: &ModelBundle,
    node: &MarketNodeModel,
    solution: &Solution,
) -> Result<TimeSeriesFrame> {
    let steps = node.demand.len();
    let mut table = TimeSeriesFrame::new(bundle.timeline.timestamps().to_vec());

    let mut electrolysis_load = Vec::new();
    let mut hydrogen_production = Vec::new();
    for (technology, electrolysis) in &node.electrolysis {
        let load = electrolysis.load.evaluate(solution);
        hydrogen_production.push(
            load.iter()
                .map(|load| load * electrolysis.efficiency)
                .collect(),
        );
        table.insert_column(format!("electrolysis_load_{technology}"), load.clone())?;
        electrolysis_load.push(load);
    }
    let electrolysis_load = total(steps, electrolysis_load);
    let demand_total: Vec<f64> = node
        .demand
        .iter()
        .zip(&electrolysis_load)
        .map(|(demand, load)| demand + load)
        .collect();
    table.insert_column("demand_electricity", node.demand.clone())?;
    table.insert_column("demand_electrolysis", electrolysis_load)?;
    table.insert_column("demand_total", demand_total.clone())?;

    let mut ires = Vec::new();
    for (technology, model) in &node.ires {
        let generation = model.generation.evaluate(solution);
        table.insert_column(format!("generation_ires_{technology}"), generation.clone())?;
        ires.push(generation);
    }
    let ires = total(steps, ires);
    table.insert_column("generation_ires", ires.clone())?;

    let mut dispatchable = Vec::new();
    for (technology, model) in &node.dispatchable {
        let generation = model.generation.evaluate(solution);
        table.insert_column(
            format!("generation_dispatchable_{technology}"),
            generation.clone(),
        )?;
        dispatchable.push(generation);
    }
    let dispatchable = total(steps, dispatchable);
    table.insert_column("generation_dispatchable", dispatchable.clone())?;

    let mut hydropower = Vec::new();
    for (technology, model) in &node.hydropower {
        let turbine = model.turbine.evaluate(solution);
        let pump = model.pump.evaluate(solution);
        hydropower.push(difference(&turbine, &pump));
        table.insert_column(format!("generation_turbine_{technology}"), turbine)?;
        table.insert_column(format!("generation_pump_{technology}"), pump)?;
        table.insert_column(
            format!("spillage_{technology}"),
            model.spillage.evaluate(solution),
        )?;
        if let Some(reservoir) = &model.reservoir {
            table.insert_column(
                format!("reservoir_{technology}"),
                reservoir.evaluate(solution),
            )?;
        }
    }
    let hydropower = total(steps, hydropower);
    table.insert_column("generation_total_hydropower", hydropower.clone())?;

    let mut storage_in = Vec::new();
    let mut storage_out = Vec::new();
    for (technology, model) in &node.storage {
        let inflow = model.inflow.evaluate(solution);
        let outflow = model.outflow.evaluate(solution);
        let stored = model.soc.evaluate(solution);
        let net = difference(&inflow, &outflow);
        let time_stored = stored
            .iter()
            .zip(&net)
            .map(|(stored, net)| stored / net.abs().max(MIN_STORAGE_FLOW))
            .collect();
        table.insert_column(format!("storage_in_{technology}"), inflow.clone())?;
        table.insert_column(format!("storage_out_{technology}"), outflow.clone())?;
        table.insert_column(format!("energy_stored_{technology}"), stored)?;
        table.insert_column(format!("net_storage_flow_{technology}"), net)?;
        table.insert_column(format!("time_stored_{technology}"), time_stored)?;
        storage_in.push(inflow);
        storage_out.push(outflow);
    }
    let storage_in = total(steps, storage_in);
    let storage_out = total(steps, storage_out);
    let net_storage_flow = difference(&storage_in, &storage_out);
    table.insert_column("storage_in", storage_in)?;
    table.insert_column("storage_out", storage_out)?;
    table.insert_column("net_storage_flow", net_storage_flow.clone())?;

    let import = node.import.evaluate(solution);
    let export = node.export.evaluate(solution);
    let net_export = difference(&export, &import);
    table.insert_column("import", import)?;
    table.insert_column("export", export)?;
    table.insert_column("net_export", net_export.clone())?;

    let lost_load = node
        .lost_load
        .as_ref()
        .map_or_else(|| vec![0.0; steps], |series| series.evaluate(solution));
    if node.lost_load.is_some() {
        table.insert_column("lost_load", lost_load.clone())?;
    }

    let curtailed = (0..steps)
        .map(|ts| {
            ires[ts] + dispatchable[ts] + hydropower[ts] + lost_load[ts]
                - demand_total[ts]
                - net_storage_flow[ts]
                - net_export[ts]
        })
        .collect();
    table.insert_column("curtailed", curtailed)?;

    table.insert_column("hydrogen_demand", node.hydrogen_demand.clone())?;
    table.insert_column("hydrogen_production", total(steps, hydrogen_production))?;

    // The balance row is in annual cost per MW, so convert back to EUR/MWh
    let price_scale = bundle.num_years().max(1) as f64 / bundle.interval_hours();
    let marginal_price = node
        .balance
        .iter()
        .map(|constraint| solution.dual(*constraint) * price_scale)
        .collect();
    table.insert_column("marginal_price", marginal_price)?;

    Ok(table)
}

fn evaluate_costs(costs: &CostMap, solution: &Solution) -> IndexMap<CostComponent, f64> {
    costs
        .iter()
        .map(|(component, expression)| (*component, solution.evaluate(expression)))
        .collect()
}

/// Materialise every table of a solved model.
///
/// # Arguments
///
/// * `bundle` - The model which was solved
/// * `solution` - An optimal solution of `bundle.problem`
pub fn extract(bundle: &ModelBundle, solution: &Solution) -> Result<ResultSet> {
    let mut market_nodes = IndexMap::new();
    let mut ires_capacity = IndexMap::new();
    let mut storage_capacity = IndexMap::new();
    let mut hydropower_capacity = IndexMap::new();
    let mut dispatchable_capacity = Vec::new();
    let mut electrolysis_capacity = Vec::new();
    for (id, node) in &bundle.market_nodes {
        let table = node_table(bundle, node, solution)
            .with_context(|| format!("Could not extract results for market node {id}"))?;
        market_nodes.insert(id.clone(), table);

        let ires = node
            .ires
            .iter()
            .flat_map(|(technology, model)| {
                model
                    .capacity
                    .iter()
                    .map(|(ires_node, variable)| IresCapacityRow {
                        technology: technology.clone(),
                        ires_node: ires_node.clone(),
                        capacity: solution.value(*variable),
                    })
            })
            .collect();
        ires_capacity.insert(id.clone(), ires);

        let storage = node
            .storage
            .iter()
            .map(|(technology, model)| StorageCapacityRow {
                technology: technology.clone(),
                energy: solution.value(model.energy_capacity),
                power: solution.value(model.power_capacity),
            })
            .collect();
        storage_capacity.insert(id.clone(), storage);

        let hydropower = node
            .hydropower
            .iter()
            .map(|(technology, model)| HydropowerCapacityRow {
                technology: technology.clone(),
                turbine: model.capacity.turbine,
                pump: model.capacity.pump,
                reservoir: model.capacity.reservoir,
            })
            .collect();
        hydropower_capacity.insert(id.clone(), hydropower);

        dispatchable_capacity.extend(node.dispatchable.iter().map(|(technology, model)| {
            CapacityRow {
                market_node: id.clone(),
                technology: technology.clone(),
                capacity: solution.value(model.capacity),
            }
        }));
        electrolysis_capacity.extend(node.electrolysis.iter().map(|(technology, model)| {
            CapacityRow {
                market_node: id.clone(),
                technology: technology.clone(),
                capacity: solution.value(model.capacity),
            }
        }));
    }

    let mut interconnection_flows = IndexMap::new();
    let mut interconnection_capacity = IndexMap::new();
    for (kind, interconnection) in &bundle.interconnections {
        let mut flows = TimeSeriesFrame::new(bundle.timeline.timestamps().to_vec());
        let mut capacity = Vec::new();
        for (pair, flow) in &interconnection.flows {
            let (from, to) = pair;
            flows.insert_column(
                format!("{from}{COLUMN_LEVEL_SEPARATOR}{to}"),
                flow.evaluate(solution),
            )?;
            capacity.push(InterconnectionCapacityRow {
                from: from.clone(),
                to: to.clone(),
                current: interconnection.limits.mean_capacity(pair),
                extra: interconnection
                    .extra_capacity
                    .get(pair)
                    .map_or(0.0, |variable| solution.value(*variable)),
            });
        }
        interconnection_flows.insert(*kind, flows);
        interconnection_capacity.insert(*kind, capacity);
    }

    Ok(ResultSet {
        market_nodes,
        interconnection_flows,
        ires_capacity,
        storage_capacity,
        hydropower_capacity,
        dispatchable_capacity,
        electrolysis_capacity,
        interconnection_capacity,
        costs: evaluate_costs(&bundle.costs, solution),
        node_costs: bundle
            .node_costs
            .iter()
            .map(|(id, costs)| (id.clone(), evaluate_costs(costs, solution)))
            .collect(),
        objective: solution.objective(),
        interval_hours: bundle.interval_hours(),
        num_years: bundle.num_years(),
        countries: bundle
            .market_nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.country.clone()))
            .collect(),
    })
}
