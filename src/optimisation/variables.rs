//! Code for adding decision variables to the model.
use super::*;
use crate::input::{HydropowerUnit, MarketNode, Scenario};
use crate::technology::{TechnologyCatalog, TechnologyCategory};
use anyhow::Context;

/// Add one variable per time step with the given bounds
fn add_series<F>(problem: &mut LinearProgram, steps: usize, mut bounds: F) -> Series
where
    F: FnMut(usize) -> (f64, f64),
{
    Series::Variables(
        (0..steps)
            .map(|ts| {
                let (lower, upper) = bounds(ts);
                problem.add_variable(0.0, lower..=upper)
            })
            .collect(),
    )
}

/// Add one non-negative variable per time step
fn add_non_negative_series(problem: &mut LinearProgram, steps: usize) -> Series {
    add_series(problem, steps, |_| (0.0, f64::INFINITY))
}

/// Add the flow variables of every interconnection type.
///
/// In fleet-scaled mode each flow is bounded by the transfer limit times the relative capacity.
/// In individual mode the limit enters a constraint together with an extra-capacity variable, so
/// the flow variables are only bounded below here.
pub fn add_interconnection_variables(
    problem: &mut LinearProgram,
    config: &Config,
    scenario: &Scenario,
) -> IndexMap<InterconnectionType, InterconnectionModel> {
    let settings = &config.interconnections;
    let steps = scenario.timeline.len();

    let mut interconnections = IndexMap::new();
    for (kind, limits) in &scenario.interconnections {
        let mut flows = IndexMap::new();
        let mut extra_capacity = IndexMap::new();
        for (pair, limit) in limits.iter() {
            let series = if settings.optimize_individual {
                extra_capacity.insert(pair.clone(), problem.add_variable(0.0, 0.0..));
                add_non_negative_series(problem, steps)
            } else {
                add_series(problem, steps, |ts| {
                    (0.0, limit[ts] * settings.relative_capacity)
                })
            };
            flows.insert(pair.clone(), series);
        }

        interconnections.insert(
            *kind,
            InterconnectionModel {
                kind: *kind,
                efficiency: settings.efficiency.get(*kind),
                flows,
                limits: limits.clone(),
                extra_capacity,
            },
        );
    }

    interconnections
}

/// Add the variables of one market node
pub fn add_market_node_variables(
    problem: &mut LinearProgram,
    config: &Config,
    catalog: &TechnologyCatalog,
    node: &MarketNode,
    interconnections: &IndexMap<InterconnectionType, InterconnectionModel>,
) -> Result<MarketNodeModel> {
    let steps = node.demand.len();
    let technologies = &config.technologies;

    let ires = node
        .ires
        .iter()
        .map(|(technology, ires_nodes)| {
            let mut capacity = IndexMap::new();
            let mut generation = vec![LinearExpression::new(); steps];
            for ires_node in ires_nodes {
                let variable = problem.add_variable(
                    0.0,
                    ires_node.current_capacity..=ires_node.potential_capacity,
                );
                for (ts, expression) in generation.iter_mut().enumerate() {
                    expression.add_term(variable, ires_node.capacity_factor[ts]);
                }
                capacity.insert(ires_node.id.clone(), variable);
            }
            let model = IresModel {
                capacity,
                generation: Series::Expressions(generation),
            };
            (technology.clone(), model)
        })
        .collect();

    let dispatchable = technologies
        .dispatchable
        .keys()
        .map(|technology| {
            let model = DispatchableModel {
                capacity: problem.add_variable(0.0, 0.0..),
                generation: add_non_negative_series(problem, steps),
            };
            (technology.clone(), model)
        })
        .collect();

    let mut hydropower = IndexMap::new();
    for (technology, unit) in &node.hydropower {
        let record = catalog.get_in_category(&technology.0, TechnologyCategory::Hydropower)?;
        let unit = unit.scaled(technologies.relative_hydropower_capacity);
        if !unit.capacity.has_generation() {
            continue;
        }
        let model = add_hydropower_variables(problem, &unit).with_context(|| {
            format!("Invalid hydropower data for {} in {}", record.id, node.id)
        })?;
        hydropower.insert(technology.clone(), model);
    }

    let storage = technologies
        .storage
        .iter()
        .map(|technology| {
            let model = StorageModel {
                energy_capacity: problem.add_variable(0.0, 0.0..),
                power_capacity: problem.add_variable(0.0, 0.0..),
                inflow: add_non_negative_series(problem, steps),
                outflow: add_non_negative_series(problem, steps),
                soc: add_non_negative_series(problem, steps),
            };
            (technology.clone(), model)
        })
        .collect();

    let electrolysis = technologies
        .electrolysis
        .iter()
        .map(|technology| {
            let record = catalog.get_in_category(&technology.0, TechnologyCategory::Electrolysis)?;
            let model = ElectrolysisModel {
                capacity: problem.add_variable(0.0, 0.0..),
                load: add_non_negative_series(problem, steps),
                efficiency: record.efficiency,
            };
            Ok((technology.clone(), model))
        })
        .collect::<Result<_>>()?;

    let lost_load = config.value_of_lost_load.map(|_| {
        let demand = &node.demand;
        add_series(problem, steps, |ts| (0.0, demand[ts].max(0.0)))
    });

    let (export, import) = interconnection_flows(&node.id, steps, interconnections);

    Ok(MarketNodeModel {
        id: node.id.clone(),
        country: node.country.clone(),
        demand: node.demand.clone(),
        hydrogen_demand: node
            .demand
            .iter()
            .map(|demand| demand * config.relative_hydrogen_demand)
            .collect(),
        ires,
        dispatchable,
        hydropower,
        storage,
        electrolysis,
        lost_load,
        export,
        import,
        balance: Vec::new(),
    })
}

/// Add turbine, pump, spillage and reservoir variables for a hydropower fleet.
///
/// A reservoir state of charge which was observed is fixed; otherwise it is a variable bounded by
/// the state-of-charge band.
fn add_hydropower_variables(
    problem: &mut LinearProgram,
    unit: &HydropowerUnit,
) -> Result<HydropowerModel> {
    let steps = unit.inflow.len();
    ensure_len(unit, steps)?;

    let turbine = add_series(problem, steps, |ts| {
        (unit.min_generation[ts], unit.max_generation[ts])
    });
    let pump = add_series(problem, steps, |ts| {
        (unit.min_pumping[ts], unit.max_pumping[ts])
    });
    let spillage = add_non_negative_series(problem, steps);

    let reservoir = unit.capacity.has_reservoir().then(|| {
        let size = unit.capacity.reservoir;
        let expressions = (0..steps)
            .map(|ts| match unit.reservoir_soc[ts] {
                Some(soc) => LinearExpression::constant(soc * size),
                None => {
                    let bounds =
                        unit.min_reservoir_soc[ts] * size..=unit.max_reservoir_soc[ts] * size;
                    problem.add_variable(0.0, bounds).into()
                }
            })
            .collect();
        Series::Expressions(expressions)
    });

    Ok(HydropowerModel {
        capacity: unit.capacity,
        inflow: unit.inflow.clone(),
        turbine,
        pump,
        spillage,
        reservoir,
    })
}

fn ensure_len(unit: &HydropowerUnit, steps: usize) -> Result<()> {
    let lengths = [
        unit.min_generation.len(),
        unit.max_generation.len(),
        unit.min_pumping.len(),
        unit.max_pumping.len(),
        unit.reservoir_soc.len(),
        unit.min_reservoir_soc.len(),
        unit.max_reservoir_soc.len(),
    ];
    anyhow::ensure!(
        lengths.iter().all(|len| *len == steps),
        "All hydropower series must have {steps} values"
    );

    Ok(())
}

/// The export and import expressions of a market node.
///
/// Exports are measured at the sending node; imports are what arrives after transfer losses.
fn interconnection_flows(
    market_node: &MarketNodeID,
    steps: usize,
    interconnections: &IndexMap<InterconnectionType, InterconnectionModel>,
) -> (Series, Series) {
    let mut export = vec![LinearExpression::new(); steps];
    let mut import = vec![LinearExpression::new(); steps];
    for interconnection in interconnections.values() {
        for ((from, to), flow) in &interconnection.flows {
            if from == market_node {
                for (ts, expression) in export.iter_mut().enumerate() {
                    *expression += flow.at(ts);
                }
            } else if to == market_node {
                for (ts, expression) in import.iter_mut().enumerate() {
                    expression.add_scaled(&flow.at(ts), interconnection.efficiency);
                }
            }
        }
    }

    (Series::Expressions(export), Series::Expressions(import))
}
