//! Code for adding constraints to the model.
use super::*;
use crate::config::PegRelation;
use crate::technology::{TechnologyCatalog, TechnologyCategory};
use anyhow::Context;

/// Add every constraint family to the model, recording the rows of each
pub fn add_constraints(
    bundle: &mut ModelBundle,
    config: &Config,
    catalog: &TechnologyCatalog,
) -> Result<()> {
    add_family(bundle, "balance", |bundle| {
        add_balance_constraints(bundle);
        Ok(())
    })?;
    add_family(bundle, "dispatch", |bundle| {
        add_dispatch_constraints(bundle);
        Ok(())
    })?;
    add_family(bundle, "storage", |bundle| {
        add_storage_constraints(bundle, catalog)
    })?;
    add_family(bundle, "hydropower", |bundle| {
        add_hydropower_constraints(bundle, catalog)
    })?;
    add_family(bundle, "interconnection", |bundle| {
        add_interconnection_limit_constraints(bundle);
        Ok(())
    })?;
    add_family(bundle, "interconnection_capacity", |bundle| {
        add_interconnection_capacity_constraints(bundle, config.interconnections.relative_capacity);
        Ok(())
    })?;
    add_family(bundle, "hydrogen", |bundle| {
        add_hydrogen_constraints(bundle, config.relative_hydrogen_demand);
        Ok(())
    })?;
    add_family(bundle, "self_sufficiency", |bundle| {
        add_self_sufficiency_constraints(bundle, config);
        Ok(())
    })?;
    add_family(bundle, "dispatchable_share", |bundle| {
        add_dispatchable_share_constraints(bundle, config);
        Ok(())
    })?;
    add_family(bundle, "curtailment", |bundle| {
        if let Some(relative_curtailment) = config.relative_curtailment {
            add_curtailment_constraint(bundle, relative_curtailment);
        }
        Ok(())
    })?;
    add_family(bundle, "storage_cost_peg", |bundle| {
        if let Some(peg) = &config.technologies.storage_cost_peg {
            add_storage_cost_peg(bundle, peg.relation, peg.value);
        }
        Ok(())
    })?;

    Ok(())
}

fn add_family<F>(bundle: &mut ModelBundle, name: &'static str, add: F) -> Result<()>
where
    F: FnOnce(&mut ModelBundle) -> Result<()>,
{
    let start = bundle.problem.num_constraints();
    add(bundle).with_context(|| format!("Could not add {name} constraints"))?;
    let end = bundle.problem.num_constraints();
    if end > start {
        bundle.constraint_families.insert(name, start..end);
    }

    Ok(())
}

/// Generation must cover demand, storage charging and net exports at every time step.
///
/// The surplus is curtailed.
fn add_balance_constraints(bundle: &mut ModelBundle) {
    let ModelBundle {
        problem,
        market_nodes,
        ..
    } = bundle;
    for node in market_nodes.values_mut() {
        node.balance = (0..node.demand.len())
            .map(|ts| problem.add_expression_constraint(&node.curtailed(ts), 0.0..))
            .collect();
    }
}

/// Add `series[ts] ≤ capacity` for every time step
fn add_capacity_limit(problem: &mut LinearProgram, series: &Series, capacity: Variable) {
    for ts in 0..series.len() {
        let mut expression = series.at(ts);
        expression.add_term(capacity, -1.0);
        problem.add_expression_constraint(&expression, ..=0.0);
    }
}

/// Dispatchable generation and electrolyser load are limited by the installed capacity
fn add_dispatch_constraints(bundle: &mut ModelBundle) {
    let ModelBundle {
        problem,
        market_nodes,
        ..
    } = bundle;
    for node in market_nodes.values() {
        for dispatchable in node.dispatchable.values() {
            add_capacity_limit(problem, &dispatchable.generation, dispatchable.capacity);
        }
        for electrolysis in node.electrolysis.values() {
            add_capacity_limit(problem, &electrolysis.load, electrolysis.capacity);
        }
    }
}

/// State-of-charge recursion and limits for storage.
///
/// The round-trip efficiency is split evenly between charging and discharging. The time step
/// before the first one is the last one, so the state of charge is cyclic.
fn add_storage_constraints(bundle: &mut ModelBundle, catalog: &TechnologyCatalog) -> Result<()> {
    let interval_hours = bundle.interval_hours();
    let ModelBundle {
        problem,
        market_nodes,
        ..
    } = bundle;
    for node in market_nodes.values() {
        for (technology, storage) in &node.storage {
            let record = catalog.get_in_category(&technology.0, TechnologyCategory::Storage)?;
            let sqrt_efficiency = record.roundtrip_efficiency.sqrt();
            let steps = storage.soc.len();

            for ts in 0..steps {
                let previous = (ts + steps - 1) % steps;
                // soc[ts] - soc[ts-1] - (in·√η - out/√η)·Δt = 0
                let mut recursion = storage.soc.at(ts) - storage.soc.at(previous);
                recursion.add_scaled(&storage.inflow.at(ts), -sqrt_efficiency * interval_hours);
                recursion.add_scaled(&storage.outflow.at(ts), interval_hours / sqrt_efficiency);
                problem.add_expression_constraint(&recursion, 0.0..=0.0);

                let mut lower = storage.soc.at(ts);
                lower.add_term(storage.energy_capacity, -record.soc_min);
                problem.add_expression_constraint(&lower, 0.0..);
                let mut upper = storage.soc.at(ts);
                upper.add_term(storage.energy_capacity, -record.soc_max);
                problem.add_expression_constraint(&upper, ..=0.0);
            }
            add_capacity_limit(problem, &storage.inflow, storage.power_capacity);
            add_capacity_limit(problem, &storage.outflow, storage.power_capacity);
        }
    }

    Ok(())
}

/// Water balance of hydropower fleets.
///
/// With a reservoir, its content changes by inflow minus spillage minus turbine use plus pumping;
/// the first time step has no predecessor. Without a reservoir the water balance holds within
/// every time step.
fn add_hydropower_constraints(bundle: &mut ModelBundle, catalog: &TechnologyCatalog) -> Result<()> {
    let interval_hours = bundle.interval_hours();
    let ModelBundle {
        problem,
        market_nodes,
        ..
    } = bundle;
    for node in market_nodes.values() {
        for (technology, hydro) in &node.hydropower {
            let record = catalog.get_in_category(&technology.0, TechnologyCategory::Hydropower)?;
            let water_use = |ts: usize| {
                // spillage + turbine/η_t - pump·η_p - inflow
                let mut water = hydro.spillage.at(ts);
                water.add_scaled(&hydro.turbine.at(ts), 1.0 / record.turbine_efficiency);
                water.add_scaled(&hydro.pump.at(ts), -record.pump_efficiency);
                water.add_constant(-hydro.inflow[ts]);
                water
            };

            match &hydro.reservoir {
                Some(reservoir) => {
                    for ts in 1..reservoir.len() {
                        let mut recursion = reservoir.at(ts) - reservoir.at(ts - 1);
                        recursion.add_scaled(&water_use(ts), interval_hours);
                        problem.add_expression_constraint(&recursion, 0.0..=0.0);
                    }
                }
                None => {
                    for ts in 0..hydro.inflow.len() {
                        problem.add_expression_constraint(&water_use(ts), 0.0..=0.0);
                    }
                }
            }
        }
    }

    Ok(())
}

/// In individual mode, flows are limited by the current limit plus the extra capacity
fn add_interconnection_limit_constraints(bundle: &mut ModelBundle) {
    let ModelBundle {
        problem,
        interconnections,
        ..
    } = bundle;
    for interconnection in interconnections.values() {
        for (pair, extra_capacity) in &interconnection.extra_capacity {
            let flow = &interconnection.flows[pair];
            let limits = interconnection.limits.get(pair).unwrap_or_default();
            for ts in 0..flow.len() {
                let mut expression = flow.at(ts);
                expression.add_term(*extra_capacity, -1.0);
                let limit = limits.get(ts).copied().unwrap_or(0.0);
                problem.add_expression_constraint(&expression, ..=limit);
            }
        }
    }
}

/// In individual mode, the extra capacity of each interconnection type adds up to the configured
/// relative capacity: Σ extra = (relative capacity - 1) · Σ current.
///
/// A type without current capacity therefore gets no extra capacity either.
fn add_interconnection_capacity_constraints(bundle: &mut ModelBundle, relative_capacity: f64) {
    let ModelBundle {
        problem,
        interconnections,
        ..
    } = bundle;
    for interconnection in interconnections.values() {
        if interconnection.extra_capacity.is_empty() {
            continue;
        }
        let current: f64 = interconnection
            .extra_capacity
            .keys()
            .map(|pair| interconnection.limits.mean_capacity(pair))
            .sum();
        let target = (relative_capacity - 1.0) * current.max(0.0);
        problem.add_constraint(
            target..=target,
            interconnection
                .extra_capacity
                .values()
                .map(|variable| (*variable, 1.0)),
        );
    }
}

/// Hydrogen production meets hydrogen demand in every climate year
fn add_hydrogen_constraints(bundle: &mut ModelBundle, relative_hydrogen_demand: f64) {
    let has_electrolysis = bundle
        .market_nodes
        .values()
        .any(|node| !node.electrolysis.is_empty());
    if !has_electrolysis && relative_hydrogen_demand == 0.0 {
        return;
    }

    let interval_hours = bundle.interval_hours();
    let years: Vec<Range<usize>> = bundle.timeline.years().map(|(_, steps)| steps).collect();
    for steps in years {
        let mut balance = LinearExpression::new();
        for node in bundle.market_nodes.values() {
            for electrolysis in node.electrolysis.values() {
                balance.add_scaled(
                    &electrolysis.load.sum_over(steps.clone()),
                    electrolysis.efficiency * interval_hours,
                );
            }
            let demand: f64 = node.hydrogen_demand[steps.clone()].iter().sum();
            balance.add_constant(-demand * interval_hours);
        }
        bundle
            .problem
            .add_expression_constraint(&balance, 0.0..=0.0);
    }
}

/// Add `min·denominator ≤ numerator ≤ max·denominator`, skipping trivial sides
fn add_ratio_band(
    problem: &mut LinearProgram,
    numerator: &LinearExpression,
    denominator: &LinearExpression,
    min: f64,
    max: f64,
) {
    if min > 0.0 {
        let mut lower = numerator.clone();
        lower.add_scaled(denominator, -min);
        problem.add_expression_constraint(&lower, 0.0..);
    }
    if max.is_finite() {
        let mut upper = numerator.clone();
        upper.add_scaled(denominator, -max);
        problem.add_expression_constraint(&upper, ..=0.0);
    }
}

/// Per-country bands on electricity and hydrogen self-sufficiency over the horizon
fn add_self_sufficiency_constraints(bundle: &mut ModelBundle, config: &Config) {
    let bands = &config.self_sufficiency;
    let interval_hours = bundle.interval_hours();

    for country in bundle.countries() {
        let mut supplied = LinearExpression::new();
        let mut demand = LinearExpression::new();
        let mut production = LinearExpression::new();
        let mut hydrogen_demand = 0.0;
        for node in bundle.market_nodes_in_country(&country) {
            for ts in 0..node.demand.len() {
                // Generation minus curtailment minus net storage charging, which by the balance
                // equals demand plus net exports minus lost load
                let total_demand = node.total_demand(ts);
                supplied.add_scaled(&node.net_export(ts), interval_hours);
                supplied.add_scaled(&total_demand, interval_hours);
                if let Some(lost_load) = &node.lost_load {
                    supplied.add_scaled(&lost_load.at(ts), -interval_hours);
                }
                demand.add_scaled(&total_demand, interval_hours);
                production.add_scaled(&node.hydrogen_production(ts), interval_hours);
            }
            hydrogen_demand += node.hydrogen_demand.iter().sum::<f64>() * interval_hours;
        }

        add_ratio_band(
            &mut bundle.problem,
            &supplied,
            &demand,
            bands.min_electricity,
            bands.max_electricity,
        );
        if hydrogen_demand > 0.0 {
            add_ratio_band(
                &mut bundle.problem,
                &production,
                &LinearExpression::constant(hydrogen_demand),
                bands.min_hydrogen,
                bands.max_hydrogen,
            );
        }
    }
}

/// Each dispatchable technology generates at most its configured share of electricity demand
fn add_dispatchable_share_constraints(bundle: &mut ModelBundle, config: &Config) {
    let interval_hours = bundle.interval_hours();
    let total_demand: f64 = bundle
        .market_nodes
        .values()
        .map(|node| node.demand.iter().sum::<f64>() * interval_hours)
        .sum();

    for (technology, share) in &config.technologies.dispatchable {
        if !share.is_finite() {
            continue;
        }
        let mut generation = LinearExpression::new();
        for node in bundle.market_nodes.values() {
            if let Some(dispatchable) = node.dispatchable.get(technology) {
                generation.add_scaled(&dispatchable.generation.sum(), interval_hours);
            }
        }
        bundle
            .problem
            .add_expression_constraint(&generation, ..=share * total_demand);
    }
}

/// Total curtailment is at most a fraction of IRES generation
fn add_curtailment_constraint(bundle: &mut ModelBundle, relative_curtailment: f64) {
    let mut expression = LinearExpression::new();
    for node in bundle.market_nodes.values() {
        for ts in 0..node.demand.len() {
            expression += node.curtailed(ts);
            expression.add_scaled(&node.ires_generation(ts), -relative_curtailment);
        }
    }
    bundle
        .problem
        .add_expression_constraint(&(expression * bundle.timeline.interval_hours()), ..=0.0);
}

/// Pin the annual storage cost above or below a value
fn add_storage_cost_peg(bundle: &mut ModelBundle, relation: PegRelation, value: f64) {
    let cost = bundle
        .costs
        .get(&CostComponent::Storage)
        .cloned()
        .unwrap_or_default();
    match relation {
        PegRelation::AtLeast => bundle.problem.add_expression_constraint(&cost, value..),
        PegRelation::AtMost => bundle.problem.add_expression_constraint(&cost, ..=value),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{build_test_model, config, inputs};
    use crate::input::{
        HydropowerCapacity, HydropowerUnit, Inputs, InterconnectionLimits, InterconnectionPair,
        InterconnectionType,
    };
    use float_cmp::assert_approx_eq;
    use indexmap::indexmap;
    use rstest::rstest;

    /// The coefficient of a variable in a row, if it appears there
    fn coefficient(terms: &[(Variable, f64)], variable: Variable) -> Option<f64> {
        terms
            .iter()
            .find(|(var, _)| *var == variable)
            .map(|(_, coeff)| *coeff)
    }

    #[rstest]
    fn storage_recursion_is_cyclic(config: Config, inputs: Inputs) {
        let bundle = build_test_model(&config, &inputs);
        let storage = &bundle.market_nodes["AA00"].storage["lion"];
        let Series::Variables(soc) = &storage.soc else {
            panic!("expected variables");
        };

        // The first row of the storage family is the recursion of the first time step
        let first = bundle.constraint_families["storage"].start;
        let row = bundle.problem.rows().nth(first).unwrap();
        let last = soc.last().unwrap();
        assert!(row.terms.iter().any(|(var, coeff)| var == &soc[0] && *coeff == 1.0));
        assert!(row.terms.iter().any(|(var, coeff)| var == last && *coeff == -1.0));
        assert_approx_eq!(f64, row.lower, 0.0);
        assert_approx_eq!(f64, row.upper, 0.0);
    }

    #[rstest]
    fn hydrogen_balance_per_year(config: Config, inputs: Inputs) {
        let config = config
            .with_overrides(&[("relative_hydrogen_demand".into(), 0.5.into())])
            .unwrap();
        let bundle = build_test_model(&config, &inputs);
        let rows = &bundle.constraint_families["hydrogen"];
        assert_eq!(rows.len(), bundle.num_years());

        // (100 + 50) MW × 0.5 × 24 h × 365 days
        let row = bundle.problem.rows().nth(rows.start).unwrap();
        assert_approx_eq!(f64, row.lower, 150.0 * 0.5 * 24.0 * 365.0, epsilon = 1e-6);
    }

    #[rstest]
    fn optional_families(config: Config, inputs: Inputs) {
        let bundle = build_test_model(&config, &inputs);
        assert!(!bundle.constraint_families.contains_key("curtailment"));
        assert!(!bundle.constraint_families.contains_key("storage_cost_peg"));
        assert!(!bundle.constraint_families.contains_key("self_sufficiency"));
        assert!(!bundle.constraint_families.contains_key("dispatchable_share"));

        let config = config
            .with_overrides(&[
                ("relative_curtailment".into(), 0.1.into()),
                ("self_sufficiency.min_electricity".into(), 0.5.into()),
                ("technologies.dispatchable.gas".into(), 0.2.into()),
            ])
            .unwrap();
        let bundle = build_test_model(&config, &inputs);
        assert_eq!(bundle.constraint_families["curtailment"].len(), 1);
        assert_eq!(bundle.constraint_families["self_sufficiency"].len(), 2);
        assert_eq!(bundle.constraint_families["dispatchable_share"].len(), 1);
    }

    #[rstest]
    fn run_of_river_water_balance(config: Config, inputs: Inputs) {
        let bundle = build_test_model(&config, &inputs);
        let rows = &bundle.constraint_families["hydropower"];
        assert_eq!(rows.len(), bundle.timeline.len());

        let hydro = &bundle.market_nodes["AA00"].hydropower["ror"];
        let row = bundle.problem.rows().nth(rows.start).unwrap();
        // The inflow moves to the bounds
        assert_approx_eq!(f64, row.lower, hydro.inflow[0]);
        assert_approx_eq!(f64, row.upper, hydro.inflow[0]);
    }

    #[rstest]
    fn reservoir_recursion_starts_at_second_step(config: Config, mut inputs: Inputs) {
        let steps = inputs.scenario.timeline.len();
        let mut soc = vec![None; steps];
        soc[0] = Some(0.5);
        let unit = HydropowerUnit::new(
            HydropowerCapacity {
                turbine: 40.0,
                pump: 0.0,
                reservoir: 1000.0,
            },
            vec![20.0; steps],
            (vec![0.0; steps], vec![40.0; steps]),
            (vec![0.0; steps], vec![0.0; steps]),
            soc,
            (vec![0.0; steps], vec![1.0; steps]),
        );
        inputs
            .scenario
            .market_nodes
            .get_mut("AA00")
            .unwrap()
            .hydropower
            .insert("ror".into(), unit);

        let bundle = build_test_model(&config, &inputs);
        let rows = &bundle.constraint_families["hydropower"];
        // The first time step has no predecessor, and there is no pass-through row
        assert_eq!(rows.len(), steps - 1);

        let hydro = &bundle.market_nodes["AA00"].hydropower["ror"];
        let Some(Series::Expressions(reservoir)) = &hydro.reservoir else {
            panic!("expected a reservoir");
        };
        let (Series::Variables(turbine), Series::Variables(spillage)) =
            (&hydro.turbine, &hydro.spillage)
        else {
            panic!("expected variables");
        };
        assert!(reservoir[0].is_constant());
        let (reservoir_1, _) = reservoir[1].terms()[0];

        // R[1] - 500 + 24·(spillage[1] + turbine[1] - 20) = 0
        let row = bundle.problem.rows().nth(rows.start).unwrap();
        assert_eq!(coefficient(row.terms, reservoir_1), Some(1.0));
        assert_approx_eq!(f64, coefficient(row.terms, turbine[1]).unwrap(), 24.0);
        assert_approx_eq!(f64, coefficient(row.terms, spillage[1]).unwrap(), 24.0);
        assert_eq!(coefficient(row.terms, turbine[0]), None);
        assert_approx_eq!(f64, row.lower, 500.0 + 24.0 * 20.0);
        assert_approx_eq!(f64, row.upper, 500.0 + 24.0 * 20.0);
    }

    #[rstest]
    fn individual_interconnection_capacity_per_type(config: Config, mut inputs: Inputs) {
        let steps = inputs.scenario.timeline.len();
        inputs.scenario.interconnections.insert(
            InterconnectionType::Hvdc,
            InterconnectionLimits::new(indexmap! {
                ("AA00".into(), "BB00".into()) => vec![0.0; steps],
            }),
        );
        let config = config
            .with_overrides(&[
                ("interconnections.optimize_individual".into(), true.into()),
                ("interconnections.relative_capacity".into(), 1.5.into()),
            ])
            .unwrap();
        let bundle = build_test_model(&config, &inputs);

        let family = &bundle.constraint_families["interconnection_capacity"];
        let rows: Vec<_> = bundle
            .problem
            .rows()
            .skip(family.start)
            .take(family.len())
            .collect();
        assert_eq!(rows.len(), 2);

        // HVAC: Σ extra = 0.5 × (100 + 100)
        let hvac = &bundle.interconnections[&InterconnectionType::Hvac];
        assert_eq!(rows[0].terms.len(), 2);
        for variable in hvac.extra_capacity.values() {
            assert_eq!(coefficient(rows[0].terms, *variable), Some(1.0));
        }
        assert_approx_eq!(f64, rows[0].lower, 100.0);
        assert_approx_eq!(f64, rows[0].upper, 100.0);

        // HVDC has no current capacity to extend
        let hvdc = &bundle.interconnections[&InterconnectionType::Hvdc];
        let pair: InterconnectionPair = ("AA00".into(), "BB00".into());
        let extra = hvdc.extra_capacity[&pair];
        assert_eq!(rows[1].terms, [(extra, 1.0)]);
        assert_approx_eq!(f64, rows[1].lower, 0.0);
        assert_approx_eq!(f64, rows[1].upper, 0.0);
    }

    #[rstest]
    fn individual_flow_limit_includes_extra_capacity(config: Config, inputs: Inputs) {
        let config = config
            .with_overrides(&[("interconnections.optimize_individual".into(), true.into())])
            .unwrap();
        let bundle = build_test_model(&config, &inputs);

        let hvac = &bundle.interconnections[&InterconnectionType::Hvac];
        let pair: InterconnectionPair = ("AA00".into(), "BB00".into());
        let Series::Variables(flow) = &hvac.flows[&pair] else {
            panic!("expected variables");
        };
        let extra = hvac.extra_capacity[&pair];

        // flow[0] - extra ≤ 100
        let rows = &bundle.constraint_families["interconnection"];
        let row = bundle.problem.rows().nth(rows.start).unwrap();
        assert_eq!(row.terms.len(), 2);
        assert_eq!(coefficient(row.terms, flow[0]), Some(1.0));
        assert_eq!(coefficient(row.terms, extra), Some(-1.0));
        assert!(row.lower.is_infinite());
        assert_approx_eq!(f64, row.upper, 100.0);
    }
}
