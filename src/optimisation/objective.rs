//! Code for assembling the annual system cost.
//!
//! Technology costs are quoted in USD and converted to EUR here. Capacity costs are annualised
//! with the capital recovery factor; operational costs are summed over the horizon and divided by
//! the number of climate years, so every component is an annual figure.
use super::*;
use crate::finance::{annual_fixed_cost, usd_to_eur};
use crate::technology::{
    CostParameter, ScenarioLevel, TechnologyCatalog, TechnologyCategory, TechnologyRecord,
};
use crate::units::MoneyPerPower;
use anyhow::Context;

/// Cost parameters of one technology at the configured cost-technology level, in EUR
struct Costs<'a> {
    record: &'a TechnologyRecord,
    level: ScenarioLevel,
}

impl Costs<'_> {
    fn value(&self, parameter: CostParameter) -> f64 {
        usd_to_eur(self.record.scenario_value(parameter, self.level))
    }

    /// Annualised capital cost plus fixed O&M per unit of capacity (MW, or MWh for storage
    /// energy)
    fn annual(&self, capex: CostParameter, fixed_om: CostParameter) -> f64 {
        annual_fixed_cost(
            MoneyPerPower(self.value(capex)),
            MoneyPerPower(self.value(fixed_om)),
            self.record.economic_lifetime,
            self.record.wacc,
        )
        .value()
    }
}

/// The annual cost of every component of the system, per market node
pub fn cost_components(
    bundle: &ModelBundle,
    config: &Config,
    catalog: &TechnologyCatalog,
) -> Result<IndexMap<MarketNodeID, CostMap>> {
    let level = config.technologies.scenario;
    let costs_of = |technology: &TechnologyID, category: TechnologyCategory| {
        catalog
            .get_in_category(&technology.0, category)
            .map(|record| Costs { record, level })
    };
    // Scales a sum over the horizon (in MW) to an annual energy (MWh)
    let operational = bundle.interval_hours() / bundle.num_years().max(1) as f64;

    let mut node_costs = IndexMap::new();
    for node in bundle.market_nodes.values() {
        let mut components = CostMap::new();
        let mut add = |component: CostComponent, expression: LinearExpression| {
            *components.entry(component).or_default() += expression;
        };

        for (technology, ires) in &node.ires {
            let costs = costs_of(technology, TechnologyCategory::Ires)?;
            let per_mw = costs.annual(CostParameter::Capex, CostParameter::FixedOm);
            add(
                CostComponent::Ires,
                LinearExpression::from_terms(
                    ires.capacity.values().map(|variable| (*variable, per_mw)),
                ),
            );
        }

        for (technology, dispatchable) in &node.dispatchable {
            let costs = costs_of(technology, TechnologyCategory::Dispatchable)?;
            let fuel_cost = if costs.record.is_hydrogen_fuelled() {
                config
                    .technologies
                    .hydrogen_reference_price
                    .with_context(|| format!("No hydrogen price set for {technology}"))?
            } else {
                costs.value(CostParameter::FuelCost)
            };
            let per_mwh =
                costs.value(CostParameter::VariableOm) + fuel_cost / costs.record.efficiency;

            let mut expression = LinearExpression::from_terms([(
                dispatchable.capacity,
                costs.annual(CostParameter::Capex, CostParameter::FixedOm),
            )]);
            expression.add_scaled(&dispatchable.generation.sum(), per_mwh * operational);
            add(CostComponent::Dispatchable, expression);
        }

        for (technology, hydro) in &node.hydropower {
            let costs = costs_of(technology, TechnologyCategory::Hydropower)?;
            // The nameplate is fixed, so its cost is a constant
            let per_mw = costs.annual(CostParameter::Capex, CostParameter::FixedOm);
            let mut expression = LinearExpression::constant(per_mw * hydro.capacity.turbine);
            expression.add_scaled(
                &hydro.turbine.sum(),
                costs.value(CostParameter::VariableOm) * operational,
            );
            add(CostComponent::Hydropower, expression);
            add(
                CostComponent::Spillage,
                hydro.spillage.sum() * (SPILLAGE_PENALTY * operational),
            );
        }

        for (technology, storage) in &node.storage {
            let costs = costs_of(technology, TechnologyCategory::Storage)?;
            add(
                CostComponent::Storage,
                LinearExpression::from_terms([
                    (
                        storage.energy_capacity,
                        costs.annual(CostParameter::CapexEnergy, CostParameter::FixedOmEnergy),
                    ),
                    (
                        storage.power_capacity,
                        costs.annual(CostParameter::CapexPower, CostParameter::FixedOmPower),
                    ),
                ]),
            );
        }

        for (technology, electrolysis) in &node.electrolysis {
            let costs = costs_of(technology, TechnologyCategory::Electrolysis)?;
            add(
                CostComponent::Electrolysis,
                LinearExpression::from_terms([(
                    electrolysis.capacity,
                    costs.annual(CostParameter::Capex, CostParameter::FixedOm),
                )]),
            );
        }

        if let (Some(lost_load), Some(value)) = (&node.lost_load, config.value_of_lost_load) {
            add(CostComponent::LostLoad, lost_load.sum() * (value * operational));
        }

        node_costs.insert(node.id.clone(), components);
    }

    Ok(node_costs)
}
