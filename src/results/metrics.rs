//! Derived metrics of a solved model.
//!
//! All energies are annual (MWh per year) and all costs are annual (EUR per year), so levelised
//! costs come out in EUR/MWh.
use super::*;
use crate::finance::{levelised_cost, levelised_cost_of_hydrogen};
use crate::units::{Energy, Money};

/// Metrics of the whole system
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMetrics {
    /// Objective value, including penalties (EUR)
    pub objective: f64,
    /// Levelised cost of electricity served, including electricity used by electrolysers
    /// (EUR/MWh)
    pub lcoe: f64,
    /// Levelised cost of hydrogen: electrolysers plus the electricity they use at the LCOE
    /// (EUR/MWh hydrogen)
    pub lcoh: f64,
    /// Curtailed energy as a fraction of IRES generation
    pub relative_curtailment: f64,
    /// Annual electricity demand including electrolysis (MWh)
    pub total_demand: f64,
    /// Annual hydrogen production (MWh)
    pub total_hydrogen: f64,
}

impl SystemMetrics {
    /// The metrics as (name, value) pairs
    pub fn to_records(&self) -> [(&'static str, f64); 6] {
        [
            ("objective", self.objective),
            ("lcoe", self.lcoe),
            ("lcoh", self.lcoh),
            ("relative_curtailment", self.relative_curtailment),
            ("total_demand", self.total_demand),
            ("total_hydrogen", self.total_hydrogen),
        ]
    }
}

/// Metrics of one country
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryMetrics {
    /// Country code
    pub country: CountryCode,
    /// Electricity supplied by the country's own generation divided by its demand
    pub self_sufficiency_electricity: f64,
    /// Hydrogen produced in the country divided by its hydrogen demand
    pub self_sufficiency_hydrogen: f64,
    /// Electricity system cost of the country divided by its electricity demand, including
    /// electrolysis (EUR/MWh)
    pub lcoe: f64,
    /// Share of the system electricity cost incurred in the country
    pub cost_share: f64,
}

/// Whether a cost component counts towards the cost of electricity
fn is_electricity_cost(component: CostComponent) -> bool {
    !component.is_penalty() && component != CostComponent::Electrolysis
}

fn electricity_cost(costs: &IndexMap<CostComponent, f64>) -> f64 {
    costs
        .iter()
        .filter(|(component, _)| is_electricity_cost(**component))
        .map(|(_, cost)| cost)
        .sum()
}

/// `numerator / denominator`, or NaN if the denominator is not positive
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        f64::NAN
    }
}

impl ResultSet {
    /// Sum the annual totals of a column over several market nodes
    fn annual_sum<'a, I>(&self, market_nodes: I, column: &str) -> f64
    where
        I: IntoIterator<Item = &'a MarketNodeID>,
    {
        market_nodes
            .into_iter()
            .map(|market_node| self.annual_total(market_node, column))
            .sum()
    }

    /// The market nodes of a country
    fn nodes_in_country<'a>(
        &'a self,
        country: &'a CountryCode,
    ) -> impl Iterator<Item = &'a MarketNodeID> + 'a {
        self.countries
            .iter()
            .filter(move |(_, code)| *code == country)
            .map(|(market_node, _)| market_node)
    }

    /// The modelled countries, in order of first appearance
    pub fn country_codes(&self) -> Vec<CountryCode> {
        let mut codes: Vec<CountryCode> = Vec::new();
        for code in self.countries.values() {
            if !codes.contains(code) {
                codes.push(code.clone());
            }
        }
        codes
    }

    /// Metrics of the whole system
    pub fn system_metrics(&self) -> SystemMetrics {
        let nodes = self.market_nodes.keys();
        let electricity_demand = self.annual_sum(nodes.clone(), "demand_electricity");
        let electrolysis_load = self.annual_sum(nodes.clone(), "demand_electrolysis");
        let hydrogen = self.annual_sum(nodes.clone(), "hydrogen_production");
        let curtailed = self.annual_sum(nodes.clone(), "curtailed");
        let ires = self.annual_sum(nodes.clone(), "generation_ires");

        // Electrolysers pay for their share of the electricity system at the same rate as all
        // other demand
        let lcoe = levelised_cost(
            Money(electricity_cost(&self.costs)),
            Energy(electricity_demand + electrolysis_load),
        );
        let electrolyser_cost = self
            .costs
            .get(&CostComponent::Electrolysis)
            .copied()
            .unwrap_or_default();
        let lcoh = levelised_cost_of_hydrogen(
            Money(electrolyser_cost),
            lcoe,
            Energy(electrolysis_load),
            Energy(hydrogen),
        );

        SystemMetrics {
            objective: self.objective,
            lcoe: lcoe.0,
            lcoh: lcoh.0,
            relative_curtailment: ratio(curtailed, ires),
            total_demand: electricity_demand + electrolysis_load,
            total_hydrogen: hydrogen,
        }
    }

    /// Metrics of every country
    pub fn country_metrics(&self) -> Vec<CountryMetrics> {
        let system_cost = electricity_cost(&self.costs);

        self.country_codes()
            .into_iter()
            .map(|country| {
                let nodes: Vec<&MarketNodeID> = self.nodes_in_country(&country).collect();
                let demand_total = self.annual_sum(nodes.iter().copied(), "demand_total");
                // Demand plus net exports minus lost load is what the country supplied itself
                let supplied = demand_total
                    + self.annual_sum(nodes.iter().copied(), "net_export")
                    - self.annual_sum(nodes.iter().copied(), "lost_load");
                let hydrogen_production =
                    self.annual_sum(nodes.iter().copied(), "hydrogen_production");
                let hydrogen_demand = self.annual_sum(nodes.iter().copied(), "hydrogen_demand");
                let cost: f64 = nodes
                    .iter()
                    .filter_map(|node| self.node_costs.get(*node))
                    .map(electricity_cost)
                    .sum();
                CountryMetrics {
                    self_sufficiency_electricity: ratio(supplied, demand_total),
                    self_sufficiency_hydrogen: ratio(hydrogen_production, hydrogen_demand),
                    lcoe: levelised_cost(Money(cost), Energy(demand_total)).0,
                    cost_share: ratio(cost, system_cost),
                    country,
                }
            })
            .collect()
    }
}
