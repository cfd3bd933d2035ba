//! Building the capacity expansion and dispatch linear program.
//!
//! The model holds, per market node, capacity variables for every configured technology and one
//! dispatch variable per time step for every flow. Per-time-step quantities are kept as
//! [`Series`], which are either constants, plain variables or linear expressions, so that the
//! results can be read back with a single evaluation pass.
use crate::config::Config;
use crate::country::{CountryCode, MarketNodeID};
use crate::input::{
    HydropowerCapacity, Inputs, InterconnectionLimits, InterconnectionPair, InterconnectionType,
};
use crate::solver::{Constraint, LinearExpression, LinearProgram, Solution, Variable};
use crate::technology::TechnologyID;
use crate::time_series::Timeline;
use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, info};
use std::ops::Range;
use strum::{Display, EnumIter};

mod constraints;
mod objective;
mod variables;

/// Penalty (EUR/MWh) on spilled hydropower inflow
pub const SPILLAGE_PENALTY: f64 = 100.0;

/// A quantity with one value per time step
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    /// Known values
    Constant(Vec<f64>),
    /// One decision variable per time step
    Variables(Vec<Variable>),
    /// One linear expression per time step
    Expressions(Vec<LinearExpression>),
}

impl Series {
    /// The number of time steps
    pub fn len(&self) -> usize {
        match self {
            Self::Constant(values) => values.len(),
            Self::Variables(variables) => variables.len(),
            Self::Expressions(expressions) => expressions.len(),
        }
    }

    /// Whether the series is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at time step `ts` as an expression
    pub fn at(&self, ts: usize) -> LinearExpression {
        match self {
            Self::Constant(values) => LinearExpression::constant(values[ts]),
            Self::Variables(variables) => variables[ts].into(),
            Self::Expressions(expressions) => expressions[ts].clone(),
        }
    }

    /// The sum over a range of time steps
    pub fn sum_over(&self, steps: Range<usize>) -> LinearExpression {
        let mut total = LinearExpression::new();
        for ts in steps {
            match self {
                Self::Constant(values) => total.add_constant(values[ts]),
                Self::Variables(variables) => total.add_term(variables[ts], 1.0),
                Self::Expressions(expressions) => total += &expressions[ts],
            }
        }
        total
    }

    /// The sum over all time steps
    pub fn sum(&self) -> LinearExpression {
        self.sum_over(0..self.len())
    }

    /// The values of the series in a solution
    pub fn evaluate(&self, solution: &Solution) -> Vec<f64> {
        match self {
            Self::Constant(values) => values.clone(),
            Self::Variables(variables) => {
                variables.iter().map(|var| solution.value(*var)).collect()
            }
            Self::Expressions(expressions) => expressions
                .iter()
                .map(|expression| solution.evaluate(expression))
                .collect(),
        }
    }
}

/// Capacities and generation of one IRES technology in a market node
#[derive(Debug, Clone, PartialEq)]
pub struct IresModel {
    /// Installed capacity (MW) per IRES node
    pub capacity: IndexMap<String, Variable>,
    /// Generation (MW): capacity factor times capacity, summed over IRES nodes
    pub generation: Series,
}

/// A dispatchable technology in a market node
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchableModel {
    /// Installed capacity (MW)
    pub capacity: Variable,
    /// Generation (MW)
    pub generation: Series,
}

/// The hydropower fleet of one technology in a market node
#[derive(Debug, Clone, PartialEq)]
pub struct HydropowerModel {
    /// Nameplate capacities after scaling
    pub capacity: HydropowerCapacity,
    /// Natural inflow (MWh per hour)
    pub inflow: Vec<f64>,
    /// Turbine flow (MW)
    pub turbine: Series,
    /// Pump flow (MW)
    pub pump: Series,
    /// Spilled inflow (MWh per hour)
    pub spillage: Series,
    /// Reservoir content (MWh), absent for run-of-river fleets
    pub reservoir: Option<Series>,
}

/// A storage technology in a market node
#[derive(Debug, Clone, PartialEq)]
pub struct StorageModel {
    /// Energy capacity (MWh)
    pub energy_capacity: Variable,
    /// Power capacity (MW)
    pub power_capacity: Variable,
    /// Charging power taken from the grid (MW)
    pub inflow: Series,
    /// Discharging power delivered to the grid (MW)
    pub outflow: Series,
    /// State of charge (MWh)
    pub soc: Series,
}

/// An electrolysis technology in a market node
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrolysisModel {
    /// Installed capacity (MW electric)
    pub capacity: Variable,
    /// Electricity consumption (MW)
    pub load: Series,
    /// Conversion efficiency from electricity to hydrogen
    pub efficiency: f64,
}

impl ElectrolysisModel {
    /// Hydrogen production (MW hydrogen)
    pub fn production(&self, ts: usize) -> LinearExpression {
        self.load.at(ts) * self.efficiency
    }
}

/// All variables and expressions of one market node
#[derive(Debug, Clone, PartialEq)]
pub struct MarketNodeModel {
    /// Market node identifier
    pub id: MarketNodeID,
    /// The country the node belongs to
    pub country: CountryCode,
    /// Electricity demand (MW)
    pub demand: Vec<f64>,
    /// Hydrogen demand (MW hydrogen)
    pub hydrogen_demand: Vec<f64>,
    /// IRES technologies
    pub ires: IndexMap<TechnologyID, IresModel>,
    /// Dispatchable technologies
    pub dispatchable: IndexMap<TechnologyID, DispatchableModel>,
    /// Hydropower technologies
    pub hydropower: IndexMap<TechnologyID, HydropowerModel>,
    /// Storage technologies
    pub storage: IndexMap<TechnologyID, StorageModel>,
    /// Electrolysis technologies
    pub electrolysis: IndexMap<TechnologyID, ElectrolysisModel>,
    /// Unserved demand (MW), only when a value of lost load is configured
    pub lost_load: Option<Series>,
    /// Power sent to other market nodes (MW)
    pub export: Series,
    /// Power received from other market nodes after transfer losses (MW)
    pub import: Series,
    /// Balance constraints, one per time step
    pub balance: Vec<Constraint>,
}

impl MarketNodeModel {
    /// Total IRES generation at a time step
    pub fn ires_generation(&self, ts: usize) -> LinearExpression {
        self.ires.values().map(|ires| ires.generation.at(ts)).sum()
    }

    /// Total dispatchable generation at a time step
    pub fn dispatchable_generation(&self, ts: usize) -> LinearExpression {
        self.dispatchable
            .values()
            .map(|dispatchable| dispatchable.generation.at(ts))
            .sum()
    }

    /// Net hydropower generation (turbine minus pump) at a time step
    pub fn hydropower_generation(&self, ts: usize) -> LinearExpression {
        self.hydropower
            .values()
            .map(|hydro| hydro.turbine.at(ts) - hydro.pump.at(ts))
            .sum()
    }

    /// Net storage charging (inflow minus outflow) at a time step
    pub fn net_storage_flow(&self, ts: usize) -> LinearExpression {
        self.storage
            .values()
            .map(|storage| storage.inflow.at(ts) - storage.outflow.at(ts))
            .sum()
    }

    /// Total electrolyser load at a time step
    pub fn electrolysis_load(&self, ts: usize) -> LinearExpression {
        self.electrolysis
            .values()
            .map(|electrolysis| electrolysis.load.at(ts))
            .sum()
    }

    /// Total hydrogen production at a time step
    pub fn hydrogen_production(&self, ts: usize) -> LinearExpression {
        self.electrolysis
            .values()
            .map(|electrolysis| electrolysis.production(ts))
            .sum()
    }

    /// Electricity demand plus electrolyser load at a time step
    pub fn total_demand(&self, ts: usize) -> LinearExpression {
        let mut demand = self.electrolysis_load(ts);
        demand.add_constant(self.demand[ts]);
        demand
    }

    /// Exports minus imports at a time step
    pub fn net_export(&self, ts: usize) -> LinearExpression {
        self.export.at(ts) - self.import.at(ts)
    }

    /// Generation from all sources at a time step
    pub fn generation(&self, ts: usize) -> LinearExpression {
        self.ires_generation(ts) + self.dispatchable_generation(ts) + self.hydropower_generation(ts)
    }

    /// Surplus generation at a time step, which the balance constraint keeps non-negative
    pub fn curtailed(&self, ts: usize) -> LinearExpression {
        let mut curtailed = self.generation(ts);
        curtailed -= self.net_storage_flow(ts);
        curtailed -= self.net_export(ts);
        curtailed -= self.total_demand(ts);
        if let Some(lost_load) = &self.lost_load {
            curtailed += lost_load.at(ts);
        }
        curtailed
    }
}

/// The flows over one interconnection type
#[derive(Debug, Clone, PartialEq)]
pub struct InterconnectionModel {
    /// The interconnection type
    pub kind: InterconnectionType,
    /// One-way transfer efficiency
    pub efficiency: f64,
    /// Flow (MW, measured at the sending node) per ordered pair
    pub flows: IndexMap<InterconnectionPair, Series>,
    /// Current transfer limits (MW) per ordered pair
    pub limits: InterconnectionLimits,
    /// Capacity added by the optimiser per ordered pair, in individual mode
    pub extra_capacity: IndexMap<InterconnectionPair, Variable>,
}

/// A part of the annual system cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CostComponent {
    /// IRES capacity
    Ires,
    /// Dispatchable capacity, operation and fuel
    Dispatchable,
    /// Hydropower capacity and operation
    Hydropower,
    /// Storage capacity
    Storage,
    /// Electrolyser capacity
    Electrolysis,
    /// Penalty on spilled inflow
    Spillage,
    /// Value of lost load
    LostLoad,
}

impl CostComponent {
    /// Whether this component is an artificial penalty rather than a real cost
    pub fn is_penalty(self) -> bool {
        matches!(self, Self::Spillage | Self::LostLoad)
    }
}

/// Annual cost expressions per component
pub type CostMap = IndexMap<CostComponent, LinearExpression>;

/// A built model, ready to be solved
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    /// The linear program
    pub problem: LinearProgram,
    /// The modelled time steps
    pub timeline: Timeline,
    /// Per market node variables and expressions
    pub market_nodes: IndexMap<MarketNodeID, MarketNodeModel>,
    /// Interconnection flows per type
    pub interconnections: IndexMap<InterconnectionType, InterconnectionModel>,
    /// Annual cost (EUR) per component; the objective is their sum
    pub costs: CostMap,
    /// Annual cost (EUR) per component of each market node
    pub node_costs: IndexMap<MarketNodeID, CostMap>,
    /// Rows added by each constraint family
    pub constraint_families: IndexMap<&'static str, Range<usize>>,
}

impl ModelBundle {
    /// The length of one time step in hours
    pub fn interval_hours(&self) -> f64 {
        self.timeline.interval_hours()
    }

    /// The number of climate years
    pub fn num_years(&self) -> usize {
        self.timeline.num_years()
    }

    /// The market nodes of a country
    pub fn market_nodes_in_country<'a>(
        &'a self,
        country: &'a CountryCode,
    ) -> impl Iterator<Item = &'a MarketNodeModel> {
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

    /// The total annual cost expression
    pub fn total_cost(&self) -> LinearExpression {
        self.costs.values().cloned().sum()
    }

    /// The balance constraint of a market node at a time step
    pub fn balance_constraint(&self, market_node: &MarketNodeID, ts: usize) -> Option<Constraint> {
        self.market_nodes
            .get(market_node)
            .and_then(|node| node.balance.get(ts).copied())
    }
}

/// Build the linear program for a configuration and its inputs.
///
/// # Arguments
///
/// * `config` - A validated run configuration
/// * `inputs` - The catalogs and scenario loaded for `config`
pub fn build_model(config: &Config, inputs: &Inputs) -> Result<ModelBundle> {
    let scenario = &inputs.scenario;
    let timeline = scenario.timeline.clone();
    info!(
        "Building model for {} market nodes and {} time steps",
        scenario.market_nodes.len(),
        timeline.len()
    );

    let mut problem = LinearProgram::new();
    let interconnections =
        variables::add_interconnection_variables(&mut problem, config, scenario);

    let mut market_nodes = IndexMap::new();
    for node in scenario.market_nodes.values() {
        let model = variables::add_market_node_variables(
            &mut problem,
            config,
            &inputs.catalog,
            node,
            &interconnections,
        )?;
        market_nodes.insert(node.id.clone(), model);
    }

    let mut bundle = ModelBundle {
        problem,
        timeline,
        market_nodes,
        interconnections,
        costs: CostMap::new(),
        node_costs: IndexMap::new(),
        constraint_families: IndexMap::new(),
    };
    bundle.node_costs = objective::cost_components(&bundle, config, &inputs.catalog)?;
    for components in bundle.node_costs.values() {
        for (component, expression) in components {
            *bundle.costs.entry(*component).or_default() += expression;
        }
    }
    let total_cost = bundle.total_cost();
    bundle.problem.add_objective_expression(&total_cost);

    constraints::add_constraints(&mut bundle, config, &inputs.catalog)?;

    for (family, rows) in &bundle.constraint_families {
        debug!("{family}: {} constraints", rows.len());
    }
    info!(
        "Model has {} variables, {} constraints and {} non-zeros",
        bundle.problem.num_variables(),
        bundle.problem.num_constraints(),
        bundle.problem.num_nonzeros()
    );

    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{build_test_model, config, inputs};
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[test]
    fn series_sums() {
        let series = Series::Variables(vec![Variable::new(0), Variable::new(1)]);
        assert_eq!(series.len(), 2);
        assert_approx_eq!(f64, series.sum().evaluate(&[1.0, 2.0]), 3.0);
        assert_approx_eq!(f64, series.sum_over(1..2).evaluate(&[1.0, 2.0]), 2.0);

        let constant = Series::Constant(vec![4.0, 5.0]);
        assert_approx_eq!(f64, constant.at(1).constant_value(), 5.0);
        assert!(constant.sum().is_constant());
    }

    #[rstest]
    fn build_model_layout(config: Config, inputs: Inputs) {
        let bundle = build_test_model(&config, &inputs);
        let steps = inputs.scenario.timeline.len();

        assert_eq!(bundle.market_nodes.len(), 2);
        let aa = &bundle.market_nodes["AA00"];
        assert_eq!(aa.balance.len(), steps);
        assert_eq!(aa.ires["pv"].capacity.len(), 1);
        assert_eq!(aa.dispatchable["gas"].generation.len(), steps);
        assert_eq!(aa.storage["lion"].soc.len(), steps);
        assert_eq!(aa.electrolysis["pem"].load.len(), steps);
        assert!(aa.hydropower.contains_key("ror"));
        assert!(!bundle.market_nodes["BB00"].hydropower.contains_key("ror"));

        let hvac = &bundle.interconnections[&InterconnectionType::Hvac];
        assert_eq!(hvac.flows.len(), 2);
        assert!(hvac.extra_capacity.is_empty());

        assert!(bundle.constraint_families.contains_key("balance"));
        assert!(bundle.constraint_families.contains_key("storage"));
        assert_eq!(bundle.constraint_families["balance"].len(), 2 * steps);
        assert_eq!(bundle.countries(), ["AA".into(), "BB".into()]);
    }

    #[rstest]
    fn build_model_individual_interconnections(config: Config, inputs: Inputs) {
        let config = config
            .with_overrides(&[
                ("interconnections.optimize_individual".into(), true.into()),
                ("interconnections.relative_capacity".into(), 1.5.into()),
            ])
            .unwrap();
        let bundle = build_test_model(&config, &inputs);

        let hvac = &bundle.interconnections[&InterconnectionType::Hvac];
        assert_eq!(hvac.extra_capacity.len(), 2);
        assert_eq!(bundle.constraint_families["interconnection_capacity"].len(), 1);
    }

    #[rstest]
    fn cost_components_present(config: Config, inputs: Inputs) {
        let bundle = build_test_model(&config, &inputs);
        for component in [
            CostComponent::Ires,
            CostComponent::Dispatchable,
            CostComponent::Hydropower,
            CostComponent::Storage,
            CostComponent::Electrolysis,
            CostComponent::Spillage,
        ] {
            assert!(bundle.costs.contains_key(&component), "{component}");
        }
        assert!(!bundle.costs.contains_key(&CostComponent::LostLoad));
        assert!(CostComponent::Spillage.is_penalty());

        // Hydropower is only present in AA00
        assert_eq!(bundle.node_costs.len(), 2);
        assert!(bundle.node_costs["AA00"].contains_key(&CostComponent::Hydropower));
        assert!(!bundle.node_costs["BB00"].contains_key(&CostComponent::Hydropower));
    }
}
