//! Fixtures for tests
use crate::config::Config;
use crate::country::{CountryMap, MarketNodeID};
use crate::input::{
    HydropowerCapacity, HydropowerUnit, Inputs, InterconnectionLimits, InterconnectionType,
    IresNode, MarketNode, Scenario,
};
use crate::optimisation::{ModelBundle, build_model};
use crate::solver::Solution;
use crate::technology::{TechnologyCatalog, TechnologyFile};
use crate::time_series::{Resolution, Timeline};
use chrono::{Datelike, Duration, NaiveDate};
use indexmap::{IndexMap, indexmap};
use rstest::fixture;
use std::fs;
use std::path::{Path, PathBuf};

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A small technology catalog with one technology of each kind, plus a hydrogen turbine
pub const TECHNOLOGIES_YAML: &str = "
ires:
  pv:
    name: Solar PV
    wacc: 0.05
    economic_lifetime: 25
    conservative: {capex: 900000, fixed_om: 15000}
    moderate: {capex: 700000, fixed_om: 12000}
    advanced: {capex: 500000, fixed_om: 10000}
dispatchable:
  gas:
    name: Gas turbine
    wacc: 0.05
    economic_lifetime: 30
    efficiency: 0.5
    fuel: gas
    conservative: {capex: 1000000, fixed_om: 20000, variable_om: 5, fuel_cost: 30}
    moderate: {capex: 900000, fixed_om: 18000, variable_om: 4, fuel_cost: 30}
    advanced: {capex: 800000, fixed_om: 16000, variable_om: 3, fuel_cost: 30}
  h2_turbine:
    name: Hydrogen turbine
    wacc: 0.05
    economic_lifetime: 30
    efficiency: 0.4
    fuel: hydrogen
    conservative: {capex: 1200000, fixed_om: 20000, variable_om: 5}
    moderate: {capex: 1100000, fixed_om: 18000, variable_om: 4}
    advanced: {capex: 1000000, fixed_om: 16000, variable_om: 3}
hydropower:
  ror:
    name: Run-of-river
    wacc: 0.05
    economic_lifetime: 50
    conservative: {capex: 3000000, fixed_om: 30000, variable_om: 1}
    moderate: {capex: 3000000, fixed_om: 30000, variable_om: 1}
    advanced: {capex: 3000000, fixed_om: 30000, variable_om: 1}
storage:
  lion:
    name: Lithium-ion
    wacc: 0.05
    economic_lifetime: 15
    roundtrip_efficiency: 0.9
    soc_min: 0.1
    soc_max: 0.9
    conservative: {capex_energy: 400000, capex_power: 300000, fixed_om_power: 5000}
    moderate: {capex_energy: 300000, capex_power: 250000, fixed_om_power: 4000}
    advanced: {capex_energy: 200000, capex_power: 200000, fixed_om_power: 3000}
electrolysis:
  pem:
    name: PEM electrolyser
    wacc: 0.05
    economic_lifetime: 20
    efficiency: 0.7
    conservative: {capex: 1500000, fixed_om: 30000}
    moderate: {capex: 1000000, fixed_om: 20000}
    advanced: {capex: 600000, fixed_om: 12000}
";

/// Two countries with one market node each
pub const COUNTRIES_YAML: &str = "
- name: Country A
  nuts2: AA
  alpha3: AAA
  market_nodes: [AA00]
- name: Country B
  nuts2: BB
  alpha3: BBB
  market_nodes: [BB00]
";

/// A configuration for the fixture countries and technologies
pub const CONFIG_YAML: &str = "name: test
scenario: test
country_codes: [AA, BB]
climate_years:
  start: 2019
  end: 2019
resolution: 24H
relative_hydrogen_demand: 0.0
self_sufficiency:
  min_electricity: 0.0
interconnections:
  relative_capacity: 1.0
  optimize_individual: false
  efficiency:
    hvac: 0.95
technologies:
  scenario: 0.0
  ires: [pv]
  dispatchable:
    gas: .inf
  hydropower: [ror]
  storage: [lion]
  electrolysis: [pem]
optimization:
  thread_count: 0
  numeric_focus: 0
";

/// Electricity demand of the fixture market nodes (MW)
const DEMAND: [(&str, f64); 2] = [("AA00", 100.0), ("BB00", 50.0)];

/// Turbine capacity of the run-of-river plant in AA00 (MW)
const ROR_TURBINE: f64 = 40.0;

/// Natural inflow of the run-of-river plant in AA00 (MWh per hour)
const ROR_INFLOW: f64 = 20.0;

/// Transfer limit of each interconnection (MW)
const HVAC_LIMIT: f64 = 100.0;

#[fixture]
pub fn catalog() -> TechnologyCatalog {
    let file: TechnologyFile = serde_yaml::from_str(TECHNOLOGIES_YAML).unwrap();
    TechnologyCatalog::from_file(file).unwrap()
}

#[fixture]
pub fn countries() -> CountryMap {
    let path = tempfile::tempdir().unwrap();
    fs::write(path.path().join("countries.yaml"), COUNTRIES_YAML).unwrap();
    crate::input::read_countries(path.path()).unwrap()
}

#[fixture]
pub fn config() -> Config {
    Config::from_yaml_str(CONFIG_YAML, PathBuf::new()).unwrap()
}

#[fixture]
pub fn timeline() -> Timeline {
    Timeline::new(2019, 2019, Resolution::from_hours(24).unwrap()).unwrap()
}

/// The inputs described by [`CONFIG_YAML`], held in memory
#[fixture]
pub fn inputs(countries: CountryMap, catalog: TechnologyCatalog, timeline: Timeline) -> Inputs {
    let steps = timeline.len();
    let market_nodes = DEMAND
        .iter()
        .map(|(id, demand)| {
            let id = MarketNodeID::new(id);
            let ires = indexmap! {
                "pv".into() => vec![IresNode {
                    id: "n1".into(),
                    capacity_factor: vec![0.5; steps],
                    current_capacity: 0.0,
                    potential_capacity: f64::INFINITY,
                }],
            };
            let mut hydropower = IndexMap::new();
            if &*id.0 == "AA00" {
                let capacity = HydropowerCapacity {
                    turbine: ROR_TURBINE,
                    pump: 0.0,
                    reservoir: 0.0,
                };
                let unit = HydropowerUnit::new(
                    capacity,
                    vec![ROR_INFLOW; steps],
                    (vec![0.0; steps], vec![ROR_TURBINE; steps]),
                    (vec![0.0; steps], vec![0.0; steps]),
                    vec![None; steps],
                    (vec![0.0; steps], vec![1.0; steps]),
                );
                hydropower.insert("ror".into(), unit);
            }
            let node = MarketNode {
                country: id.country_code(),
                demand: vec![*demand; steps],
                id: id.clone(),
                ires,
                hydropower,
            };
            (id, node)
        })
        .collect();

    let hvac = InterconnectionLimits::new(indexmap! {
        ("AA00".into(), "BB00".into()) => vec![HVAC_LIMIT; steps],
        ("BB00".into(), "AA00".into()) => vec![HVAC_LIMIT; steps],
    });
    let interconnections = indexmap! {
        InterconnectionType::Hvac => hvac,
        InterconnectionType::Hvdc => InterconnectionLimits::default(),
    };

    Inputs {
        countries,
        catalog,
        scenario: Scenario {
            timeline,
            market_nodes,
            interconnections,
        },
    }
}

/// Build the model for a configuration, panicking on error
pub fn build_test_model(config: &Config, inputs: &Inputs) -> ModelBundle {
    build_model(config, inputs).unwrap()
}

/// A solution with every variable set to `value` and every dual set to `dual`
pub fn uniform_solution(bundle: &ModelBundle, value: f64, dual: f64) -> Solution {
    let primal = vec![value; bundle.problem.num_variables()];
    let duals = vec![dual; bundle.problem.num_constraints()];
    let objective = bundle.total_cost().evaluate(&primal);
    Solution::new(primal, duals, objective)
}

/// Write an hourly time series covering one calendar year, with a single header row
pub fn write_hourly_csv<F>(path: &Path, year: i32, columns: &[&str], value: F)
where
    F: Fn(usize, usize) -> f64,
{
    write_time_series(path, year, &[columns], value);
}

/// Write an hourly time series covering one calendar year.
///
/// Each entry of `header_levels` is one header row. `value` is called with the hour of the year
/// and the column number.
pub fn write_time_series<F>(path: &Path, year: i32, header_levels: &[&[&str]], value: F)
where
    F: Fn(usize, usize) -> f64,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut writer = csv::Writer::from_path(path).unwrap();
    for (depth, level) in header_levels.iter().enumerate() {
        let label = if depth == 0 { "time" } else { "" };
        writer
            .write_record(std::iter::once(label).chain(level.iter().copied()))
            .unwrap();
    }

    let num_columns = header_levels.first().map_or(0, |level| level.len());
    let start = NaiveDate::from_ymd_opt(year, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let mut timestamp = start;
    let mut hour = 0;
    while timestamp.year() == year {
        let mut record = vec![timestamp.format("%Y-%m-%d %H:%M:%S").to_string()];
        record.extend((0..num_columns).map(|column| value(hour, column).to_string()));
        writer.write_record(&record).unwrap();
        timestamp += Duration::hours(1);
        hour += 1;
    }
    writer.flush().unwrap();
}

/// Write the files of the fixture scenario into `dir` for the year 2019
pub fn write_scenario_files(dir: &Path) {
    let demand_columns: Vec<&str> = DEMAND.iter().map(|(id, _)| *id).collect();
    write_hourly_csv(
        &dir.join("demand.csv"),
        2019,
        &demand_columns,
        |_, column| DEMAND[column].1,
    );
    for (id, _) in DEMAND {
        write_hourly_csv(
            &dir.join("ires").join(format!("{id}.csv")),
            2019,
            &["pv_n1_cf"],
            |_, _| 0.5,
        );
    }

    let ror_dir = dir.join("hydropower").join("ror");
    fs::create_dir_all(&ror_dir).unwrap();
    fs::write(
        ror_dir.join("capacity.csv"),
        format!("market_node,turbine,pump,reservoir\nAA00,{ROR_TURBINE},0,0\nBB00,0,0,0\n"),
    )
    .unwrap();
    write_hourly_csv(
        &ror_dir.join("AA00.csv"),
        2019,
        &["inflow_MWh"],
        |_, _| ROR_INFLOW,
    );

    write_time_series(
        &dir.join("interconnections").join("hvac.csv"),
        2019,
        &[&["AA00", "BB00"], &["BB00", "AA00"]],
        |_, _| HVAC_LIMIT,
    );
}

/// Write a complete input directory (catalogs plus the `test` scenario) into `dir`
pub fn write_input_directory(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("countries.yaml"), COUNTRIES_YAML).unwrap();
    fs::write(dir.join("technologies.yaml"), TECHNOLOGIES_YAML).unwrap();
    write_scenario_files(&dir.join("scenarios").join("test"));
}
