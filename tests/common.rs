//! Common code for integration tests: synthetic scenarios written to a temporary folder.
use chrono::{Datelike, Duration, NaiveDate};
use peirocom::config::Config;
use peirocom::input::load_inputs;
use peirocom::optimisation::build_model;
use peirocom::results::{ResultSet, extract};
use peirocom::solver::{ModelStatus, SolverDriver};
use peirocom::time_series::TimeSeriesFrame;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Name of the scenario written by these helpers
pub const SCENARIO: &str = "synthetic";

/// The technologies available to the synthetic scenarios, with equal costs at every level
pub const TECHNOLOGIES_YAML: &str = "
ires:
  pv:
    name: Solar PV
    wacc: 0.05
    economic_lifetime: 25
    conservative: {capex: 700000, fixed_om: 12000}
    moderate: {capex: 700000, fixed_om: 12000}
    advanced: {capex: 700000, fixed_om: 12000}
  wind:
    name: Onshore wind
    economic_lifetime: 20
    conservative: {capex: 1000000}
    moderate: {capex: 1000000}
    advanced: {capex: 1000000}
dispatchable:
  backup:
    name: Backup generator
    economic_lifetime: 20
    fuel: oil
    conservative: {fuel_cost: 1000}
    moderate: {fuel_cost: 1000}
    advanced: {fuel_cost: 1000}
hydropower:
  ror:
    name: Run-of-river
    wacc: 0.05
    economic_lifetime: 50
    conservative: {capex: 3000000, fixed_om: 30000, variable_om: 1}
    moderate: {capex: 3000000, fixed_om: 30000, variable_om: 1}
    advanced: {capex: 3000000, fixed_om: 30000, variable_om: 1}
storage:
  battery:
    name: Battery
    economic_lifetime: 10
    roundtrip_efficiency: 0.81
    soc_min: 0.0
    soc_max: 1.0
    conservative: {capex_energy: 1000, capex_power: 1000}
    moderate: {capex_energy: 1000, capex_power: 1000}
    advanced: {capex_energy: 1000, capex_power: 1000}
electrolysis:
  pem:
    name: PEM electrolyser
    economic_lifetime: 20
    efficiency: 0.7
    conservative: {capex: 100000}
    moderate: {capex: 100000}
    advanced: {capex: 100000}
";

/// Countries `AA` and `BB`, with one market node each
pub const COUNTRIES_YAML: &str = "
- name: Country A
  nuts2: AA
  market_nodes: [AA00]
- name: Country B
  nuts2: BB
  market_nodes: [BB00]
";

/// Tolerance for values read back from the solver
pub const TOLERANCE: f64 = 1e-5;

/// Check two solver values agree, relative to the larger of their magnitudes
#[allow(dead_code)]
pub fn assert_close(actual: f64, expected: f64) {
    let scale = actual.abs().max(expected.abs()).max(1.0);
    assert!(
        (actual - expected).abs() <= TOLERANCE * scale,
        "expected {expected}, got {actual}"
    );
}

/// A temporary model folder holding `config.yaml` and the `input` folder it refers to
pub struct TestModel {
    dir: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestModel {
    /// Create a model folder with the given catalogs
    pub fn new(countries_yaml: &str) -> Self {
        let model = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        let input_dir = model.input_dir();
        fs::create_dir_all(model.scenario_dir()).unwrap();
        fs::write(input_dir.join("countries.yaml"), countries_yaml).unwrap();
        fs::write(input_dir.join("technologies.yaml"), TECHNOLOGIES_YAML).unwrap();
        model
    }

    /// The model folder
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The path of `config.yaml`
    pub fn config_path(&self) -> PathBuf {
        self.path().join("config.yaml")
    }

    /// A folder for outputs, inside the model folder
    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.path().join("results").join(name)
    }

    fn input_dir(&self) -> PathBuf {
        self.path().join("input")
    }

    fn scenario_dir(&self) -> PathBuf {
        self.input_dir().join("scenarios").join(SCENARIO)
    }

    /// Write hourly demand. `value` is called with the hour of the series and the column number.
    pub fn write_demand<F>(&self, years: RangeInclusive<i32>, market_nodes: &[&str], value: F)
    where
        F: Fn(usize, usize) -> f64,
    {
        write_hourly(
            &self.scenario_dir().join("demand.csv"),
            years,
            &[market_nodes],
            value,
        );
    }

    /// Write the capacity factors of one IRES node per technology
    pub fn write_ires<F>(
        &self,
        market_node: &str,
        years: RangeInclusive<i32>,
        technologies: &[&str],
        value: F,
    ) where
        F: Fn(usize, usize) -> f64,
    {
        let columns: Vec<String> = technologies
            .iter()
            .map(|technology| format!("{technology}_n1_cf"))
            .collect();
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        write_hourly(
            &self
                .scenario_dir()
                .join("ires")
                .join(format!("{market_node}.csv")),
            years,
            &[&columns],
            value,
        );
    }

    /// Write a run-of-river fleet (no reservoir) with constant inflow
    pub fn write_run_of_river(
        &self,
        market_node: &str,
        years: RangeInclusive<i32>,
        turbine: f64,
        inflow: f64,
    ) {
        let dir = self.scenario_dir().join("hydropower").join("ror");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("capacity.csv"),
            format!("market_node,turbine,pump,reservoir\n{market_node},{turbine},0,0\n"),
        )
        .unwrap();
        write_hourly(
            &dir.join(format!("{market_node}.csv")),
            years,
            &[&["inflow_MWh"]],
            |_, _| inflow,
        );
    }

    /// Write a hydropower fleet with a reservoir.
    ///
    /// The file holds the columns `inflow_MWh` and `reservoir_soc`; `value` is called with the
    /// hour of the series and the column number.
    pub fn write_hydropower<F>(
        &self,
        technology: &str,
        market_node: &str,
        years: RangeInclusive<i32>,
        (turbine, reservoir): (f64, f64),
        value: F,
    ) where
        F: Fn(usize, usize) -> f64,
    {
        let dir = self.scenario_dir().join("hydropower").join(technology);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("capacity.csv"),
            format!("market_node,turbine,pump,reservoir\n{market_node},{turbine},0,{reservoir}\n"),
        )
        .unwrap();
        write_hourly(
            &dir.join(format!("{market_node}.csv")),
            years,
            &[&["inflow_MWh", "reservoir_soc"]],
            value,
        );
    }

    /// Write HVAC limits for ordered market node pairs, the same at every hour
    pub fn write_hvac(&self, years: RangeInclusive<i32>, pairs: &[(&str, &str)], limit: f64) {
        self.write_interconnections("hvac", years, pairs, limit);
    }

    /// Write the limits of one interconnection type (`hvac` or `hvdc`), the same at every hour
    pub fn write_interconnections(
        &self,
        kind: &str,
        years: RangeInclusive<i32>,
        pairs: &[(&str, &str)],
        limit: f64,
    ) {
        let from: Vec<&str> = pairs.iter().map(|(from, _)| *from).collect();
        let to: Vec<&str> = pairs.iter().map(|(_, to)| *to).collect();
        write_hourly(
            &self
                .scenario_dir()
                .join("interconnections")
                .join(format!("{kind}.csv")),
            years,
            &[&from, &to],
            |_, _| limit,
        );
    }

    /// Write `config.yaml` and load it
    pub fn write_config(&self, yaml: &str) -> Config {
        fs::write(self.config_path(), yaml).unwrap();
        Config::from_path(&self.config_path()).unwrap()
    }
}

/// Write an hourly series covering whole calendar years.
///
/// Each entry of `header_levels` is one header row.
pub fn write_hourly<F>(
    path: &Path,
    years: RangeInclusive<i32>,
    header_levels: &[&[&str]],
    value: F,
) where
    F: Fn(usize, usize) -> f64,
{
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = csv::Writer::from_path(path).unwrap();
    for (depth, level) in header_levels.iter().enumerate() {
        let label = if depth == 0 { "time" } else { "" };
        writer
            .write_record(std::iter::once(label).chain(level.iter().copied()))
            .unwrap();
    }

    let num_columns = header_levels[0].len();
    let mut timestamp = NaiveDate::from_ymd_opt(*years.start(), 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let mut hour = 0;
    while years.contains(&timestamp.year()) {
        let mut record = vec![timestamp.format("%Y-%m-%d %H:%M:%S").to_string()];
        record.extend((0..num_columns).map(|column| value(hour, column).to_string()));
        writer.write_record(&record).unwrap();
        timestamp += Duration::hours(1);
        hour += 1;
    }
    writer.flush().unwrap();
}

/// Load, build and solve a model with HiGHS, requiring an optimal solution
#[allow(dead_code)]
pub fn solve(config: &Config) -> ResultSet {
    let inputs = load_inputs(config).unwrap();
    let bundle = build_model(config, &inputs).unwrap();
    let mut driver = SolverDriver::highs(&config.optimization);
    let outcome = driver.solve(&bundle.problem).unwrap();
    assert_eq!(outcome.status(), ModelStatus::Optimal);
    extract(&bundle, outcome.solution.as_ref().unwrap()).unwrap()
}

/// A column of the hourly table of a market node
#[allow(dead_code)]
pub fn column<'a>(results: &'a ResultSet, market_node: &str, name: &str) -> &'a [f64] {
    table(results, market_node).column(name).unwrap()
}

/// The hourly table of a market node
#[allow(dead_code)]
pub fn table<'a>(results: &'a ResultSet, market_node: &str) -> &'a TimeSeriesFrame {
    &results.market_nodes[market_node]
}
