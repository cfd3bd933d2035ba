//! Properties which every optimal result set must have.
use peirocom::input::InterconnectionType;
use peirocom::pipeline::{self, RunOptions};
use peirocom::results::ResultSet;
use peirocom::time_series::TimeSeriesFrame;
use rstest::{fixture, rstest};
use std::fs;

mod common;
use common::{COUNTRIES_YAML, TestModel, assert_close, column, solve};

/// Feasibility tolerance used when checking inequalities
const SLACK: f64 = 1e-6;

const MIXED_SYSTEM_CONFIG: &str = "name: mixed
scenario: synthetic
country_codes: [AA, BB]
climate_years: {start: 2019, end: 2019}
resolution: 24H
interconnections:
  efficiency: {hvac: 0.95}
technologies:
  ires: [pv]
  dispatchable: {backup: .inf}
  hydropower: [ror]
  storage: [battery]
optimization:
  method: simplex
";

/// Two countries with solar, backup generation, a battery, run-of-river and an interconnection.
///
/// Solar output follows a weekly cycle so the battery has something to do.
#[fixture]
fn mixed_system() -> TestModel {
    let model = TestModel::new(
        "
- name: Country A
  nuts2: AA
  market_nodes: [AA00]
  capacity:
    current: {pv: 10}
    potential: {pv: 150}
- name: Country B
  nuts2: BB
  market_nodes: [BB00]
",
    );
    model.write_demand(2019..=2019, &["AA00", "BB00"], |_, column| {
        if column == 0 { 100.0 } else { 50.0 }
    });
    for market_node in ["AA00", "BB00"] {
        model.write_ires(market_node, 2019..=2019, &["pv"], |hour, _| {
            0.2 + 0.6 * ((hour / 24) % 7) as f64 / 6.0
        });
    }
    model.write_run_of_river("AA00", 2019..=2019, 40.0, 20.0);
    model.write_hvac(2019..=2019, &[("AA00", "BB00"), ("BB00", "AA00")], 100.0);
    model
}

fn solve_mixed_system(model: &TestModel) -> ResultSet {
    solve(&model.write_config(MIXED_SYSTEM_CONFIG))
}

#[rstest]
fn balance_holds_at_every_step(mixed_system: TestModel) {
    let results = solve_mixed_system(&mixed_system);
    for (market_node, table) in &results.market_nodes {
        let get = |name: &str| table.column(name).unwrap();
        for ts in 0..table.len() {
            let supply = get("generation_ires")[ts]
                + get("generation_dispatchable")[ts]
                + get("generation_total_hydropower")[ts]
                + get("storage_out")[ts]
                + get("import")[ts];
            let use_ = get("demand_total")[ts]
                + get("storage_in")[ts]
                + get("export")[ts]
                + get("curtailed")[ts];
            assert_close(supply, use_);
            assert!(
                get("curtailed")[ts] >= -SLACK,
                "negative curtailment in {market_node} at step {ts}"
            );
        }
    }
}

#[rstest]
fn storage_is_cyclic(mixed_system: TestModel) {
    let results = solve_mixed_system(&mixed_system);
    let interval_hours = results.interval_hours;
    let efficiency: f64 = 0.81;
    for market_node in ["AA00", "BB00"] {
        let soc = column(&results, market_node, "energy_stored_battery");
        let inflow = column(&results, market_node, "storage_in_battery");
        let outflow = column(&results, market_node, "storage_out_battery");

        // The predecessor of the first step is the last one
        let last = soc.len() - 1;
        let expected = soc[last]
            + (inflow[0] * efficiency.sqrt() - outflow[0] / efficiency.sqrt()) * interval_hours;
        assert_close(soc[0], expected);
    }
}

#[rstest]
fn ires_capacity_within_current_and_potential(mixed_system: TestModel) {
    let results = solve_mixed_system(&mixed_system);
    let capacity = results.ires_capacity["AA00"][0].capacity;
    assert!((10.0 - SLACK..=150.0 + SLACK).contains(&capacity), "{capacity}");
}

#[rstest]
fn dispatch_within_capacity(mixed_system: TestModel) {
    let results = solve_mixed_system(&mixed_system);
    for row in &results.dispatchable_capacity {
        let generation = column(
            &results,
            &row.market_node.0,
            &format!("generation_dispatchable_{}", row.technology),
        );
        assert!(generation.iter().all(|value| *value <= row.capacity + SLACK));
    }

    for (market_node, rows) in &results.storage_capacity {
        for row in rows {
            let technology = &row.technology;
            let flows = ["storage_in", "storage_out"].map(|name| {
                column(&results, &market_node.0, &format!("{name}_{technology}"))
            });
            for flow in flows {
                assert!(flow.iter().all(|value| *value <= row.power + SLACK));
            }
            let soc = column(
                &results,
                &market_node.0,
                &format!("energy_stored_{technology}"),
            );
            assert!(
                soc.iter()
                    .all(|value| *value >= -SLACK && *value <= row.energy + SLACK)
            );
        }
    }
}

#[rstest]
fn run_of_river_passes_inflow_through(mixed_system: TestModel) {
    let results = solve_mixed_system(&mixed_system);
    let turbine = column(&results, "AA00", "generation_turbine_ror");
    let spillage = column(&results, "AA00", "spillage_ror");
    for (turbine, spillage) in turbine.iter().zip(spillage) {
        assert_close(turbine + spillage, 20.0);
        assert!(*turbine <= 40.0 + SLACK);
    }
    assert!(!results.market_nodes["AA00"].has_column("reservoir_ror"));
}

/// Solar with a potential, backed up by expensive dispatchable generation
fn objective_with_potential(potential: Option<f64>) -> f64 {
    let capacity = potential
        .map(|potential| format!("  capacity: {{potential: {{pv: {potential}}}}}\n"))
        .unwrap_or_default();
    let model = TestModel::new(&format!(
        "- name: Country A\n  nuts2: AA\n  market_nodes: [AA00]\n{capacity}"
    ));
    model.write_demand(2019..=2019, &["AA00"], |_, _| 100.0);
    model.write_ires("AA00", 2019..=2019, &["pv"], |_, _| 0.5);
    let config = model.write_config(
        "name: potential
scenario: synthetic
country_codes: [AA]
climate_years: {start: 2019, end: 2019}
resolution: 24H
technologies:
  ires: [pv]
  dispatchable: {backup: .inf}
optimization:
  method: simplex
",
    );

    solve(&config).objective
}

#[test]
fn raising_potential_never_increases_cost() {
    let objectives: Vec<f64> = [Some(50.0), Some(150.0), None]
        .into_iter()
        .map(objective_with_potential)
        .collect();
    for pair in objectives.windows(2) {
        assert!(pair[1] <= pair[0] * (1.0 + 1e-9), "{objectives:?}");
    }
    assert!(objectives[1] < objectives[0]);
}

#[rstest]
fn rerun_gives_same_results(mixed_system: TestModel) {
    let config = mixed_system.write_config(MIXED_SYSTEM_CONFIG);
    let config_path = mixed_system.config_path();
    let output_dirs = ["first", "second"].map(|name| mixed_system.output_dir(name));
    let reports = output_dirs.each_ref().map(|output_dir| {
        pipeline::run(&config, &config_path, output_dir, RunOptions::default()).unwrap()
    });
    assert_close(reports[0].objective, reports[1].objective);

    let [first, second] = &output_dirs;
    for file in [
        "capacity/ires/AA00.csv",
        "capacity/storage/BB00.csv",
        "capacity/dispatchable.csv",
    ] {
        assert_eq!(
            fs::read_to_string(first.join(file)).unwrap(),
            fs::read_to_string(second.join(file)).unwrap(),
            "{file} differs"
        );
    }

    let hourly = "temporal/market_nodes/AA00.csv";
    let tables = [first, second].map(|dir| TimeSeriesFrame::read_csv(&dir.join(hourly)).unwrap());
    assert_eq!(tables[0].index(), tables[1].index());
    for ((name, lhs), (_, rhs)) in tables[0].columns().zip(tables[1].columns()) {
        for (lhs, rhs) in lhs.iter().zip(rhs) {
            assert!((lhs - rhs).abs() <= SLACK, "{name}: {lhs} != {rhs}");
        }
    }

    let metadata = fs::read_to_string(first.join("metadata.toml")).unwrap();
    assert!(metadata.contains("status = \"optimal\""));
}

/// Daily inflow into the reservoir: three wet days followed by four dry ones
fn weekly_inflow(day: usize) -> f64 {
    if day % 7 < 3 { 120.0 } else { 0.0 }
}

#[test]
fn reservoir_carries_water_between_steps() {
    let model = TestModel::new(COUNTRIES_YAML);
    model.write_demand(2019..=2019, &["AA00"], |_, _| 100.0);
    model.write_hydropower("ror", "AA00", 2019..=2019, (80.0, 2000.0), |hour, column| {
        match column {
            0 => weekly_inflow(hour / 24),
            // Half full at the very first hour only
            _ if hour == 0 => 0.5,
            _ => f64::NAN,
        }
    });
    let config = model.write_config(
        "name: reservoir
scenario: synthetic
country_codes: [AA]
climate_years: {start: 2019, end: 2019}
resolution: 24H
technologies:
  dispatchable: {backup: .inf}
  hydropower: [ror]
optimization:
  method: simplex
",
    );
    let results = solve(&config);
    let interval_hours = results.interval_hours;
    let reservoir = column(&results, "AA00", "reservoir_ror");
    let turbine = column(&results, "AA00", "generation_turbine_ror");
    let pump = column(&results, "AA00", "generation_pump_ror");
    let spillage = column(&results, "AA00", "spillage_ror");

    assert_close(reservoir[0], 1000.0);
    for ts in 1..reservoir.len() {
        let water = weekly_inflow(ts) - spillage[ts] - turbine[ts] + pump[ts];
        assert_close(reservoir[ts], reservoir[ts - 1] + water * interval_hours);
    }
    assert!(
        reservoir
            .iter()
            .all(|value| *value >= -SLACK && *value <= 2000.0 + SLACK)
    );
    assert!(turbine.iter().all(|value| *value <= 80.0 + SLACK));

    // Wet days bring more water than the turbine can use, so some of it is stored
    let (min, max) = reservoir
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), value| {
            (min.min(*value), max.max(*value))
        });
    assert!(max - min > 1.0, "reservoir never changes: {min}..{max}");
}

#[test]
fn individual_interconnections_share_extra_capacity() {
    let model = TestModel::new(
        "
- name: Country A
  nuts2: AA
  market_nodes: [AA00]
  capacity:
    potential: {pv: 1000}
- name: Country B
  nuts2: BB
  market_nodes: [BB00]
  capacity:
    potential: {pv: 0}
",
    );
    model.write_demand(2019..=2019, &["AA00", "BB00"], |_, column| {
        if column == 0 { 100.0 } else { 50.0 }
    });
    for market_node in ["AA00", "BB00"] {
        model.write_ires(market_node, 2019..=2019, &["pv"], |_, _| 0.5);
    }
    let pairs = [("AA00", "BB00"), ("BB00", "AA00")];
    model.write_interconnections("hvac", 2019..=2019, &pairs, 20.0);
    model.write_interconnections("hvdc", 2019..=2019, &pairs, 0.0);
    let config = model.write_config(
        "name: individual
scenario: synthetic
country_codes: [AA, BB]
climate_years: {start: 2019, end: 2019}
resolution: 24H
interconnections:
  relative_capacity: 3.0
  optimize_individual: true
technologies:
  ires: [pv]
  dispatchable: {backup: .inf}
optimization:
  method: simplex
",
    );
    let results = solve(&config);

    // (3 - 1) · (20 + 20)
    let hvac = &results.interconnection_capacity[&InterconnectionType::Hvac];
    assert_close(hvac.iter().map(|row| row.extra).sum(), 80.0);
    let flows = &results.interconnection_flows[&InterconnectionType::Hvac];
    for row in hvac {
        let flow = flows.column(&format!("{}::{}", row.from, row.to)).unwrap();
        assert!(
            flow.iter()
                .all(|value| *value <= row.current + row.extra + SLACK),
            "{}::{} exceeds {} + {}",
            row.from,
            row.to,
            row.current,
            row.extra
        );
    }

    // Without current capacity there is nothing to extend
    let hvdc = &results.interconnection_capacity[&InterconnectionType::Hvdc];
    assert_eq!(hvdc.len(), 2);
    for row in hvdc {
        assert!(row.extra.abs() <= SLACK, "{}::{} extended", row.from, row.to);
    }
    let hvdc_flows = &results.interconnection_flows[&InterconnectionType::Hvdc];
    for (name, flow) in hvdc_flows.columns() {
        assert!(flow.iter().all(|value| value.abs() <= SLACK), "{name} carries power");
    }
}
