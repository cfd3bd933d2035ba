//! The module responsible for writing output data to disk.
//!
//! The layout of an output directory is:
//!
//! ```text
//! config.yaml
//! metadata.toml
//! temporal/market_nodes/<market_node>.csv, mean.csv
//! temporal/interconnections/<type>.csv
//! capacity/{ires,storage,hydropower}/<market_node>.csv
//! capacity/{dispatchable,electrolysis}.csv
//! capacity/interconnections/<type>.csv
//! metrics/{system,countries}.csv
//! model/{log.txt,progress.csv,quality.csv,duration.csv,model.lp,parameters.prm}
//! ```
use crate::config::Config;
use crate::results::{
    CapacityRow, CountryMetrics, HydropowerCapacityRow, InterconnectionCapacityRow,
    IresCapacityRow, MeanSummary, ResultSet, RunDurations, StorageCapacityRow,
};
use crate::solver::{LinearProgram, QualityAttributes, SolverParameters};
use crate::time_series::format_value;
use anyhow::{Context, Result, ensure};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub mod metadata;
pub use metadata::{RunInfo, write_metadata};

/// The default root folder in which run-specific output folders will be created
pub const DEFAULT_RESULTS_ROOT: &str = "peirocom_results";

/// The output file name for the effective run configuration
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// The folder for solver files and diagnostics
pub const MODEL_DIRECTORY: &str = "model";

const TEMPORAL_DIRECTORY: &str = "temporal";
const CAPACITY_DIRECTORY: &str = "capacity";
const METRICS_DIRECTORY: &str = "metrics";
const MARKET_NODES_DIRECTORY: &str = "market_nodes";
const INTERCONNECTIONS_DIRECTORY: &str = "interconnections";

const MEAN_FILE_NAME: &str = "mean.csv";
const QUALITY_FILE_NAME: &str = "quality.csv";
const DURATION_FILE_NAME: &str = "duration.csv";
const MODEL_LP_FILE_NAME: &str = "model.lp";
const PARAMETERS_FILE_NAME: &str = "parameters.prm";
const SYSTEM_METRICS_FILE_NAME: &str = "system.csv";
const COUNTRY_METRICS_FILE_NAME: &str = "countries.csv";

/// Label of the timestamp column in hourly tables
const TIME_INDEX_LABEL: &str = "time";

/// Get the default output folder for a run
pub fn get_output_dir(results_root: &Path, run_name: &str) -> PathBuf {
    results_root.join(run_name)
}

/// Create a new output directory.
///
/// If the folder already exists and is not empty, it is only reused when `allow_overwrite` is
/// set, in which case its contents are deleted first.
///
/// # Returns
///
/// Whether an existing folder was overwritten
pub fn create_output_directory(output_dir: &Path, allow_overwrite: bool) -> Result<bool> {
    let mut overwrite = false;
    if output_dir.is_dir() {
        if fs::read_dir(output_dir)?.next().is_none() {
            // already exists and empty
            return Ok(false);
        }

        ensure!(
            allow_overwrite,
            "Output folder already exists and is not empty. Delete it or pass --overwrite."
        );
        fs::remove_dir_all(output_dir)?;
        overwrite = true;
    }

    fs::create_dir_all(output_dir)?;

    Ok(overwrite)
}

/// Create `dir` (with parents) and return it
fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&dir)
        .with_context(|| format!("Could not create directory {}", dir.display()))?;
    Ok(dir)
}

/// Create the folder for solver files
pub fn create_model_directory(output_dir: &Path) -> Result<PathBuf> {
    ensure_dir(output_dir.join(MODEL_DIRECTORY))
}

/// Write the effective run configuration
pub fn write_config(output_dir: &Path, config: &Config) -> Result<()> {
    let file_path = output_dir.join(CONFIG_FILE_NAME);
    fs::write(&file_path, config.to_yaml_string()?)
        .with_context(|| format!("Could not write {}", file_path.display()))
}

/// Write the LP file and solver parameters
pub fn write_model_files(
    model_dir: &Path,
    problem: &LinearProgram,
    parameters: &SolverParameters,
) -> Result<()> {
    problem.write_lp(&model_dir.join(MODEL_LP_FILE_NAME))?;
    parameters.write_parameters(&model_dir.join(PARAMETERS_FILE_NAME))
}

/// Write solver diagnostics
pub fn write_quality(model_dir: &Path, quality: &QualityAttributes) -> Result<()> {
    quality.write_csv(&model_dir.join(QUALITY_FILE_NAME))
}

/// Write the wall-clock time spent in each stage of the run
pub fn write_durations(model_dir: &Path, durations: &RunDurations) -> Result<()> {
    let mut writer = csv::Writer::from_path(model_dir.join(DURATION_FILE_NAME))?;
    writer.write_record(["stage", "seconds"])?;
    for (stage, seconds) in durations.to_records() {
        writer.write_record([stage, &seconds.to_string()])?;
    }
    writer.flush()?;

    Ok(())
}

/// A result row written to CSV with a fixed header
trait CsvRow: Serialize {
    /// Column names in field order
    const HEADER: &'static [&'static str];
}

impl CsvRow for IresCapacityRow {
    const HEADER: &'static [&'static str] = &["technology", "ires_node", "capacity"];
}

impl CsvRow for StorageCapacityRow {
    const HEADER: &'static [&'static str] = &["technology", "energy", "power"];
}

impl CsvRow for HydropowerCapacityRow {
    const HEADER: &'static [&'static str] = &["technology", "turbine", "pump", "reservoir"];
}

impl CsvRow for CapacityRow {
    const HEADER: &'static [&'static str] = &["market_node", "technology", "capacity"];
}

impl CsvRow for InterconnectionCapacityRow {
    const HEADER: &'static [&'static str] = &["from", "to", "current", "extra"];
}

impl CsvRow for CountryMetrics {
    const HEADER: &'static [&'static str] = &[
        "country",
        "self_sufficiency_electricity",
        "self_sufficiency_hydrogen",
        "lcoe",
        "cost_share",
    ];
}

/// Write a CSV file with one row per item. A file without rows still has its header.
fn write_rows<T: CsvRow>(file_path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(file_path)
        .with_context(|| format!("Could not create {}", file_path.display()))?;
    if rows.is_empty() {
        writer.write_record(T::HEADER)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

fn write_mean_summary(file_path: &Path, summary: &MeanSummary) -> Result<()> {
    let mut writer = csv::Writer::from_path(file_path)?;
    writer.write_record(
        std::iter::once("market_node").chain(summary.columns.iter().map(String::as_str)),
    )?;
    for (market_node, values) in &summary.rows {
        let mut record = vec![market_node.to_string()];
        record.extend(values.iter().map(|value| format_value(*value)));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Write every table of a result set.
///
/// Hourly tables are written before capacity tables, which are written before metrics.
pub fn write_results(output_dir: &Path, results: &ResultSet) -> Result<()> {
    let temporal = output_dir.join(TEMPORAL_DIRECTORY);
    let market_nodes_dir = ensure_dir(temporal.join(MARKET_NODES_DIRECTORY))?;
    for (market_node, table) in &results.market_nodes {
        let file_path = market_nodes_dir.join(format!("{market_node}.csv"));
        table
            .write_csv(&file_path, TIME_INDEX_LABEL)
            .with_context(|| format!("Could not write {}", file_path.display()))?;
    }
    write_mean_summary(
        &market_nodes_dir.join(MEAN_FILE_NAME),
        &results.mean_summary(),
    )?;

    let interconnections_dir = ensure_dir(temporal.join(INTERCONNECTIONS_DIRECTORY))?;
    for (kind, flows) in &results.interconnection_flows {
        flows.write_multi_level_csv(
            &interconnections_dir.join(format!("{kind}.csv")),
            &["from", "to"],
        )?;
    }

    let capacity = output_dir.join(CAPACITY_DIRECTORY);
    let ires_dir = ensure_dir(capacity.join("ires"))?;
    for (market_node, rows) in &results.ires_capacity {
        write_rows(&ires_dir.join(format!("{market_node}.csv")), rows)?;
    }
    let storage_dir = ensure_dir(capacity.join("storage"))?;
    for (market_node, rows) in &results.storage_capacity {
        write_rows(&storage_dir.join(format!("{market_node}.csv")), rows)?;
    }
    let hydropower_dir = ensure_dir(capacity.join("hydropower"))?;
    for (market_node, rows) in &results.hydropower_capacity {
        write_rows(&hydropower_dir.join(format!("{market_node}.csv")), rows)?;
    }
    write_rows(
        &capacity.join("dispatchable.csv"),
        &results.dispatchable_capacity,
    )?;
    write_rows(
        &capacity.join("electrolysis.csv"),
        &results.electrolysis_capacity,
    )?;
    let interconnection_capacity_dir = ensure_dir(capacity.join(INTERCONNECTIONS_DIRECTORY))?;
    for (kind, rows) in &results.interconnection_capacity {
        write_rows(
            &interconnection_capacity_dir.join(format!("{kind}.csv")),
            rows,
        )?;
    }

    write_metrics(output_dir, results)
}

/// Write system and country metrics
fn write_metrics(output_dir: &Path, results: &ResultSet) -> Result<()> {
    let metrics_dir = ensure_dir(output_dir.join(METRICS_DIRECTORY))?;

    let mut writer = csv::Writer::from_path(metrics_dir.join(SYSTEM_METRICS_FILE_NAME))?;
    writer.write_record(["metric", "value"])?;
    for (metric, value) in results.system_metrics().to_records() {
        writer.write_record([metric, &format_value(value)])?;
    }
    writer.flush()?;

    write_rows(
        &metrics_dir.join(COUNTRY_METRICS_FILE_NAME),
        &results.country_metrics(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{build_test_model, config, inputs, uniform_solution};
    use crate::input::Inputs;
    use crate::results::extract;
    use itertools::assert_equal;
    use rstest::rstest;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn create_output_directory_new() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("a").join("b");
        assert!(!create_output_directory(&output_dir, false).unwrap());
        assert!(output_dir.is_dir());
    }

    #[test]
    fn create_output_directory_existing() {
        let dir = tempdir().unwrap();
        let output_dir = dir.path().join("out");
        fs::create_dir(&output_dir).unwrap();

        // Empty folders are reused
        assert!(!create_output_directory(&output_dir, false).unwrap());

        fs::write(output_dir.join("file.txt"), "x").unwrap();
        assert!(create_output_directory(&output_dir, false).is_err());
        assert!(create_output_directory(&output_dir, true).unwrap());
        assert!(!output_dir.join("file.txt").exists());
    }

    #[test]
    fn default_output_dir() {
        assert_eq!(
            get_output_dir(Path::new(DEFAULT_RESULTS_ROOT), "base"),
            PathBuf::from("peirocom_results/base")
        );
    }

    #[test]
    fn empty_rows_keep_header() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("electrolysis.csv");
        write_rows::<CapacityRow>(&file_path, &[]).unwrap();
        assert_eq!(
            fs::read_to_string(&file_path).unwrap(),
            "market_node,technology,capacity\n"
        );
    }

    /// The header `csv` derives from the first row of a file
    fn serialized_header<T: CsvRow>(row: T) -> String {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("rows.csv");
        write_rows(&file_path, &[row]).unwrap();
        let contents = fs::read_to_string(&file_path).unwrap();
        contents.lines().next().unwrap().to_string()
    }

    #[test]
    fn fixed_headers_match_fields() {
        fn check<T: CsvRow>(row: T) {
            assert_eq!(serialized_header(row), T::HEADER.join(","));
        }

        check(IresCapacityRow {
            technology: "pv".into(),
            ires_node: "n1".into(),
            capacity: 1.0,
        });
        check(StorageCapacityRow {
            technology: "lion".into(),
            energy: 1.0,
            power: 1.0,
        });
        check(HydropowerCapacityRow {
            technology: "ror".into(),
            turbine: 1.0,
            pump: 0.0,
            reservoir: 0.0,
        });
        check(CapacityRow {
            market_node: "AA00".into(),
            technology: "backup".into(),
            capacity: 1.0,
        });
        check(InterconnectionCapacityRow {
            from: "AA00".into(),
            to: "BB00".into(),
            current: 1.0,
            extra: 0.0,
        });
        check(CountryMetrics {
            country: "AA".into(),
            self_sufficiency_electricity: 1.0,
            self_sufficiency_hydrogen: 1.0,
            lcoe: 1.0,
            cost_share: 1.0,
        });
    }

    #[rstest]
    fn write_results_layout(config: Config, inputs: Inputs) {
        let bundle = build_test_model(&config, &inputs);
        let results = extract(&bundle, &uniform_solution(&bundle, 1.0, 0.0)).unwrap();
        let dir = tempdir().unwrap();
        write_results(dir.path(), &results).unwrap();

        for file in [
            "temporal/market_nodes/AA00.csv",
            "temporal/market_nodes/BB00.csv",
            "temporal/market_nodes/mean.csv",
            "temporal/interconnections/hvac.csv",
            "capacity/ires/AA00.csv",
            "capacity/storage/BB00.csv",
            "capacity/hydropower/AA00.csv",
            "capacity/dispatchable.csv",
            "capacity/electrolysis.csv",
            "capacity/interconnections/hvac.csv",
            "metrics/system.csv",
            "metrics/countries.csv",
        ] {
            assert!(dir.path().join(file).is_file(), "missing {file}");
        }

        // No HVDC links, but the file still names its columns
        let contents =
            fs::read_to_string(dir.path().join("capacity/interconnections/hvdc.csv")).unwrap();
        assert_eq!(contents, "from,to,current,extra\n");

        let contents = fs::read_to_string(dir.path().join("capacity/ires/AA00.csv")).unwrap();
        assert_equal(
            contents.lines(),
            ["technology,ires_node,capacity", "pv,n1,1.0"],
        );
        assert_eq!(
            results.ires_capacity["AA00"],
            [IresCapacityRow {
                technology: "pv".into(),
                ires_node: "n1".into(),
                capacity: 1.0
            }]
        );

        let hourly =
            fs::read_to_string(dir.path().join("temporal/market_nodes/AA00.csv")).unwrap();
        let header = hourly.lines().next().unwrap();
        assert!(header.starts_with("time,"));
        assert_eq!(hourly.lines().count(), inputs.scenario.timeline.len() + 1);
    }

    #[test]
    fn write_durations_file() {
        let dir = tempdir().unwrap();
        let durations = RunDurations {
            initializing: Duration::from_millis(1500),
            optimizing: Duration::from_secs(2),
            storing: Duration::ZERO,
        };
        write_durations(dir.path(), &durations).unwrap();

        let contents = fs::read_to_string(dir.path().join(DURATION_FILE_NAME)).unwrap();
        assert_equal(
            contents.lines(),
            [
                "stage,seconds",
                "initializing,1.5",
                "optimizing,2",
                "storing,0",
            ],
        );
    }
}
