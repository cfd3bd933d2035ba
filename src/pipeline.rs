//! Running a single model from its configuration: load, build, solve and store.
use crate::config::Config;
use crate::error::ModelStatusError;
use crate::input::load_inputs;
use crate::optimisation::build_model;
use crate::output::{
    RunInfo, create_model_directory, write_config, write_durations, write_metadata,
    write_model_files, write_quality, write_results,
};
use crate::results::{RunDurations, SystemMetrics, extract};
use crate::solver::progress::SolverProgress;
use crate::solver::{HighsBackend, ModelStatus, SolverBackend, SolverDriver, SolverParameters};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

/// Options which change what a run writes, but not what it computes
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Write `model.lp` and `parameters.prm` before solving
    pub write_model_files: bool,
    /// Once set, the solve stops before its next attempt and the run fails as interrupted
    pub interrupt: Option<Arc<AtomicBool>>,
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Final solver status
    pub status: ModelStatus,
    /// Objective value (EUR per year)
    pub objective: f64,
    /// Time spent in each stage
    pub durations: RunDurations,
    /// Metrics of the whole system
    pub metrics: SystemMetrics,
}

/// Run the model described by `config` with HiGHS, writing everything to `output_dir`.
///
/// `config_path` is only recorded in the run manifest.
pub fn run(
    config: &Config,
    config_path: &Path,
    output_dir: &Path,
    options: RunOptions,
) -> Result<RunReport> {
    run_with_backend(config, config_path, output_dir, options, HighsBackend)
}

/// Run the model with the given solver backend.
///
/// The run manifest is written whatever the outcome. If the solver does not find an optimal
/// solution, the returned error downcasts to [`ModelStatusError`] and no result tables are
/// written.
pub fn run_with_backend<B: SolverBackend>(
    config: &Config,
    config_path: &Path,
    output_dir: &Path,
    options: RunOptions,
    backend: B,
) -> Result<RunReport> {
    fs::create_dir_all(output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_dir.display()
        )
    })?;

    let result = run_stages(config, output_dir, options, backend);
    let (status, message) = match &result {
        Ok(report) => (report.status.to_string(), report.status.message().to_string()),
        Err(err) => match err.downcast_ref::<ModelStatusError>() {
            Some(status_err) => (status_err.status.to_string(), status_err.to_string()),
            None => ("error".to_string(), format!("{err:#}")),
        },
    };
    let info = RunInfo {
        name: &config.name,
        scenario: &config.scenario,
        config_path,
        status,
        message,
        objective: result.as_ref().ok().map(|report| report.objective),
    };
    let written = write_metadata(output_dir, &info).context("Failed to write run manifest");

    let report = result?;
    written?;

    Ok(report)
}

fn run_stages<B: SolverBackend>(
    config: &Config,
    output_dir: &Path,
    options: RunOptions,
    backend: B,
) -> Result<RunReport> {
    let start = Instant::now();
    write_config(output_dir, config)?;
    let inputs = load_inputs(config).context("Failed to load inputs.")?;
    let bundle = build_model(config, &inputs).context("Failed to build model.")?;

    let model_dir = create_model_directory(output_dir)?;
    let mut driver = SolverDriver::new(
        backend,
        SolverParameters::from_config(&config.optimization),
    )
    .with_model_dir(&model_dir)
    .with_progress_interval(config.optimization.progress_interval)
    .with_progress_callback(Box::new(|sample: &SolverProgress| {
        debug!(
            "Attempt {} {} iteration {}: objective {:.6e}, primal infeasibility {:.3e}",
            sample.attempt,
            sample.source,
            sample.iteration,
            sample.objective,
            sample.primal_infeasibility
        );
    }));
    if let Some(interrupt) = options.interrupt {
        driver = driver.with_interrupt(interrupt);
    }
    if options.write_model_files {
        write_model_files(&model_dir, &bundle.problem, driver.parameters())?;
    }
    let initializing = start.elapsed();

    let start = Instant::now();
    let outcome = driver.solve(&bundle.problem)?;
    let optimizing = start.elapsed();
    write_quality(&model_dir, &outcome.quality)?;

    let status = outcome.status();
    let Some(solution) = outcome.solution else {
        warn!("{}", status.message());
        let durations = RunDurations {
            initializing,
            optimizing,
            storing: Duration::ZERO,
        };
        write_durations(&model_dir, &durations)?;
        return Err(ModelStatusError { status }.into());
    };

    let start = Instant::now();
    let results = extract(&bundle, &solution)?;
    write_results(output_dir, &results)?;
    let durations = RunDurations {
        initializing,
        optimizing,
        storing: start.elapsed(),
    };
    write_durations(&model_dir, &durations)?;

    let metrics = results.system_metrics();
    info!(
        "Run {} finished: objective {:.6e} EUR, LCOE {:.2} EUR/MWh",
        config.name, results.objective, metrics.lcoe
    );

    Ok(RunReport {
        status,
        objective: results.objective,
        durations,
        metrics,
    })
}
