//! Sensitivity analysis: rerunning a base configuration with one parameter swept over a set of
//! values.
//!
//! A sweep is described by a `sensitivity.yaml` file:
//!
//! ```yaml
//! analysis_type: interconnection_capacity
//! steps:
//!   low: 0.5
//!   base: 1.0
//!   high: 1.5
//! ```
//!
//! Each step is run as a fresh configuration into `<output_dir>/<step key>/`. A failing step is
//! logged and recorded, and the sweep carries on with the next one.
use crate::config::Config;
use crate::error::SensitivityConfigError;
use crate::pipeline::{RunOptions, run_with_backend};
use crate::solver::{HighsBackend, SolverBackend};
use crate::technology::TechnologyID;
use anyhow::{Context, Result};
use float_cmp::approx_eq;
use indexmap::IndexMap;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;
use strum::Display;

/// The file name under which the sweep description is stored in the output directory
pub const SENSITIVITY_FILE_NAME: &str = "sensitivity.yaml";

/// Return a [`SensitivityConfigError`] unless the condition holds
macro_rules! ensure_sensitivity {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(SensitivityConfigError(format!($($arg)+)));
        }
    };
}

/// The parameter a sensitivity analysis varies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisType {
    /// Maximum curtailment relative to IRES generation
    Curtailment,
    /// Number of climate years, counted back from the last one
    ClimateYears,
    /// Cost-technology level
    TechnologyScenario,
    /// Hydrogen demand relative to electricity demand
    HydrogenDemand,
    /// Maximum share of demand met by one dispatchable technology
    DispatchableGeneration,
    /// Scaling of the hydropower fleet
    HydropowerCapacity,
    /// Scaling of the interconnection limits
    InterconnectionCapacity,
    /// Efficiency of all interconnections
    InterconnectionEfficiency,
    /// Lower bound on electricity self-sufficiency
    MinSelfSufficiency,
    /// Upper bound on electricity self-sufficiency
    MaxSelfSufficiency,
    /// Barrier convergence tolerance of the solver
    BarrierConvergenceTolerance,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SensitivityConfigRaw {
    analysis_type: AnalysisType,
    #[serde(default)]
    technology: Option<TechnologyID>,
    steps: Mapping,
}

/// A validated sensitivity sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityConfig {
    /// The parameter to vary
    pub analysis_type: AnalysisType,
    /// The technology to vary, for analyses of a single technology
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technology: Option<TechnologyID>,
    /// Step values keyed by step name, in run order
    pub steps: IndexMap<String, f64>,
}

/// Turn a YAML step key into a directory name
fn step_key(key: &Value) -> Result<String, SensitivityConfigError> {
    let key = match key {
        Value::String(key) => key.clone(),
        Value::Number(key) => key.to_string(),
        Value::Bool(key) => key.to_string(),
        _ => {
            return Err(SensitivityConfigError(format!(
                "step keys must be strings or numbers, got {key:?}"
            )));
        }
    };
    ensure_sensitivity!(
        !key.is_empty() && !key.contains(['/', '\\']) && key != "." && key != "..",
        "step key '{key}' cannot be used as a folder name"
    );

    Ok(key)
}

impl SensitivityConfig {
    /// Read and validate a sensitivity file
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not read sensitivity file {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| {
                format!("Error loading sensitivity analysis from {}", path.display())
            })
    }

    /// Parse and validate sensitivity YAML
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let raw: SensitivityConfigRaw = serde_yaml::from_str(contents)
            .map_err(|err| SensitivityConfigError(err.to_string()))?;
        Ok(Self::from_raw(raw)?)
    }

    fn from_raw(raw: SensitivityConfigRaw) -> Result<Self, SensitivityConfigError> {
        let mut steps = IndexMap::new();
        for (key, value) in raw.steps {
            let key = step_key(&key)?;
            let value = value.as_f64().ok_or_else(|| {
                SensitivityConfigError(format!("value of step '{key}' must be a number"))
            })?;
            ensure_sensitivity!(
                steps.insert(key.clone(), value).is_none(),
                "step '{key}' is given more than once"
            );
        }
        ensure_sensitivity!(!steps.is_empty(), "no steps given");

        match raw.analysis_type {
            AnalysisType::DispatchableGeneration => ensure_sensitivity!(
                raw.technology.is_some(),
                "technology is required for dispatchable_generation"
            ),
            AnalysisType::ClimateYears => {
                for (key, value) in &steps {
                    ensure_sensitivity!(
                        approx_eq!(f64, value.fract(), 0.0) && *value >= 1.0,
                        "climate_years step '{key}' must be a positive whole number of years, \
                         got {value}"
                    );
                }
            }
            _ => {
                if let Some(technology) = &raw.technology {
                    warn!(
                        "Ignoring technology {technology}: it is only used for \
                         dispatchable_generation"
                    );
                }
            }
        }

        Ok(Self {
            analysis_type: raw.analysis_type,
            technology: raw.technology,
            steps,
        })
    }

    /// The dotted configuration paths to overwrite, and their new values, for one step
    fn overrides(&self, base: &Config, value: f64) -> Vec<(String, Value)> {
        let set = |path: &str, value: Value| vec![(path.to_string(), value)];
        match self.analysis_type {
            AnalysisType::Curtailment => set("relative_curtailment", value.into()),
            AnalysisType::ClimateYears => {
                // Whole number checked on load
                #[allow(clippy::cast_possible_truncation)]
                let years = value as i64;
                let start = i64::from(base.climate_years.end) - (years - 1);
                set("climate_years.start", start.into())
            }
            AnalysisType::TechnologyScenario => set("technologies.scenario", value.into()),
            AnalysisType::HydrogenDemand => set("relative_hydrogen_demand", value.into()),
            AnalysisType::DispatchableGeneration => {
                let technology = self.technology.as_ref().map_or("", |id| &*id.0);
                set(&format!("technologies.dispatchable.{technology}"), value.into())
            }
            AnalysisType::HydropowerCapacity => {
                set("technologies.relative_hydropower_capacity", value.into())
            }
            AnalysisType::InterconnectionCapacity => {
                set("interconnections.relative_capacity", value.into())
            }
            AnalysisType::InterconnectionEfficiency => vec![
                ("interconnections.efficiency.hvac".to_string(), value.into()),
                ("interconnections.efficiency.hvdc".to_string(), value.into()),
            ],
            AnalysisType::MinSelfSufficiency => {
                set("self_sufficiency.min_electricity", value.into())
            }
            AnalysisType::MaxSelfSufficiency => {
                set("self_sufficiency.max_electricity", value.into())
            }
            AnalysisType::BarrierConvergenceTolerance => {
                set("optimization.barrier_convergence_tolerance", value.into())
            }
        }
    }

    /// The configuration of one step, derived from `base`.
    ///
    /// The derived configuration is validated like any other.
    pub fn step_config(&self, base: &Config, value: f64) -> Result<Config> {
        base.with_overrides(&self.overrides(base, value))
    }

    /// Write the sweep description to `output_dir`
    pub fn write(&self, output_dir: &Path) -> Result<()> {
        let file_path = output_dir.join(SENSITIVITY_FILE_NAME);
        fs::write(&file_path, serde_yaml::to_string(self)?)
            .with_context(|| format!("Could not write {}", file_path.display()))
    }
}

/// A step which did not complete
#[derive(Debug, Clone, PartialEq)]
pub struct FailedStep {
    /// The step key
    pub key: String,
    /// Why the step failed
    pub message: String,
}

/// The outcome of every step of a sweep
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensitivityReport {
    /// Keys of the steps which solved to optimality
    pub succeeded: Vec<String>,
    /// Steps which failed
    pub failed: Vec<FailedStep>,
}

impl SensitivityReport {
    /// Whether every step succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run every step of a sweep with HiGHS
pub fn run_sensitivity(
    base: &Config,
    config_path: &Path,
    sensitivity: &SensitivityConfig,
    output_dir: &Path,
    options: RunOptions,
) -> Result<SensitivityReport> {
    run_sensitivity_with_backend(base, config_path, sensitivity, output_dir, options, || {
        HighsBackend
    })
}

/// Run every step of a sweep, creating a new solver backend for each step.
///
/// Only a failure to set up the output directory is returned as an error. Failed steps are
/// reported in the returned [`SensitivityReport`].
pub fn run_sensitivity_with_backend<B, F>(
    base: &Config,
    config_path: &Path,
    sensitivity: &SensitivityConfig,
    output_dir: &Path,
    options: RunOptions,
    mut make_backend: F,
) -> Result<SensitivityReport>
where
    B: SolverBackend,
    F: FnMut() -> B,
{
    fs::create_dir_all(output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_dir.display()
        )
    })?;
    sensitivity.write(output_dir)?;

    let num_steps = sensitivity.steps.len();
    let mut report = SensitivityReport::default();
    for (i, (key, value)) in sensitivity.steps.iter().enumerate() {
        info!(
            "Sensitivity step {}/{num_steps}: {} = {value} ({key})",
            i + 1,
            sensitivity.analysis_type
        );
        let step_dir = output_dir.join(key);
        let result = sensitivity.step_config(base, *value).and_then(|config| {
            run_with_backend(&config, config_path, &step_dir, options.clone(), make_backend())
        });

        match result {
            Ok(run) => {
                info!("Step {key} finished with objective {:.6e}", run.objective);
                report.succeeded.push(key.clone());
            }
            Err(err) => {
                error!("Step {key} failed: {err:#}");
                report.failed.push(FailedStep {
                    key: key.clone(),
                    message: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        "Sensitivity analysis finished: {} of {num_steps} steps succeeded",
        report.succeeded.len()
    );

    Ok(report)
}
