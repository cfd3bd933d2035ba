//! The run configuration (`config.yaml`): what to model and how to solve it.
//!
//! A configuration is validated on load. Sensitivity runs derive new configurations by editing the
//! YAML value tree of a base configuration and loading the result again, so every derived
//! configuration is validated in exactly the same way.
use crate::country::CountryCode;
use crate::error::ConfigError;
use crate::input::InterconnectionType;
use crate::technology::{
    HYDROGEN_FUEL, ScenarioLevel, TechnologyCatalog, TechnologyCategory, TechnologyID,
};
use crate::time_series::Resolution;
use anyhow::{Context, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// The highest numeric-focus level of the solver escalation ladder
pub const MAX_NUMERIC_FOCUS: u8 = 3;

/// Return a [`ConfigError`] unless the condition holds
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(ConfigError(format!($($arg)+)));
        }
    };
}

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_input_directory, PathBuf, PathBuf::from("input"));
define_param_default!(default_one, f64, 1.0);
define_param_default!(default_infinity, f64, f64::INFINITY);
define_param_default!(default_interconnection_efficiency, f64, 0.95);
define_param_default!(default_barrier_convergence_tolerance, f64, 1e-8);
define_param_default!(default_feasibility_tolerance, f64, 1e-7);
define_param_default!(default_progress_interval, u64, 200);

/// The range of climate years to model
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClimateYears {
    /// First climate year (inclusive)
    pub start: i32,
    /// Last climate year (inclusive)
    pub end: i32,
}

/// Bounds on each country's annual self-sufficiency
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SelfSufficiency {
    /// Lower bound on electricity self-sufficiency
    #[serde(default)]
    pub min_electricity: f64,
    /// Upper bound on electricity self-sufficiency
    #[serde(default = "default_infinity")]
    pub max_electricity: f64,
    /// Lower bound on hydrogen self-sufficiency
    #[serde(default)]
    pub min_hydrogen: f64,
    /// Upper bound on hydrogen self-sufficiency
    #[serde(default = "default_infinity")]
    pub max_hydrogen: f64,
}

impl Default for SelfSufficiency {
    fn default() -> Self {
        Self {
            min_electricity: 0.0,
            max_electricity: f64::INFINITY,
            min_hydrogen: 0.0,
            max_hydrogen: f64::INFINITY,
        }
    }
}

/// One-way transfer efficiency per interconnection type
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterconnectionEfficiency {
    /// HVAC efficiency
    #[serde(default = "default_interconnection_efficiency")]
    pub hvac: f64,
    /// HVDC efficiency
    #[serde(default = "default_interconnection_efficiency")]
    pub hvdc: f64,
}

impl Default for InterconnectionEfficiency {
    fn default() -> Self {
        Self {
            hvac: default_interconnection_efficiency(),
            hvdc: default_interconnection_efficiency(),
        }
    }
}

impl InterconnectionEfficiency {
    /// The efficiency of an interconnection type
    pub fn get(&self, kind: InterconnectionType) -> f64 {
        match kind {
            InterconnectionType::Hvac => self.hvac,
            InterconnectionType::Hvdc => self.hvdc,
        }
    }
}

/// Interconnection policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterconnectionConfig {
    /// Multiplier on today's transfer capacity
    #[serde(default = "default_one")]
    pub relative_capacity: f64,
    /// Whether extra capacity is placed per connection by the optimiser rather than scaling the
    /// whole fleet
    #[serde(default)]
    pub optimize_individual: bool,
    /// Transfer efficiencies
    #[serde(default)]
    pub efficiency: InterconnectionEfficiency,
}

impl Default for InterconnectionConfig {
    fn default() -> Self {
        Self {
            relative_capacity: 1.0,
            optimize_individual: false,
            efficiency: InterconnectionEfficiency::default(),
        }
    }
}

/// Direction of the storage cost peg
#[derive(
    Debug, Clone, Copy, PartialEq, SerializeLabeledStringEnum, DeserializeLabeledStringEnum,
)]
pub enum PegRelation {
    /// Storage cost must be at least the given value
    #[string = "geq"]
    AtLeast,
    /// Storage cost must be at most the given value
    #[string = "leq"]
    AtMost,
}

/// Constrains the annual storage cost to a fixed value
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageCostPeg {
    /// Direction of the constraint
    pub relation: PegRelation,
    /// Annual storage cost in EUR
    pub value: f64,
}

/// Technologies to consider and their policy parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TechnologyConfig {
    /// Cost-technology level
    #[serde(default)]
    pub scenario: ScenarioLevel,
    /// Intermittent renewables
    #[serde(default)]
    pub ires: Vec<TechnologyID>,
    /// Dispatchable technologies with their maximum share of electricity demand
    #[serde(default)]
    pub dispatchable: IndexMap<TechnologyID, f64>,
    /// Hydropower technologies
    #[serde(default)]
    pub hydropower: Vec<TechnologyID>,
    /// Storage technologies
    #[serde(default)]
    pub storage: Vec<TechnologyID>,
    /// Electrolysis technologies
    #[serde(default)]
    pub electrolysis: Vec<TechnologyID>,
    /// Multiplier on the hydropower nameplate capacities
    #[serde(default = "default_one")]
    pub relative_hydropower_capacity: f64,
    /// Fuel price (EUR/MWh) for hydrogen-fuelled dispatchables
    #[serde(default)]
    pub hydrogen_reference_price: Option<f64>,
    /// Optional constraint on the annual storage cost
    #[serde(default)]
    pub storage_cost_peg: Option<StorageCostPeg>,
}

impl TechnologyConfig {
    /// The configured technologies of a category, in order
    pub fn in_category(&self, category: TechnologyCategory) -> Vec<&TechnologyID> {
        match category {
            TechnologyCategory::Ires => self.ires.iter().collect(),
            TechnologyCategory::Dispatchable => self.dispatchable.keys().collect(),
            TechnologyCategory::Hydropower => self.hydropower.iter().collect(),
            TechnologyCategory::Storage => self.storage.iter().collect(),
            TechnologyCategory::Electrolysis => self.electrolysis.iter().collect(),
        }
    }
}

/// The algorithm used by the LP solver
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Default,
    SerializeLabeledStringEnum,
    DeserializeLabeledStringEnum,
)]
pub enum SolverMethod {
    /// Interior point method
    #[default]
    #[string = "barrier"]
    Barrier,
    /// Dual simplex
    #[string = "simplex"]
    Simplex,
    /// Let the solver decide
    #[string = "choose"]
    Choose,
}

/// Solver settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Solution algorithm
    #[serde(default)]
    pub method: SolverMethod,
    /// Number of solver threads (0 = solver default)
    #[serde(default)]
    pub thread_count: i32,
    /// Barrier convergence tolerance
    #[serde(default = "default_barrier_convergence_tolerance")]
    pub barrier_convergence_tolerance: f64,
    /// Primal and dual feasibility tolerance
    #[serde(default = "default_feasibility_tolerance")]
    pub feasibility_tolerance: f64,
    /// Time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,
    /// Whether to run crossover after the barrier
    #[serde(default)]
    pub crossover: bool,
    /// Starting numeric-focus level
    #[serde(default)]
    pub numeric_focus: u8,
    /// Iterations between progress samples
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::default(),
            thread_count: 0,
            barrier_convergence_tolerance: default_barrier_convergence_tolerance(),
            feasibility_tolerance: default_feasibility_tolerance(),
            time_limit: None,
            crossover: false,
            numeric_focus: 0,
            progress_interval: default_progress_interval(),
        }
    }
}

/// The configuration of one model run
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name of the run
    pub name: String,
    /// The scenario to load from `<input_directory>/scenarios`
    pub scenario: String,
    /// Input directory, relative to the configuration file
    #[serde(default = "default_input_directory")]
    pub input_directory: PathBuf,
    /// Countries to model
    pub country_codes: Vec<CountryCode>,
    /// Climate years to model
    pub climate_years: ClimateYears,
    /// Temporal resolution
    #[serde(default)]
    pub resolution: Resolution,
    /// Hydrogen demand as a fraction of electricity demand
    #[serde(default)]
    pub relative_hydrogen_demand: f64,
    /// Maximum curtailment as a fraction of IRES generation
    #[serde(default)]
    pub relative_curtailment: Option<f64>,
    /// Value of lost load (EUR/MWh); without it demand must always be met
    #[serde(default)]
    pub value_of_lost_load: Option<f64>,
    /// Self-sufficiency bands
    #[serde(default)]
    pub self_sufficiency: SelfSufficiency,
    /// Interconnection policy
    #[serde(default)]
    pub interconnections: InterconnectionConfig,
    /// Technologies
    pub technologies: TechnologyConfig,
    /// Solver settings
    #[serde(default)]
    pub optimization: OptimizationConfig,
    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_directory: PathBuf,
}

impl Config {
    /// Read and validate a configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not read configuration file {}", path.display()))?;
        let base_directory = path.parent().unwrap_or(Path::new("")).to_path_buf();

        Self::from_yaml_str(&contents, base_directory)
            .with_context(|| format!("Error loading configuration from {}", path.display()))
    }

    /// Parse and validate configuration YAML
    pub fn from_yaml_str(contents: &str, base_directory: PathBuf) -> Result<Self> {
        let value: Value = serde_yaml::from_str(contents)?;
        Self::from_value(value, base_directory)
    }

    fn from_value(value: Value, base_directory: PathBuf) -> Result<Self> {
        let mut config: Config =
            serde_yaml::from_value(value).map_err(|err| ConfigError(err.to_string()))?;
        config.base_directory = base_directory;
        config.validate()?;

        Ok(config)
    }

    /// Serialise the effective configuration as YAML
    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Derive a new configuration by overwriting values at dotted paths (e.g.
    /// `technologies.dispatchable.gas`).
    ///
    /// The result is validated like a freshly loaded configuration.
    pub fn with_overrides(&self, overrides: &[(String, Value)]) -> Result<Self> {
        let mut value = serde_yaml::to_value(self)?;
        for (path, new_value) in overrides {
            set_value_at_path(&mut value, path, new_value.clone())?;
        }

        Self::from_value(value, self.base_directory.clone())
    }

    /// The root input directory
    pub fn input_directory(&self) -> PathBuf {
        self.base_directory.join(&self.input_directory)
    }

    /// The directory holding this run's scenario
    pub fn scenario_directory(&self) -> PathBuf {
        self.input_directory().join("scenarios").join(&self.scenario)
    }

    /// The length of one time step in hours
    pub fn interval_hours(&self) -> f64 {
        self.resolution.interval_hours()
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_config!(!self.name.trim().is_empty(), "name must not be empty");
        ensure_config!(
            !self.scenario.trim().is_empty(),
            "scenario must not be empty"
        );
        ensure_config!(
            !self.country_codes.is_empty(),
            "at least one country code is required"
        );
        check_unique("country_codes", &self.country_codes)?;
        ensure_config!(
            self.climate_years.start <= self.climate_years.end,
            "climate_years.start ({}) must not be after climate_years.end ({})",
            self.climate_years.start,
            self.climate_years.end
        );
        check_non_negative("relative_hydrogen_demand", self.relative_hydrogen_demand)?;
        if let Some(value) = self.relative_curtailment {
            check_non_negative("relative_curtailment", value)?;
        }
        if let Some(value) = self.value_of_lost_load {
            ensure_config!(
                value.is_finite() && value > 0.0,
                "value_of_lost_load must be positive, got {value}"
            );
        }

        let bands = &self.self_sufficiency;
        check_band(
            "self_sufficiency electricity",
            bands.min_electricity,
            bands.max_electricity,
        )?;
        check_band(
            "self_sufficiency hydrogen",
            bands.min_hydrogen,
            bands.max_hydrogen,
        )?;

        let interconnections = &self.interconnections;
        check_non_negative(
            "interconnections.relative_capacity",
            interconnections.relative_capacity,
        )?;
        ensure_config!(
            !interconnections.optimize_individual || interconnections.relative_capacity >= 1.0,
            "interconnections.relative_capacity must be at least 1 when optimising individual \
             interconnections, got {}",
            interconnections.relative_capacity
        );
        check_efficiency(
            "interconnections.efficiency.hvac",
            interconnections.efficiency.hvac,
        )?;
        check_efficiency(
            "interconnections.efficiency.hvdc",
            interconnections.efficiency.hvdc,
        )?;

        let technologies = &self.technologies;
        ensure_config!(
            (-1.0..=1.0).contains(&technologies.scenario.0),
            "technologies.scenario must be in [-1, 1], got {}",
            technologies.scenario.0
        );
        for (technology, share) in &technologies.dispatchable {
            ensure_config!(
                !share.is_nan() && *share >= 0.0,
                "technologies.dispatchable.{technology} must be non-negative, got {share}"
            );
        }
        check_unique("technologies.ires", &technologies.ires)?;
        check_unique("technologies.hydropower", &technologies.hydropower)?;
        check_unique("technologies.storage", &technologies.storage)?;
        check_unique("technologies.electrolysis", &technologies.electrolysis)?;
        check_non_negative(
            "technologies.relative_hydropower_capacity",
            technologies.relative_hydropower_capacity,
        )?;
        if let Some(price) = technologies.hydrogen_reference_price {
            check_non_negative("technologies.hydrogen_reference_price", price)?;
        }
        if let Some(peg) = &technologies.storage_cost_peg {
            check_non_negative("technologies.storage_cost_peg.value", peg.value)?;
        }
        ensure_config!(
            self.relative_hydrogen_demand == 0.0 || !technologies.electrolysis.is_empty(),
            "relative_hydrogen_demand is positive but no electrolysis technology is configured"
        );

        let optimization = &self.optimization;
        ensure_config!(
            optimization.thread_count >= 0,
            "optimization.thread_count must be non-negative, got {}",
            optimization.thread_count
        );
        ensure_config!(
            optimization.numeric_focus <= MAX_NUMERIC_FOCUS,
            "optimization.numeric_focus must be at most {MAX_NUMERIC_FOCUS}, got {}",
            optimization.numeric_focus
        );
        for (name, value) in [
            (
                "optimization.barrier_convergence_tolerance",
                optimization.barrier_convergence_tolerance,
            ),
            (
                "optimization.feasibility_tolerance",
                optimization.feasibility_tolerance,
            ),
        ] {
            ensure_config!(
                value.is_finite() && value > 0.0,
                "{name} must be positive, got {value}"
            );
        }
        if let Some(time_limit) = optimization.time_limit {
            ensure_config!(
                time_limit > 0.0,
                "optimization.time_limit must be positive, got {time_limit}"
            );
        }
        ensure_config!(
            optimization.progress_interval > 0,
            "optimization.progress_interval must be positive"
        );

        Ok(())
    }

    /// Check that every configured technology exists in the catalog under the right category
    pub fn validate_technologies(&self, catalog: &TechnologyCatalog) -> Result<(), ConfigError> {
        for category in [
            TechnologyCategory::Ires,
            TechnologyCategory::Dispatchable,
            TechnologyCategory::Hydropower,
            TechnologyCategory::Storage,
            TechnologyCategory::Electrolysis,
        ] {
            for id in self.technologies.in_category(category) {
                let record = catalog
                    .get_in_category(&id.0, category)
                    .map_err(|err| ConfigError(format!("technologies.{category}: {err}")))?;
                ensure_config!(
                    !record.is_hydrogen_fuelled()
                        || self.technologies.hydrogen_reference_price.is_some(),
                    "technology {id} burns {HYDROGEN_FUEL} but \
                     technologies.hydrogen_reference_price is not set"
                );
            }
        }

        Ok(())
    }
}

/// Overwrite the value at a dotted path, creating intermediate mappings as needed
fn set_value_at_path(root: &mut Value, path: &str, new_value: Value) -> Result<(), ConfigError> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut node = root;
    for key in parents.into_iter().flat_map(|parents| parents.split('.')) {
        node = mapping_mut(node, path)?
            .entry(Value::String(key.to_string()))
            .or_insert(Value::Null);
    }
    mapping_mut(node, path)?.insert(Value::String(last.to_string()), new_value);

    Ok(())
}

/// View a value as a mapping, turning nulls into empty mappings
fn mapping_mut<'a>(node: &'a mut Value, path: &str) -> Result<&'a mut Mapping, ConfigError> {
    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    match node {
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(ConfigError(format!(
            "cannot set '{path}': a parent entry is not a mapping"
        ))),
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    ensure_config!(
        value.is_finite() && value >= 0.0,
        "{name} must be non-negative, got {value}"
    );

    Ok(())
}

fn check_efficiency(name: &str, value: f64) -> Result<(), ConfigError> {
    ensure_config!(
        value > 0.0 && value <= 1.0,
        "{name} must be in (0, 1], got {value}"
    );

    Ok(())
}

fn check_band(name: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    check_non_negative(&format!("{name} minimum"), min)?;
    ensure_config!(
        !max.is_nan() && min <= max,
        "{name} minimum ({min}) must not exceed maximum ({max})"
    );

    Ok(())
}

fn check_unique<T: std::hash::Hash + Eq + std::fmt::Display>(
    name: &str,
    values: &[T],
) -> Result<(), ConfigError> {
    let mut seen = IndexSet::new();
    for value in values {
        ensure_config!(seen.insert(value), "{name} contains {value} more than once");
    }

    Ok(())
}
