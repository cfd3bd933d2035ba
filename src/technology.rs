//! The technology catalog: economic and technical parameters for every candidate technology.
//!
//! Costs are given for three cost-technology levels (conservative, moderate, advanced) and
//! interpolated linearly for intermediate levels.
use crate::finance::capital_recovery_factor;
use crate::id::{define_id_getter, define_id_type, map_by_id};
use crate::units::Dimensionless;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use strum::{Display, EnumIter, IntoEnumIterator};

define_id_type! {TechnologyID}

/// The category a technology belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum TechnologyCategory {
    /// Intermittent renewables (PV, wind)
    Ires,
    /// Dispatchable thermal generation
    Dispatchable,
    /// Hydropower with a fixed nameplate
    Hydropower,
    /// Electricity storage
    Storage,
    /// Electrolysers producing hydrogen
    Electrolysis,
}

/// A cost parameter which varies with the cost-technology level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum CostParameter {
    /// Capital cost per MW
    Capex,
    /// Fixed O&M per MW per year
    FixedOm,
    /// Variable O&M per MWh generated
    VariableOm,
    /// Fuel cost per MWh of fuel
    FuelCost,
    /// Storage capital cost per MWh of energy capacity
    CapexEnergy,
    /// Storage capital cost per MW of power capacity
    CapexPower,
    /// Storage fixed O&M per MWh of energy capacity per year
    FixedOmEnergy,
    /// Storage fixed O&M per MW of power capacity per year
    FixedOmPower,
}

/// Cost parameters for one cost-technology level, in USD
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostParameters {
    #[serde(default)]
    capex: f64,
    #[serde(default)]
    fixed_om: f64,
    #[serde(default)]
    variable_om: f64,
    #[serde(default)]
    fuel_cost: f64,
    #[serde(default)]
    capex_energy: f64,
    #[serde(default)]
    capex_power: f64,
    #[serde(default)]
    fixed_om_energy: f64,
    #[serde(default)]
    fixed_om_power: f64,
}

impl CostParameters {
    /// Get the value of a single parameter
    pub fn get(&self, parameter: CostParameter) -> f64 {
        match parameter {
            CostParameter::Capex => self.capex,
            CostParameter::FixedOm => self.fixed_om,
            CostParameter::VariableOm => self.variable_om,
            CostParameter::FuelCost => self.fuel_cost,
            CostParameter::CapexEnergy => self.capex_energy,
            CostParameter::CapexPower => self.capex_power,
            CostParameter::FixedOmEnergy => self.fixed_om_energy,
            CostParameter::FixedOmPower => self.fixed_om_power,
        }
    }
}

/// A point on the cost-technology axis: −1 = conservative, 0 = moderate, +1 = advanced.
///
/// Can be given in configuration files either as a number or as one of the level names.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct ScenarioLevel(pub f64);

impl ScenarioLevel {
    /// Parse a level name
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "conservative" => Some(Self(-1.0)),
            "moderate" => Some(Self(0.0)),
            "advanced" => Some(Self(1.0)),
            _ => None,
        }
    }
}

impl Serialize for ScenarioLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

impl<'de> Deserialize<'de> for ScenarioLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl Visitor<'_> for LevelVisitor {
            type Value = ScenarioLevel;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a number in [-1, 1] or one of conservative, moderate, advanced")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<ScenarioLevel, E> {
                Ok(ScenarioLevel(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ScenarioLevel, E> {
                Ok(ScenarioLevel(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ScenarioLevel, E> {
                Ok(ScenarioLevel(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ScenarioLevel, E> {
                ScenarioLevel::from_name(v)
                    .ok_or_else(|| E::custom(format!("unknown technology scenario '{v}'")))
            }
        }

        deserializer.deserialize_any(LevelVisitor)
    }
}

/// The raw form of a technology record in `technologies.yaml`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TechnologyRaw {
    name: String,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    wacc: f64,
    economic_lifetime: u32,
    #[serde(default)]
    efficiency: Option<f64>,
    #[serde(default)]
    roundtrip_efficiency: Option<f64>,
    #[serde(default)]
    soc_min: Option<f64>,
    #[serde(default)]
    soc_max: Option<f64>,
    #[serde(default)]
    turbine_efficiency: Option<f64>,
    #[serde(default)]
    pump_efficiency: Option<f64>,
    #[serde(default)]
    fuel: Option<String>,
    conservative: CostParameters,
    moderate: CostParameters,
    advanced: CostParameters,
}

/// The layout of `technologies.yaml`: one map of technologies per category
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct TechnologyFile {
    #[serde(default)]
    ires: IndexMap<String, TechnologyRaw>,
    #[serde(default)]
    dispatchable: IndexMap<String, TechnologyRaw>,
    #[serde(default)]
    hydropower: IndexMap<String, TechnologyRaw>,
    #[serde(default)]
    storage: IndexMap<String, TechnologyRaw>,
    #[serde(default)]
    electrolysis: IndexMap<String, TechnologyRaw>,
}

/// A technology and its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TechnologyRecord {
    /// Unique identifier
    pub id: TechnologyID,
    /// The category the technology belongs to
    pub category: TechnologyCategory,
    /// Human-readable name
    pub name: String,
    /// Colour used by plotting tools
    pub color: Option<String>,
    /// Weighted average cost of capital
    pub wacc: Dimensionless,
    /// Economic lifetime in years
    pub economic_lifetime: u32,
    /// Conversion efficiency (dispatchables: fuel to electricity; electrolysers: electricity to
    /// hydrogen)
    pub efficiency: f64,
    /// Storage round-trip efficiency
    pub roundtrip_efficiency: f64,
    /// Minimum storage state of charge as a fraction of energy capacity
    pub soc_min: f64,
    /// Maximum storage state of charge as a fraction of energy capacity
    pub soc_max: f64,
    /// Hydropower turbine efficiency
    pub turbine_efficiency: f64,
    /// Hydropower pump efficiency
    pub pump_efficiency: f64,
    /// The fuel burnt by a dispatchable technology
    pub fuel: Option<String>,
    /// Costs at the conservative level
    pub conservative: CostParameters,
    /// Costs at the moderate level
    pub moderate: CostParameters,
    /// Costs at the advanced level
    pub advanced: CostParameters,
}
define_id_getter! {TechnologyRecord, TechnologyID}

/// The fuel name which marks a dispatchable technology as hydrogen-fuelled
pub const HYDROGEN_FUEL: &str = "hydrogen";

impl TechnologyRecord {
    fn from_raw(id: &str, category: TechnologyCategory, raw: TechnologyRaw) -> Result<Self> {
        let record = Self {
            id: id.into(),
            category,
            name: raw.name,
            color: raw.color,
            wacc: Dimensionless(raw.wacc),
            economic_lifetime: raw.economic_lifetime,
            efficiency: raw.efficiency.unwrap_or(1.0),
            roundtrip_efficiency: raw.roundtrip_efficiency.unwrap_or(1.0),
            soc_min: raw.soc_min.unwrap_or(0.0),
            soc_max: raw.soc_max.unwrap_or(1.0),
            turbine_efficiency: raw.turbine_efficiency.unwrap_or(1.0),
            pump_efficiency: raw.pump_efficiency.unwrap_or(1.0),
            fuel: raw.fuel,
            conservative: raw.conservative,
            moderate: raw.moderate,
            advanced: raw.advanced,
        };
        record
            .validate()
            .with_context(|| format!("Invalid parameters for technology {id}"))?;

        Ok(record)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.wacc.0 >= 0.0, "wacc must be non-negative");
        ensure!(
            self.economic_lifetime > 0,
            "economic_lifetime must be positive"
        );
        for levels in [&self.conservative, &self.moderate, &self.advanced] {
            for parameter in CostParameter::iter() {
                let value = levels.get(parameter);
                ensure!(
                    value.is_finite() && value >= 0.0,
                    "{parameter} must be non-negative, got {value}"
                );
            }
        }
        for (name, value) in [
            ("efficiency", self.efficiency),
            ("roundtrip_efficiency", self.roundtrip_efficiency),
            ("turbine_efficiency", self.turbine_efficiency),
            ("pump_efficiency", self.pump_efficiency),
        ] {
            ensure!(
                value > 0.0 && value <= 1.0,
                "{name} must be in (0, 1], got {value}"
            );
        }
        ensure!(
            (0.0..=1.0).contains(&self.soc_min) && (0.0..=1.0).contains(&self.soc_max),
            "soc_min and soc_max must be in [0, 1]"
        );
        ensure!(
            self.soc_min <= self.soc_max,
            "soc_min ({}) must not exceed soc_max ({})",
            self.soc_min,
            self.soc_max
        );

        Ok(())
    }

    /// The value of a cost parameter at the given cost-technology level.
    ///
    /// Levels are clamped to [−1, 1]. Between the named levels the value is linearly
    /// interpolated.
    pub fn scenario_value(&self, parameter: CostParameter, level: ScenarioLevel) -> f64 {
        let level = level.0.clamp(-1.0, 1.0);
        let moderate = self.moderate.get(parameter);
        if level < 0.0 {
            moderate + (-level) * (self.conservative.get(parameter) - moderate)
        } else {
            moderate + level * (self.advanced.get(parameter) - moderate)
        }
    }

    /// The capital recovery factor for this technology
    pub fn capital_recovery_factor(&self) -> Dimensionless {
        capital_recovery_factor(self.economic_lifetime, self.wacc)
    }

    /// Whether the technology burns hydrogen
    pub fn is_hydrogen_fuelled(&self) -> bool {
        self.fuel.as_deref() == Some(HYDROGEN_FUEL)
    }
}

/// The full set of technologies, keyed by ID
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnologyCatalog {
    technologies: IndexMap<TechnologyID, TechnologyRecord>,
}

impl TechnologyCatalog {
    /// Build a catalog from a set of records.
    ///
    /// Technology IDs must be unique across categories.
    pub fn new(records: impl IntoIterator<Item = TechnologyRecord>) -> Result<Self> {
        Ok(Self {
            technologies: map_by_id(records)?,
        })
    }

    /// Build a catalog from the contents of `technologies.yaml`
    pub(crate) fn from_file(file: TechnologyFile) -> Result<Self> {
        let TechnologyFile {
            ires,
            dispatchable,
            hydropower,
            storage,
            electrolysis,
        } = file;
        let mut records = Vec::new();
        for (category, map) in [
            (TechnologyCategory::Ires, ires),
            (TechnologyCategory::Dispatchable, dispatchable),
            (TechnologyCategory::Hydropower, hydropower),
            (TechnologyCategory::Storage, storage),
            (TechnologyCategory::Electrolysis, electrolysis),
        ] {
            for (id, raw) in map {
                records.push(TechnologyRecord::from_raw(&id, category, raw)?);
            }
        }

        Self::new(records)
    }

    /// Look up a technology by ID
    pub fn get(&self, id: &str) -> Option<&TechnologyRecord> {
        self.technologies.get(id)
    }

    /// Look up a technology, checking it belongs to `category`
    pub fn get_in_category(
        &self,
        id: &str,
        category: TechnologyCategory,
    ) -> Result<&TechnologyRecord> {
        let record = self
            .get(id)
            .with_context(|| format!("Unknown technology '{id}'"))?;
        ensure!(
            record.category == category,
            "Technology '{id}' is a {} technology, not {category}",
            record.category
        );

        Ok(record)
    }

    /// Iterate over the technologies in a category
    pub fn iter_category(
        &self,
        category: TechnologyCategory,
    ) -> impl Iterator<Item = &TechnologyRecord> {
        self.technologies
            .values()
            .filter(move |record| record.category == category)
    }

    /// The value of a cost parameter of a technology at a cost-technology level
    pub fn scenario_value(
        &self,
        id: &str,
        parameter: CostParameter,
        level: ScenarioLevel,
    ) -> Result<f64> {
        let record = self
            .get(id)
            .with_context(|| format!("Unknown technology '{id}'"))?;

        Ok(record.scenario_value(parameter, level))
    }

    /// Number of technologies
    pub fn len(&self) -> usize {
        self.technologies.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.technologies.is_empty()
    }
}
