//! Code for reading the country catalog.
use super::*;
use crate::country::{CapacityValue, Country};
use crate::id::map_by_id;
use serde::Deserialize;

const COUNTRIES_FILE_NAME: &str = "countries.yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CountryCapacityRaw {
    #[serde(default)]
    current: IndexMap<TechnologyID, CapacityValue>,
    #[serde(default)]
    potential: IndexMap<TechnologyID, CapacityValue>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CountryRaw {
    name: String,
    nuts2: CountryCode,
    #[serde(default)]
    alpha3: String,
    #[serde(default)]
    flag: String,
    market_nodes: Vec<MarketNodeID>,
    #[serde(default)]
    capacity: CountryCapacityRaw,
}

impl From<CountryRaw> for Country {
    fn from(raw: CountryRaw) -> Self {
        Self {
            id: raw.nuts2,
            name: raw.name,
            alpha3: raw.alpha3,
            flag: raw.flag,
            market_nodes: raw.market_nodes,
            current_capacity: raw.capacity.current,
            potential_capacity: raw.capacity.potential,
        }
    }
}

/// Read the country catalog from `countries.yaml`.
///
/// # Arguments
///
/// * `input_dir` - Folder containing the input catalogs
///
/// # Returns
///
/// The countries keyed by their two-letter code, in file order
pub fn read_countries(input_dir: &Path) -> Result<CountryMap> {
    let file_path = input_dir.join(COUNTRIES_FILE_NAME);
    let raw: Vec<CountryRaw> = read_yaml(&file_path)?;
    read_countries_from_raw(raw).with_context(|| format!("Error reading {}", file_path.display()))
}

fn read_countries_from_raw(raw: Vec<CountryRaw>) -> Result<CountryMap> {
    let countries = map_by_id(raw.into_iter().map(Country::from))?;
    for country in countries.values() {
        country.validate()?;
    }

    Ok(countries)
}
