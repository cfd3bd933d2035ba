//! Code for loading program settings.
use crate::get_peirocom_config_dir;
use crate::log::DEFAULT_LOG_LEVEL;
use crate::output::DEFAULT_RESULTS_ROOT;
use anyhow::{Context, Result};
use documented::DocumentedFields;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE_NAME: &str = "settings.toml";

const DEFAULT_SETTINGS_FILE_HEADER: &str = "# This file contains the program settings for PEIROCOM
# Uncomment a setting to change it from its default value.
";

/// Default log level for program
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Default root folder for run outputs
fn default_results_root() -> PathBuf {
    PathBuf::from(DEFAULT_RESULTS_ROOT)
}

/// Get the path to where the settings file will be read from
pub fn get_settings_file_path() -> PathBuf {
    let mut path = get_peirocom_config_dir();
    path.push(SETTINGS_FILE_NAME);

    path
}

/// Program settings from config file
#[derive(Debug, DocumentedFields, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// The default program log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether to overwrite output folders by default
    #[serde(default)]
    pub overwrite: bool,
    /// The folder in which a run's output folder is created if none is given
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,
    /// Whether to write the LP file and solver parameters alongside the results
    #[serde(default)]
    pub write_model_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            overwrite: false,
            results_root: default_results_root(),
            write_model_files: false,
        }
    }
}

impl Settings {
    /// Read the program settings file.
    ///
    /// If the file is not present, default values for settings will be used
    ///
    /// # Returns
    ///
    /// The program settings as a `Settings` struct or an error if the file is invalid
    pub fn load() -> Result<Settings> {
        Self::load_from_path(&get_settings_file_path())
    }

    /// Read from the specified path, falling back to defaults if there is no file
    fn load_from_path(file_path: &Path) -> Result<Settings> {
        if !file_path.is_file() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(file_path)
            .with_context(|| format!("Could not read {}", file_path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Error parsing {}", file_path.display()))
    }

    /// The contents of the default settings file
    pub fn default_file_contents() -> Result<String> {
        // Convert to TOML
        let settings_raw = toml::to_string(&Settings::default())?;

        // Iterate through the generated TOML, commenting out lines and adding docs
        let mut out = DEFAULT_SETTINGS_FILE_HEADER.to_string();
        for line in settings_raw.split('\n') {
            if let Some(last) = line.find('=') {
                // Add documentation from doc comments
                let field = line[..last].trim();
                let docs = Settings::get_field_docs(field)
                    .with_context(|| format!("Missing doc comment for field {field}"))?;
                for line in docs.split('\n') {
                    write!(&mut out, "\n# # {}\n", line.trim())?;
                }

                writeln!(&mut out, "# {}", line.trim())?;
            }
        }

        Ok(out)
    }
}
