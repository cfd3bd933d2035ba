//! PEIROCOM: capacity expansion and hourly dispatch optimisation for a multi-country power system
//! with coupled hydrogen production.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod cli;
pub mod config;
pub mod country;
pub mod error;
pub mod finance;
pub mod id;
pub mod input;
pub mod log;
pub mod optimisation;
pub mod output;
pub mod pipeline;
pub mod results;
pub mod sensitivity;
pub mod settings;
pub mod solver;
pub mod technology;
pub mod time_series;
pub mod units;

#[cfg(test)]
mod fixture;

/// The URL for reporting problems with the program
pub const ISSUES_URL: &str = concat!(env!("CARGO_PKG_REPOSITORY"), "/issues");

/// Get the directory in which program-wide configuration files are stored.
///
/// Falls back to the working directory on platforms without a config directory.
pub fn get_peirocom_config_dir() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("peirocom");
    dir
}
