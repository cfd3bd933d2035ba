//! Error types surfaced to callers of the library.
//!
//! Everything else is reported through [`anyhow::Error`] with context attached. These types exist
//! so that callers (and tests) can tell apart the failure categories with `downcast_ref`.
use crate::solver::ModelStatus;
use derive_more::Display;
use std::error::Error;
use std::path::PathBuf;

/// The model configuration is invalid
#[derive(Debug, Display, Clone, PartialEq)]
#[display("Invalid configuration: {_0}")]
pub struct ConfigError(pub String);

impl Error for ConfigError {}

/// The sensitivity analysis description is invalid
#[derive(Debug, Display, Clone, PartialEq)]
#[display("Invalid sensitivity analysis: {_0}")]
pub struct SensitivityConfigError(pub String);

impl Error for SensitivityConfigError {}

/// A problem with the input data on disk
#[derive(Debug, Display, Clone, PartialEq)]
pub enum InputError {
    /// A required file, or a required column in a file, is missing
    #[display("Missing input {what} in {}", path.display())]
    MissingInput {
        /// The file which is (or should contain) the missing input
        path: PathBuf,
        /// What is missing (e.g. "file" or "column 'NL00'")
        what: String,
    },
    /// The input data is present but is not consistent with the model configuration
    #[display("Inconsistent input in {}: {reason}", path.display())]
    InconsistentInput {
        /// The offending file
        path: PathBuf,
        /// A description of the problem
        reason: String,
    },
    /// A time series does not cover the requested climate years
    #[display(
        "Climate years {start}-{end} are not covered by {} \
         (available: {available_start}-{available_end})",
        path.display()
    )]
    OutOfRangeClimateYears {
        /// The offending file
        path: PathBuf,
        /// First requested climate year
        start: i32,
        /// Last requested climate year
        end: i32,
        /// First year available in the file
        available_start: i32,
        /// Last year available in the file
        available_end: i32,
    },
}

impl InputError {
    /// A whole file is missing
    pub fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingInput {
            path: path.into(),
            what: "file".into(),
        }
    }

    /// A column is missing from a file
    pub fn missing_column(path: impl Into<PathBuf>, column: &str) -> Self {
        Self::MissingInput {
            path: path.into(),
            what: format!("column '{column}'"),
        }
    }

    /// The contents of a file are inconsistent
    pub fn inconsistent(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InconsistentInput {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl Error for InputError {}

/// The solver finished without an optimal solution
#[derive(Debug, Display, Clone, Copy, PartialEq)]
#[display("{}", status.message())]
pub struct ModelStatusError {
    /// The final status reported by the solver
    pub status: ModelStatus,
}

impl Error for ModelStatusError {}
