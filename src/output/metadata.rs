//! The run manifest, `metadata.toml`.
//!
//! Every run writes one, whether or not it succeeds, recording how the run ended alongside the
//! program build and the machine it ran on.
use anyhow::{Context, Result, anyhow};
use chrono::Local;
use platform_info::{PlatformInfo, PlatformInfoAPI, UNameAPI};
use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

/// The output file name for the run manifest
pub const METADATA_FILE_NAME: &str = "metadata.toml";

/// Information about the program build via `built` crate
mod built_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// What the manifest records about a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo<'a> {
    /// The run name from the configuration
    pub name: &'a str,
    /// The scenario folder the inputs came from
    pub scenario: &'a str,
    /// Path to the configuration file which was run
    pub config_path: &'a Path,
    /// Final status, e.g. `optimal`, `infeasible` or `error`
    pub status: String,
    /// Human-readable description of the status
    pub message: String,
    /// Objective value (EUR per year), for runs which solved
    pub objective: Option<f64>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    run: RunSection<'a>,
    program: ProgramSection,
    platform: PlatformSection,
}

#[derive(Serialize)]
struct RunSection<'a> {
    name: &'a str,
    scenario: &'a str,
    config_path: &'a Path,
    /// When the manifest was written
    finished: String,
    status: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    objective: Option<f64>,
}

impl<'a> From<&'a RunInfo<'a>> for RunSection<'a> {
    fn from(info: &'a RunInfo<'a>) -> Self {
        Self {
            name: info.name,
            scenario: info.scenario,
            config_path: info.config_path,
            finished: Local::now().to_rfc3339(),
            status: &info.status,
            message: &info.message,
            objective: info.objective,
        }
    }
}

/// The program build, as recorded by the build script
#[derive(Serialize)]
struct ProgramSection {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    is_debug: bool,
    rustc_version: &'static str,
    build_time_utc: &'static str,
    /// Short commit hash, suffixed with `-dirty` for uncommitted changes
    git_commit_hash: String,
}

impl ProgramSection {
    fn current() -> Self {
        let git_commit_hash = match built_info::GIT_COMMIT_HASH_SHORT {
            Some(hash) if built_info::GIT_DIRTY == Some(true) => format!("{hash}-dirty"),
            Some(hash) => hash.to_string(),
            None => "unknown".to_string(),
        };

        Self {
            name: built_info::PKG_NAME,
            version: built_info::PKG_VERSION,
            target: built_info::TARGET,
            is_debug: built_info::DEBUG,
            rustc_version: built_info::RUSTC_VERSION,
            build_time_utc: built_info::BUILT_TIME_UTC,
            git_commit_hash,
        }
    }
}

/// The `uname` fields of the machine running the program
#[derive(Serialize)]
struct PlatformSection {
    sysname: String,
    nodename: String,
    release: String,
    version: String,
    machine: String,
    osname: String,
}

impl PlatformSection {
    fn current() -> Result<Self> {
        let info = PlatformInfo::new()
            .map_err(|err| anyhow!("Unable to determine platform info: {err}"))?;
        let text = |value: &OsStr| value.to_string_lossy().into_owned();

        Ok(Self {
            sysname: text(info.sysname()),
            nodename: text(info.nodename()),
            release: text(info.release()),
            version: text(info.version()),
            machine: text(info.machine()),
            osname: text(info.osname()),
        })
    }
}

/// Write the run manifest into `output_dir`
pub fn write_metadata(output_dir: &Path, info: &RunInfo) -> Result<()> {
    let manifest = Manifest {
        run: RunSection::from(info),
        program: ProgramSection::current(),
        platform: PlatformSection::current()?,
    };
    let file_path = output_dir.join(METADATA_FILE_NAME);
    fs::write(&file_path, toml::to_string(&manifest)?)
        .with_context(|| format!("Could not write {}", file_path.display()))?;

    Ok(())
}
