//! The command line interface for the model.
use crate::config::Config;
use crate::input::load_inputs;
use crate::log;
use crate::output::{create_output_directory, get_output_dir};
use crate::pipeline::{self, RunOptions};
use crate::sensitivity::{SensitivityConfig, run_sensitivity};
use crate::settings::Settings;
use ::log::{info, warn};
use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use itertools::Itertools;
use std::path::{Path, PathBuf};

pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for the model.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run and sensitivity commands
#[derive(Args)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Whether to write the LP file and solver parameters
    #[arg(long)]
    pub write_model_files: bool,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Build and solve a model.
    Run {
        /// Path to the configuration file.
        config_path: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Solve a model once per step of a sensitivity analysis.
    Sensitivity {
        /// Path to the base configuration file.
        config_path: PathBuf,
        /// Path to the sensitivity analysis file.
        sensitivity_path: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Validate a configuration and load its inputs, without solving.
    Validate {
        /// Path to the configuration file.
        config_path: PathBuf,
    },
    /// Manage the program settings file.
    Settings {
        /// The available subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { config_path, opts } => handle_run_command(&config_path, &opts, None),
            Self::Sensitivity {
                config_path,
                sensitivity_path,
                opts,
            } => handle_sensitivity_command(&config_path, &sensitivity_path, &opts, None),
            Self::Validate { config_path } => handle_validate_command(&config_path, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start PEIROCOM
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ peirocom --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        // Output program help in markdown format
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load program settings, if not provided
fn settings_or_load(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Create the output folder and start logging into it
fn prepare_output_dir(output_path: &Path, opts: &RunOpts, settings: &Settings) -> Result<()> {
    let overwrite = create_output_directory(output_path, opts.overwrite || settings.overwrite)
        .with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;

    // Initialise program logger
    log::init(Some(&settings.log_level), Some(output_path))
        .context("Failed to initialise logging.")?;
    info!("Output folder: {}", output_path.display());

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    Ok(())
}

fn run_options(opts: &RunOpts, settings: &Settings) -> RunOptions {
    RunOptions {
        write_model_files: opts.write_model_files || settings.write_model_files,
        ..RunOptions::default()
    }
}

/// Handle the `run` command.
pub fn handle_run_command(
    config_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    let config = Config::from_path(config_path).context("Failed to load configuration.")?;

    // Get path to output folder
    let output_path = opts
        .output_dir
        .clone()
        .unwrap_or_else(|| get_output_dir(&settings.results_root, &config.name));
    prepare_output_dir(&output_path, opts, &settings)?;
    info!("Loaded configuration from {}", config_path.display());

    pipeline::run(
        &config,
        config_path,
        &output_path,
        run_options(opts, &settings),
    )?;
    info!("Run complete!");

    Ok(())
}

/// Handle the `sensitivity` command.
///
/// Fails if any step failed, after all steps have been attempted.
pub fn handle_sensitivity_command(
    config_path: &Path,
    sensitivity_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = settings_or_load(settings)?;
    let config = Config::from_path(config_path).context("Failed to load configuration.")?;
    let sensitivity = SensitivityConfig::from_path(sensitivity_path)
        .context("Failed to load sensitivity analysis.")?;

    let output_path = opts.output_dir.clone().unwrap_or_else(|| {
        get_output_dir(&settings.results_root, &config.name)
            .join(sensitivity.analysis_type.to_string())
    });
    prepare_output_dir(&output_path, opts, &settings)?;

    let report = run_sensitivity(
        &config,
        config_path,
        &sensitivity,
        &output_path,
        run_options(opts, &settings),
    )?;
    if !report.is_success() {
        bail!(
            "{} of {} sensitivity steps failed: {}",
            report.failed.len(),
            sensitivity.steps.len(),
            report.failed.iter().map(|step| &step.key).join(", ")
        );
    }
    info!("Sensitivity analysis complete!");

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(config_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = settings_or_load(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    // Load/validate the configuration and its inputs
    let config = Config::from_path(config_path).context("Failed to load configuration.")?;
    load_inputs(&config).context("Failed to validate inputs.")?;
    info!("Validation successful!");

    Ok(())
}
