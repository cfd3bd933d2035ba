//! Program logging.
//!
//! Messages go to the terminal, coloured when it is one. Runs with an output folder also keep two
//! log files there: one for the ordinary progress of the run and one for warnings and errors.
//! Sensitivity steps share the logger of the sweep.
use anyhow::{Context, Result, anyhow};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::Arguments;
use std::fs::File;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

/// Set once the logger is installed
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The log level used if neither [`LOG_LEVEL_ENV_VAR`] nor `settings.toml` give one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// The environment variable which overrides the log level
pub const LOG_LEVEL_ENV_VAR: &str = "PEIROCOM_LOG_LEVEL";

/// Progress messages of a run (info and below)
const LOG_INFO_FILE_NAME: &str = "peirocom_info.log";

/// Warnings and errors of a run
const LOG_ERROR_FILE_NAME: &str = "peirocom_error.log";

/// Prefix stripped from log targets, so messages show the module which sent them
const TARGET_PREFIX: &str = "peirocom::";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// The paths of the info and error log files kept in an output folder
pub fn log_file_paths(output_dir: &Path) -> (PathBuf, PathBuf) {
    (
        output_dir.join(LOG_INFO_FILE_NAME),
        output_dir.join(LOG_ERROR_FILE_NAME),
    )
}

/// Install the program logger.
///
/// The level comes from the `PEIROCOM_LOG_LEVEL` environment variable if set, else from
/// `settings.toml`, else [`DEFAULT_LOG_LEVEL`]. Known levels are `off`, `error`, `warn`, `info`,
/// `debug` and `trace`, in any case.
///
/// # Arguments
///
/// * `log_level_from_settings`: The log level given in `settings.toml`
/// * `output_dir`: Folder in which to create log files, if any
pub fn init(log_level_from_settings: Option<&str>, output_dir: Option<&Path>) -> Result<()> {
    let level_name = env::var(LOG_LEVEL_ENV_VAR)
        .ok()
        .or_else(|| log_level_from_settings.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let level = parse_log_level(&level_name)?;

    let mut dispatch = Dispatch::new().chain(terminal_dispatch(level));
    if let Some(output_dir) = output_dir {
        dispatch = dispatch.chain(file_dispatch(level, output_dir)?);
    }

    dispatch
        .apply()
        .map_err(|_| anyhow!("Logger already initialised"))?;
    let _ = LOGGER_INIT.set(());

    Ok(())
}

/// Parse a log level name, ignoring case
fn parse_log_level(name: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(name).map_err(|_| anyhow!("Unknown log level: {name}"))
}

/// Progress to stdout and problems to stderr
fn terminal_dispatch(level: LevelFilter) -> Dispatch {
    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let stdout_colour = std::io::stdout().is_terminal().then_some(colours);
    let stderr_colour = std::io::stderr().is_terminal().then_some(colours);

    Dispatch::new()
        .chain(
            Dispatch::new()
                .level(level)
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    format_record(out, message, record, stdout_colour.as_ref());
                })
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .level(level.min(LevelFilter::Warn))
                .format(move |out, message, record| {
                    format_record(out, message, record, stderr_colour.as_ref());
                })
                .chain(std::io::stderr()),
        )
}

/// Log files in the output folder.
///
/// The info file records at least `info` whatever the terminal level, so every run keeps a record
/// of its progress.
fn file_dispatch(level: LevelFilter, output_dir: &Path) -> Result<Dispatch> {
    let (info_path, error_path) = log_file_paths(output_dir);
    let create = |path: &Path| {
        File::create(path).with_context(|| format!("Could not create {}", path.display()))
    };

    Ok(Dispatch::new()
        .format(|out, message, record| format_record(out, message, record, None))
        .chain(
            Dispatch::new()
                .level(level.max(LevelFilter::Info))
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .chain(create(&info_path)?),
        )
        .chain(
            Dispatch::new()
                .level(LevelFilter::Warn)
                .chain(create(&error_path)?),
        ))
}

/// Write a log line as `[time level module] message`
fn format_record(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    let timestamp = Local::now().format("%H:%M:%S");
    let target = record.target();
    let target = target.strip_prefix(TARGET_PREFIX).unwrap_or(target);
    match colours {
        Some(colours) => out.finish(format_args!(
            "[{timestamp} {} {target}] {message}",
            colours.color(record.level())
        )),
        None => out.finish(format_args!(
            "[{timestamp} {} {target}] {message}",
            record.level()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("off", LevelFilter::Off)]
    #[case("warn", LevelFilter::Warn)]
    #[case("INFO", LevelFilter::Info)]
    #[case("Trace", LevelFilter::Trace)]
    fn parse_known_levels(#[case] name: &str, #[case] expected: LevelFilter) {
        assert_eq!(parse_log_level(name).unwrap(), expected);
    }

    #[test]
    fn parse_unknown_level() {
        assert_eq!(
            parse_log_level("verbose").unwrap_err().to_string(),
            "Unknown log level: verbose"
        );
    }

    #[test]
    fn log_files_live_in_output_folder() {
        let (info, error) = log_file_paths(Path::new("out"));
        assert_eq!(info, Path::new("out").join("peirocom_info.log"));
        assert_eq!(error, Path::new("out").join("peirocom_error.log"));
    }
}
