//! Solver progress monitoring.
//!
//! HiGHS writes its iteration log to a file. While a solve runs, a watcher thread tails that file,
//! parses the simplex and interior point iteration lines and hands samples to a
//! [`ProgressRecorder`], which appends them to `progress.csv` and passes them on to an optional
//! callback.
use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use strum::Display;

/// How often the watcher polls the log file for new lines
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The algorithm which produced a progress sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    /// Simplex iterations
    Simplex,
    /// Interior point (barrier) iterations
    Barrier,
}

/// One sample of the solver's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolverProgress {
    /// The solve attempt (starting at 1)
    pub attempt: u32,
    /// The algorithm
    pub source: ProgressSource,
    /// Iteration counter
    pub iteration: u64,
    /// Primal objective value
    pub objective: f64,
    /// Primal infeasibility (sum for simplex, residual for barrier)
    pub primal_infeasibility: f64,
    /// Dual infeasibility (sum for simplex, residual for barrier), if reported
    pub dual_infeasibility: Option<f64>,
}

/// Parse the `num(sum)` notation used in simplex log lines
fn parse_infeasibility(token: &str) -> Option<f64> {
    let (_, sum) = token.split_once('(')?;
    sum.trim_end_matches(';').strip_suffix(')')?.parse().ok()
}

/// Parse one line of a HiGHS log.
///
/// Recognises simplex lines (`<iteration> <objective> Pr: n(sum); Du: n(sum) <time>s`) and IPX
/// lines (`<iteration> <p.res> <d.res> <p.obj> <d.obj> <mu> <time>s`). Anything else is ignored.
pub fn parse_log_line(line: &str) -> Option<(ProgressSource, u64, f64, f64, Option<f64>)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let iteration: u64 = tokens.first()?.trim_end_matches('*').parse().ok()?;

    if tokens.get(2).is_some_and(|label| label.ends_with(':')) {
        let objective = tokens.get(1)?.parse().ok()?;
        let mut primal = None;
        let mut dual = None;
        for pair in tokens[2..].windows(2) {
            match pair[0] {
                "Pr:" | "Ph1:" => primal = parse_infeasibility(pair[1]),
                "Du:" => dual = parse_infeasibility(pair[1]),
                _ => {}
            }
        }
        return Some((ProgressSource::Simplex, iteration, objective, primal?, dual));
    }

    if tokens.len() >= 7 {
        let numbers: Option<Vec<f64>> = tokens[1..6].iter().map(|t| t.parse().ok()).collect();
        let numbers = numbers?;
        tokens[6].strip_suffix('s')?;
        return Some((
            ProgressSource::Barrier,
            iteration,
            numbers[2],
            numbers[0],
            Some(numbers[1]),
        ));
    }

    None
}

/// A callback receiving progress samples
pub type ProgressCallback = Box<dyn FnMut(&SolverProgress) + Send>;

/// Collects progress samples, thinning out simplex iterations
pub struct ProgressRecorder {
    writer: Option<csv::Writer<File>>,
    callback: Option<ProgressCallback>,
    interval: u64,
    last_iteration: Option<(u32, u64)>,
    samples: Vec<SolverProgress>,
}

impl ProgressRecorder {
    /// Create a recorder.
    ///
    /// # Arguments
    ///
    /// * `csv_path` - Optional path of a CSV file to append samples to
    /// * `interval` - Minimum number of simplex iterations between samples
    /// * `callback` - Optional callback receiving every sample
    pub fn new(
        csv_path: Option<&Path>,
        interval: u64,
        callback: Option<ProgressCallback>,
    ) -> Result<Self> {
        let writer = csv_path
            .map(|path| {
                csv::Writer::from_path(path)
                    .with_context(|| format!("Could not create {}", path.display()))
            })
            .transpose()?;

        Ok(Self {
            writer,
            callback,
            interval: interval.max(1),
            last_iteration: None,
            samples: Vec::new(),
        })
    }

    /// Offer a sample. Simplex samples closer than the interval to the previous one are dropped;
    /// barrier samples are always kept.
    pub fn record(&mut self, sample: SolverProgress) -> Result<()> {
        let too_soon = sample.source == ProgressSource::Simplex
            && self.last_iteration.is_some_and(|(attempt, iteration)| {
                attempt == sample.attempt && sample.iteration < iteration + self.interval
            });
        if too_soon {
            return Ok(());
        }
        self.last_iteration = Some((sample.attempt, sample.iteration));

        if let Some(writer) = &mut self.writer {
            writer.serialize(&sample)?;
            writer.flush()?;
        }
        if let Some(callback) = &mut self.callback {
            callback(&sample);
        }
        self.samples.push(sample);

        Ok(())
    }

    /// All samples kept so far
    pub fn samples(&self) -> &[SolverProgress] {
        &self.samples
    }
}

/// A thread following a solver log file while a solve runs
pub struct ProgressWatcher {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ProgressWatcher {
    /// Start following `log_path` on behalf of solve attempt `attempt`
    pub fn start(log_path: PathBuf, attempt: u32, recorder: Arc<Mutex<ProgressRecorder>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = follow_log(&log_path, attempt, &recorder, &thread_stop) {
                warn!("Stopped monitoring solver progress: {err:#}");
            }
        });

        Self { stop, handle }
    }

    /// Read the remainder of the log and stop the thread
    pub fn finish(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.handle.join().is_err() {
            warn!("The solver progress monitor panicked");
        }
    }
}

fn follow_log(
    path: &Path,
    attempt: u32,
    recorder: &Mutex<ProgressRecorder>,
    stop: &AtomicBool,
) -> Result<()> {
    // The solver creates the file when it starts
    let file = loop {
        let stopping = stop.load(Ordering::SeqCst);
        match File::open(path) {
            Ok(file) => break file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if stopping {
                    return Ok(());
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(err.into()),
        }
    };

    let mut reader = BufReader::new(file);
    let mut line = String::new();
    loop {
        // Check before reading, so that everything written before the solve finished is read
        let stopping = stop.load(Ordering::SeqCst);
        let read = reader.read_line(&mut line)?;
        if read > 0 && line.ends_with('\n') {
            if let Some((source, iteration, objective, primal, dual)) = parse_log_line(&line) {
                recorder
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(SolverProgress {
                        attempt,
                        source,
                        iteration,
                        objective,
                        primal_infeasibility: primal,
                        dual_infeasibility: dual,
                    })?;
            }
            line.clear();
        } else if read == 0 {
            if stopping {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
