//! Solving linear programs.
//!
//! Models are assembled into a solver-independent [`LinearProgram`] and handed to a
//! [`SolverDriver`], which runs a [`SolverBackend`] (HiGHS by default) and retries with more
//! conservative settings when the solver reports numerical trouble or cannot tell an infeasible
//! model from an unbounded one.
use crate::config::{MAX_NUMERIC_FOCUS, OptimizationConfig, SolverMethod};
use anyhow::{Context, Result};
use log::{info, warn};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

mod backend;
pub use backend::HighsBackend;
mod expression;
pub use expression::LinearExpression;
mod problem;
pub use problem::{Column, Constraint, LinearProgram, Row, Variable};
pub mod progress;
use progress::{ProgressCallback, ProgressRecorder, ProgressWatcher};
mod status;
pub use status::ModelStatus;

/// The file the solver log is written to
pub const LOG_FILE_NAME: &str = "log.txt";

/// The file progress samples are written to
pub const PROGRESS_FILE_NAME: &str = "progress.csv";

/// The value of a solver option
#[derive(Debug, Clone, PartialEq)]
pub enum SolverOption {
    /// A boolean option
    Bool(bool),
    /// An integer option
    Int(i32),
    /// A floating-point option
    Float(f64),
    /// A string option
    Text(String),
}

impl fmt::Display for SolverOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:e}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Settings for one solve attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SolverParameters {
    /// Solution algorithm
    pub method: SolverMethod,
    /// Number of threads (0 = solver default)
    pub thread_count: i32,
    /// Interior point convergence tolerance
    pub barrier_convergence_tolerance: f64,
    /// Primal and dual feasibility tolerance
    pub feasibility_tolerance: f64,
    /// Time limit in seconds
    pub time_limit: Option<f64>,
    /// Whether to run crossover after the interior point method
    pub crossover: bool,
    /// Numeric-focus level (0 to [`MAX_NUMERIC_FOCUS`])
    pub numeric_focus: u8,
    /// Whether presolve may apply reductions based on dual information
    pub dual_reductions: bool,
    /// File the solver writes its log to
    pub log_file: Option<PathBuf>,
    /// Whether the solver also logs to the console
    pub log_to_console: bool,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self::from_config(&OptimizationConfig::default())
    }
}

impl SolverParameters {
    /// Initial parameters for the given configuration
    pub fn from_config(config: &OptimizationConfig) -> Self {
        Self {
            method: config.method,
            thread_count: config.thread_count,
            barrier_convergence_tolerance: config.barrier_convergence_tolerance,
            feasibility_tolerance: config.feasibility_tolerance,
            time_limit: config.time_limit,
            crossover: config.crossover,
            numeric_focus: config.numeric_focus,
            dual_reductions: true,
            log_file: None,
            log_to_console: false,
        }
    }

    /// The parameters for the next attempt after a failed one, if any.
    ///
    /// An infeasible-or-unbounded result is first retried without dual reductions. After that,
    /// numerical trouble (or a persisting infeasible-or-unbounded result) raises the
    /// numeric-focus level until it reaches [`MAX_NUMERIC_FOCUS`].
    pub fn escalate(&self, status: ModelStatus) -> Option<Self> {
        if status == ModelStatus::InfOrUnbd && self.dual_reductions {
            return Some(Self {
                dual_reductions: false,
                ..self.clone()
            });
        }

        (status.is_retryable() && self.numeric_focus < MAX_NUMERIC_FOCUS).then(|| Self {
            numeric_focus: self.numeric_focus + 1,
            ..self.clone()
        })
    }

    /// The HiGHS options implementing these parameters
    pub fn options(&self) -> Vec<(&'static str, SolverOption)> {
        let mut options = vec![
            (
                "output_flag",
                SolverOption::Bool(self.log_file.is_some() || self.log_to_console),
            ),
            ("log_to_console", SolverOption::Bool(self.log_to_console)),
        ];
        if let Some(log_file) = &self.log_file {
            options.push((
                "log_file",
                SolverOption::Text(log_file.to_string_lossy().into_owned()),
            ));
        }
        if self.thread_count > 0 {
            options.push(("threads", SolverOption::Int(self.thread_count)));
        }

        // Level 3 falls back to dual simplex, whatever the configured method
        let solver = if self.numeric_focus >= 3 {
            "simplex"
        } else {
            match self.method {
                SolverMethod::Barrier => "ipm",
                SolverMethod::Simplex => "simplex",
                SolverMethod::Choose => "choose",
            }
        };
        options.push(("solver", SolverOption::Text(solver.into())));
        if solver == "simplex" {
            options.push(("simplex_strategy", SolverOption::Int(1)));
        } else {
            let crossover = self.crossover || self.numeric_focus >= 1;
            options.push((
                "run_crossover",
                SolverOption::Text(if crossover { "on" } else { "off" }.into()),
            ));
        }

        let scale = if self.numeric_focus >= 2 { 0.1 } else { 1.0 };
        options.extend([
            (
                "ipm_optimality_tolerance",
                SolverOption::Float(self.barrier_convergence_tolerance * scale),
            ),
            (
                "primal_feasibility_tolerance",
                SolverOption::Float(self.feasibility_tolerance * scale),
            ),
            (
                "dual_feasibility_tolerance",
                SolverOption::Float(self.feasibility_tolerance * scale),
            ),
        ]);
        if let Some(time_limit) = self.time_limit {
            options.push(("time_limit", SolverOption::Float(time_limit)));
        }
        if !self.dual_reductions {
            options.push(("presolve", SolverOption::Text("off".into())));
        }

        options
    }

    /// Write the options to a HiGHS options file
    pub fn write_parameters(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        for (name, value) in self.options() {
            writeln!(out, "{name} = {value}")?;
        }
        out.flush()?;

        Ok(())
    }
}

/// The raw result of one solve attempt
#[derive(Debug, Clone, PartialEq)]
pub struct SolveAttempt {
    /// Termination status
    pub status: ModelStatus,
    /// Primal values, one per column (may be empty if no solution is available)
    pub primal: Vec<f64>,
    /// Dual values, one per row (may be empty if no solution is available)
    pub row_duals: Vec<f64>,
}

/// Something that can solve a [`LinearProgram`]
pub trait SolverBackend {
    /// Run one solve attempt with the given parameters
    fn solve(
        &mut self,
        problem: &LinearProgram,
        parameters: &SolverParameters,
    ) -> Result<SolveAttempt>;
}

/// An optimal solution
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    primal: Vec<f64>,
    row_duals: Vec<f64>,
    objective: f64,
}

impl Solution {
    /// Create a solution from primal values, row duals and the objective value
    pub fn new(primal: Vec<f64>, row_duals: Vec<f64>, objective: f64) -> Self {
        Self {
            primal,
            row_duals,
            objective,
        }
    }

    /// The value of a variable
    pub fn value(&self, variable: Variable) -> f64 {
        self.primal[variable.index()]
    }

    /// The values of all variables
    pub fn values(&self) -> &[f64] {
        &self.primal
    }

    /// The value of an expression
    pub fn evaluate(&self, expression: &LinearExpression) -> f64 {
        expression.evaluate(&self.primal)
    }

    /// The dual value of a constraint
    pub fn dual(&self, constraint: Constraint) -> f64 {
        self.row_duals
            .get(constraint.index())
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// The objective value, including its constant part
    pub fn objective(&self) -> f64 {
        self.objective
    }
}

/// Diagnostics describing a solve
#[derive(Debug, Clone, PartialEq)]
pub struct QualityAttributes {
    /// Final status
    pub status: ModelStatus,
    /// Objective value, if a solution is available
    pub objective: Option<f64>,
    /// Largest constraint violation, if a solution is available
    pub max_constraint_violation: Option<f64>,
    /// Largest variable bound violation, if a solution is available
    pub max_bound_violation: Option<f64>,
    /// Number of constraints
    pub rows: usize,
    /// Number of variables
    pub columns: usize,
    /// Number of non-zero constraint coefficients
    pub nonzeros: usize,
    /// Number of solve attempts
    pub attempts: u32,
    /// Numeric-focus level of the final attempt
    pub numeric_focus: u8,
    /// Whether the final attempt used dual reductions
    pub dual_reductions: bool,
    /// Total solve time
    pub runtime: Duration,
}

impl QualityAttributes {
    /// The attributes as (name, value) pairs
    pub fn to_records(&self) -> Vec<(&'static str, String)> {
        let optional = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        vec![
            ("status", self.status.to_string()),
            ("objective", optional(self.objective)),
            (
                "max_constraint_violation",
                optional(self.max_constraint_violation),
            ),
            ("max_bound_violation", optional(self.max_bound_violation)),
            ("rows", self.rows.to_string()),
            ("columns", self.columns.to_string()),
            ("nonzeros", self.nonzeros.to_string()),
            ("attempts", self.attempts.to_string()),
            ("numeric_focus", self.numeric_focus.to_string()),
            ("dual_reductions", self.dual_reductions.to_string()),
            ("runtime_seconds", self.runtime.as_secs_f64().to_string()),
        ]
    }

    /// Write the attributes to a two-column CSV file
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Could not create {}", path.display()))?;
        writer.write_record(["attribute", "value"])?;
        for (name, value) in self.to_records() {
            writer.write_record([name, value.as_str()])?;
        }
        writer.flush()?;

        Ok(())
    }
}

/// The result of running the solver driver
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    /// The optimal solution, if one was found
    pub solution: Option<Solution>,
    /// Diagnostics
    pub quality: QualityAttributes,
}

impl SolveOutcome {
    /// The final status
    pub fn status(&self) -> ModelStatus {
        self.quality.status
    }
}

/// Runs a backend on a problem, escalating to more conservative settings on failure
pub struct SolverDriver<B: SolverBackend> {
    backend: B,
    parameters: SolverParameters,
    progress_interval: u64,
    model_dir: Option<PathBuf>,
    interrupt: Arc<AtomicBool>,
    progress_callback: Option<ProgressCallback>,
}

impl SolverDriver<HighsBackend> {
    /// A driver using HiGHS, configured from the optimisation settings
    pub fn highs(config: &OptimizationConfig) -> Self {
        Self::new(HighsBackend, SolverParameters::from_config(config))
            .with_progress_interval(config.progress_interval)
    }
}

impl<B: SolverBackend> SolverDriver<B> {
    /// Create a driver
    pub fn new(backend: B, parameters: SolverParameters) -> Self {
        Self {
            backend,
            parameters,
            progress_interval: 1,
            model_dir: None,
            interrupt: Arc::new(AtomicBool::new(false)),
            progress_callback: None,
        }
    }

    /// Write the solver log and progress samples to `model_dir`
    pub fn with_model_dir(mut self, model_dir: &Path) -> Self {
        self.model_dir = Some(model_dir.to_path_buf());
        self
    }

    /// Keep at most one simplex progress sample per `interval` iterations
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Receive progress samples while solving
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Stop before the next attempt once `interrupt` is set
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The parameters of the first attempt
    pub fn parameters(&self) -> &SolverParameters {
        &self.parameters
    }

    /// Solve the problem.
    ///
    /// Returns an error only if the backend fails; a non-optimal termination is reported through
    /// the outcome's status.
    pub fn solve(&mut self, problem: &LinearProgram) -> Result<SolveOutcome> {
        let start = Instant::now();
        let log_path = self.model_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME));
        let progress_path = self
            .model_dir
            .as_ref()
            .map(|dir| dir.join(PROGRESS_FILE_NAME));
        let recorder = Arc::new(Mutex::new(ProgressRecorder::new(
            progress_path.as_deref(),
            self.progress_interval,
            self.progress_callback.take(),
        )?));

        let mut parameters = self.parameters.clone();
        parameters.log_file.clone_from(&log_path);
        let mut attempts = 0;
        let (status, attempt) = loop {
            if self.interrupt.load(Ordering::SeqCst) {
                warn!("Solve interrupted before attempt {}", attempts + 1);
                break (ModelStatus::Interrupted, None);
            }
            if attempts > 0 {
                if let Some(log_path) = &log_path {
                    keep_previous_log(log_path, attempts)?;
                }
            }
            attempts += 1;

            info!(
                "Solve attempt {attempts}: numeric focus {}, dual reductions {}",
                parameters.numeric_focus,
                if parameters.dual_reductions { "on" } else { "off" }
            );
            let watcher = log_path
                .clone()
                .map(|path| ProgressWatcher::start(path, attempts, recorder.clone()));
            let result = self.backend.solve(problem, &parameters);
            if let Some(watcher) = watcher {
                watcher.finish();
            }
            let attempt = result?;
            info!("Solve attempt {attempts} finished: {}", attempt.status);

            if attempt.status.is_optimal() {
                break (attempt.status, Some(attempt));
            }
            match parameters.escalate(attempt.status) {
                Some(next) => {
                    warn!(
                        "{}; retrying with more conservative settings",
                        attempt.status.message()
                    );
                    parameters = next;
                }
                None => break (attempt.status, Some(attempt)),
            }
        };

        let primal = attempt
            .as_ref()
            .map(|attempt| attempt.primal.as_slice())
            .filter(|primal| primal.len() == problem.num_variables());
        let violations = primal.map(|primal| problem.violations(primal));
        let objective = primal.map(|primal| problem.objective_value(primal));
        let solution = attempt
            .filter(|_| status.is_optimal())
            .and_then(|attempt| {
                let objective = objective?;
                Some(Solution::new(attempt.primal, attempt.row_duals, objective))
            });

        let quality = QualityAttributes {
            status,
            objective,
            max_constraint_violation: violations.map(|(constraint, _)| constraint),
            max_bound_violation: violations.map(|(_, bound)| bound),
            rows: problem.num_constraints(),
            columns: problem.num_variables(),
            nonzeros: problem.num_nonzeros(),
            attempts,
            numeric_focus: parameters.numeric_focus,
            dual_reductions: parameters.dual_reductions,
            runtime: start.elapsed(),
        };

        Ok(SolveOutcome { solution, quality })
    }
}

/// Move the log of an earlier attempt out of the way, as the solver truncates its log file
fn keep_previous_log(log_path: &Path, attempt: u32) -> Result<()> {
    if !log_path.is_file() {
        return Ok(());
    }
    let kept = log_path.with_file_name(format!("log_attempt_{attempt}.txt"));
    fs::rename(log_path, &kept).with_context(|| {
        format!(
            "Could not move {} to {}",
            log_path.display(),
            kept.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    /// Returns canned statuses and remembers the parameters it was called with
    struct ScriptedBackend {
        statuses: VecDeque<ModelStatus>,
        calls: Vec<SolverParameters>,
    }

    impl ScriptedBackend {
        fn new(statuses: &[ModelStatus]) -> Self {
            Self {
                statuses: statuses.iter().copied().collect(),
                calls: Vec::new(),
            }
        }
    }

    impl SolverBackend for ScriptedBackend {
        fn solve(
            &mut self,
            problem: &LinearProgram,
            parameters: &SolverParameters,
        ) -> Result<SolveAttempt> {
            self.calls.push(parameters.clone());
            if let Some(log_file) = &parameters.log_file {
                fs::write(log_file, format!("attempt {}\n", self.calls.len()))?;
            }
            let status = self.statuses.pop_front().unwrap_or(ModelStatus::Unknown);
            Ok(SolveAttempt {
                status,
                primal: vec![1.0; problem.num_variables()],
                row_duals: vec![0.5; problem.num_constraints()],
            })
        }
    }

    fn small_problem() -> LinearProgram {
        let mut problem = LinearProgram::new();
        let x = problem.add_variable(2.0, 0.0..);
        problem.add_constraint(1.0.., [(x, 1.0)]);
        problem
    }

    #[test]
    fn escalation_ladder() {
        let parameters = SolverParameters::default();
        let next = parameters.escalate(ModelStatus::InfOrUnbd).unwrap();
        assert!(!next.dual_reductions);
        assert_eq!(next.numeric_focus, 0);

        let next = next.escalate(ModelStatus::InfOrUnbd).unwrap();
        assert_eq!(next.numeric_focus, 1);
        let next = next.escalate(ModelStatus::Numeric).unwrap();
        assert_eq!(next.numeric_focus, 2);
        let next = next.escalate(ModelStatus::Numeric).unwrap();
        assert_eq!(next.numeric_focus, MAX_NUMERIC_FOCUS);
        assert!(next.escalate(ModelStatus::Numeric).is_none());

        assert!(parameters.escalate(ModelStatus::Infeasible).is_none());
        assert!(parameters.escalate(ModelStatus::TimeLimit).is_none());
    }

    fn option<'a>(options: &'a [(&str, SolverOption)], name: &str) -> Option<&'a SolverOption> {
        options
            .iter()
            .find(|(option, _)| *option == name)
            .map(|(_, value)| value)
    }

    #[test]
    fn options_follow_numeric_focus() {
        let mut parameters = SolverParameters::default();
        let options = parameters.options();
        assert_eq!(
            option(&options, "solver"),
            Some(&SolverOption::Text("ipm".into()))
        );
        assert_eq!(
            option(&options, "run_crossover"),
            Some(&SolverOption::Text("off".into()))
        );
        assert_eq!(
            option(&options, "output_flag"),
            Some(&SolverOption::Bool(false))
        );
        assert!(option(&options, "threads").is_none());
        assert!(option(&options, "presolve").is_none());

        parameters.numeric_focus = 2;
        parameters.dual_reductions = false;
        let options = parameters.options();
        assert_eq!(
            option(&options, "run_crossover"),
            Some(&SolverOption::Text("on".into()))
        );
        assert_eq!(
            option(&options, "presolve"),
            Some(&SolverOption::Text("off".into()))
        );
        let Some(SolverOption::Float(tolerance)) =
            option(&options, "primal_feasibility_tolerance")
        else {
            panic!("missing tolerance");
        };
        assert_approx_eq!(f64, *tolerance, 1e-8, ulps = 4);

        parameters.numeric_focus = 3;
        let options = parameters.options();
        assert_eq!(
            option(&options, "solver"),
            Some(&SolverOption::Text("simplex".into()))
        );
        assert_eq!(
            option(&options, "simplex_strategy"),
            Some(&SolverOption::Int(1))
        );
    }

    #[test]
    fn write_parameters_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("parameters.prm");
        let parameters = SolverParameters {
            thread_count: 4,
            ..SolverParameters::default()
        };
        parameters.write_parameters(&path).unwrap();

        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("output_flag = false\n"));
        assert!(contents.contains("threads = 4\n"));
        assert!(contents.contains("solver = ipm\n"));
    }

    #[test]
    fn driver_retries_until_optimal() {
        let dir = tempdir().unwrap();
        let backend = ScriptedBackend::new(&[
            ModelStatus::InfOrUnbd,
            ModelStatus::Numeric,
            ModelStatus::Optimal,
        ]);
        let mut driver =
            SolverDriver::new(backend, SolverParameters::default()).with_model_dir(dir.path());
        let outcome = driver.solve(&small_problem()).unwrap();

        assert_eq!(outcome.status(), ModelStatus::Optimal);
        assert_eq!(outcome.quality.attempts, 3);
        assert_eq!(outcome.quality.numeric_focus, 1);
        assert!(!outcome.quality.dual_reductions);
        let solution = outcome.solution.unwrap();
        assert_approx_eq!(f64, solution.objective(), 2.0);
        assert_approx_eq!(f64, outcome.quality.max_constraint_violation.unwrap(), 0.0);

        let calls = &driver.backend.calls;
        assert!(calls[0].dual_reductions);
        assert!(!calls[1].dual_reductions);
        assert_eq!(calls[2].numeric_focus, 1);

        // Earlier logs are kept
        assert!(dir.path().join("log_attempt_1.txt").is_file());
        assert!(dir.path().join("log_attempt_2.txt").is_file());
        assert_eq!(
            fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap(),
            "attempt 3\n"
        );
    }

    #[test]
    fn driver_gives_up() {
        let backend = ScriptedBackend::new(&[ModelStatus::Infeasible]);
        let mut driver = SolverDriver::new(backend, SolverParameters::default());
        let outcome = driver.solve(&small_problem()).unwrap();

        assert_eq!(outcome.status(), ModelStatus::Infeasible);
        assert!(outcome.solution.is_none());
        assert_eq!(outcome.quality.attempts, 1);
    }

    #[test]
    fn driver_stops_at_max_numeric_focus() {
        let backend = ScriptedBackend::new(&[ModelStatus::Numeric; 10]);
        let mut driver = SolverDriver::new(backend, SolverParameters::default());
        let outcome = driver.solve(&small_problem()).unwrap();

        assert_eq!(outcome.status(), ModelStatus::Numeric);
        assert_eq!(outcome.quality.attempts, u32::from(MAX_NUMERIC_FOCUS) + 1);
    }

    #[test]
    fn driver_interrupted() {
        let backend = ScriptedBackend::new(&[ModelStatus::Optimal]);
        let interrupt = Arc::new(AtomicBool::new(true));
        let mut driver =
            SolverDriver::new(backend, SolverParameters::default()).with_interrupt(interrupt);
        let outcome = driver.solve(&small_problem()).unwrap();

        assert_eq!(outcome.status(), ModelStatus::Interrupted);
        assert!(outcome.solution.is_none());
        assert_eq!(outcome.quality.attempts, 0);
        assert!(driver.backend.calls.is_empty());
    }

    #[test]
    fn highs_driver_writes_log() {
        let dir = tempdir().unwrap();
        let mut driver =
            SolverDriver::highs(&OptimizationConfig::default()).with_model_dir(dir.path());
        let outcome = driver.solve(&small_problem()).unwrap();

        assert_eq!(outcome.status(), ModelStatus::Optimal);
        assert_approx_eq!(f64, outcome.solution.unwrap().objective(), 2.0, epsilon = 1e-6);
        assert!(dir.path().join(LOG_FILE_NAME).is_file());
        assert!(dir.path().join(PROGRESS_FILE_NAME).is_file());
    }

    #[test]
    fn quality_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quality.csv");
        let quality = QualityAttributes {
            status: ModelStatus::Optimal,
            objective: Some(1.5),
            max_constraint_violation: Some(0.0),
            max_bound_violation: None,
            rows: 1,
            columns: 2,
            nonzeros: 2,
            attempts: 1,
            numeric_focus: 0,
            dual_reductions: true,
            runtime: Duration::from_millis(1500),
        };
        quality.write_csv(&path).unwrap();

        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("attribute,value\nstatus,optimal\nobjective,1.5\n"));
        assert!(contents.contains("max_bound_violation,\n"));
        assert!(contents.contains("runtime_seconds,1.5\n"));
    }
}
