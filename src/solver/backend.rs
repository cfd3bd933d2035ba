//! The HiGHS solver backend.
use super::{LinearProgram, SolveAttempt, SolverBackend, SolverOption, SolverParameters};
use crate::solver::ModelStatus;
use anyhow::{Result, anyhow};
use highs::{Col, RowProblem as Problem, Sense};
use log::debug;

/// Solves problems with the HiGHS library
#[derive(Debug, Clone, Copy, Default)]
pub struct HighsBackend;

impl SolverBackend for HighsBackend {
    fn solve(
        &mut self,
        problem: &LinearProgram,
        parameters: &SolverParameters,
    ) -> Result<SolveAttempt> {
        let mut highs_problem = Problem::default();
        let columns: Vec<Col> = problem
            .columns()
            .map(|column| highs_problem.add_column(column.cost, column.lower..=column.upper))
            .collect();
        for row in problem.rows() {
            highs_problem.add_row(
                row.lower..=row.upper,
                row.terms
                    .iter()
                    .map(|(variable, coefficient)| (columns[variable.index()], *coefficient)),
            );
        }

        let mut model = highs_problem.optimise(Sense::Minimise);
        for (name, value) in parameters.options() {
            debug!("Setting solver option {name} = {value}");
            match value {
                SolverOption::Bool(value) => model.set_option(name, value),
                SolverOption::Int(value) => model.set_option(name, value),
                SolverOption::Float(value) => model.set_option(name, value),
                SolverOption::Text(value) => model.set_option(name, value.as_str()),
            }
        }

        let solved = model
            .try_solve()
            .map_err(|status| anyhow!("The solver rejected the model: {status:?}"))?;
        let status = ModelStatus::from(solved.status());
        let solution = solved.get_solution();

        Ok(SolveAttempt {
            status,
            primal: solution.columns().to_vec(),
            row_duals: solution.dual_rows().to_vec(),
        })
    }
}
