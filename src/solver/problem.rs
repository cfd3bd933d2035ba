//! A solver-independent linear program.
use super::LinearExpression;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::{Bound, RangeBounds};
use std::path::Path;

/// A decision variable (a column of the problem).
///
/// This does **not** hold the value of the variable; it just refers to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(usize);

impl Variable {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// The column index of the variable
    pub fn index(self) -> usize {
        self.0
    }
}

/// A constraint (a row of the problem)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constraint(usize);

impl Constraint {
    /// The row index of the constraint
    pub fn index(self) -> usize {
        self.0
    }
}

/// Bounds and objective coefficient of a column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Column {
    /// Objective coefficient
    pub cost: f64,
    /// Lower bound (may be −∞)
    pub lower: f64,
    /// Upper bound (may be +∞)
    pub upper: f64,
}

/// A row: lower ≤ Σ coefficient·variable ≤ upper
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row<'a> {
    /// Lower bound (may be −∞)
    pub lower: f64,
    /// Upper bound (may be +∞)
    pub upper: f64,
    /// Non-zero coefficients
    pub terms: &'a [(Variable, f64)],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RowEntry {
    lower: f64,
    upper: f64,
    start: usize,
    end: usize,
}

fn bound_value(bound: Bound<&f64>, unbounded: f64) -> f64 {
    match bound {
        Bound::Included(value) | Bound::Excluded(value) => *value,
        Bound::Unbounded => unbounded,
    }
}

fn to_interval(bounds: &impl RangeBounds<f64>) -> (f64, f64) {
    (
        bound_value(bounds.start_bound(), f64::NEG_INFINITY),
        bound_value(bounds.end_bound(), f64::INFINITY),
    )
}

/// A minimisation problem over continuous variables.
///
/// Rows are stored contiguously, so even models with tens of millions of non-zeros stay compact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearProgram {
    columns: Vec<Column>,
    rows: Vec<RowEntry>,
    row_terms: Vec<(Variable, f64)>,
    objective_offset: f64,
}

impl LinearProgram {
    /// An empty problem
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable with the given objective coefficient and bounds
    pub fn add_variable(&mut self, cost: f64, bounds: impl RangeBounds<f64>) -> Variable {
        let (lower, upper) = to_interval(&bounds);
        self.columns.push(Column { cost, lower, upper });
        Variable(self.columns.len() - 1)
    }

    /// Add a constraint on a sum of terms.
    ///
    /// Repeated variables are merged.
    pub fn add_constraint(
        &mut self,
        bounds: impl RangeBounds<f64>,
        terms: impl IntoIterator<Item = (Variable, f64)>,
    ) -> Constraint {
        let expression = LinearExpression::from_terms(terms);
        self.add_expression_constraint(&expression, bounds)
    }

    /// Add a constraint `bounds.start ≤ expression ≤ bounds.end`.
    ///
    /// The constant part of the expression is moved to the bounds.
    pub fn add_expression_constraint(
        &mut self,
        expression: &LinearExpression,
        bounds: impl RangeBounds<f64>,
    ) -> Constraint {
        let (lower, upper) = to_interval(&bounds);
        let constant = expression.constant_value();
        let start = self.row_terms.len();
        self.row_terms
            .extend_from_slice(expression.simplified().terms());
        self.rows.push(RowEntry {
            lower: lower - constant,
            upper: upper - constant,
            start,
            end: self.row_terms.len(),
        });

        Constraint(self.rows.len() - 1)
    }

    /// Add `coefficient` to the objective coefficient of a variable
    pub fn add_objective_term(&mut self, variable: Variable, coefficient: f64) {
        self.columns[variable.0].cost += coefficient;
    }

    /// Add an expression to the objective
    pub fn add_objective_expression(&mut self, expression: &LinearExpression) {
        for (variable, coefficient) in expression.terms() {
            self.add_objective_term(*variable, *coefficient);
        }
        self.objective_offset += expression.constant_value();
    }

    /// The constant part of the objective
    pub fn objective_offset(&self) -> f64 {
        self.objective_offset
    }

    /// Iterate over the columns
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// A single column
    pub fn column(&self, variable: Variable) -> &Column {
        &self.columns[variable.0]
    }

    /// Iterate over the rows
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|row| self.make_row(row))
    }

    /// A single row
    pub fn row(&self, constraint: Constraint) -> Row<'_> {
        self.make_row(&self.rows[constraint.0])
    }

    fn make_row(&self, row: &RowEntry) -> Row<'_> {
        Row {
            lower: row.lower,
            upper: row.upper,
            terms: &self.row_terms[row.start..row.end],
        }
    }

    /// Number of variables
    pub fn num_variables(&self) -> usize {
        self.columns.len()
    }

    /// Number of constraints
    pub fn num_constraints(&self) -> usize {
        self.rows.len()
    }

    /// Number of non-zero constraint coefficients
    pub fn num_nonzeros(&self) -> usize {
        self.row_terms.len()
    }

    /// The objective value of a point, including the offset
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.columns
            .iter()
            .zip(values)
            .map(|(column, value)| column.cost * value)
            .sum::<f64>()
            + self.objective_offset
    }

    /// The largest violation of any constraint and of any variable bound by a point
    pub fn violations(&self, values: &[f64]) -> (f64, f64) {
        let violation = |value: f64, lower: f64, upper: f64| {
            (lower - value).max(value - upper).max(0.0)
        };

        let constraint = self
            .rows()
            .map(|row| {
                let activity = row
                    .terms
                    .iter()
                    .map(|(variable, coefficient)| coefficient * values[variable.0])
                    .sum();
                violation(activity, row.lower, row.upper)
            })
            .fold(0.0, f64::max);
        let bound = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| violation(*value, column.lower, column.upper))
            .fold(0.0, f64::max);

        (constraint, bound)
    }

    /// Write the problem in CPLEX LP format.
    ///
    /// Variables are named `x<index>` and constraints `c<index>`. Ranged constraints are split
    /// into `c<index>_lo` and `c<index>_up`.
    pub fn write_lp(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
        let mut out = BufWriter::new(file);

        writeln!(out, "Minimize")?;
        write!(out, " obj:")?;
        for (index, column) in self.columns.iter().enumerate() {
            if column.cost != 0.0 {
                write!(out, " {}", format_term(column.cost, index))?;
            }
        }
        if self.objective_offset != 0.0 {
            write!(out, " {:+}", self.objective_offset)?;
        }
        writeln!(out)?;

        writeln!(out, "Subject To")?;
        for (index, row) in self.rows().enumerate() {
            let lhs: Vec<String> = row
                .terms
                .iter()
                .map(|(variable, coefficient)| format_term(*coefficient, variable.0))
                .collect();
            let lhs = if lhs.is_empty() {
                "0 x0".to_string()
            } else {
                lhs.join(" ")
            };
            match (row.lower.is_finite(), row.upper.is_finite()) {
                (true, true) if row.lower == row.upper => {
                    writeln!(out, " c{index}: {lhs} = {}", row.upper)?;
                }
                (true, true) => {
                    writeln!(out, " c{index}_lo: {lhs} >= {}", row.lower)?;
                    writeln!(out, " c{index}_up: {lhs} <= {}", row.upper)?;
                }
                (true, false) => writeln!(out, " c{index}: {lhs} >= {}", row.lower)?,
                (false, true) => writeln!(out, " c{index}: {lhs} <= {}", row.upper)?,
                (false, false) => {}
            }
        }

        writeln!(out, "Bounds")?;
        for (index, column) in self.columns.iter().enumerate() {
            match (column.lower.is_finite(), column.upper.is_finite()) {
                (true, true) => writeln!(out, " {} <= x{index} <= {}", column.lower, column.upper)?,
                (true, false) => writeln!(out, " x{index} >= {}", column.lower)?,
                (false, true) => writeln!(out, " -inf <= x{index} <= {}", column.upper)?,
                (false, false) => writeln!(out, " x{index} free")?,
            }
        }
        writeln!(out, "End")?;
        out.flush()?;

        Ok(())
    }
}

fn format_term(coefficient: f64, index: usize) -> String {
    format!("{coefficient:+} x{index}")
}
