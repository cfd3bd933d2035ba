//! Linear combinations of decision variables.
use super::Variable;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A linear expression: Σ coefficient·variable + constant.
///
/// Terms are stored in insertion order and may repeat a variable; use
/// [`LinearExpression::simplified`] to merge them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpression {
    terms: Vec<(Variable, f64)>,
    constant: f64,
}

impl LinearExpression {
    /// An empty expression (equal to zero)
    pub fn new() -> Self {
        Self::default()
    }

    /// A constant expression
    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    /// An expression with the given terms and no constant
    pub fn from_terms(terms: impl IntoIterator<Item = (Variable, f64)>) -> Self {
        Self {
            terms: terms.into_iter().collect(),
            constant: 0.0,
        }
    }

    /// Add `coefficient·variable`
    pub fn add_term(&mut self, variable: Variable, coefficient: f64) {
        self.terms.push((variable, coefficient));
    }

    /// Add a constant
    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    /// Add `factor·other`
    pub fn add_scaled(&mut self, other: &LinearExpression, factor: f64) {
        self.terms.extend(
            other
                .terms
                .iter()
                .map(|(variable, coefficient)| (*variable, coefficient * factor)),
        );
        self.constant += other.constant * factor;
    }

    /// The terms of the expression
    pub fn terms(&self) -> &[(Variable, f64)] {
        &self.terms
    }

    /// The constant part of the expression
    pub fn constant_value(&self) -> f64 {
        self.constant
    }

    /// Whether the expression has no variable terms
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluate the expression for the given variable values
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(variable, coefficient)| coefficient * values[variable.index()])
            .sum::<f64>()
            + self.constant
    }

    /// An equivalent expression with one term per variable, ordered by variable, without zero
    /// coefficients
    pub fn simplified(&self) -> Self {
        let mut terms = self.terms.clone();
        terms.sort_by_key(|(variable, _)| *variable);

        let mut merged: Vec<(Variable, f64)> = Vec::with_capacity(terms.len());
        for (variable, coefficient) in terms {
            match merged.last_mut() {
                Some((last, total)) if *last == variable => *total += coefficient,
                _ => merged.push((variable, coefficient)),
            }
        }
        merged.retain(|(_, coefficient)| *coefficient != 0.0);

        Self {
            terms: merged,
            constant: self.constant,
        }
    }
}

impl From<Variable> for LinearExpression {
    fn from(variable: Variable) -> Self {
        Self::from_terms([(variable, 1.0)])
    }
}

impl AddAssign<&LinearExpression> for LinearExpression {
    fn add_assign(&mut self, rhs: &LinearExpression) {
        self.add_scaled(rhs, 1.0);
    }
}

impl AddAssign for LinearExpression {
    fn add_assign(&mut self, rhs: LinearExpression) {
        self.terms.extend(rhs.terms);
        self.constant += rhs.constant;
    }
}

impl SubAssign<&LinearExpression> for LinearExpression {
    fn sub_assign(&mut self, rhs: &LinearExpression) {
        self.add_scaled(rhs, -1.0);
    }
}

impl SubAssign for LinearExpression {
    fn sub_assign(&mut self, rhs: LinearExpression) {
        self.add_scaled(&rhs, -1.0);
    }
}

impl Add for LinearExpression {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sub for LinearExpression {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

impl Mul<f64> for LinearExpression {
    type Output = Self;

    fn mul(mut self, rhs: f64) -> Self {
        for (_, coefficient) in &mut self.terms {
            *coefficient *= rhs;
        }
        self.constant *= rhs;
        self
    }
}

impl Neg for LinearExpression {
    type Output = Self;

    fn neg(self) -> Self {
        self * -1.0
    }
}

impl Sum for LinearExpression {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(), |total, expression| total + expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn simplified_merges_terms() {
        let (x, y) = (Variable::new(0), Variable::new(1));
        let mut expression = LinearExpression::from_terms([(y, 1.0), (x, 2.0), (y, -1.0)]);
        expression.add_term(x, 0.5);
        expression.add_constant(3.0);

        let simplified = expression.simplified();
        assert_eq!(simplified.terms(), [(x, 2.5)]);
        assert_approx_eq!(f64, simplified.constant_value(), 3.0);
    }

    #[test]
    fn arithmetic_and_evaluate() {
        let (x, y) = (Variable::new(0), Variable::new(1));
        let expression = (LinearExpression::from(x) - LinearExpression::from(y) * 2.0
            + LinearExpression::constant(1.0))
            * 3.0;
        // 3 * (4 - 2 * 0.5 + 1)
        assert_approx_eq!(f64, expression.evaluate(&[4.0, 0.5]), 12.0);
        assert_approx_eq!(f64, (-expression).evaluate(&[4.0, 0.5]), -12.0);
    }

    #[test]
    fn sum_of_expressions() {
        let total: LinearExpression = (0..3)
            .map(|i| LinearExpression::from(Variable::new(i)))
            .sum();
        assert_eq!(total.terms().len(), 3);
        assert_approx_eq!(f64, total.evaluate(&[1.0, 2.0, 3.0]), 6.0);
    }
}
