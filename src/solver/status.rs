//! Termination statuses reported by the solver driver.
use highs::HighsModelStatus;
use strum::{Display, EnumIter};

/// The outcome of an optimisation attempt.
///
/// The names follow the usual LP solver vocabulary rather than any one backend's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ModelStatus {
    /// An optimal solution was found
    Optimal,
    /// The model has no feasible solution
    Infeasible,
    /// The objective can be decreased without limit
    Unbounded,
    /// The model is either infeasible or unbounded
    InfOrUnbd,
    /// The solver hit numerical trouble
    Numeric,
    /// The time limit was reached
    TimeLimit,
    /// The iteration limit was reached
    IterationLimit,
    /// The branch-and-bound node limit was reached
    NodeLimit,
    /// A solution is available but tolerances were not met
    Suboptimal,
    /// The objective is worse than the cutoff
    Cutoff,
    /// The solution count limit was reached
    SolutionLimit,
    /// The user interrupted the solve
    Interrupted,
    /// Anything else
    Unknown,
}

impl ModelStatus {
    /// A human-readable description of the status
    pub fn message(self) -> &'static str {
        match self {
            Self::Optimal => "Model was solved to optimality",
            Self::Infeasible => "Model was proven to be infeasible",
            Self::Unbounded => "Model was proven to be unbounded",
            Self::InfOrUnbd => "Model was proven to be either infeasible or unbounded",
            Self::Numeric => {
                "Optimisation was terminated due to unrecoverable numerical difficulties"
            }
            Self::TimeLimit => "Optimisation terminated because the time limit was reached",
            Self::IterationLimit => {
                "Optimisation terminated because the iteration limit was reached"
            }
            Self::NodeLimit => "Optimisation terminated because the node limit was reached",
            Self::Suboptimal => {
                "Unable to satisfy optimality tolerances; a sub-optimal solution is available"
            }
            Self::Cutoff => "Optimal objective was proven to be worse than the cutoff value",
            Self::SolutionLimit => {
                "Optimisation terminated because the solution limit was reached"
            }
            Self::Interrupted => "Optimisation was terminated by the user",
            Self::Unknown => "The solver returned an unknown status",
        }
    }

    /// Whether an optimal solution is available
    pub fn is_optimal(self) -> bool {
        self == Self::Optimal
    }

    /// Whether the escalation ladder may retry after this status
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::InfOrUnbd | Self::Numeric)
    }
}

impl From<HighsModelStatus> for ModelStatus {
    fn from(status: HighsModelStatus) -> Self {
        match status {
            HighsModelStatus::Optimal => Self::Optimal,
            HighsModelStatus::Infeasible => Self::Infeasible,
            HighsModelStatus::Unbounded => Self::Unbounded,
            HighsModelStatus::UnboundedOrInfeasible => Self::InfOrUnbd,
            HighsModelStatus::ReachedTimeLimit => Self::TimeLimit,
            HighsModelStatus::ReachedIterationLimit => Self::IterationLimit,
            HighsModelStatus::ObjectiveBound | HighsModelStatus::ObjectiveTarget => Self::Cutoff,
            HighsModelStatus::SolveError | HighsModelStatus::PostsolveError => Self::Numeric,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    #[rstest]
    #[case(HighsModelStatus::Optimal, ModelStatus::Optimal)]
    #[case(HighsModelStatus::Infeasible, ModelStatus::Infeasible)]
    #[case(HighsModelStatus::UnboundedOrInfeasible, ModelStatus::InfOrUnbd)]
    #[case(HighsModelStatus::ReachedTimeLimit, ModelStatus::TimeLimit)]
    #[case(HighsModelStatus::SolveError, ModelStatus::Numeric)]
    fn from_highs(#[case] highs_status: HighsModelStatus, #[case] expected: ModelStatus) {
        assert_eq!(ModelStatus::from(highs_status), expected);
    }

    #[test]
    fn names_are_snake_case() {
        assert_eq!(ModelStatus::InfOrUnbd.to_string(), "inf_or_unbd");
        assert_eq!(ModelStatus::TimeLimit.to_string(), "time_limit");
    }

    #[test]
    fn every_status_has_a_message() {
        assert!(ModelStatus::iter().all(|status| !status.message().is_empty()));
    }
}
