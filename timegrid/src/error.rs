use std::{error::Error, fmt};

/// Invalid solver geometry. All variants are detected while the hierarchy is
/// being described, before any state is allocated.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    StepsNotDivisible {
        steps: usize,
        workers: usize,
    },
    ZeroSized {
        what: &'static str,
    },
    CoarseningTooWeak {
        level: usize,
        cfactor: usize,
    },
    CoarseGridTooSmall {
        points: usize,
        min_coarse: usize,
    },
    StepsNotRefinable {
        steps: usize,
        rfactor: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::StepsNotDivisible { steps, workers } => {
                write!(
                    f,
                    "step count {steps} is not divisible by worker count {workers}"
                )
            }
            ConfigError::ZeroSized { what } => write!(f, "{what} must be nonzero"),
            ConfigError::CoarseningTooWeak { level, cfactor } => {
                write!(f, "coarsening factor {cfactor} at level {level} must be at least 2")
            }
            ConfigError::CoarseGridTooSmall { points, min_coarse } => {
                write!(
                    f,
                    "coarsest grid would hold {points} points, fewer than the minimum {min_coarse}"
                )
            }
            ConfigError::StepsNotRefinable { steps, rfactor } => {
                write!(
                    f,
                    "step count {steps} is not divisible by refinement factor {rfactor}"
                )
            }
        }
    }
}

impl Error for ConfigError {}
