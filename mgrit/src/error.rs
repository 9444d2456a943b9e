use std::{error::Error, fmt};

use halo::CommErr;
use timegrid::ConfigError;

/// The solver's result type.
pub type Result<T> = std::result::Result<T, MgritError>;

/// Everything that can stop a forward or backward pass.
///
/// `Config` and the mismatch variants are caller defects and surface before
/// or immediately at the offending operation. `Comm` is fatal for the whole
/// worker group. Falling short of the convergence tolerance is NOT an error;
/// it is reported through [`crate::CycleStats`].
#[derive(Debug)]
pub enum MgritError {
    Config(ConfigError),
    Comm(CommErr),
    ShapeMismatch {
        what: &'static str,
        got: (usize, usize),
        expected: (usize, usize),
    },
    GradSizeMismatch {
        layer: usize,
        got: usize,
        expected: usize,
    },
    ParamSizeMismatch {
        layer: usize,
        got: usize,
        expected: usize,
    },
    /// The step bank could not resolve a layer this worker needs, neither
    /// owned nor installed as a replica.
    MissingLayer {
        layer: usize,
    },
    /// A state value the cycle relies on was never produced; indicates a
    /// halo or checkpoint bookkeeping hole.
    MissingState {
        level: usize,
        point: usize,
    },
    /// The root worker was invoked without the value only it can supply.
    RootValueAbsent {
        what: &'static str,
    },
}

impl fmt::Display for MgritError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MgritError::Config(e) => write!(f, "configuration error: {e}"),
            MgritError::Comm(e) => write!(f, "communication failure: {e}"),
            MgritError::ShapeMismatch {
                what,
                got,
                expected,
            } => {
                write!(
                    f,
                    "{what} has shape {got:?}, the pass was set up for {expected:?}"
                )
            }
            MgritError::GradSizeMismatch {
                layer,
                got,
                expected,
            } => {
                write!(
                    f,
                    "parameter gradient of layer {layer} has {got} entries, expected {expected}"
                )
            }
            MgritError::ParamSizeMismatch {
                layer,
                got,
                expected,
            } => {
                write!(
                    f,
                    "parameter block for layer {layer} has {got} entries, expected {expected}"
                )
            }
            MgritError::MissingLayer { layer } => {
                write!(f, "no module or replica available for layer {layer}")
            }
            MgritError::MissingState { level, point } => {
                write!(f, "no state recorded for point {point} on level {level}")
            }
            MgritError::RootValueAbsent { what } => {
                write!(f, "the root worker was not given {what}")
            }
        }
    }
}

impl Error for MgritError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MgritError::Config(e) => Some(e),
            MgritError::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for MgritError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<CommErr> for MgritError {
    fn from(value: CommErr) -> Self {
        Self::Comm(value)
    }
}
