use std::{error::Error, fmt};

use halo::CommErr;
use mgrit::MgritError;
use timegrid::ConfigError;

pub type Result<T> = std::result::Result<T, MgOptError>;

/// Training-driver failures; cycle-level and transport errors pass through.
#[derive(Debug)]
pub enum MgOptError {
    Cycle(MgritError),
    Config(ConfigError),
    Comm(CommErr),
    /// The root worker was given no batches to train on.
    EmptyDataset,
}

impl fmt::Display for MgOptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MgOptError::Cycle(e) => write!(f, "cycle failure: {e}"),
            MgOptError::Config(e) => write!(f, "configuration error: {e}"),
            MgOptError::Comm(e) => write!(f, "communication failure: {e}"),
            MgOptError::EmptyDataset => write!(f, "the training dataset is empty"),
        }
    }
}

impl Error for MgOptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MgOptError::Cycle(e) => Some(e),
            MgOptError::Config(e) => Some(e),
            MgOptError::Comm(e) => Some(e),
            MgOptError::EmptyDataset => None,
        }
    }
}

impl From<MgritError> for MgOptError {
    fn from(value: MgritError) -> Self {
        Self::Cycle(value)
    }
}

impl From<ConfigError> for MgOptError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<CommErr> for MgOptError {
    fn from(value: CommErr) -> Self {
        Self::Comm(value)
    }
}
