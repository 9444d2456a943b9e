use std::collections::BTreeMap;

use crate::{MgritError, Result, State};

/// The reverse tape of one forward pass: every fine-grid state this worker's
/// adjoint transitions will linearize against.
///
/// Holds the worker's owned points plus the final left boundary value, so
/// the layer at the interval's first step can be replayed without another
/// exchange. One tape supports any number of backward passes.
#[derive(Debug, Clone)]
pub struct Tape {
    states: BTreeMap<usize, State>,
}

impl Tape {
    pub(crate) fn new(states: BTreeMap<usize, State>) -> Self {
        Self { states }
    }

    /// The checkpointed state at fine point `point`.
    pub fn state(&self, point: usize) -> Result<&State> {
        self.states
            .get(&point)
            .ok_or(MgritError::MissingState { level: 0, point })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
