use std::collections::BTreeMap;

use timegrid::LocalGrid;

use crate::State;

/// One level's worth of worker-local solver state.
pub(crate) struct Level {
    pub grid: LocalGrid,
    /// Current values at the owned points.
    pub u: BTreeMap<usize, State>,
    /// Frozen right-hand-side corrections; with them in place the injected
    /// finer-level solution is a fixed point of this level's equation.
    pub tau: BTreeMap<usize, State>,
    /// Values as injected on the way down, subtracted on the way back up to
    /// form the coarse correction.
    pub snapshot: BTreeMap<usize, State>,
    /// Latest received value of the left neighbor's boundary point.
    pub left: Option<State>,
}

impl Level {
    pub fn new(grid: LocalGrid) -> Self {
        Self {
            grid,
            u: BTreeMap::new(),
            tau: BTreeMap::new(),
            snapshot: BTreeMap::new(),
            left: None,
        }
    }
}
