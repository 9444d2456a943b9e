use timegrid::ConfigError;

/// Relaxation sweep ordering within one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxMode {
    /// Recompute the points dropped by the next coarsening only.
    F,
    /// F, then the surviving coarse points, then F again.
    Fcf,
}

/// Knobs of one cycling direction. A forward and a backward pass each carry
/// their own copy, so iteration budgets and depths may differ between them.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    /// Requested level count; truncated when coarsening bottoms out.
    pub max_levels: usize,
    pub max_iters: usize,
    /// Per-level coarsening factors, the last entry repeating for deeper
    /// levels. Empty means 2 throughout.
    pub cfactors: Vec<usize>,
    /// Down-leg sweep counts per level, the last entry repeating.
    pub nrelax: Vec<usize>,
    /// Pipelined sweeps at the coarsest level.
    pub nrelax_coarse: usize,
    /// Sweep ordering on the finest level's down leg; coarser levels always
    /// relax F.
    pub fine_relax: RelaxMode,
    /// Restrict the up-leg relaxation to the surviving coarse points.
    pub relax_only_coarse: bool,
    /// Skip the relaxation of the first iteration's down leg; worthwhile
    /// when a warm start (nested iteration) is already close.
    pub skip_first_down: bool,
    /// Open with one full-multigrid pass, coarsest level first.
    pub full_multigrid: bool,
    /// Close the iteration with one extra F-C sweep on the finest level.
    pub final_fc_relax: bool,
    /// Residual threshold for convergence.
    pub tol: f64,
    /// Smallest admissible coarsest-grid point count.
    pub min_coarse: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_levels: 1,
            max_iters: 2,
            cfactors: vec![2],
            nrelax: vec![1],
            nrelax_coarse: 1,
            fine_relax: RelaxMode::F,
            relax_only_coarse: false,
            skip_first_down: false,
            full_multigrid: false,
            final_fc_relax: false,
            tol: 1e-9,
            min_coarse: 3,
        }
    }
}

impl CycleConfig {
    /// Rejects degenerate budgets; grid-shape checks live with the
    /// hierarchy construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iters == 0 {
            return Err(ConfigError::ZeroSized {
                what: "iteration budget",
            });
        }
        if self.nrelax_coarse == 0 {
            return Err(ConfigError::ZeroSized {
                what: "coarse sweep count",
            });
        }
        Ok(())
    }

    pub(crate) fn nrelax_at(&self, level: usize) -> usize {
        match self.nrelax.as_slice() {
            [] => 1,
            [.., last] => *self.nrelax.get(level).unwrap_or(last),
        }
    }

    pub(crate) fn down_mode(&self, level: usize) -> RelaxMode {
        if level == 0 {
            self.fine_relax
        } else {
            RelaxMode::F
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_iteration_budget_is_rejected() {
        let cfg = CycleConfig {
            max_iters: 0,
            ..CycleConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroSized { .. })
        ));
    }

    #[test]
    fn last_relax_count_repeats() {
        let cfg = CycleConfig {
            nrelax: vec![2, 1],
            ..CycleConfig::default()
        };
        assert_eq!(cfg.nrelax_at(0), 2);
        assert_eq!(cfg.nrelax_at(1), 1);
        assert_eq!(cfg.nrelax_at(5), 1);
    }
}
