use crate::{ConfigError, Partition};

/// One level of the time grid, fine (0) to coarse.
#[derive(Debug, Clone, Copy)]
pub struct LevelSpec {
    pub level: usize,
    /// Distance between this level's points in fine-grid steps; the product
    /// of the coarsening factors of all finer levels.
    pub spacing: usize,
    /// Factor used to thin this level into the next-coarser one.
    pub cfactor: usize,
    /// Global point count at this level.
    pub num_points: usize,
}

/// The chain of time grids the cycle iterates over.
///
/// Level 0 is always the unmodified fine discretization; requested levels
/// that would push the coarsest grid below `min_coarse` points are silently
/// truncated.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    num_steps: usize,
    levels: Vec<LevelSpec>,
}

impl Hierarchy {
    /// Builds the level chain by repeated thinning.
    ///
    /// # Arguments
    /// * `partition` - The step partition; fixes the fine point count.
    /// * `cfactors` - Per-level coarsening factors; the last entry repeats
    ///   for deeper levels. Empty means a factor of 2 throughout.
    /// * `max_levels` - Requested level cap, at least 1.
    /// * `min_coarse` - Smallest admissible coarsest-grid point count.
    ///
    /// # Returns
    /// The hierarchy, or `ConfigError` for degenerate requests.
    pub fn build(
        partition: &Partition,
        cfactors: &[usize],
        max_levels: usize,
        min_coarse: usize,
    ) -> Result<Self, ConfigError> {
        if max_levels == 0 {
            return Err(ConfigError::ZeroSized { what: "level count" });
        }
        if min_coarse < 2 {
            return Err(ConfigError::ZeroSized {
                what: "minimum coarse size (at least 2)",
            });
        }

        let num_steps = partition.num_steps();
        if num_steps + 1 < min_coarse {
            return Err(ConfigError::CoarseGridTooSmall {
                points: num_steps + 1,
                min_coarse,
            });
        }

        // every level's factor is consulted (it classifies the level's
        // C-points even when no coarser level follows), so each one is
        // validated the moment a level comes into existence
        let factor_at = |level: usize| -> Result<usize, ConfigError> {
            let cfactor = match cfactors {
                [] => 2,
                [.., last] => *cfactors.get(level).unwrap_or(last),
            };
            if cfactor < 2 {
                return Err(ConfigError::CoarseningTooWeak { level, cfactor });
            }
            Ok(cfactor)
        };

        let mut levels = vec![LevelSpec {
            level: 0,
            spacing: 1,
            cfactor: factor_at(0)?,
            num_points: num_steps + 1,
        }];

        while levels.len() < max_levels {
            let prev = levels[levels.len() - 1];
            let spacing = prev.spacing * prev.cfactor;
            let num_points = num_steps / spacing + 1;
            if num_points < min_coarse {
                break;
            }

            let level = levels.len();
            levels.push(LevelSpec {
                level,
                spacing,
                cfactor: factor_at(level)?,
                num_points,
            });
        }

        Ok(Self { num_steps, levels })
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &LevelSpec {
        &self.levels[level]
    }

    pub fn coarsest(&self) -> usize {
        self.levels.len() - 1
    }

    /// Maps a level-local point index to its fine-grid index. Coarsening
    /// factors compose multiplicatively across levels.
    pub fn fine_index(&self, local_idx: usize, level: usize) -> usize {
        local_idx * self.levels[level].spacing
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truncates_excess_levels_at_min_coarse() {
        let part = Partition::new(8, 2).unwrap();
        let hier = Hierarchy::build(&part, &[2], 10, 3).unwrap();

        // 9 -> 5 -> 3 points; one more halving would leave 2 < 3.
        assert_eq!(hier.num_levels(), 3);
        assert_eq!(hier.level(2).num_points, 3);
        assert_eq!(hier.level(2).spacing, 4);
    }

    #[test]
    fn fine_index_composes_cfactors_multiplicatively() {
        let part = Partition::new(144, 4).unwrap();
        let hier = Hierarchy::build(&part, &[4, 3, 2], 4, 2).unwrap();

        assert_eq!(hier.fine_index(23, 0), 23);
        assert_eq!(hier.fine_index(28, 0), 28);
        assert_eq!(hier.fine_index(23, 1), 23 * 4);
        assert_eq!(hier.fine_index(23, 3), 23 * 4 * 3 * 2);
    }

    #[test]
    fn last_cfactor_repeats_for_deeper_levels() {
        let part = Partition::new(64, 2).unwrap();
        let hier = Hierarchy::build(&part, &[4], 3, 2).unwrap();

        assert_eq!(hier.level(1).spacing, 4);
        assert_eq!(hier.level(2).spacing, 16);
    }

    #[test]
    fn finest_cfactor_is_validated_even_without_coarser_levels() {
        let part = Partition::new(6, 2).unwrap();
        let err = Hierarchy::build(&part, &[0], 1, 2).unwrap_err();
        assert_eq!(
            err,
            ConfigError::CoarseningTooWeak {
                level: 0,
                cfactor: 0
            }
        );
    }

    #[test]
    fn level_zero_is_always_the_fine_grid() {
        let part = Partition::new(10, 2).unwrap();
        let hier = Hierarchy::build(&part, &[], 1, 2).unwrap();

        assert_eq!(hier.num_levels(), 1);
        assert_eq!(hier.level(0).num_points, 11);
        assert_eq!(hier.level(0).spacing, 1);
    }
}
