use std::ops::Range;

use crate::ConfigError;

/// Even split of the global step range across the worker group.
///
/// Intervals are contiguous, disjoint and non-overlapping; each worker owns
/// exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    num_steps: usize,
    num_workers: usize,
}

impl Partition {
    /// Splits `num_steps` across `num_workers`.
    ///
    /// # Arguments
    /// * `num_steps` - Total number of time steps.
    /// * `num_workers` - Size of the worker group.
    ///
    /// # Returns
    /// A partition, or `ConfigError` when the counts are zero or the steps
    /// do not divide evenly.
    pub fn new(num_steps: usize, num_workers: usize) -> Result<Self, ConfigError> {
        if num_steps == 0 {
            return Err(ConfigError::ZeroSized { what: "step count" });
        }
        if num_workers == 0 {
            return Err(ConfigError::ZeroSized {
                what: "worker count",
            });
        }
        if num_steps % num_workers != 0 {
            return Err(ConfigError::StepsNotDivisible {
                steps: num_steps,
                workers: num_workers,
            });
        }

        Ok(Self {
            num_steps,
            num_workers,
        })
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Steps owned by each worker.
    pub fn local_steps(&self) -> usize {
        self.num_steps / self.num_workers
    }

    /// The half-open step interval owned by `rank`.
    pub fn steps_for(&self, rank: usize) -> Range<usize> {
        let local = self.local_steps();
        rank * local..(rank + 1) * local
    }

    /// The worker authoritative for step `step`.
    pub fn owner_of_step(&self, step: usize) -> usize {
        step / self.local_steps()
    }

    /// The worker authoritative for time point `point`.
    ///
    /// Point `m > 0` is the result of step `m - 1`; point 0 belongs to the
    /// root worker.
    pub fn owner_of_point(&self, point: usize) -> usize {
        if point == 0 {
            0
        } else {
            self.owner_of_step(point - 1)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_uneven_split_before_any_state_exists() {
        let err = Partition::new(7, 2).unwrap_err();
        assert_eq!(
            err,
            ConfigError::StepsNotDivisible {
                steps: 7,
                workers: 2
            }
        );
    }

    #[test]
    fn intervals_are_contiguous_and_disjoint() {
        let part = Partition::new(12, 3).unwrap();

        assert_eq!(part.steps_for(0), 0..4);
        assert_eq!(part.steps_for(1), 4..8);
        assert_eq!(part.steps_for(2), 8..12);
    }

    #[test]
    fn point_ownership_follows_the_producing_step() {
        let part = Partition::new(6, 2).unwrap();

        assert_eq!(part.owner_of_point(0), 0);
        assert_eq!(part.owner_of_point(3), 0);
        assert_eq!(part.owner_of_point(4), 1);
        assert_eq!(part.owner_of_point(6), 1);
    }
}
