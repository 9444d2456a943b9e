use crate::{LevelSpec, Partition};

/// The slice of one level owned by one worker, with its halo wiring.
///
/// Points are fine-grid indices in the propagation index space: for the
/// forward problem that is the time axis itself, for the adjoint problem the
/// axis is reversed (`j = N - i`) so that the engine always propagates from
/// small indices to large ones and never cares about direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalGrid {
    pub level: usize,
    pub spacing: usize,
    pub cfactor: usize,
    /// Owned points, ascending. May be empty on coarse levels.
    pub points: Vec<usize>,
    /// The first owned point is the fixed boundary value (global input for
    /// the forward problem, adjoint seed for the backward one); no equation
    /// is solved at it.
    pub fixed_head: bool,
    /// Upstream neighbor: `(rank, point)` whose value feeds our first
    /// transition, when that point is remote.
    pub left: Option<(usize, usize)>,
    /// Downstream neighbor consuming our last owned point.
    pub right: Option<usize>,
}

impl LocalGrid {
    /// Builds `rank`'s view of one forward level.
    pub fn forward(partition: &Partition, spec: &LevelSpec, rank: usize) -> Self {
        let steps = partition.steps_for(rank);
        let lo = if rank == 0 { 0 } else { steps.start + 1 };
        let hi = steps.end;

        Self::build(partition, spec, rank, lo, hi, rank == 0, |part, point| {
            part.owner_of_point(point)
        })
    }

    /// Builds `rank`'s view of one adjoint level.
    ///
    /// The adjoint value at forward point `i` keeps forward ownership and
    /// lives at reversed index `j = N - i`; the reversed chain therefore
    /// starts (fixed seed, `j = 0`) on the last worker and ends on worker 0.
    pub fn backward(partition: &Partition, spec: &LevelSpec, rank: usize) -> Self {
        let n = partition.num_steps();
        let steps = partition.steps_for(rank);
        let lo = n - steps.end;
        let hi = if rank == 0 { n } else { n - steps.start - 1 };
        let fixed_head = rank == partition.num_workers() - 1;

        Self::build(partition, spec, rank, lo, hi, fixed_head, |part, point| {
            if point == part.num_steps() {
                0
            } else {
                part.owner_of_point(part.num_steps() - point)
            }
        })
    }

    fn build(
        partition: &Partition,
        spec: &LevelSpec,
        rank: usize,
        lo: usize,
        hi: usize,
        fixed_head: bool,
        owner_of: impl Fn(&Partition, usize) -> usize,
    ) -> Self {
        let spacing = spec.spacing;
        let first = lo.div_ceil(spacing) * spacing;
        let points: Vec<usize> = (first..=hi).step_by(spacing).collect();

        let left = points.first().and_then(|&p0| {
            if p0 < spacing {
                return None;
            }
            let prev = p0 - spacing;
            let owner = owner_of(partition, prev);
            (owner != rank).then_some((owner, prev))
        });

        let right = points.last().and_then(|&last| {
            let next = last + spacing;
            if next > partition.num_steps() {
                return None;
            }
            let owner = owner_of(partition, next);
            (owner != rank).then_some(owner)
        });

        let fixed_head = fixed_head && points.first() == Some(&lo);
        Self {
            level: spec.level,
            spacing,
            cfactor: spec.cfactor,
            points,
            fixed_head,
            left,
            right,
        }
    }

    /// Whether `point` stays on the next-coarser level.
    pub fn is_c_point(&self, point: usize) -> bool {
        point % (self.spacing * self.cfactor) == 0
    }

    /// The transition target points: every owned point except a fixed head.
    pub fn sweep_points(&self) -> &[usize] {
        if self.fixed_head {
            &self.points[1..]
        } else {
            &self.points
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Hierarchy;

    fn specs(steps: usize, workers: usize, cfactors: &[usize], levels: usize) -> (Partition, Hierarchy) {
        let part = Partition::new(steps, workers).unwrap();
        let hier = Hierarchy::build(&part, cfactors, levels, 2).unwrap();
        (part, hier)
    }

    #[test]
    fn forward_fine_grid_covers_all_points_once() {
        let (part, hier) = specs(6, 2, &[2], 1);

        let g0 = LocalGrid::forward(&part, hier.level(0), 0);
        let g1 = LocalGrid::forward(&part, hier.level(0), 1);

        assert_eq!(g0.points, vec![0, 1, 2, 3]);
        assert!(g0.fixed_head);
        assert_eq!(g0.left, None);
        assert_eq!(g0.right, Some(1));

        assert_eq!(g1.points, vec![4, 5, 6]);
        assert!(!g1.fixed_head);
        assert_eq!(g1.left, Some((0, 3)));
        assert_eq!(g1.right, None);
    }

    #[test]
    fn coarse_level_skips_workers_without_surviving_points() {
        let (part, hier) = specs(16, 4, &[8], 2);

        let grids: Vec<_> = (0..4)
            .map(|r| LocalGrid::forward(&part, hier.level(1), r))
            .collect();

        assert_eq!(grids[0].points, vec![0]);
        assert_eq!(grids[1].points, vec![8]);
        assert!(grids[2].points.is_empty());
        assert_eq!(grids[3].points, vec![16]);

        // halo wiring hops over the empty worker
        assert_eq!(grids[1].right, Some(3));
        assert_eq!(grids[3].left, Some((1, 8)));
    }

    #[test]
    fn backward_grid_mirrors_forward_ownership() {
        let (part, hier) = specs(6, 2, &[2], 1);

        let g0 = LocalGrid::backward(&part, hier.level(0), 0);
        let g1 = LocalGrid::backward(&part, hier.level(0), 1);

        // worker 1 holds the seed (j = 0, forward point 6) and the chain
        // finishes on worker 0 (j = 6, forward point 0)
        assert_eq!(g1.points, vec![0, 1, 2]);
        assert!(g1.fixed_head);
        assert_eq!(g1.right, Some(0));

        assert_eq!(g0.points, vec![3, 4, 5, 6]);
        assert!(!g0.fixed_head);
        assert_eq!(g0.left, Some((1, 2)));
        assert_eq!(g0.right, None);
    }

    #[test]
    fn c_point_classification_uses_the_compound_spacing() {
        let (part, hier) = specs(8, 2, &[2], 2);
        let g = LocalGrid::forward(&part, hier.level(0), 1);

        assert_eq!(g.points, vec![5, 6, 7, 8]);
        assert!(g.is_c_point(6));
        assert!(!g.is_c_point(7));
    }
}
