use std::collections::BTreeMap;

use log::{debug, warn};
use timegrid::{Hierarchy, LocalGrid, Partition};

use halo::Communicator;

use crate::{
    CycleConfig, MgritError, RelaxMode, Result, State, StepBank, Tape,
    level::Level,
    state::{pack, unpack},
};

/// Boundary values on level `l` travel under `TAG_HALO + l`; layer replicas
/// under `TAG_LAYER + l`. Both stay far below the collective tag range.
pub(crate) const TAG_HALO: u32 = 0x100;
pub(crate) const TAG_LAYER: u32 = 0x200;
pub(crate) const TAG_GRAD: u32 = 0x300;

/// Which propagation index space the engine runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Forward,
    /// Reversed indices `j = N - i`; transitions apply vector-Jacobian
    /// products against the forward pass's tape.
    Backward,
}

#[derive(Clone, Copy, PartialEq)]
enum Select {
    FPoints,
    CPoints,
}

/// Outcome of one cycling run. Falling short of the tolerance is data, not
/// an error: the caller decides whether to raise the budget next time.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Iterations actually performed.
    pub iters: usize,
    /// Residual after each iteration, in order.
    pub residuals: Vec<f64>,
    pub converged: bool,
}

impl CycleStats {
    pub fn final_residual(&self) -> f64 {
        self.residuals.last().copied().unwrap_or(0.0)
    }
}

/// The multilevel cycling state machine of one pass, forward or backward.
///
/// Everything the cycle touches comes in through here: communicator, step
/// bank, tape, configuration. Nothing is ambient.
pub(crate) struct Engine<'a, C, B>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    pub comm: &'a mut C,
    pub bank: &'a B,
    pub tape: Option<&'a Tape>,
    cfg: &'a CycleConfig,
    dir: Direction,
    pub partition: Partition,
    num_steps: usize,
    pub batch: usize,
    pub width: usize,
    pub levels: Vec<Level>,
}

impl<'a, C, B> Engine<'a, C, B>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    pub fn new(
        comm: &'a mut C,
        bank: &'a B,
        tape: Option<&'a Tape>,
        cfg: &'a CycleConfig,
        dir: Direction,
        partition: &Partition,
        hierarchy: &Hierarchy,
        batch: usize,
    ) -> Self {
        let rank = comm.rank();
        let levels = (0..hierarchy.num_levels())
            .map(|l| {
                let spec = hierarchy.level(l);
                let grid = match dir {
                    Direction::Forward => LocalGrid::forward(partition, spec, rank),
                    Direction::Backward => LocalGrid::backward(partition, spec, rank),
                };
                Level::new(grid)
            })
            .collect();

        let width = bank.width();
        Self {
            comm,
            bank,
            tape,
            cfg,
            dir,
            partition: *partition,
            num_steps: partition.num_steps(),
            batch,
            width,
            levels,
        }
    }

    /// Fills the finest level: the fixed head gets `boundary`, every other
    /// owned point the guess (or a copy of `boundary` without one).
    pub fn seed(&mut self, boundary: &State, guess: Option<&dyn Fn(usize) -> State>) -> Result<()> {
        let points = self.levels[0].grid.points.clone();
        let fixed_head = self.levels[0].grid.fixed_head;

        for (k, &p) in points.iter().enumerate() {
            let v = if k == 0 && fixed_head {
                boundary.clone()
            } else if let Some(g) = guess {
                let v = g(p);
                self.check("initial guess state", &v)?;
                v
            } else {
                boundary.clone()
            };
            self.levels[0].u.insert(p, v);
        }
        Ok(())
    }

    /// Runs cycles until the residual drops under the tolerance or the
    /// iteration budget runs out.
    pub fn solve(&mut self) -> Result<CycleStats> {
        let mut residuals = Vec::new();
        let mut converged = false;

        for it in 0..self.cfg.max_iters {
            let before = self.levels[0].u.clone();

            if self.cfg.full_multigrid && it == 0 {
                self.f_cycle()?;
            } else {
                let skip_down = self.cfg.skip_first_down && it == 0;
                self.v_cycle(0, skip_down)?;
            }

            let res = self.change_residual(&before)?;
            debug!(
                "rank {} iteration {}: residual {res:.3e}",
                self.comm.rank(),
                it + 1
            );
            residuals.push(res);

            if res <= self.cfg.tol {
                converged = true;
                break;
            }
        }

        if self.cfg.final_fc_relax {
            self.sweep(0, Select::FPoints)?;
            self.sweep(0, Select::CPoints)?;
        }

        let stats = CycleStats {
            iters: residuals.len(),
            residuals,
            converged,
        };
        if !converged {
            warn!(
                "iteration budget {} exhausted at residual {:.3e} (tolerance {:.3e})",
                self.cfg.max_iters,
                stats.final_residual(),
                self.cfg.tol
            );
        }
        Ok(stats)
    }

    fn coarsest(&self) -> usize {
        self.levels.len() - 1
    }

    fn v_cycle(&mut self, level: usize, skip_down: bool) -> Result<()> {
        if level == self.coarsest() {
            return self.coarse_solve(level);
        }

        if !skip_down {
            for _ in 0..self.cfg.nrelax_at(level) {
                self.relax(level, self.cfg.down_mode(level))?;
            }
        }
        self.restrict(level)?;

        self.v_cycle(level + 1, skip_down)?;

        self.prolong(level)?;
        if self.cfg.relax_only_coarse {
            self.sweep(level, Select::CPoints)?;
        } else {
            self.relax(level, RelaxMode::Fcf)?;
        }
        Ok(())
    }

    /// The full-multigrid opening: seed every level, solve the coarsest,
    /// then refine upward with one cycle per level.
    fn f_cycle(&mut self) -> Result<()> {
        let coarsest = self.coarsest();
        for level in 0..coarsest {
            self.restrict(level)?;
        }
        self.coarse_solve(coarsest)?;
        for level in (0..coarsest).rev() {
            self.prolong(level)?;
            self.v_cycle(level, false)?;
        }
        Ok(())
    }

    fn relax(&mut self, level: usize, mode: RelaxMode) -> Result<()> {
        match mode {
            RelaxMode::F => self.sweep(level, Select::FPoints),
            RelaxMode::Fcf => {
                self.sweep(level, Select::FPoints)?;
                self.sweep(level, Select::CPoints)?;
                self.sweep(level, Select::FPoints)
            }
        }
    }

    fn sweep(&mut self, level: usize, select: Select) -> Result<()> {
        self.exchange(level)?;

        let points: Vec<usize> = {
            let grid = &self.levels[level].grid;
            grid.sweep_points()
                .iter()
                .copied()
                .filter(|&p| match select {
                    Select::FPoints => !grid.is_c_point(p),
                    Select::CPoints => grid.is_c_point(p),
                })
                .collect()
        };

        for p in points {
            let out = self.equation(level, p)?;
            self.levels[level].u.insert(p, out);
        }
        Ok(())
    }

    /// Blocking sequential sweeps over the whole level: each worker waits
    /// for the updated left value, so one sweep propagates exactly through
    /// the full group. With a single level this IS the sequential solve.
    fn coarse_solve(&mut self, level: usize) -> Result<()> {
        for _ in 0..self.cfg.nrelax_coarse {
            if let Some((from, _)) = self.levels[level].grid.left {
                let flat = self.comm.recv(from, TAG_HALO + level as u32)?;
                self.levels[level].left = Some(unpack(flat, self.batch, self.width)?);
            }

            let points = self.levels[level].grid.sweep_points().to_vec();
            for p in points {
                let out = self.equation(level, p)?;
                self.levels[level].u.insert(p, out);
            }

            self.send_rightmost(level)?;
        }
        Ok(())
    }

    /// Injects the surviving points into the next level and freezes its
    /// correction term, so that an already-converged finer level is a fixed
    /// point of the coarse equation and the up-leg correction vanishes.
    fn restrict(&mut self, level: usize) -> Result<()> {
        self.exchange(level)?;

        let inject = self.levels[level + 1].grid.points.clone();
        for &q in &inject {
            let v = self.levels[level]
                .u
                .get(&q)
                .ok_or(MgritError::MissingState { level, point: q })?
                .clone();
            self.levels[level + 1].snapshot.insert(q, v.clone());
            self.levels[level + 1].u.insert(q, v);
        }

        self.exchange(level + 1)?;

        let eqn_points = self.levels[level + 1].grid.sweep_points().to_vec();
        for q in eqn_points {
            let fine = self.equation(level, q)?;
            let coarse = self.transition(level + 1, q, self.input_for(level + 1, q)?)?;
            self.levels[level + 1].tau.insert(q, fine - coarse);
        }
        Ok(())
    }

    /// Adds the coarse correction (current minus injected value) onto the
    /// finer level.
    fn prolong(&mut self, level: usize) -> Result<()> {
        let points = self.levels[level + 1].grid.sweep_points().to_vec();
        for q in points {
            let delta = {
                let coarse = &self.levels[level + 1];
                let now = coarse
                    .u
                    .get(&q)
                    .ok_or(MgritError::MissingState { level: level + 1, point: q })?;
                let was = coarse
                    .snapshot
                    .get(&q)
                    .ok_or(MgritError::MissingState { level: level + 1, point: q })?;
                now - was
            };

            let dst = self.levels[level]
                .u
                .get_mut(&q)
                .ok_or(MgritError::MissingState { level, point: q })?;
            *dst += &delta;
        }
        Ok(())
    }

    /// One application of the level equation at `point`: the transition from
    /// the predecessor plus the frozen correction.
    fn equation(&self, level: usize, point: usize) -> Result<State> {
        let mut out = {
            let input = self.input_for(level, point)?;
            self.transition(level, point, input)?
        };
        if let Some(t) = self.levels[level].tau.get(&point) {
            out += t;
        }
        Ok(out)
    }

    fn transition(&self, level: usize, point: usize, x: &State) -> Result<State> {
        let h = self.levels[level].grid.spacing;
        let out = match self.dir {
            Direction::Forward => self.bank.apply(point - h, h, x)?,
            Direction::Backward => {
                let layer = self.num_steps - point;
                let tape = self
                    .tape
                    .ok_or(MgritError::MissingState { level: 0, point: layer })?;
                self.bank.vjp_state(layer, h, tape.state(layer)?, x)?
            }
        };
        self.check("step output", &out)?;
        Ok(out)
    }

    /// The value feeding the transition into `point`: the owned predecessor
    /// or the received left boundary.
    pub fn input_for(&self, level: usize, point: usize) -> Result<&State> {
        let lv = &self.levels[level];
        let h = lv.grid.spacing;
        if point >= h {
            if let Some(u) = lv.u.get(&(point - h)) {
                return Ok(u);
            }
        }
        lv.left.as_ref().ok_or(MgritError::MissingState {
            level,
            point: point.saturating_sub(h),
        })
    }

    /// Non-blocking send of the rightmost owned value, then a blocking
    /// receive of the left neighbor's; send goes first so nobody's matching
    /// receive waits on our local work.
    pub fn exchange(&mut self, level: usize) -> Result<()> {
        self.send_rightmost(level)?;

        if let Some((from, _)) = self.levels[level].grid.left {
            let flat = self.comm.recv(from, TAG_HALO + level as u32)?;
            self.levels[level].left = Some(unpack(flat, self.batch, self.width)?);
        }
        Ok(())
    }

    fn send_rightmost(&mut self, level: usize) -> Result<()> {
        let Some(to) = self.levels[level].grid.right else {
            return Ok(());
        };
        let Some(&last) = self.levels[level].grid.points.last() else {
            return Ok(());
        };

        let flat = pack(
            self.levels[level]
                .u
                .get(&last)
                .ok_or(MgritError::MissingState { level, point: last })?,
        );
        self.comm.send(to, TAG_HALO + level as u32, &flat)?;
        Ok(())
    }

    /// Group-wide l2 norm of the change the last iteration made to the
    /// finest level.
    fn change_residual(&mut self, before: &BTreeMap<usize, State>) -> Result<f64> {
        let mut local = 0.0;
        for (p, now) in &self.levels[0].u {
            if let Some(old) = before.get(p) {
                local += now
                    .iter()
                    .zip(old.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>();
            }
        }
        Ok(self.comm.allreduce_sum(local)?.sqrt())
    }

    /// The converged value at the end of the index space, made visible to
    /// every rank.
    pub fn broadcast_tail(&mut self) -> Result<State> {
        let owner = match self.dir {
            Direction::Forward => self.comm.size() - 1,
            Direction::Backward => 0,
        };

        let mut flat = if self.comm.rank() == owner {
            pack(self.levels[0].u.get(&self.num_steps).ok_or(
                MgritError::MissingState {
                    level: 0,
                    point: self.num_steps,
                },
            )?)
        } else {
            Vec::new()
        };

        self.comm.broadcast(owner, &mut flat)?;
        unpack(flat, self.batch, self.width)
    }

    fn check(&self, what: &'static str, s: &State) -> Result<()> {
        let got = s.dim();
        let expected = (self.batch, self.width);
        if got == expected {
            Ok(())
        } else {
            Err(MgritError::ShapeMismatch {
                what,
                got,
                expected,
            })
        }
    }
}
