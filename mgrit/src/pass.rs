//! The forward and backward pass entry points.
//!
//! A pass is self-contained: it validates the configuration, builds the
//! partition and hierarchy, distributes the root-held boundary value,
//! installs the few foreign layer replicas the cycle will touch, runs the
//! engine and redistributes the result. Nothing persists between passes
//! except the [`Tape`] a forward pass hands to its backward passes.

use std::collections::BTreeMap;

use halo::Communicator;
use timegrid::{Hierarchy, LocalGrid, Partition};

use crate::{
    CycleConfig, CycleStats, MgritError, Result, State, StepBank, Tape,
    solver::{Direction, Engine, TAG_GRAD, TAG_LAYER},
    state::{pack, unpack},
};

/// Everything a forward pass produces, on every rank.
#[derive(Debug)]
pub struct ForwardPass {
    /// The state at the final time point.
    pub output: State,
    /// Checkpointed states for the adjoint passes.
    pub tape: Tape,
    pub stats: CycleStats,
}

/// Everything a backward pass produces.
#[derive(Debug)]
pub struct BackwardPass {
    /// Gradient with respect to the global input, on every rank.
    pub grad_input: State,
    /// Flat parameter gradient per owned layer.
    pub grads: BTreeMap<usize, Vec<f64>>,
    pub stats: CycleStats,
}

/// Evaluates the layered composition over `num_steps` steps.
///
/// # Arguments
/// * `comm` - The worker group.
/// * `bank` - The step modules of this worker's interval.
/// * `cfg` - Cycle knobs for this direction.
/// * `num_steps` - Global step count; must divide by the group size.
/// * `input` - The global input batch; consulted on the root only.
/// * `guess` - Optional seed for the interior points, by fine point index.
///
/// # Returns
/// The final state (broadcast everywhere), the tape and the cycle stats.
pub fn run_forward<C, B>(
    comm: &mut C,
    bank: &mut B,
    cfg: &CycleConfig,
    num_steps: usize,
    input: Option<&State>,
    guess: Option<&dyn Fn(usize) -> State>,
) -> Result<ForwardPass>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    let (partition, hierarchy) = prepare(comm, bank, cfg, num_steps)?;
    let (x0, batch) = spread_root_value(comm, bank.width(), input, "an input batch")?;

    install_forward_replicas(comm, bank, &partition, &hierarchy)?;

    let mut engine = Engine::new(
        comm,
        &*bank,
        None,
        cfg,
        Direction::Forward,
        &partition,
        &hierarchy,
        batch,
    );
    engine.seed(&x0, guess)?;
    let stats = engine.solve()?;

    // one more boundary refresh so the tape's left checkpoint is final
    engine.exchange(0)?;
    let output = engine.broadcast_tail()?;

    let mut states = std::mem::take(&mut engine.levels[0].u);
    if let Some((_, point)) = engine.levels[0].grid.left {
        let v = engine.levels[0]
            .left
            .take()
            .ok_or(MgritError::MissingState { level: 0, point })?;
        states.insert(point, v);
    }

    Ok(ForwardPass {
        output,
        tape: Tape::new(states),
        stats,
    })
}

/// Propagates an output gradient back through the composition recorded on
/// `tape`, producing the input gradient and per-layer parameter gradients.
///
/// The adjoint problem runs in the reversed index space `j = N - i` with the
/// same point ownership as the forward pass, so every checkpoint stays local.
pub fn run_backward<C, B>(
    comm: &mut C,
    bank: &mut B,
    cfg: &CycleConfig,
    num_steps: usize,
    seed: Option<&State>,
    tape: &Tape,
) -> Result<BackwardPass>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    let (partition, hierarchy) = prepare(comm, bank, cfg, num_steps)?;
    let (w_out, batch) = spread_root_value(comm, bank.width(), seed, "an output gradient")?;

    install_backward_replicas(comm, bank, &partition)?;

    let mut engine = Engine::new(
        comm,
        &*bank,
        Some(tape),
        cfg,
        Direction::Backward,
        &partition,
        &hierarchy,
        batch,
    );
    engine.seed(&w_out, None)?;
    let stats = engine.solve()?;

    engine.exchange(0)?;
    let grads = engine.assemble_grads()?;
    let grad_input = engine.broadcast_tail()?;

    Ok(BackwardPass {
        grad_input,
        grads,
        stats,
    })
}

/// Shared pass preamble: every configuration defect surfaces here, before
/// any state is allocated or any message sent.
fn prepare<C, B>(
    comm: &mut C,
    bank: &B,
    cfg: &CycleConfig,
    num_steps: usize,
) -> Result<(Partition, Hierarchy)>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    cfg.validate()?;
    if bank.width() == 0 {
        return Err(timegrid::ConfigError::ZeroSized {
            what: "state width",
        }
        .into());
    }

    let partition = Partition::new(num_steps, comm.size())?;
    let hierarchy = Hierarchy::build(&partition, &cfg.cfactors, cfg.max_levels, cfg.min_coarse)?;
    Ok((partition, hierarchy))
}

/// Broadcasts the root-held boundary value and derives the batch size every
/// rank will use for this pass.
fn spread_root_value<C>(
    comm: &mut C,
    width: usize,
    value: Option<&State>,
    what: &'static str,
) -> Result<(State, usize)>
where
    C: Communicator + ?Sized,
{
    let mut flat = if comm.is_root() {
        let value = value.ok_or(MgritError::RootValueAbsent { what })?;
        if value.ncols() != width {
            return Err(MgritError::ShapeMismatch {
                what,
                got: value.dim(),
                expected: (value.nrows(), width),
            });
        }
        pack(value)
    } else {
        Vec::new()
    };

    comm.broadcast(0, &mut flat)?;
    let batch = flat.len() / width;
    let value = unpack(flat, batch, width)?;
    Ok((value, batch))
}

/// On a coarse level, the transition into a worker's first surviving point
/// can reach back into a layer the previous worker owns. Every rank derives
/// the full need table from the (deterministic) grids, so owners send and
/// needers receive without negotiation.
fn install_forward_replicas<C, B>(
    comm: &mut C,
    bank: &mut B,
    partition: &Partition,
    hierarchy: &Hierarchy,
) -> Result<()>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    let me = comm.rank();

    for lvl in 1..hierarchy.num_levels() {
        let spec = hierarchy.level(lvl);
        for r in 0..partition.num_workers() {
            let grid = LocalGrid::forward(partition, spec, r);
            let Some(&q0) = grid.sweep_points().first() else {
                continue;
            };

            let layer = q0 - spec.spacing;
            if partition.steps_for(r).contains(&layer) {
                continue;
            }

            let src = partition.owner_of_step(layer);
            if src == me {
                let params = bank.export_params(layer)?;
                comm.send(r, TAG_LAYER + lvl as u32, &params)?;
            } else if r == me {
                let params = comm.recv(src, TAG_LAYER + lvl as u32)?;
                bank.import_replica(layer, &params)?;
            }
        }
    }
    Ok(())
}

/// The adjoint sweep applies the layers `s+1 ..= e` on a worker owning steps
/// `[s, e)`: each worker therefore evaluates its right neighbor's first
/// layer and must hold a replica of it. Parameters move once per pass, since
/// training changes them between passes.
fn install_backward_replicas<C, B>(comm: &mut C, bank: &mut B, partition: &Partition) -> Result<()>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    let me = comm.rank();

    if me > 0 {
        let first = partition.steps_for(me).start;
        let params = bank.export_params(first)?;
        comm.send(me - 1, TAG_LAYER, &params)?;
    }
    if me + 1 < partition.num_workers() {
        let params = comm.recv(me + 1, TAG_LAYER)?;
        bank.import_replica(partition.steps_for(me).end, &params)?;
    }
    Ok(())
}

impl<C, B> Engine<'_, C, B>
where
    C: Communicator + ?Sized,
    B: StepBank + ?Sized,
{
    /// Per-layer parameter gradients from the converged adjoint values.
    ///
    /// The reversed sweep computes contributions for layers `s+1 ..= e`; the
    /// trailing one (layer `e`, evaluated through the replica) belongs to
    /// the right neighbor, and the contribution for this worker's own first
    /// layer `s` arrives from the left. A single blocking exchange after all
    /// local work settles both sides.
    fn assemble_grads(&mut self) -> Result<BTreeMap<usize, Vec<f64>>> {
        let n = self.partition.num_steps();
        let expected = self.bank.param_len();
        let mut grads = BTreeMap::new();

        let points = self.levels[0].grid.sweep_points().to_vec();
        for j in points {
            let layer = n - j;
            let g = {
                let tape = self
                    .tape
                    .ok_or(MgritError::MissingState { level: 0, point: layer })?;
                let w = self.input_for(0, j)?;
                self.bank.vjp_params(layer, tape.state(layer)?, w)?
            };
            if g.len() != expected {
                return Err(MgritError::GradSizeMismatch {
                    layer,
                    got: g.len(),
                    expected,
                });
            }
            grads.insert(layer, g);
        }

        let rank = self.comm.rank();
        let steps = self.partition.steps_for(rank);
        if rank + 1 < self.comm.size() {
            let g = grads
                .remove(&steps.end)
                .ok_or(MgritError::MissingState {
                    level: 0,
                    point: steps.end,
                })?;
            self.comm.send(rank + 1, TAG_GRAD, &g)?;
        }
        if rank > 0 {
            let g = self.comm.recv(rank - 1, TAG_GRAD)?;
            if g.len() != expected {
                return Err(MgritError::GradSizeMismatch {
                    layer: steps.start,
                    got: g.len(),
                    expected,
                });
            }
            grads.insert(steps.start, g);
        }
        Ok(grads)
    }
}
