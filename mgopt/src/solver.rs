//! The multilevel optimization driver.
//!
//! A cycle relaxes the fine network, forms a coarse defect correction from
//! the restricted parameters and gradients, solves the corrected coarse
//! problem recursively and prolongs the resulting parameter update back,
//! finishing with post-relaxation. With a single configured level the driver
//! degenerates to plain relaxation steps on the finest network.

use halo::{Communicator, root_only};
use log::{debug, info};
use mgrit::State;
use timegrid::{ConfigError, transfer};

use crate::{
    MgOptError, Result,
    nested::{MgOptLevel, NestedIteration},
    net::LossFn,
};

/// Parameter-correction step policy.
#[derive(Debug, Clone, Copy)]
pub enum LineSearch {
    /// Apply the prolonged coarse update scaled by a fixed coefficient.
    Fixed { alpha: f64 },
}

#[derive(Debug, Clone)]
pub struct MgOptConfig {
    /// Resolutions a cycle descends through; 1 disables the coarse
    /// correction entirely.
    pub mgopt_levels: usize,
    /// Cycle budget.
    pub mgopt_iter: usize,
    /// Relaxation steps before the coarse correction.
    pub nrelax_pre: usize,
    /// Relaxation steps after it.
    pub nrelax_post: usize,
    /// Relaxation steps at the cycle's coarsest resolution.
    pub nrelax_coarse: usize,
    /// Stop once the loss falls to this value.
    pub mgopt_tol: f64,
    pub line_search: LineSearch,
}

impl Default for MgOptConfig {
    fn default() -> Self {
        Self {
            mgopt_levels: 2,
            mgopt_iter: 1,
            nrelax_pre: 1,
            nrelax_post: 1,
            nrelax_coarse: 2,
            mgopt_tol: 0.0,
            line_search: LineSearch::Fixed { alpha: 1.0 },
        }
    }
}

impl MgOptConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.mgopt_levels == 0 {
            return Err(ConfigError::ZeroSized {
                what: "cycle depth",
            });
        }
        if self.mgopt_iter == 0 {
            return Err(ConfigError::ZeroSized {
                what: "cycle budget",
            });
        }
        if self.nrelax_pre + self.nrelax_post == 0 {
            return Err(ConfigError::ZeroSized {
                what: "relaxation count",
            });
        }
        if self.nrelax_coarse == 0 {
            return Err(ConfigError::ZeroSized {
                what: "coarse relaxation count",
            });
        }
        Ok(())
    }
}

/// What a training run did.
#[derive(Debug)]
pub struct TrainStats {
    /// Cycles actually performed.
    pub cycles: usize,
    /// Loss after each cycle.
    pub losses: Vec<f64>,
}

/// Runs up to `mgopt_iter` cycles over the chain.
///
/// Batches advance with every relaxation step and cycle, wrapping around the
/// dataset; every rank advances its cursor identically, so the group stays
/// in lockstep without coordination.
pub fn train<C>(
    comm: &mut C,
    chain: &mut NestedIteration,
    cfg: &MgOptConfig,
    data: Option<&[(State, State)]>,
    loss: LossFn,
) -> Result<TrainStats>
where
    C: Communicator + ?Sized,
{
    cfg.validate()?;
    let depth = cfg.mgopt_levels.min(chain.levels.len());

    let mut cursor = 0usize;
    let mut losses = Vec::new();
    for cycle in 0..cfg.mgopt_iter {
        let l = vcycle(comm, chain, cfg, 0, depth, data, &mut cursor, None, loss)?;
        info!("cycle {cycle}: loss {l:.6e}");
        losses.push(l);

        if l <= cfg.mgopt_tol {
            break;
        }
    }

    Ok(TrainStats {
        cycles: losses.len(),
        losses,
    })
}

/// One cycle rooted at resolution `k`. `tau` is the defect carried into this
/// resolution's objective; `None` at the finest.
fn vcycle<C>(
    comm: &mut C,
    chain: &mut NestedIteration,
    cfg: &MgOptConfig,
    k: usize,
    depth: usize,
    data: Option<&[(State, State)]>,
    cursor: &mut usize,
    tau: Option<&[f64]>,
    loss: LossFn,
) -> Result<f64>
where
    C: Communicator + ?Sized,
{
    if k + 1 == depth {
        let n = if depth == 1 {
            cfg.nrelax_pre + cfg.nrelax_post
        } else {
            cfg.nrelax_coarse
        };

        let mut last = 0.0;
        for _ in 0..n {
            last = relax_step(comm, &mut chain.levels[k], data, cursor, tau, loss)?;
        }
        return Ok(last);
    }

    let mut last = 0.0;
    for _ in 0..cfg.nrelax_pre {
        last = relax_step(comm, &mut chain.levels[k], data, cursor, tau, loss)?;
    }

    // defect: what the restricted coarse gradient misses of the fine one,
    // both evaluated on the same batch at the restricted parameters
    let rf = chain.rfactor;
    let per = chain.levels[k].net.bank.layer_param_len();

    let (mut g_fine, _) = eval_gradient(comm, &mut chain.levels[k], data, *cursor, loss)?;
    if let Some(t) = tau {
        for (g, v) in g_fine.iter_mut().zip(t) {
            *g += v;
        }
    }

    let theta_fine = chain.levels[k].net.bank.params_flat();
    let theta_down = transfer::restrict_params(&theta_fine, per, rf);
    chain.levels[k + 1].net.bank.set_params_flat(&theta_down)?;

    let (g_coarse, _) = eval_gradient(comm, &mut chain.levels[k + 1], data, *cursor, loss)?;
    let tau_next: Vec<f64> = transfer::restrict_params(&g_fine, per, rf)
        .iter()
        .zip(&g_coarse)
        .map(|(f, c)| f - c)
        .collect();
    debug!(
        "resolution {k}: defect norm {:.3e}",
        tau_next.iter().map(|t| t * t).sum::<f64>().sqrt()
    );

    vcycle(comm, chain, cfg, k + 1, depth, data, cursor, Some(&tau_next), loss)?;

    // prolonged parameter correction
    let theta_up = chain.levels[k + 1].net.bank.params_flat();
    let delta: Vec<f64> = theta_up
        .iter()
        .zip(&theta_down)
        .map(|(a, b)| a - b)
        .collect();
    let correction = transfer::prolong_params(&delta, per, rf);

    let LineSearch::Fixed { alpha } = cfg.line_search;
    let mut theta = chain.levels[k].net.bank.params_flat();
    for (p, d) in theta.iter_mut().zip(&correction) {
        *p += alpha * d;
    }
    chain.levels[k].net.bank.set_params_flat(&theta)?;

    for _ in 0..cfg.nrelax_post {
        last = relax_step(comm, &mut chain.levels[k], data, cursor, tau, loss)?;
    }
    Ok(last)
}

/// One relaxation step: evaluate the (possibly defect-corrected) gradient on
/// the next batch and hand it to the level's optimizer.
pub(crate) fn relax_step<C>(
    comm: &mut C,
    level: &mut MgOptLevel,
    data: Option<&[(State, State)]>,
    cursor: &mut usize,
    tau: Option<&[f64]>,
    loss: LossFn,
) -> Result<f64>
where
    C: Communicator + ?Sized,
{
    let (mut grad, l) = eval_gradient(comm, level, data, *cursor, loss)?;
    *cursor += 1;

    if let Some(t) = tau {
        for (g, v) in grad.iter_mut().zip(t) {
            *g += v;
        }
    }

    let mut params = level.net.bank.params_flat();
    level.opt.update(&mut params, &grad);
    level.net.bank.set_params_flat(&params)?;
    Ok(l)
}

/// Forward, loss, backward; returns the flattened owned-layer gradient and
/// the loss value, the latter broadcast so every rank can act on it.
fn eval_gradient<C>(
    comm: &mut C,
    level: &mut MgOptLevel,
    data: Option<&[(State, State)]>,
    cursor: usize,
    loss: LossFn,
) -> Result<(Vec<f64>, f64)>
where
    C: Communicator + ?Sized,
{
    let batch = root_only(comm, || {
        let data = data.ok_or(MgOptError::EmptyDataset)?;
        if data.is_empty() {
            return Err(MgOptError::EmptyDataset);
        }
        Ok(&data[cursor % data.len()])
    })
    .transpose()?;

    let fwd = level.net.forward(comm, batch.map(|b| &b.0), None)?;
    let seed = batch.map(|b| loss(&fwd.output, &b.1));

    let mut value = vec![seed.as_ref().map(|(l, _)| *l).unwrap_or_default()];
    comm.broadcast(0, &mut value)?;

    let bwd = level.net.backward(comm, seed.as_ref().map(|(_, s)| s), &fwd.tape)?;
    level.net.widen_budgets(&fwd.stats, &bwd.stats);

    let grad = bwd.grads.into_values().flatten().collect();
    Ok((grad, value[0]))
}
