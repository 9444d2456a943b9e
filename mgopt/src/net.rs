use halo::Communicator;
use log::info;
use mgrit::{BackwardPass, CycleConfig, CycleStats, ForwardPass, State, run_backward, run_forward};

use crate::{Result, bank::ModuleBank};

/// Loss and its gradient with respect to the network output.
pub type LossFn = fn(&State, &State) -> (f64, State);

/// Residuals above these after an exhausted budget trigger one extra
/// iteration for the following passes.
const FWD_RESIDUAL_BUMP: f64 = 1e1;
const BWD_RESIDUAL_BUMP: f64 = 1e0;

/// A layer-parallel network: one [`ModuleBank`] per worker plus the cycle
/// knobs of its two pass directions.
pub struct LayerParallelNet {
    pub bank: ModuleBank,
    /// Global step count of this problem resolution.
    pub steps: usize,
    pub fwd: CycleConfig,
    pub bwd: CycleConfig,
}

impl LayerParallelNet {
    pub fn forward<C>(
        &mut self,
        comm: &mut C,
        input: Option<&State>,
        guess: Option<&dyn Fn(usize) -> State>,
    ) -> Result<ForwardPass>
    where
        C: Communicator + ?Sized,
    {
        Ok(run_forward(
            comm,
            &mut self.bank,
            &self.fwd,
            self.steps,
            input,
            guess,
        )?)
    }

    pub fn backward<C>(
        &mut self,
        comm: &mut C,
        seed: Option<&State>,
        tape: &mgrit::Tape,
    ) -> Result<BackwardPass>
    where
        C: Communicator + ?Sized,
    {
        Ok(run_backward(
            comm,
            &mut self.bank,
            &self.bwd,
            self.steps,
            seed,
            tape,
        )?)
    }

    /// Early in training the cycles converge easily; as the weights sharpen
    /// the same budget can start falling short. Grow it one iteration at a
    /// time when a pass ends far from its tolerance.
    pub fn widen_budgets(&mut self, fwd: &CycleStats, bwd: &CycleStats) {
        if !fwd.converged && fwd.final_residual() > FWD_RESIDUAL_BUMP {
            self.fwd.max_iters += 1;
            info!(
                "forward residual {:.3e}, budget now {} iterations",
                fwd.final_residual(),
                self.fwd.max_iters
            );
        }
        if !bwd.converged && bwd.final_residual() > BWD_RESIDUAL_BUMP {
            self.bwd.max_iters += 1;
            info!(
                "backward residual {:.3e}, budget now {} iterations",
                bwd.final_residual(),
                self.bwd.max_iters
            );
        }
    }
}

/// Mean squared error over every entry of the batch, with the gradient
/// seeding a backward pass.
pub fn mse(output: &State, target: &State) -> (f64, State) {
    let diff = output - target;
    let n = diff.len() as f64;
    let loss = diff.iter().map(|d| d * d).sum::<f64>() / n;
    (loss, diff * (2.0 / n))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layers::{OdeStep, StepModule};
    use ndarray::array;
    use std::collections::BTreeMap;

    fn tiny_net() -> LayerParallelNet {
        let modules: BTreeMap<usize, Box<dyn StepModule>> =
            [(0usize, Box::new(OdeStep::zeroed(2)) as Box<dyn StepModule>)].into();
        LayerParallelNet {
            bank: ModuleBank::new(2, 1.0, modules, Box::new(|| Box::new(OdeStep::zeroed(2)))),
            steps: 1,
            fwd: CycleConfig::default(),
            bwd: CycleConfig::default(),
        }
    }

    fn stats(residual: f64, converged: bool) -> CycleStats {
        CycleStats {
            iters: 1,
            residuals: vec![residual],
            converged,
        }
    }

    #[test]
    fn budgets_grow_only_on_a_badly_missed_tolerance() {
        let mut net = tiny_net();
        let fwd_iters = net.fwd.max_iters;
        let bwd_iters = net.bwd.max_iters;

        // converged passes never grow the budget, however large the residual
        net.widen_budgets(&stats(1e3, true), &stats(1e3, true));
        assert_eq!(net.fwd.max_iters, fwd_iters);
        assert_eq!(net.bwd.max_iters, bwd_iters);

        // a near miss is left alone too
        net.widen_budgets(&stats(1e-3, false), &stats(1e-3, false));
        assert_eq!(net.fwd.max_iters, fwd_iters);

        net.widen_budgets(&stats(5e1, false), &stats(5e0, false));
        assert_eq!(net.fwd.max_iters, fwd_iters + 1);
        assert_eq!(net.bwd.max_iters, bwd_iters + 1);
    }

    #[test]
    fn mse_of_a_perfect_fit_is_zero() {
        let y = array![[1.0, -2.0], [0.5, 3.0]];
        let (loss, seed) = mse(&y, &y);
        assert_eq!(loss, 0.0);
        assert!(seed.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn mse_gradient_matches_finite_differences() {
        let y = array![[0.4, -1.2]];
        let t = array![[1.0, 0.0]];
        let eps = 1e-7;

        let (_, seed) = mse(&y, &t);
        for idx in [(0, 0), (0, 1)] {
            let mut yp = y.clone();
            let mut ym = y.clone();
            yp[idx] += eps;
            ym[idx] -= eps;
            let numeric = (mse(&yp, &t).0 - mse(&ym, &t).0) / (2.0 * eps);
            assert!((seed[idx] - numeric).abs() < 1e-8);
        }
    }
}
