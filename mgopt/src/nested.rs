use std::collections::BTreeMap;

use halo::Communicator;
use log::info;
use mgrit::{CycleConfig, State};
use timegrid::{ConfigError, Partition, transfer};

use crate::{
    Result,
    bank::ModuleBank,
    layers::StepModule,
    net::{LayerParallelNet, LossFn},
    optimizer::Optimizer,
    solver::relax_step,
};

/// One problem resolution of the optimization chain: the network at that
/// resolution plus the update rule applied to it.
pub struct MgOptLevel {
    pub net: LayerParallelNet,
    pub opt: Box<dyn Optimizer>,
}

/// Geometry of the resolution chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Step count of the finest resolution.
    pub total_steps: usize,
    /// Step-count ratio between adjacent resolutions.
    pub rfactor: usize,
    /// Number of resolutions, finest included.
    pub depth: usize,
    pub width: usize,
    /// Integration horizon; `dt` at each resolution is `t_final / steps`.
    pub t_final: f64,
    pub fwd: CycleConfig,
    pub bwd: CycleConfig,
}

impl ChainConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.depth == 0 {
            return Err(ConfigError::ZeroSized {
                what: "resolution count",
            });
        }
        if self.width == 0 {
            return Err(ConfigError::ZeroSized { what: "state width" });
        }
        if self.rfactor < 2 {
            return Err(ConfigError::CoarseningTooWeak {
                level: 0,
                cfactor: self.rfactor,
            });
        }

        let span = self.rfactor.pow(self.depth as u32 - 1);
        if self.total_steps % span != 0 {
            return Err(ConfigError::StepsNotRefinable {
                steps: self.total_steps,
                rfactor: span,
            });
        }
        Ok(())
    }

    fn steps_at(&self, level: usize) -> usize {
        self.total_steps / self.rfactor.pow(level as u32)
    }
}

/// The chain of networks nested iteration and MG/Opt cycle over, finest
/// first. Step intervals at every resolution divide identically across the
/// worker group, so parameter transfer between adjacent resolutions is a
/// purely local block average or replication.
pub struct NestedIteration {
    pub levels: Vec<MgOptLevel>,
    pub rfactor: usize,
}

impl NestedIteration {
    /// Builds the chain, each rank instantiating only the modules of its own
    /// step interval at every resolution.
    pub fn build<C, F, O>(comm: &C, cfg: &ChainConfig, module_factory: F, opt_factory: O) -> Result<Self>
    where
        C: Communicator + ?Sized,
        F: Fn() -> Box<dyn StepModule> + Clone + Send + 'static,
        O: Fn() -> Box<dyn Optimizer>,
    {
        cfg.validate()?;

        let mut levels = Vec::with_capacity(cfg.depth);
        for k in 0..cfg.depth {
            let steps = cfg.steps_at(k);
            let partition = Partition::new(steps, comm.size())?;

            let modules: BTreeMap<usize, Box<dyn StepModule>> = partition
                .steps_for(comm.rank())
                .map(|i| (i, module_factory()))
                .collect();

            let bank = ModuleBank::new(
                cfg.width,
                cfg.t_final / steps as f64,
                modules,
                Box::new(module_factory.clone()),
            );
            let net = LayerParallelNet {
                bank,
                steps,
                fwd: cfg.fwd.clone(),
                bwd: cfg.bwd.clone(),
            };
            levels.push(MgOptLevel {
                net,
                opt: opt_factory(),
            });
        }

        Ok(Self {
            levels,
            rfactor: cfg.rfactor,
        })
    }

    /// Trains coarsest to finest, replicating each trained resolution's
    /// parameters into the next finer one as a warm start.
    ///
    /// # Arguments
    /// * `data` - `(input, target)` batches, consulted on the root only.
    /// * `passes` - Relaxation steps per resolution.
    ///
    /// # Returns
    /// The loss after every step, coarsest resolution first.
    pub fn warm_start<C>(
        &mut self,
        comm: &mut C,
        data: Option<&[(State, State)]>,
        passes: usize,
        loss: LossFn,
    ) -> Result<Vec<f64>>
    where
        C: Communicator + ?Sized,
    {
        let mut cursor = 0usize;
        let mut losses = Vec::new();

        for k in (0..self.levels.len()).rev() {
            for _ in 0..passes {
                let l = relax_step(comm, &mut self.levels[k], data, &mut cursor, None, loss)?;
                losses.push(l);
            }
            info!(
                "nested iteration: {} steps done at {} layers",
                passes, self.levels[k].net.steps
            );

            if k > 0 {
                let per = self.levels[k].net.bank.layer_param_len();
                let coarse = self.levels[k].net.bank.params_flat();
                let fine = transfer::prolong_params(&coarse, per, self.rfactor);
                self.levels[k - 1].net.bank.set_params_flat(&fine)?;
            }
        }

        Ok(losses)
    }
}
