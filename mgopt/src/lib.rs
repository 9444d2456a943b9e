//! Multilevel optimization of layer-parallel networks.
//!
//! A network is a composition of per-step modules spread over a worker
//! group; forward and backward passes run as parallel-in-time cycles through
//! the `mgrit` crate. On top of that, this crate trains the parameters: a
//! chain of the same network at several step-count resolutions, warm-started
//! coarsest-first by nested iteration and then improved by defect-corrected
//! optimization cycles.

mod bank;
mod error;
mod layers;
mod net;
mod nested;
mod optimizer;
mod solver;

pub use bank::{ModuleBank, ModuleFactory};
pub use error::{MgOptError, Result};
pub use layers::{OdeStep, StepModule};
pub use net::{LayerParallelNet, LossFn, mse};
pub use nested::{ChainConfig, MgOptLevel, NestedIteration};
pub use optimizer::{Momentum, Optimizer, Sgd};
pub use solver::{LineSearch, MgOptConfig, TrainStats, train};
