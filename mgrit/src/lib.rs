//! Multigrid-in-time (MGRIT) evaluation of layered step compositions.
//!
//! A sequential composition `x_{i+1} = Φ_i(x_i)` over `N` steps is solved in
//! parallel by splitting the time axis across workers and iterating a
//! multilevel cycle: relaxation sweeps on each level, restriction to a
//! thinned grid, a blocking sequential solve at the coarsest level and
//! correction back up. The backward pass runs the same machinery on the
//! reversed index space, with each transition replaced by the forward step's
//! vector-Jacobian product against checkpointed states.
//!
//! [`run_forward`] and [`run_backward`] are the entry points; the per-step
//! modules come in through the [`StepBank`] trait.

mod config;
mod error;
mod level;
mod pass;
mod solver;
mod state;
mod step;
mod tape;

pub use config::{CycleConfig, RelaxMode};
pub use error::{MgritError, Result};
pub use pass::{BackwardPass, ForwardPass, run_backward, run_forward};
pub use solver::CycleStats;
pub use state::State;
pub use step::StepBank;
pub use tape::Tape;
