//! Time-domain partitioning and the multigrid-in-time hierarchy.
//!
//! A run has `N` time steps, hence `N + 1` time points `0..=N`. The steps are
//! split evenly across `P` workers; worker `r` owns steps `[r·N/P, (r+1)·N/P)`
//! and is authoritative for the state at points `(r·N/P, (r+1)·N/P]` (the
//! results of its steps), with worker 0 also holding point 0, the global
//! input. Coarser levels keep every `cfactor`-th point of the level above.

mod error;
mod grid;
mod hierarchy;
mod partition;
pub mod transfer;

pub use error::ConfigError;
pub use grid::LocalGrid;
pub use hierarchy::{Hierarchy, LevelSpec};
pub use partition::Partition;
