use crate::{Result, State};

/// The collection of per-step modules one worker can evaluate.
///
/// Layers are indexed by the fine step they discretize: applying layer `i`
/// to the state at point `i` yields the state at point `i + 1`. On coarse
/// levels the same layer stands in for `dt_steps` fine steps at once
/// (rediscretization by injection); how the module absorbs the larger
/// interval is its own business.
///
/// A worker owns the layers of its step interval. The cycle additionally
/// installs read-only replicas of the few foreign layers its coarse-grid and
/// adjoint transitions touch; resolving any other layer is a
/// [`crate::MgritError::MissingLayer`] defect.
pub trait StepBank {
    /// State width every layer consumes and produces.
    fn width(&self) -> usize;

    /// Flat parameter length of a single layer.
    fn param_len(&self) -> usize;

    /// Applies layer `layer` over `dt_steps` fine steps.
    fn apply(&self, layer: usize, dt_steps: usize, x: &State) -> Result<State>;

    /// Input cotangent of [`StepBank::apply`], linearized at `x`.
    fn vjp_state(&self, layer: usize, dt_steps: usize, x: &State, w: &State) -> Result<State>;

    /// Parameter cotangent of the fine-level transition at `layer`,
    /// linearized at `x` against the output cotangent `w`.
    fn vjp_params(&self, layer: usize, x: &State, w: &State) -> Result<Vec<f64>>;

    /// Flat parameters of `layer`, for replication onto a neighbor.
    fn export_params(&self, layer: usize) -> Result<Vec<f64>>;

    /// Installs a replica of a foreign `layer`. Replicas are evaluated, never
    /// trained; their gradient contributions are handed back to the owner.
    fn import_replica(&mut self, layer: usize, params: &[f64]) -> Result<()>;
}
