use mgrit::State;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::Rng;

/// One trainable step of the layered recurrence.
///
/// A module advances a batch of states by one step of size `dt`; on a coarse
/// problem the same module is handed a proportionally larger `dt`. Parameters
/// cross module boundaries only as flat slices, so replication and the flat
/// optimizer view need no knowledge of the internals.
pub trait StepModule: Send {
    fn width(&self) -> usize;

    /// Flat parameter length; identical for every module of one network.
    fn param_len(&self) -> usize;

    fn params(&self) -> Vec<f64>;

    /// Installs `flat`. Callers guarantee `flat.len() == self.param_len()`.
    fn set_params(&mut self, flat: &[f64]);

    /// One explicit step of size `dt` from `x`.
    fn forward(&self, dt: f64, x: &State) -> State;

    /// Input and parameter cotangents of [`StepModule::forward`], linearized
    /// at `x` against the output cotangent `w`.
    fn vjp(&self, dt: f64, x: &State, w: &State) -> (State, Vec<f64>);
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Explicit-Euler residual step `x + dt * sigmoid(x Wᵀ + b)`.
///
/// The `dt` scaling keeps the step a perturbation of the identity, so the
/// same weights remain meaningful when the step count (and with it `dt`)
/// changes between problem resolutions.
pub struct OdeStep {
    w: Array2<f64>,
    b: Array1<f64>,
}

impl OdeStep {
    /// Uniform init in `±1/sqrt(width)`, biases at zero.
    pub fn new<R: Rng + ?Sized>(width: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (width as f64).sqrt();
        Self {
            w: Array2::random_using((width, width), Uniform::new(-bound, bound), rng),
            b: Array1::zeros(width),
        }
    }

    /// All-zero parameters; the step is then the identity map. Replica slots
    /// start here and are overwritten by the owner's parameters.
    pub fn zeroed(width: usize) -> Self {
        Self {
            w: Array2::zeros((width, width)),
            b: Array1::zeros(width),
        }
    }
}

impl StepModule for OdeStep {
    fn width(&self) -> usize {
        self.b.len()
    }

    fn param_len(&self) -> usize {
        self.w.len() + self.b.len()
    }

    fn params(&self) -> Vec<f64> {
        self.w.iter().chain(self.b.iter()).copied().collect()
    }

    fn set_params(&mut self, flat: &[f64]) {
        let n = self.w.len();
        for (dst, &v) in self.w.iter_mut().zip(flat) {
            *dst = v;
        }
        for (dst, &v) in self.b.iter_mut().zip(flat.iter().skip(n)) {
            *dst = v;
        }
    }

    fn forward(&self, dt: f64, x: &State) -> State {
        let z = x.dot(&self.w.t()) + &self.b;
        x + &(z.mapv(sigmoid) * dt)
    }

    fn vjp(&self, dt: f64, x: &State, w: &State) -> (State, Vec<f64>) {
        let z = x.dot(&self.w.t()) + &self.b;
        let s = z.mapv(sigmoid);
        // a = w ⊙ σ'(z), the cotangent entering the pre-activation
        let a = w * &(&s * &(1.0 - &s));

        let grad_x = w + &(a.dot(&self.w) * dt);
        let grad_w = a.t().dot(x) * dt;
        let grad_b = a.sum_axis(Axis(0)) * dt;

        let flat = grad_w.iter().chain(grad_b.iter()).copied().collect();
        (grad_x, flat)
    }
}
