/// First-order update rule over a flat parameter vector.
///
/// Optimizers act on the owner's concatenated parameters, one worker at a
/// time; the layout is [`crate::ModuleBank::params_flat`].
pub trait Optimizer: Send {
    fn update(&mut self, params: &mut [f64], grads: &[f64]);
}

/// Plain gradient descent.
pub struct Sgd {
    pub lr: f64,
}

impl Optimizer for Sgd {
    fn update(&mut self, params: &mut [f64], grads: &[f64]) {
        for (p, g) in params.iter_mut().zip(grads) {
            *p -= self.lr * g;
        }
    }
}

/// Heavy-ball momentum. The velocity buffer sizes itself to the first
/// parameter vector it sees.
pub struct Momentum {
    pub lr: f64,
    pub beta: f64,
    velocity: Vec<f64>,
}

impl Momentum {
    pub fn new(lr: f64, beta: f64) -> Self {
        Self {
            lr,
            beta,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for Momentum {
    fn update(&mut self, params: &mut [f64], grads: &[f64]) {
        if self.velocity.len() != params.len() {
            self.velocity = vec![0.0; params.len()];
        }

        for ((p, g), v) in params.iter_mut().zip(grads).zip(&mut self.velocity) {
            *v = self.beta * *v + g;
            *p -= self.lr * *v;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sgd_moves_against_the_gradient() {
        let mut opt = Sgd { lr: 0.5 };
        let mut params = vec![1.0, -2.0];
        opt.update(&mut params, &[2.0, -4.0]);
        assert_eq!(params, vec![0.0, 0.0]);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut opt = Momentum::new(0.1, 0.5);
        let mut params = vec![0.0];

        opt.update(&mut params, &[1.0]); // v = 1.0
        assert!((params[0] - (-0.1)).abs() < 1e-15);

        opt.update(&mut params, &[1.0]); // v = 1.5
        assert!((params[0] - (-0.25)).abs() < 1e-15);
    }
}
