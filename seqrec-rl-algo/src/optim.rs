//! Flat-vector optimizers
//!
//! Parameters and gradients travel as flat `f32` vectors, matching the
//! [`QNetwork`](seqrec_rl_model::QNetwork) parameter contract.

use seqrec_rl_core::{AlgorithmConfig, OptimizerKind, RLError, Result};

/// Adam with bias-corrected first and second moments
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    eps: f32,
    beta1: f32,
    beta2: f32,
    m: Vec<f32>,
    v: Vec<f32>,
    t: i32,
}

impl Adam {
    /// Create with the given learning rate and epsilon
    pub fn new(lr: f64, eps: f64) -> Self {
        Self {
            lr: lr as f32,
            eps: eps as f32,
            beta1: 0.9,
            beta2: 0.999,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        if self.m.is_empty() {
            self.m = vec![0.0; params.len()];
            self.v = vec![0.0; params.len()];
        }
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);
        for i in 0..params.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grads[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grads[i] * grads[i];
            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;
            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Plain stochastic gradient descent
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
}

impl Sgd {
    /// Create with the given learning rate
    pub fn new(lr: f64) -> Self {
        Self { lr: lr as f32 }
    }

    fn step(&self, params: &mut [f32], grads: &[f32]) {
        for (p, g) in params.iter_mut().zip(grads.iter()) {
            *p -= self.lr * g;
        }
    }
}

/// The closed set of supported optimizers
#[derive(Debug, Clone)]
pub enum Optimizer {
    /// Adam with a fixed epsilon
    Adam(Adam),
    /// Plain SGD
    Sgd(Sgd),
}

impl Optimizer {
    /// Build the optimizer an [`AlgorithmConfig`] selects
    pub fn from_config(config: &AlgorithmConfig) -> Self {
        match config.optimizer {
            OptimizerKind::Adam => Self::Adam(Adam::new(config.learning_rate, config.adam_epsilon)),
            OptimizerKind::Sgd => Self::Sgd(Sgd::new(config.learning_rate)),
        }
    }

    /// Apply one update in place
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) -> Result<()> {
        if params.len() != grads.len() {
            return Err(RLError::DimensionMismatch {
                expected: params.len(),
                actual: grads.len(),
            });
        }
        match self {
            Self::Adam(adam) => adam.step(params, grads),
            Self::Sgd(sgd) => sgd.step(params, grads),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sgd_takes_a_plain_gradient_step() {
        let mut opt = Optimizer::Sgd(Sgd::new(0.1));
        let mut params = vec![1.0, -2.0];
        opt.step(&mut params, &[0.5, -0.5]).unwrap();
        assert_abs_diff_eq!(params[0], 0.95, epsilon = 1e-6);
        assert_abs_diff_eq!(params[1], -1.95, epsilon = 1e-6);
    }

    #[test]
    fn adam_first_step_moves_by_roughly_lr() {
        // with bias correction, the first Adam step is close to
        // lr * sign(grad) when eps is small relative to |grad|
        let mut opt = Optimizer::Adam(Adam::new(0.01, 1e-8));
        let mut params = vec![0.0];
        opt.step(&mut params, &[0.3]).unwrap();
        assert_abs_diff_eq!(params[0], -0.01, epsilon = 1e-4);
    }

    #[test]
    fn step_rejects_length_mismatch() {
        let mut opt = Optimizer::Sgd(Sgd::new(0.1));
        let mut params = vec![1.0, 2.0];
        assert!(opt.step(&mut params, &[0.5]).is_err());
    }
}
