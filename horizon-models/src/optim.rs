//! Adam optimizer over a model's flat parameter vector.

use crate::model::ForecastModel;

/// Adam with bias-corrected moment estimates.
///
/// Moment buffers are lazily sized from the first `step`, tying this
/// optimizer to that model's parameter set; feeding it a different model is
/// a logic error.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: u64,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self::with_params(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(lr: f64, beta1: f64, beta2: f64, eps: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// Apply one update from the model's accumulated gradients, then clear
    /// them.
    pub fn step(&mut self, model: &mut dyn ForecastModel) {
        let grads = model.gradients();
        if self.m.is_empty() {
            self.m = vec![0.0; grads.len()];
            self.v = vec![0.0; grads.len()];
        }
        assert_eq!(
            grads.len(),
            self.m.len(),
            "optimizer state does not match model parameter set"
        );

        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        let mut delta = vec![0.0; grads.len()];
        for (i, g) in grads.iter().enumerate() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            delta[i] = -self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        model.apply_update(&delta);
        model.zero_grad();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlinear::DLinear;
    use horizon_core::config::{ExperimentConfig, ModelVariant};
    use horizon_core::metrics::mse;
    use ndarray::Array3;

    #[test]
    fn test_adam_reduces_loss() {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.seq_len = 8;
        cfg.pred_len = 2;
        cfg.enc_in = 1;
        cfg.moving_avg = 3;
        let mut model = DLinear::new(&cfg);
        let mut optim = Adam::new(0.01);

        let x = Array3::from_shape_fn((6, 8, 1), |(b, t, _)| (b as f64 * 0.3 + t as f64 * 0.1));
        let target = Array3::from_elem((6, 2, 1), 5.0);

        let initial = mse(&model.forward(&x), &target);
        for _ in 0..50 {
            let out = model.forward(&x);
            let n = out.len() as f64;
            let grad = (&out - &target).mapv(|v| 2.0 * v / n);
            model.backward(&x, &grad);
            optim.step(&mut model);
        }
        let trained = mse(&model.forward(&x), &target);
        assert!(trained < initial * 0.5, "loss {initial} -> {trained}");
    }

    #[test]
    fn test_step_clears_gradients() {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.seq_len = 8;
        cfg.pred_len = 2;
        cfg.enc_in = 1;
        let mut model = DLinear::new(&cfg);
        let mut optim = Adam::new(0.001);

        let x = Array3::from_elem((2, 8, 1), 1.0);
        let grad = Array3::from_elem((2, 2, 1), 1.0);
        model.backward(&x, &grad);
        assert!(model.gradients().iter().any(|g| *g != 0.0));
        optim.step(&mut model);
        assert!(model.gradients().iter().all(|g| *g == 0.0));
    }

    #[test]
    fn test_set_lr() {
        let mut optim = Adam::new(0.1);
        assert_eq!(optim.lr(), 0.1);
        optim.set_lr(0.05);
        assert_eq!(optim.lr(), 0.05);
    }
}
