//! Linear-decomposition forecaster.
//!
//! Splits each input window into a moving-average trend and a seasonal
//! remainder, then maps each component from `seq_len` to `pred_len` with a
//! linear head (per channel, or shared across channels). Weights start at
//! `1/seq_len`, so the untrained model predicts the window mean.

use crate::linear::Linear;
use crate::model::{ForecastModel, ModelState, TensorState};
use horizon_core::{ExperimentConfig, HorizonError, ModelVariant};
use ndarray::{s, Array2, Array3};
use std::collections::BTreeMap;

pub struct DLinear {
    seq_len: usize,
    pred_len: usize,
    channels: usize,
    individual: bool,
    kernel: usize,
    seasonal: Vec<Linear>,
    trend: Vec<Linear>,
}

impl DLinear {
    pub fn new(cfg: &ExperimentConfig) -> Self {
        let heads = if cfg.individual { cfg.enc_in } else { 1 };
        let init = 1.0 / cfg.seq_len as f64;
        Self {
            seq_len: cfg.seq_len,
            pred_len: cfg.pred_len,
            channels: cfg.enc_in,
            individual: cfg.individual,
            kernel: cfg.moving_avg,
            seasonal: (0..heads)
                .map(|_| Linear::constant(cfg.pred_len, cfg.seq_len, init))
                .collect(),
            trend: (0..heads)
                .map(|_| Linear::constant(cfg.pred_len, cfg.seq_len, init))
                .collect(),
        }
    }

    fn head(&self, channel: usize) -> usize {
        if self.individual {
            channel
        } else {
            0
        }
    }

    /// Moving-average trend with edge-replicated padding, plus the seasonal
    /// remainder. Output length equals input length for any kernel size.
    fn decompose(&self, x: &Array3<f64>) -> (Array3<f64>, Array3<f64>) {
        let (batch, len, channels) = x.dim();
        let front = (self.kernel - 1) / 2;
        let mut trend = Array3::zeros((batch, len, channels));
        for b in 0..batch {
            for c in 0..channels {
                for t in 0..len {
                    let mut sum = 0.0;
                    for k in 0..self.kernel {
                        let idx = (t + k).saturating_sub(front).min(len - 1);
                        sum += x[[b, idx, c]];
                    }
                    trend[[b, t, c]] = sum / self.kernel as f64;
                }
            }
        }
        let seasonal = x - &trend;
        (seasonal, trend)
    }

    fn channel(data: &Array3<f64>, c: usize) -> Array2<f64> {
        data.slice(s![.., .., c]).to_owned()
    }
}

impl ForecastModel for DLinear {
    fn variant(&self) -> ModelVariant {
        ModelVariant::DLinear
    }

    fn forward(&self, x: &Array3<f64>) -> Array3<f64> {
        let (batch, _, channels) = x.dim();
        let (seasonal, trend) = self.decompose(x);
        let mut out = Array3::zeros((batch, self.pred_len, channels));
        for c in 0..channels {
            let h = self.head(c);
            let y = self.seasonal[h].forward(&Self::channel(&seasonal, c))
                + self.trend[h].forward(&Self::channel(&trend, c));
            out.slice_mut(s![.., .., c]).assign(&y);
        }
        out
    }

    fn backward(&mut self, x: &Array3<f64>, grad_out: &Array3<f64>) {
        let (seasonal, trend) = self.decompose(x);
        let channels = x.dim().2;
        for c in 0..channels {
            let h = self.head(c);
            let g = grad_out.slice(s![.., .., c]).to_owned();
            self.seasonal[h].backward(&Self::channel(&seasonal, c), &g);
            self.trend[h].backward(&Self::channel(&trend, c), &g);
        }
    }

    fn zero_grad(&mut self) {
        for layer in self.seasonal.iter_mut().chain(self.trend.iter_mut()) {
            layer.zero_grad();
        }
    }

    fn parameters(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for layer in self.seasonal.iter().chain(self.trend.iter()) {
            layer.collect_params(&mut out);
        }
        out
    }

    fn gradients(&self) -> Vec<f64> {
        let mut out = Vec::new();
        for layer in self.seasonal.iter().chain(self.trend.iter()) {
            layer.collect_grads(&mut out);
        }
        out
    }

    fn apply_update(&mut self, delta: &[f64]) {
        let mut it = delta.iter();
        for layer in self.seasonal.iter_mut().chain(self.trend.iter_mut()) {
            layer.apply_update(&mut it);
        }
    }

    fn state(&self) -> ModelState {
        let mut tensors = BTreeMap::new();
        for (name, layers) in [("seasonal", &self.seasonal), ("trend", &self.trend)] {
            for (i, layer) in layers.iter().enumerate() {
                tensors.insert(format!("{name}.{i}.weight"), layer.weight_state());
                tensors.insert(format!("{name}.{i}.bias"), layer.bias_state());
            }
        }
        ModelState {
            variant: ModelVariant::DLinear,
            tensors,
        }
    }

    fn load_state(&mut self, state: &ModelState) -> Result<(), HorizonError> {
        if state.variant != ModelVariant::DLinear {
            return Err(HorizonError::shape(format!(
                "checkpoint holds {:?}, model is DLinear",
                state.variant
            )));
        }
        let fetch = |name: &str| -> Result<&TensorState, HorizonError> {
            state
                .tensors
                .get(name)
                .ok_or_else(|| HorizonError::shape(format!("checkpoint missing tensor {name}")))
        };
        for (name, layers) in [
            ("seasonal", &mut self.seasonal),
            ("trend", &mut self.trend),
        ] {
            for (i, layer) in layers.iter_mut().enumerate() {
                let weight = fetch(&format!("{name}.{i}.weight"))?;
                let bias = fetch(&format!("{name}.{i}.bias"))?;
                layer.load(weight, bias)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_core::config::ModelVariant as V;

    fn small_cfg() -> ExperimentConfig {
        let mut cfg = ExperimentConfig::new(V::DLinear);
        cfg.seq_len = 12;
        cfg.pred_len = 4;
        cfg.enc_in = 2;
        cfg.moving_avg = 5;
        cfg
    }

    #[test]
    fn test_forward_shape() {
        let cfg = small_cfg();
        let model = DLinear::new(&cfg);
        let x = Array3::from_elem((3, 12, 2), 1.5);
        let y = model.forward(&x);
        assert_eq!(y.shape(), &[3, 4, 2]);
    }

    #[test]
    fn test_untrained_model_predicts_window_mean() {
        // A constant series decomposes into trend = series, seasonal = 0,
        // and the 1/seq_len heads then reproduce the constant.
        let cfg = small_cfg();
        let model = DLinear::new(&cfg);
        let x = Array3::from_elem((2, 12, 2), 3.0);
        let y = model.forward(&x);
        for v in y.iter() {
            assert!((v - 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_param_count_shared_vs_individual() {
        let cfg = small_cfg();
        let per_head = 2 * (4 * 12 + 4);
        assert_eq!(DLinear::new(&cfg).param_count(), per_head);

        let mut cfg = small_cfg();
        cfg.individual = true;
        assert_eq!(DLinear::new(&cfg).param_count(), 2 * per_head);
    }

    #[test]
    fn test_state_round_trip() {
        let cfg = small_cfg();
        let mut model = DLinear::new(&cfg);
        let delta: Vec<f64> = (0..model.param_count()).map(|i| i as f64 * 0.01).collect();
        model.apply_update(&delta);
        let state = model.state();

        let mut restored = DLinear::new(&cfg);
        restored.load_state(&state).unwrap();
        assert_eq!(model.parameters(), restored.parameters());
    }

    #[test]
    fn test_gradient_points_downhill() {
        let cfg = small_cfg();
        let mut model = DLinear::new(&cfg);
        let x = Array3::from_shape_fn((4, 12, 2), |(b, t, _)| (b + t) as f64 * 0.1);
        let target = Array3::from_elem((4, 4, 2), 2.0);

        let before = horizon_core::metrics::mse(&model.forward(&x), &target);
        // One plain gradient step on the full MSE.
        let out = model.forward(&x);
        let n = out.len() as f64;
        let grad = (&out - &target).mapv(|v| 2.0 * v / n);
        model.backward(&x, &grad);
        let update: Vec<f64> = model.gradients().iter().map(|g| -0.05 * g).collect();
        model.apply_update(&update);
        let after = horizon_core::metrics::mse(&model.forward(&x), &target);
        assert!(after < before);
    }
}
