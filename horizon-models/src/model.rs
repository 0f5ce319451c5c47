//! The forecast-model capability and its dispatch.

use horizon_core::{ExperimentConfig, HorizonError, ModelVariant};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named parameter tensor in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorState {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Serializable snapshot of a model's trainable parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    pub variant: ModelVariant,
    pub tensors: BTreeMap<String, TensorState>,
}

/// A trainable forecasting model.
///
/// `forward` maps `(batch, seq_len, channels)` to
/// `(batch, pred_len, channels)`. Gradients accumulate across `backward`
/// calls until `zero_grad`. The flat parameter/gradient views use one
/// canonical order, so an optimizer's state stays tied to this model's
/// parameter set for the model's whole life.
pub trait ForecastModel: Send {
    /// Which architecture this is.
    fn variant(&self) -> ModelVariant;

    /// Forward evaluation.
    fn forward(&self, x: &Array3<f64>) -> Array3<f64>;

    /// Accumulate parameter gradients for `d loss / d output = grad_out`.
    fn backward(&mut self, x: &Array3<f64>, grad_out: &Array3<f64>);

    /// Clear accumulated gradients.
    fn zero_grad(&mut self);

    /// All parameters, flattened in canonical order.
    fn parameters(&self) -> Vec<f64>;

    /// All gradients, flattened in the same order as [`Self::parameters`].
    fn gradients(&self) -> Vec<f64>;

    /// Add `delta` elementwise to the parameters, in canonical order.
    fn apply_update(&mut self, delta: &[f64]);

    /// Total number of trainable parameters.
    fn param_count(&self) -> usize {
        self.parameters().len()
    }

    /// Snapshot the parameters for checkpointing.
    fn state(&self) -> ModelState;

    /// Restore parameters from a snapshot. Fails on variant or shape
    /// mismatch.
    fn load_state(&mut self, state: &ModelState) -> Result<(), HorizonError>;
}

/// Construct the configured architecture.
pub fn build_model(cfg: &ExperimentConfig) -> Result<Box<dyn ForecastModel>, HorizonError> {
    cfg.validate()?;
    Ok(match cfg.model {
        ModelVariant::DLinear => Box::new(crate::dlinear::DLinear::new(cfg)),
        ModelVariant::PatchTst => Box::new(crate::patchtst::PatchTst::new(cfg)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_core::config::ModelVariant;

    #[test]
    fn test_build_model_dispatch() {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.seq_len = 16;
        cfg.pred_len = 4;
        cfg.enc_in = 2;
        let model = build_model(&cfg).unwrap();
        assert_eq!(model.variant(), ModelVariant::DLinear);

        cfg.model = ModelVariant::PatchTst;
        cfg.patch_len = 8;
        cfg.stride = 4;
        let model = build_model(&cfg).unwrap();
        assert_eq!(model.variant(), ModelVariant::PatchTst);
    }

    #[test]
    fn test_build_model_rejects_invalid_config() {
        let mut cfg = ExperimentConfig::new(ModelVariant::PatchTst);
        cfg.patch_len = 0;
        assert!(build_model(&cfg).is_err());
    }
}
