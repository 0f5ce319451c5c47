//! Run configuration for the Horizon driver.
//!
//! An [`ExperimentConfig`] is built once at process start (from the CLI or a
//! JSON file) and treated as read-only for the rest of the run.

use crate::error::HorizonError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Forecasting architecture to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Moving-average decomposition with linear heads.
    DLinear,
    /// Patch projection network.
    PatchTst,
}

/// Feature selection policy for model inputs and loss targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    /// Univariate in, univariate out.
    S,
    /// Multivariate in, the last channel is the forecast target.
    Ms,
    /// Multivariate in, multivariate out.
    M,
}

/// Learning-rate adjustment policy.
///
/// `Tst` advances a one-cycle scheduler after every batch; the other policies
/// recompute the rate once per epoch from a closed-form table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePolicy {
    /// Halve the rate every epoch.
    Type1,
    /// Fixed epoch -> rate table.
    Type2,
    /// Hold for three epochs, then decay by 0.9 per epoch.
    Type3,
    /// Never change the rate.
    Constant,
    /// One-cycle warmup + cosine anneal, stepped per batch.
    Tst,
}

/// Which feature column holds the forecast target for rescaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFeature {
    /// The last column (the historical convention for these datasets).
    Last,
    /// An explicit column index.
    Index(usize),
}

/// Averaging policy for the forward-only evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalAverage {
    /// Mean of the per-batch running means. Later batches weigh less and the
    /// result depends on batch order; kept as the default for parity with
    /// previously recorded validation numbers.
    RunningMean,
    /// Plain sample-weighted mean over all batches.
    Weighted,
}

/// Immutable record of run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Model architecture.
    pub model: ModelVariant,
    /// Feature selection policy.
    #[serde(default = "default_features")]
    pub features: FeatureMode,
    /// Input window length.
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,
    /// Forecast horizon length.
    #[serde(default = "default_pred_len")]
    pub pred_len: usize,
    /// Number of input feature channels.
    #[serde(default = "default_enc_in")]
    pub enc_in: usize,
    /// Epoch budget. The loop always runs to the end of it.
    #[serde(default = "default_train_epochs")]
    pub train_epochs: usize,
    /// Early-stopping patience, in epochs.
    #[serde(default = "default_patience")]
    pub patience: usize,
    /// Batch size for every phase.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Peak learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Learning-rate adjustment policy.
    #[serde(default = "default_lradj")]
    pub lradj: SchedulePolicy,
    /// Warmup fraction for the one-cycle schedule, in (0, 1).
    #[serde(default = "default_pct_start")]
    pub pct_start: f64,
    /// Column used when inverting the normalization on reported arrays.
    #[serde(default = "default_target_feature")]
    pub target_feature: TargetFeature,
    /// Averaging policy for validation/test passes during training.
    #[serde(default = "default_eval_average")]
    pub eval_average: EvalAverage,
    /// One linear head per channel instead of shared weights (decomposition model).
    #[serde(default)]
    pub individual: bool,
    /// Moving-average kernel size for the series decomposition.
    #[serde(default = "default_moving_avg")]
    pub moving_avg: usize,
    /// Patch length (patch model).
    #[serde(default = "default_patch_len")]
    pub patch_len: usize,
    /// Patch stride (patch model).
    #[serde(default = "default_stride")]
    pub stride: usize,
    /// Patch embedding width (patch model).
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    /// Opt in to the backend's multi-device replication. The driver itself
    /// performs no parallel coordination.
    #[serde(default)]
    pub data_parallel: bool,
    /// Base directory for per-run checkpoints.
    #[serde(default = "default_checkpoints_dir")]
    pub checkpoints_dir: PathBuf,
    /// Base directory for per-run result artifacts.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Shared append-only training progress log.
    #[serde(default = "default_progress_log")]
    pub progress_log: PathBuf,
    /// Shared append-only test result log.
    #[serde(default = "default_result_log")]
    pub result_log: PathBuf,
    /// Seed for weight initialization.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_features() -> FeatureMode {
    FeatureMode::S
}

fn default_seq_len() -> usize {
    96
}

fn default_pred_len() -> usize {
    24
}

fn default_enc_in() -> usize {
    1
}

fn default_train_epochs() -> usize {
    10
}

fn default_patience() -> usize {
    3
}

fn default_batch_size() -> usize {
    32
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_lradj() -> SchedulePolicy {
    SchedulePolicy::Type3
}

fn default_pct_start() -> f64 {
    0.3
}

fn default_target_feature() -> TargetFeature {
    TargetFeature::Last
}

fn default_eval_average() -> EvalAverage {
    EvalAverage::RunningMean
}

fn default_moving_avg() -> usize {
    25
}

fn default_patch_len() -> usize {
    16
}

fn default_stride() -> usize {
    8
}

fn default_d_model() -> usize {
    16
}

fn default_checkpoints_dir() -> PathBuf {
    PathBuf::from("./checkpoints")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_progress_log() -> PathBuf {
    PathBuf::from("./training_progress.txt")
}

fn default_result_log() -> PathBuf {
    PathBuf::from("./result.txt")
}

fn default_seed() -> u64 {
    2021
}

impl ExperimentConfig {
    /// Minimal config for a given variant; everything else takes defaults.
    pub fn new(model: ModelVariant) -> Self {
        Self {
            model,
            features: default_features(),
            seq_len: default_seq_len(),
            pred_len: default_pred_len(),
            enc_in: default_enc_in(),
            train_epochs: default_train_epochs(),
            patience: default_patience(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            lradj: default_lradj(),
            pct_start: default_pct_start(),
            target_feature: default_target_feature(),
            eval_average: default_eval_average(),
            individual: false,
            moving_avg: default_moving_avg(),
            patch_len: default_patch_len(),
            stride: default_stride(),
            d_model: default_d_model(),
            data_parallel: false,
            checkpoints_dir: default_checkpoints_dir(),
            results_dir: default_results_dir(),
            progress_log: default_progress_log(),
            result_log: default_result_log(),
            seed: default_seed(),
        }
    }

    /// Channel the training/validation loss is computed on.
    ///
    /// `Ms` trains against the last channel. `S` and `M` both train against
    /// channel 0 — for `M` that means the loss covers only the first output
    /// channel, which is the behavior downstream results were produced with.
    pub fn loss_channel(&self) -> usize {
        match self.features {
            FeatureMode::Ms => self.enc_in - 1,
            FeatureMode::S | FeatureMode::M => 0,
        }
    }

    /// First channel of the inclusive feature tail used by the test pass.
    ///
    /// Unlike training, the test pass keeps every channel from this index on.
    pub fn eval_channel_start(&self) -> usize {
        self.loss_channel()
    }

    /// Resolved column index for rescaling.
    pub fn target_index(&self) -> usize {
        match self.target_feature {
            TargetFeature::Last => self.enc_in - 1,
            TargetFeature::Index(i) => i,
        }
    }

    /// Reject configurations the driver cannot run.
    pub fn validate(&self) -> Result<(), HorizonError> {
        if self.seq_len == 0 {
            return Err(HorizonError::config("seq_len must be positive"));
        }
        if self.pred_len == 0 {
            return Err(HorizonError::config("pred_len must be positive"));
        }
        if self.enc_in == 0 {
            return Err(HorizonError::config("enc_in must be positive"));
        }
        if self.batch_size == 0 {
            return Err(HorizonError::config("batch_size must be positive"));
        }
        if self.train_epochs == 0 {
            return Err(HorizonError::config("train_epochs must be positive"));
        }
        if !(self.pct_start > 0.0 && self.pct_start < 1.0) {
            return Err(HorizonError::config(format!(
                "pct_start must be in (0, 1), got {}",
                self.pct_start
            )));
        }
        if self.model == ModelVariant::PatchTst {
            if self.patch_len == 0 || self.stride == 0 || self.d_model == 0 {
                return Err(HorizonError::config(
                    "patch_len, stride, and d_model must be positive",
                ));
            }
            if self.patch_len > self.seq_len {
                return Err(HorizonError::config(format!(
                    "patch_len {} exceeds seq_len {}",
                    self.patch_len, self.seq_len
                )));
            }
        }
        if self.model == ModelVariant::DLinear && self.moving_avg == 0 {
            return Err(HorizonError::config("moving_avg must be positive"));
        }
        if let TargetFeature::Index(i) = self.target_feature {
            if i >= self.enc_in {
                return Err(HorizonError::config(format!(
                    "target feature index {} out of range for {} channels",
                    i, self.enc_in
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = ExperimentConfig::new(ModelVariant::DLinear);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.seq_len, 96);
        assert_eq!(cfg.lradj, SchedulePolicy::Type3);
        assert_eq!(cfg.eval_average, EvalAverage::RunningMean);
    }

    #[test]
    fn test_loss_channel_by_mode() {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.enc_in = 7;
        cfg.features = FeatureMode::Ms;
        assert_eq!(cfg.loss_channel(), 6);
        cfg.features = FeatureMode::S;
        assert_eq!(cfg.loss_channel(), 0);
        // M trains against channel 0 only, by convention.
        cfg.features = FeatureMode::M;
        assert_eq!(cfg.loss_channel(), 0);
    }

    #[test]
    fn test_target_index_resolution() {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.enc_in = 5;
        assert_eq!(cfg.target_index(), 4);
        cfg.target_feature = TargetFeature::Index(2);
        assert_eq!(cfg.target_index(), 2);
        cfg.target_feature = TargetFeature::Index(5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut cfg = ExperimentConfig::new(ModelVariant::PatchTst);
        cfg.patch_len = 200;
        cfg.seq_len = 96;
        assert!(cfg.validate().is_err());

        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.pred_len = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.pct_start = 1.5;
        assert!(cfg.validate().is_err());
    }
}
