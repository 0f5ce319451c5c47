//! The experiment runner.
//!
//! Drives the configured model through training, validation, test, and
//! prediction over the phase sources a [`DataProvider`] hands out. The loss
//! is always MSE on the configured loss channel; the test pass additionally
//! keeps the inclusive feature tail, which is wider than the training slice
//! on multivariate runs.

use horizon_core::config::{EvalAverage, SchedulePolicy};
use horizon_core::{
    Batch, DataProvider, DataSource, EpochRecord, ExperimentConfig, FileSink, HorizonError,
    MetricReport, ProgressSink, ResultRecord, RunningMeanTrace, SampleMean, Split,
};
use horizon_models::{
    adjust_learning_rate, build_model, load_checkpoint, save_checkpoint, Adam, ForecastModel,
    OneCycle,
};
use ndarray::{s, Array2, Array3, Axis};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::stopping::{EarlyStopping, StopSignal};

/// Summary of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    /// Last-epoch sample-weighted training MSE.
    pub train_mse: f64,
    pub vali_mse: f64,
    pub test_mse: f64,
    pub checkpoint: PathBuf,
}

/// Owns one model instance and its phase data sources for one configuration.
pub struct Experiment {
    cfg: ExperimentConfig,
    model: Box<dyn ForecastModel>,
    provider: Box<dyn DataProvider>,
    progress: Arc<dyn ProgressSink>,
    results: Arc<dyn ProgressSink>,
}

impl Experiment {
    /// Build the configured model and wire the default file sinks.
    pub fn new(cfg: ExperimentConfig, provider: Box<dyn DataProvider>) -> Result<Self, HorizonError> {
        cfg.validate()?;
        let model = build_model(&cfg)?;
        if cfg.data_parallel {
            // Replication belongs to the tensor backend; this build is
            // single-device and the flag changes nothing.
            tracing::info!("data_parallel requested; running single-device");
        }
        let progress = Arc::new(FileSink::new(&cfg.progress_log));
        let results = Arc::new(FileSink::new(&cfg.result_log));
        Ok(Self {
            cfg,
            model,
            provider,
            progress,
            results,
        })
    }

    /// Replace the progress and result sinks.
    pub fn with_sinks(
        mut self,
        progress: Arc<dyn ProgressSink>,
        results: Arc<dyn ProgressSink>,
    ) -> Self {
        self.progress = progress;
        self.results = results;
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.cfg
    }

    pub fn model(&self) -> &dyn ForecastModel {
        self.model.as_ref()
    }

    /// Run the full epoch budget, log one progress block per epoch, and
    /// persist the final parameters under `run_id`.
    pub fn train(&mut self, run_id: &str) -> Result<TrainReport, HorizonError> {
        let train_src = self.provider.source(Split::Train)?;
        let vali_src = self.provider.source(Split::Val)?;
        let test_src = self.provider.source(Split::Test)?;

        let steps = train_src.num_batches();
        if steps == 0 {
            return Err(HorizonError::data_source("training source yields no batches"));
        }

        let mut optim = Adam::new(self.cfg.learning_rate);
        let mut scheduler = OneCycle::for_run(
            self.cfg.learning_rate,
            self.cfg.train_epochs,
            steps,
            self.cfg.pct_start,
        )?;
        // Tracked and logged, but the loop always runs the full budget.
        let mut stopper = EarlyStopping::new(self.cfg.patience);

        let mut last = (0.0, 0.0, 0.0);
        for epoch in 1..=self.cfg.train_epochs {
            let epoch_start = Instant::now();
            let mut train_loss = SampleMean::new();

            for batch in train_src.batches() {
                self.model.zero_grad();
                let (loss, grad) = self.loss_and_grad(&batch);
                train_loss.add(loss, batch.len());
                self.model.backward(&batch.x, &grad);
                optim.step(self.model.as_mut());

                if self.cfg.lradj == SchedulePolicy::Tst {
                    adjust_learning_rate(&mut optim, Some(&scheduler), epoch, &self.cfg);
                    scheduler.step();
                }
            }

            let train_mse = train_loss.mean();
            let vali_mse = self.evaluate(vali_src.as_ref());
            let test_mse = self.evaluate(test_src.as_ref());
            last = (train_mse, vali_mse, test_mse);

            let record = EpochRecord {
                run_id: run_id.to_string(),
                epoch,
                steps,
                cost_secs: epoch_start.elapsed().as_secs_f64(),
                train_mse,
                vali_mse,
                test_mse,
            };
            tracing::info!(
                epoch,
                steps,
                train_mse,
                vali_mse,
                test_mse,
                cost_secs = record.cost_secs,
                "epoch complete"
            );
            self.progress.append(&record.to_string())?;

            if stopper.update(vali_mse) == StopSignal::Stop {
                tracing::debug!(epoch, "validation patience exhausted; budget continues");
            }

            if self.cfg.lradj != SchedulePolicy::Tst {
                adjust_learning_rate(&mut optim, Some(&scheduler), epoch, &self.cfg);
            } else {
                tracing::debug!(lr = scheduler.last_lr(), "one-cycle rate after epoch");
            }
        }

        let checkpoint = save_checkpoint(&self.cfg.checkpoints_dir, run_id, &self.model.state())?;
        tracing::info!(path = %checkpoint.display(), "checkpoint saved");

        Ok(TrainReport {
            epochs: self.cfg.train_epochs,
            steps_per_epoch: steps,
            train_mse: last.0,
            vali_mse: last.1,
            test_mse: last.2,
            checkpoint,
        })
    }

    /// Forward-only pass returning the phase's scalar MSE under the
    /// configured averaging policy.
    pub fn evaluate(&self, source: &dyn DataSource) -> f64 {
        match self.cfg.eval_average {
            EvalAverage::RunningMean => {
                let mut acc = RunningMeanTrace::new();
                for batch in source.batches() {
                    let out = self.model.forward(&batch.x);
                    acc.add(self.channel_mse(&out, &batch.y), batch.len());
                }
                acc.mean()
            }
            EvalAverage::Weighted => {
                let mut acc = SampleMean::new();
                for batch in source.batches() {
                    let out = self.model.forward(&batch.x);
                    acc.add(self.channel_mse(&out, &batch.y), batch.len());
                }
                acc.mean()
            }
        }
    }

    /// Forward-only test pass: aggregate metrics over every window, one
    /// result block, and rescaled prediction/target artifacts.
    pub fn test(&mut self, run_id: &str, load: bool) -> Result<MetricReport, HorizonError> {
        let source = self.provider.source(Split::Test)?;
        if load {
            tracing::info!(run_id, "loading model");
            let state = load_checkpoint(&self.cfg.checkpoints_dir, run_id)?;
            self.model.load_state(&state)?;
        }

        let start = self.cfg.eval_channel_start();
        let mut preds: Vec<Array3<f64>> = Vec::new();
        let mut trues: Vec<Array3<f64>> = Vec::new();
        for batch in source.batches() {
            let out = self.model.forward(&batch.x);
            preds.push(tail_slice(&out, self.cfg.pred_len, start));
            trues.push(tail_slice(&batch.y, self.cfg.pred_len, start));
        }
        let preds = concat_windows(&preds)?;
        let trues = concat_windows(&trues)?;

        // Metrics over the whole concatenated set, on normalized values;
        // MAPE has no zero guard, so a zero target propagates as non-finite.
        let report = MetricReport::compute(&preds, &trues);
        tracing::info!(%report, "test metrics");
        self.results.append(
            &ResultRecord {
                run_id: run_id.to_string(),
                report,
            }
            .to_string(),
        )?;

        // Artifacts are saved in original units, using the target column's
        // scaler statistics captured when the source was built.
        let scaler = source.scaler();
        let target = self.cfg.target_index();
        let preds = scaler.inverse_feature(&preds, target);
        let trues = scaler.inverse_feature(&trues, target);
        crate::artifacts::save_array(&self.cfg.results_dir, run_id, "pred.json", &preds)?;
        crate::artifacts::save_array(&self.cfg.results_dir, run_id, "true.json", &trues)?;

        Ok(report)
    }

    /// Forward-only pass over the prediction source. Targets are fetched
    /// but unused, and no rescaling is applied; the artifact holds raw
    /// model outputs shaped `(count, horizon, channels)`.
    pub fn predict(&mut self, run_id: &str, load: bool) -> Result<Array3<f64>, HorizonError> {
        let source = self.provider.source(Split::Pred)?;
        if load {
            tracing::info!(run_id, "loading model");
            let state = load_checkpoint(&self.cfg.checkpoints_dir, run_id)?;
            self.model.load_state(&state)?;
        }

        let mut preds: Vec<Array3<f64>> = Vec::new();
        for batch in source.batches() {
            preds.push(self.model.forward(&batch.x));
        }
        let preds = concat_windows(&preds)?;
        crate::artifacts::save_array(&self.cfg.results_dir, run_id, "real_prediction.json", &preds)?;
        Ok(preds)
    }

    /// MSE between the horizon tail of the output and target on the loss
    /// channel.
    fn channel_mse(&self, out: &Array3<f64>, y: &Array3<f64>) -> f64 {
        let ch = self.cfg.loss_channel();
        let p = channel_tail(out, self.cfg.pred_len, ch);
        let t = channel_tail(y, self.cfg.pred_len, ch);
        mse2(&p, &t)
    }

    /// Loss plus its gradient with respect to the full model output. Only
    /// the loss channel's tail carries gradient; everything else is zero.
    fn loss_and_grad(&self, batch: &Batch) -> (f64, Array3<f64>) {
        let out = self.model.forward(&batch.x);
        let ch = self.cfg.loss_channel();
        let p = channel_tail(&out, self.cfg.pred_len, ch);
        let t = channel_tail(&batch.y, self.cfg.pred_len, ch);
        let loss = mse2(&p, &t);

        let n = p.len() as f64;
        let g2 = (&p - &t).mapv(|v| 2.0 * v / n);
        let steps = out.shape()[1];
        let mut grad = Array3::zeros(out.raw_dim());
        grad.slice_mut(s![.., steps - self.cfg.pred_len.., ch])
            .assign(&g2);
        (loss, grad)
    }
}

/// Last `pred_len` steps of one channel, as `(batch, pred_len)`.
fn channel_tail(a: &Array3<f64>, pred_len: usize, channel: usize) -> Array2<f64> {
    let steps = a.shape()[1];
    a.slice(s![.., steps - pred_len.., channel]).to_owned()
}

/// Last `pred_len` steps of the inclusive channel tail, as a 3-D array.
fn tail_slice(a: &Array3<f64>, pred_len: usize, channel_start: usize) -> Array3<f64> {
    let steps = a.shape()[1];
    a.slice(s![.., steps - pred_len.., channel_start..]).to_owned()
}

fn concat_windows(parts: &[Array3<f64>]) -> Result<Array3<f64>, HorizonError> {
    if parts.is_empty() {
        return Err(HorizonError::data_source("source yields no batches"));
    }
    let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
    ndarray::concatenate(Axis(0), &views).map_err(|e| HorizonError::shape(e.to_string()))
}

fn mse2(pred: &Array2<f64>, truth: &Array2<f64>) -> f64 {
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(truth.iter())
        .map(|(p, t)| (p - t) * (p - t))
        .sum::<f64>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_core::config::ModelVariant;
    use horizon_core::StaticProvider;
    use ndarray::Array3;

    fn batch(size: usize, seq_len: usize, pred_len: usize, channels: usize, fill: f64) -> Batch {
        Batch {
            x: Array3::from_elem((size, seq_len, channels), fill),
            y: Array3::from_elem((size, pred_len, channels), fill),
        }
    }

    fn small_cfg() -> ExperimentConfig {
        let mut cfg = ExperimentConfig::new(ModelVariant::DLinear);
        cfg.seq_len = 10;
        cfg.pred_len = 2;
        cfg.enc_in = 3;
        cfg.moving_avg = 5;
        cfg.train_epochs = 1;
        cfg
    }

    fn experiment(cfg: ExperimentConfig, provider: StaticProvider) -> Experiment {
        Experiment::new(cfg, Box::new(provider)).unwrap()
    }

    #[test]
    fn test_evaluate_depends_on_batch_order() {
        // The running-mean trace weighs early batches more, so the same
        // batches in a different order give a different scalar. Asserted as
        // a property of the default policy, not a defect.
        let cfg = small_cfg();
        let a = batch(4, 10, 2, 3, 0.0);
        let b = batch(4, 10, 2, 3, 5.0);

        let fwd = experiment(
            cfg.clone(),
            StaticProvider::new().with_split(Split::Val, vec![a.clone(), b.clone()]),
        );
        let rev = experiment(
            cfg,
            StaticProvider::new().with_split(Split::Val, vec![b, a]),
        );

        let x = fwd.evaluate(fwd.provider.source(Split::Val).unwrap().as_ref());
        let y = rev.evaluate(rev.provider.source(Split::Val).unwrap().as_ref());
        assert!(x != y, "running-mean trace should be order-dependent");
    }

    #[test]
    fn test_weighted_average_is_order_independent() {
        let mut cfg = small_cfg();
        cfg.eval_average = EvalAverage::Weighted;
        let a = batch(4, 10, 2, 3, 0.0);
        let b = batch(2, 10, 2, 3, 5.0);

        let fwd = experiment(
            cfg.clone(),
            StaticProvider::new().with_split(Split::Val, vec![a.clone(), b.clone()]),
        );
        let rev = experiment(
            cfg,
            StaticProvider::new().with_split(Split::Val, vec![b, a]),
        );

        let x = fwd.evaluate(fwd.provider.source(Split::Val).unwrap().as_ref());
        let y = rev.evaluate(rev.provider.source(Split::Val).unwrap().as_ref());
        assert!((x - y).abs() < 1e-12);
    }

    #[test]
    fn test_loss_gradient_confined_to_loss_channel() {
        let cfg = small_cfg(); // features = S -> channel 0
        let exp = experiment(
            cfg,
            StaticProvider::new().with_split(Split::Train, vec![batch(2, 10, 2, 3, 1.0)]),
        );
        let mut b = batch(2, 10, 2, 3, 1.0);
        b.y.fill(3.0);
        let (loss, grad) = exp.loss_and_grad(&b);
        assert!(loss > 0.0);
        // Channels 1 and 2 carry no gradient in S mode.
        assert!(grad.slice(s![.., .., 1..]).iter().all(|g| *g == 0.0));
        assert!(grad.slice(s![.., .., 0]).iter().any(|g| *g != 0.0));
    }

    #[test]
    fn test_train_rejects_empty_source() {
        let cfg = small_cfg();
        let mut exp = experiment(
            cfg,
            StaticProvider::new()
                .with_split(Split::Train, vec![])
                .with_split(Split::Val, vec![])
                .with_split(Split::Test, vec![]),
        );
        assert!(exp.train("empty").is_err());
    }
}
