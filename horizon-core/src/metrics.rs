//! Forecast error metrics and loss accumulators.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Mean absolute error over two equally shaped arrays.
pub fn mae(pred: &Array3<f64>, truth: &Array3<f64>) -> f64 {
    debug_assert_eq!(pred.shape(), truth.shape());
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(truth.iter())
        .map(|(p, t)| (p - t).abs())
        .sum::<f64>()
        / n
}

/// Mean squared error over two equally shaped arrays.
pub fn mse(pred: &Array3<f64>, truth: &Array3<f64>) -> f64 {
    debug_assert_eq!(pred.shape(), truth.shape());
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(truth.iter())
        .map(|(p, t)| (p - t) * (p - t))
        .sum::<f64>()
        / n
}

/// Root mean squared error.
pub fn rmse(pred: &Array3<f64>, truth: &Array3<f64>) -> f64 {
    mse(pred, truth).sqrt()
}

/// Mean absolute percentage error.
///
/// Divides by the true value elementwise and applies no guard: a target of
/// exactly zero produces a non-finite result that propagates into the
/// report. Callers are expected to feed nonzero targets.
pub fn mape(pred: &Array3<f64>, truth: &Array3<f64>) -> f64 {
    debug_assert_eq!(pred.shape(), truth.shape());
    let n = pred.len().max(1) as f64;
    pred.iter()
        .zip(truth.iter())
        .map(|(p, t)| ((p - t) / t).abs())
        .sum::<f64>()
        / n
}

/// Aggregate error report for a test pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricReport {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub mape: f64,
}

impl MetricReport {
    /// Compute all four metrics over the concatenated prediction/target set.
    pub fn compute(pred: &Array3<f64>, truth: &Array3<f64>) -> Self {
        let mse = mse(pred, truth);
        Self {
            mae: mae(pred, truth),
            mse,
            rmse: mse.sqrt(),
            mape: mape(pred, truth),
        }
    }
}

impl std::fmt::Display for MetricReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mse:{}, mae:{}, rmse:{}, mape:{}",
            self.mse, self.mae, self.rmse, self.mape
        )
    }
}

/// Sample-weighted mean: accumulates `loss * batch_size` over total samples,
/// so an uneven final batch does not skew the epoch average.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleMean {
    total: f64,
    count: usize,
}

impl SampleMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, loss: f64, batch_size: usize) {
        self.total += loss * batch_size as f64;
        self.count += batch_size;
    }

    /// Sample-weighted mean so far. An empty accumulator has no mean and
    /// reports NaN rather than a perfect-looking zero.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.total / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Mean of the per-batch running means.
///
/// After each batch this records the running sample-weighted mean so far,
/// then reports the average of that whole trace. Later batches therefore
/// weigh less than earlier ones and the result depends on batch order. Kept
/// as the default evaluation statistic for parity with previously recorded
/// validation numbers; see `EvalAverage` for the plain alternative.
#[derive(Debug, Clone, Default)]
pub struct RunningMeanTrace {
    inner: SampleMean,
    trace: Vec<f64>,
}

impl RunningMeanTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, loss: f64, batch_size: usize) {
        self.inner.add(loss, batch_size);
        self.trace.push(self.inner.mean());
    }

    /// Mean of the trace. NaN when nothing was accumulated.
    pub fn mean(&self) -> f64 {
        if self.trace.is_empty() {
            f64::NAN
        } else {
            self.trace.iter().sum::<f64>() / self.trace.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr3;

    #[test]
    fn test_exact_values() {
        // preds [[1,2],[3,4]] vs trues [[1,2],[3,5]] as (2, 2, 1) arrays.
        let pred = arr3(&[[[1.0], [2.0]], [[3.0], [4.0]]]);
        let truth = arr3(&[[[1.0], [2.0]], [[3.0], [5.0]]]);
        let report = MetricReport::compute(&pred, &truth);
        assert_eq!(report.mae, 0.25);
        assert_eq!(report.mse, 0.25);
        assert_eq!(report.rmse, 0.5);
        assert!((report.mape - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_rmse_squares_to_mse() {
        let pred = arr3(&[[[0.3], [1.7]], [[-2.0], [0.9]]]);
        let truth = arr3(&[[[0.1], [1.0]], [[2.5], [-0.4]]]);
        let report = MetricReport::compute(&pred, &truth);
        assert!((report.rmse * report.rmse - report.mse).abs() < 1e-12);
    }

    #[test]
    fn test_mae_bounded_by_rmse() {
        let pred = arr3(&[[[1.0], [5.0]], [[2.0], [8.0]]]);
        let truth = arr3(&[[[0.0], [1.0]], [[4.0], [2.0]]]);
        let report = MetricReport::compute(&pred, &truth);
        assert!(report.mae <= report.rmse + 1e-12);
    }

    #[test]
    fn test_mape_zero_target_is_non_finite() {
        let pred = arr3(&[[[1.0]]]);
        let truth = arr3(&[[[0.0]]]);
        assert!(!mape(&pred, &truth).is_finite());
    }

    #[test]
    fn test_sample_mean_weights_uneven_batches() {
        let mut acc = SampleMean::new();
        acc.add(1.0, 4);
        acc.add(2.0, 1);
        assert!((acc.mean() - 1.2).abs() < 1e-12);
        assert_eq!(acc.count(), 5);
    }

    #[test]
    fn test_empty_accumulators_have_no_mean() {
        assert!(SampleMean::new().mean().is_nan());
        assert!(RunningMeanTrace::new().mean().is_nan());
    }

    #[test]
    fn test_running_mean_trace_is_order_dependent() {
        let mut forward = RunningMeanTrace::new();
        forward.add(1.0, 2);
        forward.add(3.0, 2);

        let mut reversed = RunningMeanTrace::new();
        reversed.add(3.0, 2);
        reversed.add(1.0, 2);

        // Same batches, different order, different statistic. This is a
        // property of the trace average, not a bug.
        assert!((forward.mean() - 1.5).abs() < 1e-12);
        assert!((reversed.mean() - 2.5).abs() < 1e-12);
        assert!(forward.mean() != reversed.mean());
    }
}
