//! Windowed data sources and the standardization scaler.
//!
//! A [`DataSource`] yields `(input window, target window)` batches for one
//! phase of a run and exposes the scaler statistics the driver needs to
//! invert the normalization when reporting denormalized values.

use crate::config::ExperimentConfig;
use crate::error::HorizonError;
use ndarray::{s, Array2, Array3};

/// Phase a data source is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
    /// Forward-only prediction over the trailing window.
    Pred,
}

/// Per-feature standardization parameters.
///
/// Fitted on the training segment only; every split is transformed with the
/// same statistics.
#[derive(Debug, Clone)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    /// A no-op scaler (mean 0, scale 1) for the given channel count.
    pub fn identity(channels: usize) -> Self {
        Self {
            mean: vec![0.0; channels],
            scale: vec![1.0; channels],
        }
    }

    /// Fit column-wise mean and standard deviation. Constant columns get
    /// scale 1 so the transform stays invertible.
    pub fn fit(data: &Array2<f64>) -> Self {
        let rows = data.nrows().max(1) as f64;
        let channels = data.ncols();
        let mut mean = vec![0.0; channels];
        let mut scale = vec![0.0; channels];
        for c in 0..channels {
            let col = data.column(c);
            let m = col.sum() / rows;
            let var = col.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / rows;
            mean[c] = m;
            let s = var.sqrt();
            scale[c] = if s > 0.0 { s } else { 1.0 };
        }
        Self { mean, scale }
    }

    /// `(x - mean) / scale`, column-wise.
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for (c, mut col) in out.columns_mut().into_iter().enumerate() {
            col.mapv_inplace(|v| (v - self.mean[c]) / self.scale[c]);
        }
        out
    }

    /// `x * scale + mean`, column-wise. Inverse of [`Scaler::transform`].
    pub fn inverse_transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for (c, mut col) in out.columns_mut().into_iter().enumerate() {
            col.mapv_inplace(|v| v * self.scale[c] + self.mean[c]);
        }
        out
    }

    /// Invert the normalization of a single feature column, elementwise,
    /// over an arbitrarily shaped array.
    pub fn inverse_feature(&self, data: &Array3<f64>, feature: usize) -> Array3<f64> {
        let s = self.scale[feature];
        let m = self.mean[feature];
        data.mapv(|v| v * s + m)
    }
}

/// One `(input, target)` pair of fixed-shape arrays.
///
/// `x` is `(batch, seq_len, channels)`, `y` is `(batch, pred_len, channels)`.
#[derive(Debug, Clone)]
pub struct Batch {
    pub x: Array3<f64>,
    pub y: Array3<f64>,
}

impl Batch {
    /// Number of windows in this batch.
    pub fn len(&self) -> usize {
        self.x.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A phase-bound source of batches plus the scaler that normalized them.
pub trait DataSource {
    /// Number of batches one pass yields.
    fn num_batches(&self) -> usize;

    /// Iterate the batches of one pass, in order.
    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_>;

    /// Normalization statistics captured at load time.
    fn scaler(&self) -> &Scaler;
}

/// Sliding-window source over a `(time, channels)` matrix.
///
/// The series is split 70/10/20 into train/validation/test segments; the
/// scaler is fitted on the training segment and applied everywhere. The
/// validation and test segments are extended backwards by `seq_len` rows so
/// their first windows have full history. The final partial batch is kept,
/// which is why training loss is accumulated sample-weighted.
pub struct WindowedSource {
    data: Array2<f64>,
    seq_len: usize,
    pred_len: usize,
    batch_size: usize,
    num_windows: usize,
    scaler: Scaler,
    split: Split,
}

impl WindowedSource {
    pub fn new(
        cfg: &ExperimentConfig,
        raw: &Array2<f64>,
        split: Split,
    ) -> Result<Self, HorizonError> {
        if raw.ncols() != cfg.enc_in {
            return Err(HorizonError::shape(format!(
                "dataset has {} channels, config says {}",
                raw.ncols(),
                cfg.enc_in
            )));
        }
        let n = raw.nrows();
        let num_train = (n as f64 * 0.7) as usize;
        let num_test = (n as f64 * 0.2) as usize;
        let num_val = n - num_train - num_test;

        if num_train < cfg.seq_len + cfg.pred_len {
            return Err(HorizonError::data_source(format!(
                "training segment of {num_train} rows cannot fit seq_len {} + pred_len {}",
                cfg.seq_len, cfg.pred_len
            )));
        }

        let scaler = Scaler::fit(&raw.slice(s![..num_train, ..]).to_owned());
        let data = scaler.transform(raw);

        let (start, end) = match split {
            Split::Train => (0, num_train),
            Split::Val => (num_train - cfg.seq_len, num_train + num_val),
            Split::Test => (n - num_test - cfg.seq_len, n),
            Split::Pred => (n - cfg.seq_len, n),
        };
        let segment = data.slice(s![start..end, ..]).to_owned();

        let num_windows = match split {
            Split::Pred => 1,
            _ => {
                let len = segment.nrows();
                if len < cfg.seq_len + cfg.pred_len {
                    return Err(HorizonError::data_source(format!(
                        "{split:?} segment of {len} rows cannot fit one window"
                    )));
                }
                len - cfg.seq_len - cfg.pred_len + 1
            }
        };

        Ok(Self {
            data: segment,
            seq_len: cfg.seq_len,
            pred_len: cfg.pred_len,
            batch_size: cfg.batch_size,
            num_windows,
            scaler,
            split,
        })
    }

    fn window(&self, i: usize) -> (Array2<f64>, Array2<f64>) {
        match self.split {
            Split::Pred => {
                // Trailing window; the target is a placeholder the prediction
                // pass fetches but never reads.
                let len = self.data.nrows();
                let x = self.data.slice(s![len - self.seq_len.., ..]).to_owned();
                let y = Array2::zeros((self.pred_len, self.data.ncols()));
                (x, y)
            }
            _ => {
                let x = self.data.slice(s![i..i + self.seq_len, ..]).to_owned();
                let y = self
                    .data
                    .slice(s![i + self.seq_len..i + self.seq_len + self.pred_len, ..])
                    .to_owned();
                (x, y)
            }
        }
    }
}

impl DataSource for WindowedSource {
    fn num_batches(&self) -> usize {
        self.num_windows.div_ceil(self.batch_size)
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let channels = self.data.ncols();
        Box::new((0..self.num_batches()).map(move |b| {
            let lo = b * self.batch_size;
            let hi = (lo + self.batch_size).min(self.num_windows);
            let mut x = Array3::zeros((hi - lo, self.seq_len, channels));
            let mut y = Array3::zeros((hi - lo, self.pred_len, channels));
            for (k, i) in (lo..hi).enumerate() {
                let (wx, wy) = self.window(i);
                x.slice_mut(s![k, .., ..]).assign(&wx);
                y.slice_mut(s![k, .., ..]).assign(&wy);
            }
            Batch { x, y }
        }))
    }

    fn scaler(&self) -> &Scaler {
        &self.scaler
    }
}

/// In-memory source over explicit, pre-built batches.
///
/// Used by tests and by callers that do their own windowing.
pub struct SliceSource {
    batches: Vec<Batch>,
    scaler: Scaler,
}

impl SliceSource {
    pub fn new(batches: Vec<Batch>, scaler: Scaler) -> Self {
        Self { batches, scaler }
    }

    /// Wrap batches with a no-op scaler.
    pub fn from_batches(batches: Vec<Batch>) -> Self {
        let channels = batches.first().map(|b| b.x.shape()[2]).unwrap_or(0);
        Self::new(batches, Scaler::identity(channels))
    }
}

impl DataSource for SliceSource {
    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.batches.iter().cloned())
    }

    fn scaler(&self) -> &Scaler {
        &self.scaler
    }
}

/// Phase-keyed factory for data sources.
///
/// The driver asks for one source per phase; each call may rebuild windows
/// but must report the same scaler statistics for every split.
pub trait DataProvider {
    fn source(&self, split: Split) -> Result<Box<dyn DataSource>, HorizonError>;
}

/// Provider over a single `(time, channels)` matrix, windowed per split.
pub struct MatrixProvider {
    cfg: ExperimentConfig,
    raw: Array2<f64>,
}

impl MatrixProvider {
    pub fn new(cfg: ExperimentConfig, raw: Array2<f64>) -> Self {
        Self { cfg, raw }
    }
}

impl DataProvider for MatrixProvider {
    fn source(&self, split: Split) -> Result<Box<dyn DataSource>, HorizonError> {
        Ok(Box::new(WindowedSource::new(&self.cfg, &self.raw, split)?))
    }
}

/// Provider over pre-built batches, one list per split.
///
/// For callers that window their own data, and for tests that need exact
/// control over batch contents and order.
#[derive(Default)]
pub struct StaticProvider {
    splits: Vec<(Split, Vec<Batch>)>,
    scaler: Option<Scaler>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split(mut self, split: Split, batches: Vec<Batch>) -> Self {
        self.splits.push((split, batches));
        self
    }

    pub fn with_scaler(mut self, scaler: Scaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    fn channels(&self) -> usize {
        self.splits
            .iter()
            .find_map(|(_, b)| b.first())
            .map(|b| b.x.shape()[2])
            .unwrap_or(0)
    }
}

impl DataProvider for StaticProvider {
    fn source(&self, split: Split) -> Result<Box<dyn DataSource>, HorizonError> {
        let batches = self
            .splits
            .iter()
            .find(|(s, _)| *s == split)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| HorizonError::data_source(format!("no batches for {split:?}")))?;
        let scaler = self
            .scaler
            .clone()
            .unwrap_or_else(|| Scaler::identity(self.channels()));
        Ok(Box::new(SliceSource::new(batches, scaler)))
    }
}
