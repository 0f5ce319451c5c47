//! # horizon-core — Shared foundation for the Horizon forecasting driver
//!
//! This crate holds everything the experiment driver and the model crate have
//! in common: the immutable run configuration, the error taxonomy, the
//! windowed data provider with its standardization scaler, metric math with
//! the two accumulation policies, and the append-only progress/result sinks.

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod progress;

pub use config::{
    EvalAverage, ExperimentConfig, FeatureMode, ModelVariant, SchedulePolicy, TargetFeature,
};
pub use data::{
    Batch, DataProvider, DataSource, MatrixProvider, Scaler, SliceSource, Split, StaticProvider,
    WindowedSource,
};
pub use error::HorizonError;
pub use metrics::{MetricReport, RunningMeanTrace, SampleMean};
pub use progress::{EpochRecord, FileSink, MemorySink, ProgressSink, ResultRecord};
