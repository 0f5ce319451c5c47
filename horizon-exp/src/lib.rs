//! # horizon-exp — The Horizon experiment runner
//!
//! One [`Experiment`] owns a model instance and a data-provider capability
//! and drives the four phases of a run: `train`, `evaluate` (internal),
//! `test`, and `predict`. Phases execute strictly sequentially; parallelism,
//! if any, belongs to the tensor backend, not this crate.

pub mod artifacts;
pub mod runner;
pub mod stopping;

pub use artifacts::{load_array, run_dir, save_array, ArrayArtifact};
pub use runner::{Experiment, TrainReport};
pub use stopping::{EarlyStopping, StopSignal};
