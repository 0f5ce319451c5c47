//! # horizon-models — Forecasting architectures and optimization for Horizon
//!
//! The driver talks to models through the [`ForecastModel`] capability:
//! forward evaluation, gradient accumulation, flat parameter access for the
//! optimizer, and serializable state for checkpoints. Architectures are a
//! closed set selected by `ModelVariant` through [`build_model`].

pub mod checkpoint;
pub mod dlinear;
mod linear;
pub mod model;
pub mod optim;
pub mod patchtst;
pub mod schedule;

pub use checkpoint::{checkpoint_path, load_checkpoint, save_checkpoint};
pub use dlinear::DLinear;
pub use model::{build_model, ForecastModel, ModelState, TensorState};
pub use optim::Adam;
pub use patchtst::PatchTst;
pub use schedule::{adjust_learning_rate, OneCycle};
