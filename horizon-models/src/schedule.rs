//! Learning-rate schedules.
//!
//! Two layers, mirroring how the driver uses them: a one-cycle scheduler
//! advanced after every batch under the `Tst` policy, and a per-epoch policy
//! table applied by [`adjust_learning_rate`] for everything else.

use crate::optim::Adam;
use horizon_core::{ExperimentConfig, HorizonError, SchedulePolicy};

fn cos_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * (1.0 + (std::f64::consts::PI * pct).cos())
}

/// One-cycle schedule: cosine warmup from `max_lr / 25` up to `max_lr` over
/// the first `pct_start` of the run, then cosine anneal down to
/// `max_lr / 25 / 1e4`.
///
/// The step budget must equal `epochs * steps_per_epoch` for the shape of
/// the cycle to line up with the run; [`OneCycle::for_run`] enforces that.
#[derive(Debug, Clone)]
pub struct OneCycle {
    max_lr: f64,
    initial_lr: f64,
    min_lr: f64,
    total_steps: usize,
    warm_steps: usize,
    step_count: usize,
}

impl OneCycle {
    pub fn new(max_lr: f64, total_steps: usize, pct_start: f64) -> Result<Self, HorizonError> {
        if total_steps == 0 {
            return Err(HorizonError::config("one-cycle schedule needs at least one step"));
        }
        if !(pct_start > 0.0 && pct_start < 1.0) {
            return Err(HorizonError::config(format!(
                "pct_start must be in (0, 1), got {pct_start}"
            )));
        }
        let initial_lr = max_lr / 25.0;
        let warm_steps = ((total_steps as f64 * pct_start).round() as usize)
            .max(1)
            .min(total_steps - 1);
        Ok(Self {
            max_lr,
            initial_lr,
            min_lr: initial_lr / 1e4,
            total_steps,
            warm_steps,
            step_count: 0,
        })
    }

    /// Schedule sized for a whole run.
    pub fn for_run(
        max_lr: f64,
        epochs: usize,
        steps_per_epoch: usize,
        pct_start: f64,
    ) -> Result<Self, HorizonError> {
        Self::new(max_lr, epochs * steps_per_epoch, pct_start)
    }

    fn lr_at(&self, step: usize) -> f64 {
        if step <= self.warm_steps {
            // A one-step budget has no warmup phase; the single rate is the
            // initial one.
            if self.warm_steps == 0 {
                return self.initial_lr;
            }
            let pct = step as f64 / self.warm_steps as f64;
            cos_anneal(self.initial_lr, self.max_lr, pct)
        } else {
            let span = (self.total_steps - self.warm_steps) as f64;
            let pct = (step - self.warm_steps) as f64 / span;
            cos_anneal(self.max_lr, self.min_lr, pct)
        }
    }

    /// Advance one batch and return the new rate. Saturates at the end of
    /// the budget.
    pub fn step(&mut self) -> f64 {
        self.step_count = (self.step_count + 1).min(self.total_steps);
        self.last_lr()
    }

    /// Rate at the current position.
    pub fn last_lr(&self) -> f64 {
        self.lr_at(self.step_count)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }
}

/// Recompute the effective learning rate for `epoch` (1-based) and apply it
/// to the optimizer. Under `Tst` this adopts the scheduler's current rate;
/// the table policies ignore the scheduler entirely.
///
/// Returns the new rate when one was applied.
pub fn adjust_learning_rate(
    optim: &mut Adam,
    scheduler: Option<&OneCycle>,
    epoch: usize,
    cfg: &ExperimentConfig,
) -> Option<f64> {
    let lr = match cfg.lradj {
        SchedulePolicy::Type1 => Some(cfg.learning_rate * 0.5f64.powi(epoch as i32 - 1)),
        SchedulePolicy::Type2 => match epoch {
            2 => Some(5e-5),
            4 => Some(1e-5),
            6 => Some(5e-6),
            8 => Some(1e-6),
            10 => Some(5e-7),
            15 => Some(1e-7),
            20 => Some(5e-8),
            _ => None,
        },
        SchedulePolicy::Type3 => {
            if epoch < 3 {
                Some(cfg.learning_rate)
            } else {
                Some(cfg.learning_rate * 0.9f64.powi(epoch as i32 - 3))
            }
        }
        SchedulePolicy::Constant => Some(cfg.learning_rate),
        SchedulePolicy::Tst => scheduler.map(|s| s.last_lr()),
    };
    if let Some(lr) = lr {
        optim.set_lr(lr);
        tracing::debug!(epoch, lr, "updating learning rate");
    }
    lr
}
