//! Early-stopping tracker.
//!
//! The runner constructs one of these and feeds it the validation loss every
//! epoch, but the epoch loop always runs its full budget; the signal is
//! recorded, not acted on. Wiring it into the loop changes training results
//! and is left to callers who want that on its own terms.

/// Verdict after one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Continue,
    Stop,
}

/// Patience-based loss tracker.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    counter: usize,
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self::with_min_delta(patience, 0.0)
    }

    pub fn with_min_delta(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best: None,
        }
    }

    /// Feed one validation loss.
    pub fn update(&mut self, loss: f64) -> StopSignal {
        match self.best {
            None => {
                self.best = Some(loss);
                StopSignal::Continue
            }
            Some(best) if loss < best - self.min_delta => {
                self.best = Some(loss);
                self.counter = 0;
                StopSignal::Continue
            }
            Some(_) => {
                self.counter += 1;
                if self.counter >= self.patience {
                    StopSignal::Stop
                } else {
                    StopSignal::Continue
                }
            }
        }
    }

    /// Best loss seen so far.
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Epochs since the last improvement.
    pub fn counter(&self) -> usize {
        self.counter
    }
}
