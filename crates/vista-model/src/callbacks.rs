//! Epoch-end training controls.

use tracing::info;

/// Stop when validation loss has not improved for `patience` epochs.
///
/// Keeps a copy of the best state so training can end on it.
#[derive(Debug)]
pub struct EarlyStopping<M> {
    patience: usize,
    best_loss: f64,
    best_epoch: Option<usize>,
    best_state: Option<M>,
    wait: usize,
}

impl<M: Clone> EarlyStopping<M> {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: None,
            best_state: None,
            wait: 0,
        }
    }

    /// Record an epoch; true when training should stop.
    pub fn update(&mut self, epoch: usize, val_loss: f64, state: &M) -> bool {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.best_epoch = Some(epoch);
            self.best_state = Some(state.clone());
            self.wait = 0;
            return false;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            info!(epoch, best_epoch = ?self.best_epoch, "Early stopping");
            return true;
        }
        false
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn into_best(self) -> Option<M> {
        self.best_state
    }
}

/// Scale the learning rate by `factor` when validation loss plateaus.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best_loss: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            best_loss: f64::INFINITY,
            wait: 0,
        }
    }

    /// Learning rate for the next epoch.
    pub fn update(&mut self, val_loss: f64, lr: f64) -> f64 {
        if val_loss < self.best_loss {
            self.best_loss = val_loss;
            self.wait = 0;
            return lr;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.wait = 0;
            let reduced = (lr * self.factor).max(self.min_lr);
            if reduced < lr {
                info!(from = lr, to = reduced, "Reducing learning rate");
            }
            return reduced;
        }
        lr
    }
}

impl Default for ReduceLrOnPlateau {
    fn default() -> Self {
        Self::new(0.5, 5, 1e-7)
    }
}

/// Tracks the best validation accuracy seen so far.
#[derive(Debug, Clone, Default)]
pub struct BestCheckpoint {
    best_accuracy: Option<f64>,
}

impl BestCheckpoint {
    /// True when `val_accuracy` beats every earlier epoch.
    pub fn improved(&mut self, val_accuracy: f64) -> bool {
        match self.best_accuracy {
            Some(best) if val_accuracy <= best => false,
            _ => {
                self.best_accuracy = Some(val_accuracy);
                true
            }
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best_accuracy
    }
}
