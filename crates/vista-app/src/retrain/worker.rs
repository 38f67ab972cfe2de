use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::retrain::outcome::{RetrainHandle, RetrainOutcome};
use crate::retrain::status::{RetrainStage, RetrainingStatus};
use crate::retrain::steps::RetrainSteps;

#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("Retraining already in progress")]
    AlreadyRunning,

    #[error("Failed to start retraining worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Runs at most one retraining job at a time on its own thread.
///
/// The job is the only writer of the status; everyone else reads snapshots.
pub struct Retrainer<S: RetrainSteps> {
    steps: Arc<S>,
    running: Arc<AtomicBool>,
    status: Arc<watch::Sender<RetrainingStatus>>,
}

/// Clears the running state however the job ends.
struct RunningGuard {
    running: Arc<AtomicBool>,
    status: Arc<watch::Sender<RetrainingStatus>>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.status.send_modify(|s| s.is_running = false);
        self.running.store(false, Ordering::Release);
    }
}

impl<S: RetrainSteps> Retrainer<S> {
    pub fn new(steps: S) -> Self {
        let (status, _) = watch::channel(RetrainingStatus::default());
        Self {
            steps: Arc::new(steps),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> RetrainingStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RetrainingStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a run in the background, or refuse if one is active.
    pub fn start(&self) -> Result<RetrainHandle, RetrainError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Retraining already in progress");
            return Err(RetrainError::AlreadyRunning);
        }

        self.status.send_modify(|s| {
            s.is_running = true;
            s.enter(RetrainStage::Initializing);
        });

        let (done_tx, done_rx) = oneshot::channel();
        let steps = Arc::clone(&self.steps);
        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            status: Arc::clone(&self.status),
        };

        // The guard moves into the closure, so a failed spawn drops it right here
        thread::Builder::new()
            .name("vista-retrain".into())
            .spawn(move || {
                let outcome = run_job(&*steps, &guard.status);
                drop(guard);
                let _ = done_tx.send(outcome);
            })?;

        info!("Retraining started");
        Ok(RetrainHandle { rx: done_rx })
    }
}

/// What request handlers need from a retraining runner.
pub trait RetrainJob: Send + Sync {
    fn start(&self) -> Result<RetrainHandle, RetrainError>;

    fn status(&self) -> RetrainingStatus;
}

impl<S: RetrainSteps> RetrainJob for Retrainer<S> {
    fn start(&self) -> Result<RetrainHandle, RetrainError> {
        Retrainer::start(self)
    }

    fn status(&self) -> RetrainingStatus {
        Retrainer::status(self)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_stages<S: RetrainSteps>(
    steps: &S,
    status: &watch::Sender<RetrainingStatus>,
) -> anyhow::Result<PathBuf> {
    status.send_modify(|s| s.enter(RetrainStage::LoadingData));
    let data = steps.load_data()?;

    status.send_modify(|s| s.enter(RetrainStage::Training));
    let trained = steps.retrain(data, &mut |metrics| {
        status.send_modify(|s| s.record_epoch(metrics));
    })?;

    status.send_modify(|s| s.enter(RetrainStage::Saving));
    let archived = steps.save(&trained)?;

    status.send_modify(|s| s.enter(RetrainStage::Reloading));
    steps.reload()?;

    Ok(archived)
}

fn run_job<S: RetrainSteps>(
    steps: &S,
    status: &watch::Sender<RetrainingStatus>,
) -> RetrainOutcome {
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| run_stages(steps, status)))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "retraining panicked: {}",
                panic_message(payload.as_ref())
            ))
        });

    match result {
        Ok(model_path) => {
            status.send_modify(|s| s.enter(RetrainStage::Completed));
            let elapsed = started.elapsed();
            info!(model = %model_path.display(), ?elapsed, "Retraining completed");
            RetrainOutcome::Succeeded {
                model_path,
                elapsed,
            }
        }
        Err(e) => {
            let reason = format!("{e:#}");
            error!("Retraining failed: {reason}");
            status.send_modify(|s| s.fail(&reason));
            RetrainOutcome::Failed {
                message: status.borrow().message.clone(),
            }
        }
    }
}
