use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
pub enum RetrainOutcome {
    Succeeded {
        /// Timestamped copy of the retrained model
        model_path: PathBuf,
        elapsed: Duration,
    },
    Failed {
        message: String,
    },
}

impl RetrainOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Completion signal of one retraining run.
///
/// Dropping it detaches the run; it still finishes and updates the status.
#[derive(Debug)]
pub struct RetrainHandle {
    pub(super) rx: oneshot::Receiver<RetrainOutcome>,
}

fn worker_gone() -> RetrainOutcome {
    RetrainOutcome::Failed {
        message: "Retraining worker exited without reporting".to_string(),
    }
}

impl RetrainHandle {
    pub async fn wait(self) -> RetrainOutcome {
        self.rx.await.unwrap_or_else(|_| worker_gone())
    }

    /// Must not be called from inside an async runtime.
    pub fn blocking_wait(self) -> RetrainOutcome {
        self.rx.blocking_recv().unwrap_or_else(|_| worker_gone())
    }
}
