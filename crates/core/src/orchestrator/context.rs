//! Per-run context and cooperative cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

/// Cancellation flag shared between the signal handler and the run.
///
/// Polled at identity boundaries; pacing pauses also wait on it so a
/// cancel never sits behind a delay.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one run, passed explicitly to the controller and orchestrator.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
