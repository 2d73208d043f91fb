//! Bounded polling for session establishment
//!
//! After the bridge sets cookies there is a short window before the session
//! becomes visible. The poller probes a fixed number of times with a fixed
//! delay and stops as soon as it is cancelled or its handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::identity::Session;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(500);

#[async_trait]
pub trait SessionProbe: Send + Sync {
    async fn current_session(&self) -> Option<Session>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_POLL_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Established(Session),
    Exhausted { attempts: u32 },
    Cancelled,
}

pub struct SessionPoller;

impl SessionPoller {
    pub fn spawn(probe: Arc<dyn SessionProbe>, config: PollConfig) -> PollHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(poll_loop(probe, config, cancel_rx));
        PollHandle {
            cancel_tx: Some(cancel_tx),
            task: Some(task),
        }
    }
}

async fn poll_loop(
    probe: Arc<dyn SessionProbe>,
    config: PollConfig,
    mut cancel_rx: oneshot::Receiver<()>,
) -> PollOutcome {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if let Some(session) = probe.current_session().await {
            debug!("Session visible after {} attempt(s)", attempt);
            return PollOutcome::Established(session);
        }
        if attempt == max_attempts {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut cancel_rx => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(config.delay) => {}
        }
    }
    debug!("No session after {} attempts", max_attempts);
    PollOutcome::Exhausted {
        attempts: max_attempts,
    }
}

/// Owns a running poll. Dropping the handle aborts the task.
pub struct PollHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    pub async fn outcome(mut self) -> PollOutcome {
        let Some(task) = self.task.take() else {
            return PollOutcome::Cancelled;
        };
        // Keep the sender alive; dropping it would read as a cancellation.
        let _cancel_tx = self.cancel_tx.take();
        task.await.unwrap_or(PollOutcome::Cancelled)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
