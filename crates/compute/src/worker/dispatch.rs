use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use tabla_core::Task;

use super::stats::{SharedStats, WorkerStats};
use crate::error::CalcError;

/// Resolves once the lifecycle signal reads `true` or its sender is gone.
pub(super) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

/// Non-blocking admission into the ingress queue. Cloned into workers
/// and retry timers so retries re-enter through the same path.
#[derive(Clone)]
pub(super) struct Submitter {
    ingress: mpsc::Sender<Task>,
    shutdown: watch::Receiver<bool>,
    stats: SharedStats,
}

impl Submitter {
    pub(super) fn new(
        ingress: mpsc::Sender<Task>,
        shutdown: watch::Receiver<bool>,
        stats: SharedStats,
    ) -> Self {
        Self {
            ingress,
            shutdown,
            stats,
        }
    }

    pub(super) fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(super) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    pub(super) fn submit(&self, task: Task) -> Result<(), CalcError> {
        if self.is_shutdown() {
            return Err(CalcError::Stopped);
        }
        match self.ingress.try_send(task) {
            Ok(()) => {
                self.stats.update(WorkerStats::record_submitted);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(CalcError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(CalcError::Stopped),
        }
    }

    /// Tasks waiting in the ingress queue.
    pub(super) fn queue_length(&self) -> usize {
        self.ingress.max_capacity() - self.ingress.capacity()
    }
}

/// Move tasks from the ingress queue to whichever worker announces itself
/// next. A task is held here until a worker is free, so admission stays
/// bounded by the ingress capacity plus one.
pub(super) async fn dispatch_loop(
    mut ingress: mpsc::Receiver<Task>,
    mut pool: mpsc::Receiver<mpsc::Sender<Task>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("dispatcher started");
    loop {
        let task = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            task = ingress.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let handoff = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => {
                debug!(task_id = %task.id, "dispatcher stopping with task in hand, dropping it");
                break;
            }
            handoff = pool.recv() => match handoff {
                Some(handoff) => handoff,
                None => break,
            },
        };

        trace!(task_id = %task.id, "handing task to worker");
        if let Err(e) = handoff.send(task).await {
            debug!(task_id = %e.0.id, "worker went away before handoff, dropping task");
        }
    }
    debug!("dispatcher stopped");
}

/// Periodically sample the ingress depth into the shared stats.
pub(super) async fn stats_loop(
    ingress: mpsc::WeakSender<Task>,
    stats: SharedStats,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                let Some(ingress) = ingress.upgrade() else {
                    break;
                };
                let depth = ingress.max_capacity() - ingress.capacity();
                stats.update(|s| s.queue_length = depth);
                trace!(queue_length = depth, "stats refreshed");
            }
        }
    }
    stats.update(|s| s.queue_length = 0);
}
