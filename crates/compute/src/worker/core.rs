use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tabla_core::{RecordStore, Task, WorkerConfig};

use super::dispatch::{dispatch_loop, stats_loop, Submitter};
use super::execution::{Worker, WorkerContext};
use super::stats::{SharedStats, WorkerStats};
use crate::calculator::{Calculator, PassthroughCalculator};
use crate::error::CalcError;
use crate::events::EventSink;

/// Handles owned while the pool is running.
struct Running {
    submitter: Submitter,
    shutdown: watch::Sender<bool>,
    quit: Vec<oneshot::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

/// Bounded pool of calculation workers.
///
/// Tasks enter through [`submit_task`](Self::submit_task), which never
/// blocks: a full ingress queue is reported as [`CalcError::QueueFull`].
/// A dispatcher hands each task to the next free worker. Failed tasks are
/// retried up to `max_retries` times, each attempt publishing its own
/// events.
///
/// The pool can be restarted after [`stop`](Self::stop). Counters carry
/// over between runs.
pub struct CalculationWorker {
    config: WorkerConfig,
    records: Arc<dyn RecordStore>,
    events: Arc<dyn EventSink>,
    calculator: Arc<dyn Calculator>,
    stats: SharedStats,
    running: Mutex<Option<Running>>,
}

impl CalculationWorker {
    /// Create a stopped pool using [`PassthroughCalculator`].
    pub fn new(
        config: WorkerConfig,
        records: Arc<dyn RecordStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            records,
            events,
            calculator: Arc::new(PassthroughCalculator),
            stats: SharedStats::default(),
            running: Mutex::new(None),
        }
    }

    pub fn with_calculator(mut self, calculator: Arc<dyn Calculator>) -> Self {
        self.calculator = calculator;
        self
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the workers, the dispatcher and the stats refresher.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn start(&self) -> Result<(), CalcError> {
        let mut running = self.lock_running();
        if running.is_some() {
            return Err(CalcError::AlreadyRunning);
        }

        let worker_count = self.config.resolved_worker_count();
        let capacity = self.config.resolved_queue_capacity();

        let (ingress_tx, ingress_rx) = mpsc::channel::<Task>(capacity);
        let (pool_tx, pool_rx) = mpsc::channel::<mpsc::Sender<Task>>(worker_count);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let submitter = Submitter::new(ingress_tx.clone(), shutdown_rx.clone(), self.stats.clone());

        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            records: Arc::clone(&self.records),
            events: Arc::clone(&self.events),
            calculator: Arc::clone(&self.calculator),
            stats: self.stats.clone(),
        });

        let mut handles = Vec::with_capacity(worker_count + 2);
        let mut quit = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (quit_tx, quit_rx) = oneshot::channel();
            let worker = Worker {
                id,
                ctx: Arc::clone(&ctx),
                pool: pool_tx.clone(),
                quit: quit_rx,
                submitter: submitter.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
            quit.push(quit_tx);
        }
        drop(pool_tx);

        handles.push(tokio::spawn(dispatch_loop(
            ingress_rx,
            pool_rx,
            shutdown_rx.clone(),
        )));
        handles.push(tokio::spawn(stats_loop(
            ingress_tx.downgrade(),
            self.stats.clone(),
            self.config.stats_interval(),
            shutdown_rx,
        )));

        self.stats.update(|s| s.started_at = Some(Utc::now()));
        *running = Some(Running {
            submitter,
            shutdown: shutdown_tx,
            quit,
            handles,
        });

        info!(
            workers = worker_count,
            queue_capacity = capacity,
            max_retries = self.config.max_retries,
            retry_strategy = ?self.config.retry_strategy,
            "calculation worker started"
        );
        Ok(())
    }

    /// Signal shutdown and wait for every worker to exit.
    ///
    /// In-flight tasks are cancelled and queued tasks are discarded.
    /// Stopping a stopped pool is a no-op.
    pub async fn stop(&self) -> Result<(), CalcError> {
        let Some(running) = self.lock_running().take() else {
            return Ok(());
        };
        info!("stopping calculation worker");

        running.shutdown.send_replace(true);
        for quit in running.quit {
            let _ = quit.send(());
        }
        drop(running.submitter);

        for handle in running.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "calculation worker task ended abnormally");
            }
        }

        self.stats.update(|s| {
            s.active_workers = 0;
            s.queue_length = 0;
        });
        info!("calculation worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Queue a task without waiting.
    ///
    /// Fails with [`CalcError::QueueFull`] when the ingress queue is at
    /// capacity and [`CalcError::Stopped`] when the pool is not running.
    pub fn submit_task(&self, task: Task) -> Result<(), CalcError> {
        let submitter = match self.lock_running().as_ref() {
            Some(running) => running.submitter.clone(),
            None => return Err(CalcError::Stopped),
        };
        submitter.submit(task)
    }

    /// Snapshot of the pool counters. The queue length is sampled live.
    pub fn get_stats(&self) -> WorkerStats {
        let queue_length = self
            .lock_running()
            .as_ref()
            .map(|running| running.submitter.queue_length());
        let mut stats = self.stats.snapshot();
        if let Some(queue_length) = queue_length {
            stats.queue_length = queue_length;
        }
        stats
    }

    pub fn get_config(&self) -> &WorkerConfig {
        &self.config
    }
}
