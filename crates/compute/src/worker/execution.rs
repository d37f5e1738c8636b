use std::collections::HashMap;
use std::slice;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tabla_core::{FieldId, FieldValue, RecordStore, RetryStrategy, Task, WorkerConfig};

use super::dispatch::{stopped, Submitter};
use super::stats::{SharedStats, WorkerStats};
use crate::calculator::Calculator;
use crate::error::CalcError;
use crate::events::{CalculationEvent, EventSink};

/// Everything a worker needs, shared by the whole pool.
pub(super) struct WorkerContext {
    pub(super) config: WorkerConfig,
    pub(super) records: Arc<dyn RecordStore>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) calculator: Arc<dyn Calculator>,
    pub(super) stats: SharedStats,
}

/// A single pool worker.
pub(super) struct Worker {
    pub(super) id: usize,
    pub(super) ctx: Arc<WorkerContext>,
    /// Where the worker announces itself as free.
    pub(super) pool: mpsc::Sender<mpsc::Sender<Task>>,
    pub(super) quit: oneshot::Receiver<()>,
    pub(super) submitter: Submitter,
}

impl Worker {
    pub(super) async fn run(mut self) {
        let (handoff_tx, mut handoff_rx) = mpsc::channel::<Task>(1);
        debug!(worker = self.id, "worker started");

        loop {
            if self.pool.send(handoff_tx.clone()).await.is_err() {
                break;
            }
            tokio::select! {
                biased;
                _ = &mut self.quit => break,
                task = handoff_rx.recv() => match task {
                    Some(task) => self.process(task).await,
                    None => break,
                },
            }
        }

        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, mut task: Task) {
        self.ctx.stats.update(|s| s.active_workers += 1);
        self.publish(CalculationEvent::requested(&task)).await;

        let started = Instant::now();
        let outcome = self.execute_with_deadline(&task).await;
        let elapsed = started.elapsed();
        self.ctx.stats.update(|s| s.active_workers = s.active_workers.saturating_sub(1));

        match outcome {
            Ok(values) => {
                self.ctx.stats.update(|s| s.record_success(elapsed));
                let duration_ms = elapsed.as_millis() as u64;
                debug!(
                    worker = self.id,
                    task_id = %task.id,
                    record_id = %task.record_id,
                    duration_ms,
                    "task completed"
                );
                self.publish(CalculationEvent::completed(&task, values, duration_ms))
                    .await;
            }
            Err(e) => {
                self.ctx.stats.update(WorkerStats::record_failure);
                warn!(
                    worker = self.id,
                    task_id = %task.id,
                    record_id = %task.record_id,
                    retry_count = task.retry_count,
                    error = %e,
                    "task failed"
                );
                self.publish(CalculationEvent::failed(&task, &e)).await;

                if self.submitter.is_shutdown() {
                    debug!(task_id = %task.id, "shutting down, not retrying");
                    return;
                }
                if task.retry_count >= self.ctx.config.max_retries {
                    warn!(task_id = %task.id, retries = task.retry_count, "retries exhausted, dropping task");
                    self.ctx.stats.update(|s| s.dropped_tasks += 1);
                    return;
                }

                task.retry_count += 1;
                self.ctx.stats.update(|s| s.retried_tasks += 1);
                self.schedule_retry(task).await;
            }
        }
    }

    /// Run the task under the configured timeout, abandoning it if the
    /// pool shuts down first.
    async fn execute_with_deadline(
        &self,
        task: &Task,
    ) -> Result<HashMap<FieldId, FieldValue>, CalcError> {
        let timeout = self.ctx.config.task_timeout();
        let mut shutdown = self.submitter.shutdown_signal();
        tokio::select! {
            result = tokio::time::timeout(timeout, self.execute(task)) => {
                result.unwrap_or(Err(CalcError::Timeout(timeout)))
            }
            _ = stopped(&mut shutdown) => Err(CalcError::Cancelled),
        }
    }

    /// Fetch the record, calculate, merge and save.
    async fn execute(&self, task: &Task) -> Result<HashMap<FieldId, FieldValue>, CalcError> {
        let records = self
            .ctx
            .records
            .records_by_ids(&task.table_id, slice::from_ref(&task.record_id))
            .await?;
        if records.is_empty() {
            return Err(CalcError::RecordNotFound {
                table_id: task.table_id.clone(),
                record_id: task.record_id.clone(),
            });
        }

        let calculated = self.ctx.calculator.calculate(task, &records).await?;

        let mut values = HashMap::new();
        for output in calculated {
            let Some(mut record) = records.iter().find(|r| r.id == output.record_id).cloned() else {
                warn!(
                    task_id = %task.id,
                    record_id = %output.record_id,
                    "calculator returned a record that was not requested, ignoring"
                );
                continue;
            };
            for (field_id, value) in &output.values {
                record.set(field_id.clone(), value.clone());
            }
            self.ctx.records.save_record(&record).await?;
            values.extend(output.values);
        }
        Ok(values)
    }

    async fn schedule_retry(&self, task: Task) {
        let delay = self.ctx.config.retry_delay();
        match self.ctx.config.retry_strategy {
            RetryStrategy::Blocking => {
                let mut shutdown = self.submitter.shutdown_signal();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => resubmit(&self.submitter, &self.ctx.stats, task),
                    _ = stopped(&mut shutdown) => abandon_retry(&self.ctx.stats, &task),
                }
            }
            RetryStrategy::Deferred => {
                let submitter = self.submitter.clone();
                let stats = self.ctx.stats.clone();
                let mut shutdown = submitter.shutdown_signal();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => resubmit(&submitter, &stats, task),
                        _ = stopped(&mut shutdown) => abandon_retry(&stats, &task),
                    }
                });
            }
        }
    }

    async fn publish(&self, event: CalculationEvent) {
        let topic = event.topic();
        if let Err(e) = self.ctx.events.publish(event).await {
            warn!(worker = self.id, topic, error = %e, "failed to publish calculation event");
        }
    }
}

fn resubmit(submitter: &Submitter, stats: &SharedStats, task: Task) {
    let task_id = task.id;
    let retry_count = task.retry_count;
    match submitter.submit(task) {
        Ok(()) => info!(%task_id, retry_count, "task resubmitted"),
        Err(e) => {
            warn!(%task_id, retry_count, error = %e, "retry could not be queued, dropping task");
            stats.update(|s| s.dropped_tasks += 1);
        }
    }
}

/// A retry still waiting out its delay when the pool stops is dropped.
fn abandon_retry(stats: &SharedStats, task: &Task) {
    debug!(task_id = %task.id, retry_count = task.retry_count, "retry abandoned on shutdown");
    stats.update(|s| s.dropped_tasks += 1);
}
