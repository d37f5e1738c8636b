//! calc-worker -- recalculates computed fields for a fixture of tables.
//!
//! Loads `{ "fields": [...], "records": [...] }` from a JSON file, resolves
//! the calculation order of every table's computed fields, and runs one
//! task per record through the worker pool. Prints the final pool stats
//! as JSON on stdout.
//!
//! With `--changed`, only fields affected by the listed fields are
//! recalculated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use tabla_compute::{
    CalcError, CalculationEvent, CalculationWorker, ChannelEventSink, DependencyResolver,
};
use tabla_core::{
    Config, Field, FieldId, FieldStore, MemoryFieldStore, MemoryRecordStore, Priority, Record, Task,
};
use tabla_queue::TaskScheduler;

// ── CLI ─────────────────────────────────────────────────────────────

/// Calculation worker -- dependency-ordered recalculation of computed fields.
#[derive(Parser, Debug)]
#[command(name = "calc-worker", version, about)]
struct Cli {
    /// Path to the JSON fixture with fields and records.
    #[arg(long, env = "CALC_FIXTURE")]
    fixture: PathBuf,

    /// Recalculate only fields affected by these field ids.
    #[arg(long, value_delimiter = ',')]
    changed: Vec<FieldId>,

    /// Priority band for submitted tasks.
    #[arg(long, default_value = "normal", value_parser = parse_priority)]
    priority: Priority,

    /// Override the configured worker count.
    #[arg(long)]
    workers: Option<usize>,

    /// Override the configured retry bound.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Seconds to wait for the pool to drain before giving up.
    #[arg(long, env = "CALC_DRAIN_TIMEOUT", default_value_t = 60)]
    drain_timeout: u64,
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::bands()
        .into_iter()
        .find(|p| p.to_string().eq_ignore_ascii_case(s))
        .ok_or_else(|| format!("unknown priority '{s}' (expected urgent, high, normal or low)"))
}

#[derive(Debug, Deserialize)]
struct Fixture {
    fields: Vec<Field>,
    #[serde(default)]
    records: Vec<Record>,
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tabla_core::config::load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(workers) = cli.workers {
        config.worker.worker_count = workers;
    }
    if let Some(max_retries) = cli.max_retries {
        config.worker.max_retries = max_retries;
    }
    config.log_summary();

    let raw = std::fs::read_to_string(&cli.fixture)
        .with_context(|| format!("reading fixture {}", cli.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw).context("parsing fixture")?;
    info!(
        fields = fixture.fields.len(),
        records = fixture.records.len(),
        "fixture loaded"
    );

    let field_store = Arc::new(MemoryFieldStore::from_fields(fixture.fields));
    let record_store = Arc::new(MemoryRecordStore::from_records(fixture.records));
    let resolver = DependencyResolver::new(field_store.clone());

    // ── Plan: one task per record, fields in calculation order ──
    let scheduler = TaskScheduler::new();
    for table_id in field_store.table_ids().await {
        let fields = field_store.fields_for_table(&table_id).await?;
        let computed: Vec<FieldId> = if cli.changed.is_empty() {
            fields
                .iter()
                .filter(|f| f.field_type().is_computed())
                .map(|f| f.id.clone())
                .collect()
        } else {
            let affected = resolver.affected_fields(&table_id, &cli.changed).await?;
            affected
                .into_iter()
                .filter(|id| {
                    fields
                        .iter()
                        .any(|f| &f.id == id && f.field_type().is_computed())
                })
                .collect()
        };
        if computed.is_empty() {
            continue;
        }

        let graph = resolver.resolve_dependencies(&table_id, &computed).await?;
        if !graph.is_valid {
            warn!(
                table_id = %table_id,
                cycles = ?graph.strongly_connected_cycles(),
                "circular field dependencies, using fallback order"
            );
        }
        info!(table_id = %table_id, order = ?graph.calculation_order, "calculation order resolved");

        for record_id in record_store.record_ids(&table_id).await {
            let task = Task::new(
                table_id.clone(),
                record_id,
                graph.calculation_order.clone(),
                cli.priority,
                "calc-worker",
            )?;
            scheduler.push(task);
        }
    }

    let planned = scheduler.len() as u64;
    if planned == 0 {
        info!("nothing to calculate");
        return Ok(());
    }

    // ── Run ──
    let (sink, mut events) = ChannelEventSink::new();
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let CalculationEvent::Failed(failed) = &event {
                warn!(
                    task_id = %failed.task_id,
                    record_id = %failed.record_id,
                    retry_count = failed.retry_count,
                    error = %failed.error,
                    "calculation attempt failed"
                );
            }
        }
    });

    let worker = CalculationWorker::new(config.worker.clone(), record_store.clone(), Arc::new(sink));
    worker.start().await?;

    // Highest band first, backing off while the ingress queue is full
    while let Some(task) = scheduler.pop() {
        loop {
            match worker.submit_task(task.clone()) {
                Ok(()) => break,
                Err(CalcError::QueueFull) => tokio::time::sleep(config.queue.poll_backoff()).await,
                Err(e) => return Err(e.into()),
            }
        }
    }
    info!(tasks = planned, "all tasks submitted");

    let drained = tokio::time::timeout(Duration::from_secs(cli.drain_timeout), async {
        loop {
            let stats = worker.get_stats();
            if stats.completed_tasks + stats.dropped_tasks >= planned {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    tokio::select! {
        result = drained => {
            if result.is_err() {
                warn!(timeout_secs = cli.drain_timeout, "pool did not drain in time");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
    }

    worker.stop().await?;
    let stats = worker.get_stats();

    // Dropping the pool drops the sink, which ends the event log
    drop(worker);
    if let Err(e) = event_log.await {
        warn!(error = %e, "event log task failed");
    }

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
