//! Simulate command implementation.
//!
//! Resolves an intent against an in-memory backend loaded from a dataset
//! file, optionally starting from an existing snapshot, and reports how
//! many rounds and requests it took.

use super::files::{read_json, write_json, DatasetFile};
use fractal_cache::{CacheContext, CacheSnapshot, DiffEngine, Intent};
use fractal_sync::{ExecutorConfig, MemoryAdapter, PlanExecutor, ResolveReport};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Options of one simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions<'a> {
    /// Dataset file.
    pub dataset: &'a Path,
    /// Intent file.
    pub intent: &'a Path,
    /// Snapshot to start from.
    pub from: Option<&'a Path>,
    /// Round cap.
    pub rounds: usize,
    /// Requests in flight at once. `None` runs sequentially.
    pub concurrency: Option<usize>,
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulateResult {
    /// Plan-execute rounds.
    pub rounds: usize,
    /// Requests sent.
    pub requests: usize,
    /// The final plan was empty.
    pub converged: bool,
    /// Id list calls made to the backend.
    pub id_calls: u64,
    /// Entity calls made to the backend.
    pub entity_calls: u64,
    /// Cached records afterwards.
    pub records: usize,
    /// Bindings afterwards.
    pub bindings: usize,
}

/// Runs a simulation and returns its result with the final cache snapshot.
pub fn simulate(
    options: &SimulateOptions<'_>,
) -> Result<(SimulateResult, CacheSnapshot), Box<dyn std::error::Error>> {
    let file: DatasetFile = read_json(options.dataset)?;
    let intent: Intent = read_json(options.intent)?;
    let schema = Arc::new(file.schema);

    let context = match options.from {
        Some(path) => {
            let snapshot: CacheSnapshot = read_json(path)?;
            if snapshot.schema != *schema {
                return Err(format!(
                    "snapshot {} was taken with a different schema",
                    path.display()
                )
                .into());
            }
            CacheContext::from_snapshot(snapshot)?
        }
        None => CacheContext::new(Arc::clone(&schema)),
    };

    let adapter = Arc::new(MemoryAdapter::new(Arc::clone(&schema), file.dataset));
    let mut config = ExecutorConfig::new().with_max_rounds(options.rounds);
    if let Some(concurrency) = options.concurrency {
        config = config.with_max_in_flight(concurrency);
    }
    let executor = PlanExecutor::new(
        Arc::clone(&adapter),
        Arc::new(context),
        Arc::new(DiffEngine::with_defaults(schema)),
    )
    .with_config(config);

    let report = match options.concurrency {
        Some(_) => resolve_concurrent(&executor, &intent)?,
        None => executor.resolve(&intent)?,
    };

    let calls = adapter.stats();
    let stats = executor.context().stats();
    let result = SimulateResult {
        rounds: report.rounds,
        requests: report.requests,
        converged: report.converged,
        id_calls: calls.id_requests,
        entity_calls: calls.entity_requests,
        records: stats.records,
        bindings: stats.bindings,
    };
    Ok((result, executor.context().snapshot()))
}

fn resolve_concurrent(
    executor: &PlanExecutor<MemoryAdapter>,
    intent: &Intent,
) -> Result<ResolveReport, Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(executor.resolve_concurrent(intent))?)
}

/// Runs the simulate command.
pub fn run(
    options: &SimulateOptions<'_>,
    out: Option<&Path>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (result, snapshot) = simulate(options)?;
    if let Some(out) = out {
        write_json(out, &snapshot)?;
        info!(path = %out.display(), records = snapshot.records.len(), "wrote snapshot");
    }
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result, out),
    }
    Ok(())
}

fn print_text_output(result: &SimulateResult, out: Option<&Path>) {
    println!("Simulation");
    println!("==========");
    println!();
    println!("Rounds:    {}", result.rounds);
    println!("Requests:  {}", result.requests);
    println!(
        "Converged: {}",
        if result.converged { "yes" } else { "no (round limit)" }
    );
    println!();
    println!("Backend calls:");
    println!("  Id lists: {}", result.id_calls);
    println!("  Entities: {}", result.entity_calls);
    println!();
    println!("Cache:");
    println!("  Records:  {}", result.records);
    println!("  Bindings: {}", result.bindings);
    if let Some(out) = out {
        println!();
        println!("Snapshot written to {}", out.display());
    }
}
