//! Plan command implementation.

use super::files::read_json;
use fractal_cache::{CacheContext, CacheSnapshot, DiffEngine, FetchPlan, Intent};
use std::path::Path;
use std::sync::Arc;

/// Computes the fetch plan of an intent against a snapshot.
pub fn compute(snapshot: &Path, intent: &Path) -> Result<FetchPlan, Box<dyn std::error::Error>> {
    let snapshot: CacheSnapshot = read_json(snapshot)?;
    let intent: Intent = read_json(intent)?;
    let context = CacheContext::from_snapshot(snapshot)?;
    let engine = DiffEngine::with_defaults(Arc::clone(context.schema()));
    Ok(context.plan(&engine, &intent)?)
}

/// Runs the plan command.
pub fn run(snapshot: &Path, intent: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let plan = compute(snapshot, intent)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&plan)?),
        _ => print_text_output(&plan),
    }
    Ok(())
}

fn print_text_output(plan: &FetchPlan) {
    if plan.is_empty() {
        println!("Cache answers the intent; nothing to fetch.");
        return;
    }
    println!(
        "Fetch plan: {} requests ({} list, {} by id)",
        plan.len(),
        plan.pagination_count(),
        plan.len() - plan.pagination_count()
    );
    for (i, request) in plan.requests.iter().enumerate() {
        println!("  [{i}] {request}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::files::write_json;
    use fractal_testkit::{CacheHarness, TempWorkspace};

    fn posts() -> Intent {
        Intent::new("post").with_take(3)
    }

    #[test]
    fn cold_snapshot_plans_the_window() {
        let harness = CacheHarness::blog();
        let workspace = TempWorkspace::new();
        let snapshot = workspace.write_json("snapshot.json", &harness.context.snapshot());
        let intent = workspace.write_json("intent.json", &posts());

        let plan = compute(&snapshot, &intent).unwrap();
        assert_eq!(plan.pagination_count(), 1);
    }

    #[test]
    fn warm_snapshot_plans_nothing() {
        let harness = CacheHarness::blog();
        harness.executor().resolve(&posts()).unwrap();

        let workspace = TempWorkspace::new();
        let snapshot = workspace.file("snapshot.json");
        write_json(&snapshot, &harness.context.snapshot()).unwrap();
        let intent = workspace.write_json("intent.json", &posts());

        assert!(compute(&snapshot, &intent).unwrap().is_empty());
        run(&snapshot, &intent, "json").unwrap();
    }

    #[test]
    fn malformed_intent_is_rejected() {
        let harness = CacheHarness::blog();
        let workspace = TempWorkspace::new();
        let snapshot = workspace.write_json("snapshot.json", &harness.context.snapshot());
        let intent = workspace.write_json("intent.json", &Intent::new(""));

        assert!(compute(&snapshot, &intent).is_err());
    }
}
