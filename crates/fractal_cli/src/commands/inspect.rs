//! Inspect command implementation.

use super::files::read_json;
use fractal_cache::{CacheSnapshot, Interval};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot format version.
    pub version: u32,
    /// Validation failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    /// Cached records per entity type.
    pub records: BTreeMap<String, usize>,
    /// Query definitions with their bindings.
    pub definitions: Vec<DefinitionSummary>,
    /// Relation filters known to be fully cached.
    pub exhausted_relation_filters: usize,
}

/// One query definition.
#[derive(Debug, Serialize)]
pub struct DefinitionSummary {
    /// Definition id.
    pub id: String,
    /// Listed entity type.
    pub entity_type: String,
    /// Sort keys, rendered.
    pub order_by: Vec<String>,
    /// Filter template, rendered.
    pub template: String,
    /// Bindings of this definition.
    pub bindings: Vec<BindingSummary>,
}

/// One binding.
#[derive(Debug, Serialize)]
pub struct BindingSummary {
    /// Parameter hash.
    pub param_hash: String,
    /// Cached index ranges.
    pub intervals: Vec<Interval>,
    /// Known positions.
    pub known_ids: usize,
    /// The list end is known.
    pub exhausted: bool,
    /// Awaiting revalidation.
    pub dirty: bool,
}

/// Summarizes a snapshot.
pub fn summarize(snapshot: &CacheSnapshot) -> InspectResult {
    let mut records = BTreeMap::new();
    for record in &snapshot.records {
        *records.entry(record.entity_type().to_string()).or_insert(0) += 1;
    }

    let definitions = snapshot
        .definitions
        .iter()
        .map(|def| DefinitionSummary {
            id: def.id.clone(),
            entity_type: def.entity_type.clone(),
            order_by: def
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.field, o.direction.as_str()))
                .collect(),
            template: def.where_template.to_string(),
            bindings: snapshot
                .bindings
                .iter()
                .filter(|b| b.definition_id == def.id)
                .map(|b| BindingSummary {
                    param_hash: b.param_hash.clone(),
                    intervals: b.intervals().as_slice().to_vec(),
                    known_ids: b.index_to_id().len(),
                    exhausted: b.is_exhausted(),
                    dirty: b.dirty,
                })
                .collect(),
        })
        .collect();

    InspectResult {
        version: snapshot.version,
        problem: snapshot.validate().err().map(|e| e.to_string()),
        records,
        definitions,
        exhausted_relation_filters: snapshot.relation_predicates.len(),
    }
}

/// Runs the inspect command.
pub fn run(snapshot: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot: CacheSnapshot = read_json(snapshot)?;
    let result = summarize(&snapshot);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Fractal Cache Snapshot");
    println!("======================");
    println!();
    println!("Version: {}", result.version);
    match &result.problem {
        Some(problem) => println!("Status:  INVALID ({problem})"),
        None => println!("Status:  valid"),
    }
    println!();
    println!("Records:");
    for (entity_type, count) in &result.records {
        println!("  {entity_type:<16} {count}");
    }
    println!();
    println!("Definitions:");
    for def in &result.definitions {
        let order = if def.order_by.is_empty() {
            "id".to_string()
        } else {
            def.order_by.join(", ")
        };
        println!(
            "  [{}] {} where {} order by {}",
            short(&def.id),
            def.entity_type,
            def.template,
            order
        );
        for binding in &def.bindings {
            let intervals: Vec<String> = binding.intervals.iter().map(ToString::to_string).collect();
            let mut flags = Vec::new();
            if binding.exhausted {
                flags.push("exhausted");
            }
            if binding.dirty {
                flags.push("dirty");
            }
            println!(
                "    {} {} ids in [{}] {}",
                short(&binding.param_hash),
                binding.known_ids,
                intervals.join(", "),
                flags.join(" ")
            );
        }
    }
    println!();
    println!(
        "Exhausted relation filters: {}",
        result.exhausted_relation_filters
    );
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
