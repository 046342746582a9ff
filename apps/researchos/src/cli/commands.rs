//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::Output;
use crate::settings::{Backend, Settings, load_packages};
use researchos_core::packages::{PackageContext, collect_bridges};
use researchos_core::{
    AddressGraph, ConfigGraph, Database, EntityId, ResearchObject, RosError, Subset,
    bridge_packages, build_pipeline_graph, link_step,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create a new database file.
pub fn cmd_init(settings: &Settings, out: Output, force: bool) -> Result<(), RosError> {
    if settings.backend == Backend::Memory {
        if !out.quiet {
            println!("The memory backend keeps nothing between runs; nothing to initialize.");
        }
        return Ok(());
    }

    let path = &settings.database;
    if path.exists() {
        if !force {
            return Err(RosError::Validation(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path).map_err(|e| {
            RosError::IoError(format!("Cannot remove '{}': {}", path.display(), e))
        })?;
    }
    Database::open(path, settings.core.clone())?;
    tracing::info!(path = %path.display(), "initialized database");

    if out.json {
        print_json(&serde_json::json!({ "database": path.to_string_lossy() }));
    } else if !out.quiet {
        println!("Initialized new redb database at {:?}", path);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show counts of actions, entities, values and pipeline edges.
pub fn cmd_status(settings: &Settings, out: Output) -> Result<(), RosError> {
    let db = open_database(settings)?;
    let store = db.store();
    let actions = store.actions()?;
    let mut kinds: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in store.entities()? {
        *kinds.entry(record.kind.name()).or_default() += 1;
    }
    let blobs = store.blob_count()?;
    let edges = store.pipeline_edges()?.iter().filter(|e| e.is_active).count();
    let last = match actions.last() {
        Some(record) => Some((record, record.timestamp()?)),
        None => None,
    };

    if out.json {
        print_json(&serde_json::json!({
            "database": settings.database.to_string_lossy(),
            "backend": settings.backend.to_string(),
            "actions": actions.len(),
            "entities": kinds,
            "value_blobs": blobs,
            "pipeline_edges": edges,
            "last_action": last.as_ref().map(|(a, _)| a.id.to_string()),
            "last_action_at": last.as_ref().map(|(_, at)| at.clone()),
        }));
        return Ok(());
    }

    println!("ResearchOS Status");
    println!("=================");
    println!("Database: {:?}", settings.database);
    println!("Backend:  {}", settings.backend);
    println!();
    println!("Actions:        {}", actions.len());
    if let Some((record, at)) = &last {
        println!("Last action:    {} {} at {}", record.id, record.name, at);
    }
    println!("Value blobs:    {}", blobs);
    println!("Pipeline edges: {}", edges);
    if !kinds.is_empty() {
        println!();
        println!("Entities:");
        for (kind, count) in &kinds {
            println!("  {:<10} {}", kind, count);
        }
    }
    Ok(())
}

// =============================================================================
// COMPACT COMMAND
// =============================================================================

/// Compact the redb file. A no-op for the memory backend.
pub fn cmd_compact(settings: &Settings, out: Output) -> Result<(), RosError> {
    let mut db = open_database(settings)?;
    let compacted = db.compact()?;

    if out.json {
        print_json(&serde_json::json!({ "compacted": compacted }));
    } else if !out.quiet {
        if compacted {
            println!("Compacted {:?}", settings.database);
        } else {
            println!("The memory backend has no file to compact.");
        }
    }
    Ok(())
}

// =============================================================================
// PACKAGES COMMAND
// =============================================================================

/// Build the runnable graph of `files` and apply every bridge they declare.
pub fn cmd_packages(settings: &Settings, out: Output, files: &[PathBuf]) -> Result<(), RosError> {
    let packages = load_packages(files)?;
    let mut graph = ConfigGraph::from_packages(&packages, &settings.core)?;
    let ctx = PackageContext::from_packages(&packages);
    let bridged = bridge_packages(&mut graph, &collect_bridges(&packages), &ctx)?;
    let order = graph.runnable_order()?;
    let open = graph.open_inputs();

    if out.json {
        let bridges: Vec<serde_json::Value> = graph
            .bridges()
            .into_iter()
            .map(|(source, target, tag)| {
                serde_json::json!({ "source": source, "target": target, "bridge": tag })
            })
            .collect();
        print_json(&serde_json::json!({
            "packages": ctx.names().collect::<Vec<_>>(),
            "nodes": graph.node_count(),
            "edges": graph.edge_count(),
            "bridges": bridges,
            "order": order,
            "open_inputs": open,
        }));
        return Ok(());
    }

    if !out.quiet {
        println!(
            "Packages: {}",
            ctx.names().collect::<Vec<_>>().join(", ")
        );
        println!(
            "Graph:    {} nodes, {} edges ({} bridged)",
            graph.node_count(),
            graph.edge_count(),
            bridged
        );
        println!();
    }
    println!("Run order:");
    for (i, runnable) in order.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, runnable);
    }
    if !open.is_empty() {
        println!();
        println!("Open inputs:");
        for input in &open {
            println!("  {}", input);
        }
    }
    Ok(())
}

// =============================================================================
// LINK COMMAND
// =============================================================================

/// Link the inputs of `step` and report the new edges.
pub fn cmd_link(settings: &Settings, out: Output, step: &str) -> Result<(), RosError> {
    let mut db = open_database(settings)?;
    let edges = link_step(&mut db, &EntityId::from(step))?;

    if out.json {
        print_json(&serde_json::to_value(&edges).unwrap_or_default());
        return Ok(());
    }
    if edges.is_empty() {
        if !out.quiet {
            println!("No new edges for {}", step);
        }
        return Ok(());
    }
    for edge in &edges {
        println!(
            "{}  {}:{} -> {}:{}",
            edge.id, edge.outlet.parent, edge.outlet.name, edge.inlet.parent, edge.inlet.name
        );
    }
    Ok(())
}

// =============================================================================
// PIPELINE COMMAND
// =============================================================================

/// Show every step and active edge of the pipeline graph.
pub fn cmd_pipeline(settings: &Settings, out: Output) -> Result<(), RosError> {
    let db = open_database(settings)?;
    let graph = build_pipeline_graph(&db)?;

    if out.json {
        print_json(&serde_json::json!({
            "nodes": graph.nodes().map(EntityId::as_str).collect::<Vec<_>>(),
            "edges": serde_json::to_value(graph.edges()).unwrap_or_default(),
        }));
        return Ok(());
    }

    if !out.quiet {
        println!(
            "Pipeline: {} steps, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
    }
    for edge in graph.edges() {
        println!(
            "  {}:{} -> {}:{}",
            edge.outlet.parent, edge.outlet.name, edge.inlet.parent, edge.inlet.name
        );
    }
    Ok(())
}

// =============================================================================
// SUBSET COMMAND
// =============================================================================

/// Resolve a subset and list its members in hierarchy order.
pub fn cmd_subset(settings: &Settings, out: Output, subset: &str) -> Result<(), RosError> {
    let db = open_database(settings)?;
    let subset = Subset::load(&db, &EntityId::from(subset))?;
    let graph: AddressGraph = subset.resolve(&db)?;
    let members: Vec<&str> = graph
        .topological_order()
        .iter()
        .map(EntityId::as_str)
        .collect();

    if out.json {
        print_json(&serde_json::json!({
            "subset": subset.id().as_str(),
            "dataset": subset.dataset().as_str(),
            "conditions": subset.conditions().to_json(),
            "members": members,
            "edges": graph.edge_count(),
        }));
        return Ok(());
    }

    if !out.quiet {
        println!(
            "Subset {} ({}) over {}: {} members",
            subset.name(),
            subset.id(),
            subset.dataset(),
            members.len()
        );
    }
    for member in members {
        println!("  {}", member);
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the database named by `settings` with its backend.
pub fn open_database(settings: &Settings) -> Result<Database, RosError> {
    match settings.backend {
        Backend::Memory => Ok(Database::in_memory(settings.core.clone())),
        Backend::Redb => Database::open(&settings.database, settings.core.clone()),
    }
}
