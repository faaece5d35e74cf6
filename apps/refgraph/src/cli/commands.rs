//! # CLI Command Implementations
//!
//! Every command reads its inputs from disk, hands them to refgraph-core and
//! prints a result. Nothing is written unless `--output` is given.

use crate::config::Settings;
use refgraph_core::{
    EventBatch, Graph, GraphStore, MAX_SNAPSHOT_SIZE, Node, ObjectSlot, RefgraphError, deserialize,
    serialize,
};
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a document given to `check` (100 MB).
const MAX_DOCUMENT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum size of a single event batch file (100 MB).
const MAX_BATCH_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), RefgraphError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| RefgraphError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(RefgraphError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, RefgraphError> {
    let canonical = path.canonicalize().map_err(|e| {
        RefgraphError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(RefgraphError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against an existing parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, RefgraphError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        RefgraphError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(RefgraphError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| RefgraphError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Validate and read a UTF-8 input file.
fn read_input(path: &Path, max_size: u64) -> Result<String, RefgraphError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read_to_string(&validated).map_err(|e| {
        RefgraphError::IoError(format!("Cannot read '{}': {}", path.display(), e))
    })
}

fn load_store(path: &Path, settings: &Settings) -> Result<GraphStore, RefgraphError> {
    let text = read_input(path, MAX_SNAPSHOT_SIZE as u64)?;
    GraphStore::load(&text, settings.options.clone())
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Outcome of a canonical-form check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Nodes materialized by the decoder.
    pub nodes: usize,
    /// Length of the document, without trailing whitespace.
    pub bytes: usize,
}

/// Decode `text` and re-encode it; the result must equal `text` exactly.
///
/// Trailing whitespace (a final newline) is ignored.
pub fn check_document(text: &str, settings: &Settings) -> Result<CheckReport, RefgraphError> {
    let text = text.trim_end();
    let mut graph = Graph::new();
    let value = deserialize(text, &mut graph, &settings.options)?;
    let encoded = serialize(&graph, &value, &settings.options)?;

    if encoded != text {
        let offset = text
            .bytes()
            .zip(encoded.bytes())
            .position(|(left, right)| left != right)
            .unwrap_or_else(|| text.len().min(encoded.len()));
        return Err(RefgraphError::NotCanonical { offset });
    }

    Ok(CheckReport {
        nodes: graph.len(),
        bytes: text.len(),
    })
}

/// Check that a document file is in canonical encoded form.
pub fn cmd_check(doc: &Path, settings: &Settings, quiet: bool) -> Result<(), RefgraphError> {
    let text = read_input(doc, MAX_DOCUMENT_FILE_SIZE)?;
    let report = check_document(&text, settings)?;
    tracing::info!(path = %doc.display(), nodes = report.nodes, "document is canonical");

    if settings.json_mode {
        print_json(&serde_json::json!({
            "document": doc.to_string_lossy(),
            "canonical": true,
            "nodes": report.nodes,
            "bytes": report.bytes
        }));
    } else if !quiet {
        println!(
            "OK: {} ({} nodes, {} bytes)",
            doc.display(),
            report.nodes,
            report.bytes
        );
    }
    Ok(())
}

// =============================================================================
// REPLAY COMMAND
// =============================================================================

/// Apply every batch file to `store`, in order. Stops at the first failure.
pub fn replay_batches(store: &mut GraphStore, batches: &[PathBuf]) -> Result<(), RefgraphError> {
    for path in batches {
        let text = read_input(path, MAX_BATCH_FILE_SIZE)?;
        let batch = EventBatch::from_json_str(&text)?;
        store.apply(&batch).inspect_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "batch rejected");
        })?;
        tracing::info!(
            path = %path.display(),
            transaction = batch.transaction,
            events = batch.events.len(),
            "applied batch"
        );
    }
    Ok(())
}

/// Load a snapshot, apply batches and emit the resulting snapshot.
pub fn cmd_replay(
    snapshot: &Path,
    batches: &[PathBuf],
    output: Option<&Path>,
    settings: &Settings,
    quiet: bool,
) -> Result<(), RefgraphError> {
    let mut store = load_store(snapshot, settings)?;
    replay_batches(&mut store, batches)?;
    let text = store.snapshot()?;

    let Some(output) = output else {
        println!("{}", text);
        return Ok(());
    };

    let validated_output = validate_output_path(output)?;
    std::fs::write(&validated_output, &text)
        .map_err(|e| RefgraphError::IoError(format!("Write file: {}", e)))?;

    if settings.json_mode {
        print_json(&serde_json::json!({
            "output": validated_output.to_string_lossy(),
            "transaction": store.transaction(),
            "bytes": text.len()
        }));
    } else if !quiet {
        println!(
            "Wrote transaction {} ({} bytes) to {:?}",
            store.transaction(),
            text.len(),
            validated_output
        );
    }
    Ok(())
}

// =============================================================================
// INSPECT COMMAND
// =============================================================================

/// One row of the object table summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub index: u64,
    /// `live`, `disposed` or `vacant`.
    pub state: &'static str,
    /// Node kind for live objects.
    pub kind: Option<String>,
    /// Field, element, entry or member count for live objects.
    pub size: Option<usize>,
}

/// Summarize the object table of a store.
pub fn summarize_objects(store: &GraphStore) -> Result<Vec<ObjectSummary>, RefgraphError> {
    let graph = store.graph();
    (0u64..)
        .zip(store.objects())
        .map(|(index, slot)| {
            let summary = match slot {
                ObjectSlot::Live(id) => {
                    let node = graph.node(*id)?;
                    let size = match node {
                        Node::Record(fields) => fields.len(),
                        Node::Sequence(items) => items.len(),
                        Node::Map(entries) => entries.len(),
                        Node::Set(members) => members.len(),
                        Node::External(_) => 0,
                    };
                    ObjectSummary {
                        index,
                        state: "live",
                        kind: Some(node.kind().to_string()),
                        size: Some(size),
                    }
                }
                ObjectSlot::Disposed => ObjectSummary {
                    index,
                    state: "disposed",
                    kind: None,
                    size: None,
                },
                ObjectSlot::Vacant => ObjectSummary {
                    index,
                    state: "vacant",
                    kind: None,
                    size: None,
                },
            };
            Ok(summary)
        })
        .collect()
}

/// Print a snapshot summary.
pub fn cmd_inspect(snapshot: &Path, settings: &Settings) -> Result<(), RefgraphError> {
    let store = load_store(snapshot, settings)?;
    let objects = summarize_objects(&store)?;

    if settings.json_mode {
        let rows: Vec<serde_json::Value> = objects
            .iter()
            .map(|row| {
                serde_json::json!({
                    "index": row.index,
                    "state": row.state,
                    "kind": row.kind,
                    "size": row.size
                })
            })
            .collect();
        print_json(&serde_json::json!({
            "snapshot": snapshot.to_string_lossy(),
            "transaction": store.transaction(),
            "properties": store.properties(),
            "objects": rows
        }));
        return Ok(());
    }

    println!("Refgraph Snapshot");
    println!("=================");
    println!("Snapshot:    {:?}", snapshot);
    println!("Transaction: {}", store.transaction());
    println!();
    println!("Properties ({}):", store.properties().len());
    for (index, name) in store.properties().iter().enumerate() {
        println!("  {:>4}  {}", index, name);
    }
    println!();
    println!("Objects ({}):", objects.len());
    for row in &objects {
        match (&row.kind, row.size) {
            (Some(kind), Some(size)) => {
                println!("  {:>4}  {:<8}  {:<8}  {}", row.index, row.state, kind, size);
            }
            _ => println!("  {:>4}  {}", row.index, row.state),
        }
    }

    Ok(())
}
