//! # Snapshot Format
//!
//! JSON document a [`GraphStore`] is seeded from and exported to:
//!
//! ```json
//! {"transaction": 3, "properties": ["Name"], "objects": <encoded sequence>}
//! ```
//!
//! `objects` is the object table encoded with the graph codec. Each entry is
//! `null` (a tombstone), a record or container (a live object), or a
//! container wrapper record. Never-created gaps are exported as `null` too
//! and reload as tombstones, so their indexes cannot be created afterwards.
//! Wrapper records look like:
//!
//! ```json
//! {"$container-index": 4, "$container-contents": [{"~$£€þ": [7, "M"]}, ...]}
//! ```
//!
//! Wrappers are lifted on load: the table holds the container itself and
//! every reference to the wrapper is rewritten to the container. Export wraps
//! every container in the table.
//!
//! File I/O is in the app layer.

use crate::codec::{CodecOptions, decode, encode_nested};
use crate::primitives::{CONTAINER_CONTENTS_KEY, CONTAINER_INDEX_KEY};
use crate::store::{GraphStore, ObjectSlot};
use crate::{Graph, NodeId, RefgraphError, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted snapshot text size, checked before parsing.
pub const MAX_SNAPSHOT_SIZE: usize = 500 * 1024 * 1024;

// =============================================================================
// DOCUMENT
// =============================================================================

/// Parsed snapshot document. `objects` is still in encoded form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub transaction: u64,
    pub properties: Vec<String>,
    pub objects: JsonValue,
}

/// Parse snapshot text and load it into a store.
pub fn store_from_str(text: &str, options: CodecOptions) -> Result<GraphStore, RefgraphError> {
    if text.len() > MAX_SNAPSHOT_SIZE {
        return Err(RefgraphError::InvalidSnapshot(format!(
            "snapshot size {} bytes exceeds maximum allowed {} bytes",
            text.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }
    let document: SnapshotDocument = serde_json::from_str(text)?;
    store_from_document(&document, options)
}

/// Load a store from a parsed snapshot document.
pub fn store_from_document(document: &SnapshotDocument, options: CodecOptions) -> Result<GraphStore, RefgraphError> {
    let mut graph = Graph::new();
    let root = decode(&document.objects, &mut graph, &options)?;
    let entries = root
        .as_node()
        .and_then(|id| graph.sequence(id).ok())
        .cloned()
        .ok_or_else(|| RefgraphError::InvalidSnapshot("objects must be a sequence".to_string()))?;

    let mut objects = Vec::with_capacity(entries.len());
    let mut lifted: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    for (position, entry) in (0u64..).zip(entries) {
        let slot = match entry {
            Value::Null => ObjectSlot::Disposed,
            Value::Node(id) => match unwrap_container(&graph, id, position)? {
                Some(container) => {
                    lifted.insert(id, container);
                    ObjectSlot::Live(container)
                }
                None => ObjectSlot::Live(id),
            },
            other => {
                return Err(RefgraphError::InvalidSnapshot(format!(
                    "object {position} is a scalar: {other:?}"
                )));
            }
        };
        objects.push(slot);
    }

    if !lifted.is_empty() {
        graph.redirect(&lifted);
    }

    tracing::debug!(
        transaction = document.transaction,
        objects = objects.len(),
        lifted = lifted.len(),
        "loaded snapshot"
    );
    let mut store = GraphStore::from_parts(graph, document.transaction, document.properties.clone(), objects, options);
    // The decoded table sequence and lifted wrappers are no longer reachable.
    store.compact();
    Ok(store)
}

/// If `id` is a container wrapper, check it and return the container.
fn unwrap_container(graph: &Graph, id: NodeId, position: u64) -> Result<Option<NodeId>, RefgraphError> {
    let Ok(fields) = graph.record(id) else {
        return Ok(None);
    };
    let (Some(index), Some(contents)) = (fields.get(CONTAINER_INDEX_KEY), fields.get(CONTAINER_CONTENTS_KEY)) else {
        return Ok(None);
    };
    if fields.len() != 2 {
        return Ok(None);
    }

    if index.as_u64() != Some(position) {
        return Err(RefgraphError::InvalidSnapshot(format!(
            "wrapper at object {position} declares {CONTAINER_INDEX_KEY} {index:?}"
        )));
    }
    let container = contents
        .as_node()
        .filter(|container| {
            graph
                .node(*container)
                .is_ok_and(|node| node.container_kind().is_some())
        })
        .ok_or_else(|| {
            RefgraphError::InvalidSnapshot(format!(
                "wrapper at object {position} does not hold a sequence, map or set"
            ))
        })?;
    Ok(Some(container))
}

/// Export a store as a snapshot document.
pub fn store_to_document(store: &GraphStore) -> Result<SnapshotDocument, RefgraphError> {
    let mut graph = store.graph().clone();
    let root = graph.new_sequence();
    for (position, slot) in (0u64..).zip(store.objects()) {
        let entry = match slot {
            ObjectSlot::Live(id) => {
                if graph.node(*id)?.container_kind().is_some() {
                    let wrapper = graph.new_record();
                    graph.set_field(wrapper, CONTAINER_INDEX_KEY, position)?;
                    graph.set_field(wrapper, CONTAINER_CONTENTS_KEY, *id)?;
                    Value::Node(wrapper)
                } else {
                    Value::Node(*id)
                }
            }
            ObjectSlot::Vacant | ObjectSlot::Disposed => Value::Null,
        };
        graph.push(root, entry)?;
    }

    // The table sits one object level below the document root.
    let objects = encode_nested(&graph, &Value::Node(root), store.options(), 1)?;
    Ok(SnapshotDocument {
        transaction: store.transaction(),
        properties: store.properties().to_vec(),
        objects,
    })
}

/// Export a store as snapshot text.
pub fn store_to_string(store: &GraphStore) -> Result<String, RefgraphError> {
    Ok(serde_json::to_string(&store_to_document(store)?)?)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::EventBatch;
    use serde_json::json;

    fn dash() -> CodecOptions {
        CodecOptions::new().with_prefix("-")
    }

    fn load(document: JsonValue) -> Result<GraphStore, RefgraphError> {
        store_from_str(&document.to_string(), dash())
    }

    #[test]
    fn empty_snapshot_loads() {
        let store = load(json!({"transaction": 0, "properties": [], "objects": []})).expect("load");
        assert_eq!(store.transaction(), 0);
        assert!(store.objects().is_empty());
    }

    #[test]
    fn wrapper_is_lifted_and_references_redirected() {
        let store = load(json!({
            "transaction": 3,
            "properties": ["Items"],
            "objects": [
                {"-þ": [0, "A"]},
                {"-°": 1, "Items": {
                    "-°": 2,
                    "$container-index": 1,
                    "$container-contents": [{"-þ": [3, "A"]}, "x"]
                }},
                {"->": 2},
                null
            ]
        }))
        .expect("load");

        assert_eq!(store.transaction(), 3);
        assert_eq!(store.objects()[2], ObjectSlot::Disposed);

        let graph = store.graph();
        let list = store.object(1).expect("object 1");
        assert_eq!(graph.sequence(list).expect("lifted"), &vec![Value::from("x")]);

        let owner = graph.record(store.object(0).expect("object 0")).expect("record");
        assert_eq!(owner.get("Items"), Some(&Value::Node(list)));
    }

    #[test]
    fn invalid_snapshots_are_rejected() {
        let cases = [
            json!({"transaction": 0, "properties": [], "objects": {"-°": 0}}),
            json!({"transaction": 0, "properties": [], "objects": [1]}),
            json!({"transaction": 0, "properties": [], "objects": [
                {"$container-index": 5, "$container-contents": [{"-þ": [0, "S"]}]}
            ]}),
            json!({"transaction": 0, "properties": [], "objects": [
                {"$container-index": 0, "$container-contents": {"a": 1}}
            ]}),
        ];
        for document in cases {
            assert!(
                matches!(load(document.clone()), Err(RefgraphError::InvalidSnapshot(_))),
                "{document} should be rejected"
            );
        }
    }

    #[test]
    fn missing_field_is_json_error() {
        let result = load(json!({"transaction": 0, "objects": []}));
        assert!(matches!(result, Err(RefgraphError::Json(_))));
    }

    fn nested_payload_store(depth: usize) -> GraphStore {
        let payload = format!("{}1{}", "[".repeat(depth), "]".repeat(depth));
        let text = format!(
            r#"{{"transaction":1,"events":[["N",0,"plain"],["P","Deep",0],["C",0,0,{payload}]]}}"#
        );
        let batch = EventBatch::from_json_str(&text).expect("batch");
        let mut store = GraphStore::with_options(dash());
        store.apply(&batch).expect("apply");
        store
    }

    #[test]
    fn export_stays_within_parser_depth() {
        // Document, table and record enclose the field; each sequence adds one
        // level and the innermost needs three more for its tag.
        let store = nested_payload_store(122);
        let text = store.snapshot().expect("export");
        let reloaded = GraphStore::load(&text, dash()).expect("reload");
        assert_eq!(reloaded.snapshot().expect("export again"), text);

        let store = nested_payload_store(123);
        assert!(matches!(store.snapshot(), Err(RefgraphError::NestingTooDeep(_))));
    }

    #[test]
    fn gaps_reload_as_tombstones() {
        let mut store = GraphStore::with_options(dash());
        let batch = EventBatch::from_json_str(r#"{"transaction":1,"events":[["N",2,"plain"]]}"#).expect("batch");
        store.apply(&batch).expect("apply");
        assert_eq!(store.objects()[0], ObjectSlot::Vacant);

        let text = store.snapshot().expect("export");
        assert_eq!(text, r#"{"transaction":1,"properties":[],"objects":[{"-þ":[0,"A"]},null,null,{"-°":1}]}"#);

        let mut reloaded = GraphStore::load(&text, dash()).expect("reload");
        assert_eq!(reloaded.objects()[0], ObjectSlot::Disposed);
        let create = EventBatch::from_json_str(r#"{"transaction":2,"events":[["N",0,"plain"]]}"#).expect("batch");
        assert!(matches!(reloaded.apply(&create), Err(RefgraphError::ObjectDisposed(0))));
    }

    #[test]
    fn export_reload_export_is_byte_identical() {
        let mut store = GraphStore::with_options(dash());
        let batch: EventBatch = serde_json::from_value(json!({
            "transaction": 1,
            "events": [
                ["N", 0, "plain"],
                ["N", 1, "map"],
                ["N", 3, "set"],
                ["P", "Lookup", 0],
                ["C", 0, 0, {"->": 1}],
                ["M", 1, "self", {"->": 1}],
                ["A", 3, {"->": 0}],
                ["N", 4, "plain"],
                ["D", 4]
            ]
        }))
        .expect("batch");
        store.apply(&batch).expect("apply");

        let first = store.snapshot().expect("export");
        let reloaded = GraphStore::load(&first, dash()).expect("reload");
        let second = reloaded.snapshot().expect("export again");
        assert_eq!(first, second);

        assert_eq!(reloaded.transaction(), 1);
        assert_eq!(reloaded.properties(), ["Lookup".to_string()]);
        assert_eq!(reloaded.objects()[2], ObjectSlot::Disposed);
        assert_eq!(reloaded.objects()[4], ObjectSlot::Disposed);

        let map = reloaded.object(1).expect("map");
        let record = reloaded.graph().record(reloaded.object(0).expect("0")).expect("record");
        assert_eq!(record.get("Lookup"), Some(&Value::Node(map)));
        assert_eq!(
            reloaded.graph().map(map).expect("map").get(&Value::from("self")),
            Some(&Value::Node(map))
        );
    }
}
