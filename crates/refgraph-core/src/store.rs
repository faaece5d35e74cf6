//! # Graph Store
//!
//! A materialized graph plus the index tables mutation events address:
//! - `objects`: object index -> live node or tombstone
//! - `properties`: append-only property-name table
//! - `transaction`: number of the last applied batch
//!
//! The store only moves forward, one batch at a time, and a batch either
//! applies completely or not at all. Changes made by a batch are journaled
//! and undone if any of its events fails.
//!
//! Nodes no live object can reach are reclaimed after a batch once the arena
//! has doubled since the last compaction. `NodeId`s handed out by a store are
//! valid until the next successful `apply`.

use crate::codec::CodecOptions;
use crate::formats::snapshot;
use crate::mutation::{EventBatch, MutationEngine, ObjectKind};
use crate::primitives::{ARENA_COMPACTION_FLOOR, CONTAINER_CONTENTS_KEY, CONTAINER_INDEX_KEY, MAX_OBJECT_TABLE_LEN};
use crate::{Graph, Node, NodeId, RefgraphError, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// State of one entry of the object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectSlot {
    /// Never created.
    Vacant,
    Live(NodeId),
    /// Disposed. The index is never reused.
    Disposed,
}

/// Event-sourced graph store.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    graph: Graph,
    transaction: u64,
    properties: Vec<String>,
    objects: Vec<ObjectSlot>,
    options: CodecOptions,
    /// Arena size that triggers the next compaction.
    compact_at: usize,
    /// Pre-images of the batch being applied.
    journal: Option<Journal>,
}

/// What a batch changed, enough to put it back.
#[derive(Debug, Clone, Default)]
struct Journal {
    graph_len: usize,
    objects_len: usize,
    properties_len: usize,
    slots: BTreeMap<usize, ObjectSlot>,
    nodes: BTreeMap<NodeId, Node>,
}

impl GraphStore {
    /// Empty store at transaction 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store using `options` for payload references and snapshots.
    #[must_use]
    pub fn with_options(options: CodecOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub(crate) fn from_parts(
        graph: Graph,
        transaction: u64,
        properties: Vec<String>,
        objects: Vec<ObjectSlot>,
        options: CodecOptions,
    ) -> Self {
        Self {
            graph,
            transaction,
            properties,
            objects,
            options,
            compact_at: 0,
            journal: None,
        }
    }

    /// Load a store from snapshot text.
    pub fn load(text: &str, options: CodecOptions) -> Result<Self, RefgraphError> {
        snapshot::store_from_str(text, options)
    }

    /// Export the store as snapshot text.
    pub fn snapshot(&self) -> Result<String, RefgraphError> {
        snapshot::store_to_string(self)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn transaction(&self) -> u64 {
        self.transaction
    }

    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[must_use]
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// The whole object table, tombstones and gaps included.
    #[must_use]
    pub fn objects(&self) -> &[ObjectSlot] {
        &self.objects
    }

    /// The live node at `index`, if any.
    #[must_use]
    pub fn object(&self, index: u64) -> Option<NodeId> {
        match self.slot(index) {
            Some(ObjectSlot::Live(id)) => Some(id),
            _ => None,
        }
    }

    /// Live objects in index order.
    pub fn live_objects(&self) -> impl Iterator<Item = (u64, NodeId)> + '_ {
        (0u64..).zip(self.objects.iter()).filter_map(|(index, slot)| match slot {
            ObjectSlot::Live(id) => Some((index, *id)),
            ObjectSlot::Vacant | ObjectSlot::Disposed => None,
        })
    }

    fn slot(&self, index: u64) -> Option<ObjectSlot> {
        let position = usize::try_from(index).ok()?;
        self.objects.get(position).copied()
    }

    // -------------------------------------------------------------------------
    // Batches
    // -------------------------------------------------------------------------

    /// Apply a batch. It must carry exactly `transaction() + 1`.
    ///
    /// If any event fails, every change made by the batch is undone and the
    /// store is left as it was.
    pub fn apply(&mut self, batch: &EventBatch) -> Result<(), RefgraphError> {
        let expected = self.transaction.saturating_add(1);
        if batch.transaction != expected {
            return Err(RefgraphError::OutOfOrderTransaction {
                expected,
                actual: batch.transaction,
            });
        }

        self.journal = Some(Journal {
            graph_len: self.graph.len(),
            objects_len: self.objects.len(),
            properties_len: self.properties.len(),
            ..Journal::default()
        });
        for (position, event) in batch.events.iter().enumerate() {
            tracing::trace!(
                transaction = batch.transaction,
                position,
                code = event.code(),
                "applying event"
            );
            if let Err(err) = MutationEngine::apply_event(self, event) {
                tracing::warn!(
                    transaction = batch.transaction,
                    position,
                    code = event.code(),
                    error = %err,
                    "event rejected, batch discarded"
                );
                self.rollback();
                return Err(err);
            }
        }
        self.journal = None;
        self.transaction = batch.transaction;

        if self.graph.len() > self.compact_at.max(ARENA_COMPACTION_FLOOR) {
            self.compact();
        }

        tracing::debug!(
            transaction = self.transaction,
            events = batch.events.len(),
            objects = self.objects.len(),
            "applied batch"
        );
        Ok(())
    }

    /// Undo the journaled batch.
    fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        self.graph.truncate(journal.graph_len);
        for (id, node) in journal.nodes {
            if let Ok(slot) = self.graph.node_mut(id) {
                *slot = node;
            }
        }
        for (position, previous) in journal.slots {
            if let Some(slot) = self.objects.get_mut(position) {
                *slot = previous;
            }
        }
        self.objects.truncate(journal.objects_len);
        self.properties.truncate(journal.properties_len);
    }

    /// Reclaim every node no live object can reach.
    ///
    /// Live objects get new `NodeId`s; previously obtained ids are invalid.
    pub fn compact(&mut self) {
        let roots: Vec<NodeId> = self.live_objects().map(|(_, id)| id).collect();
        let before = self.graph.len();
        let moves = self.graph.compact(&roots);
        for slot in &mut self.objects {
            if let ObjectSlot::Live(id) = slot
                && let Some(moved) = moves.get(id)
            {
                *id = *moved;
            }
        }
        self.compact_at = self.graph.len().saturating_mul(2);
        tracing::debug!(before, after = self.graph.len(), "compacted arena");
    }

    // -------------------------------------------------------------------------
    // Journaled access
    // -------------------------------------------------------------------------

    /// Mutable access to a node, saving its pre-image for the running batch.
    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, RefgraphError> {
        if let Some(journal) = self.journal.as_mut()
            && id.index() < journal.graph_len
            && let Entry::Vacant(entry) = journal.nodes.entry(id)
        {
            entry.insert(self.graph.node(id)?.clone());
        }
        self.graph.node_mut(id)
    }

    /// Overwrite an object-table slot, saving its pre-image for the running batch.
    fn set_slot(&mut self, position: usize, value: ObjectSlot) {
        let Some(slot) = self.objects.get_mut(position) else {
            return;
        };
        if let Some(journal) = self.journal.as_mut()
            && position < journal.objects_len
        {
            journal.slots.entry(position).or_insert(*slot);
        }
        *slot = value;
    }

    // -------------------------------------------------------------------------
    // Event operations
    // -------------------------------------------------------------------------

    fn live(&self, index: u64) -> Result<NodeId, RefgraphError> {
        self.object(index).ok_or(RefgraphError::UnknownObject(index))
    }

    pub(crate) fn create_object(&mut self, index: u64, kind: ObjectKind) -> Result<(), RefgraphError> {
        if index >= MAX_OBJECT_TABLE_LEN {
            return Err(RefgraphError::ObjectLimit(index));
        }
        let position = usize::try_from(index).map_err(|_| RefgraphError::ObjectLimit(index))?;
        match self.objects.get(position) {
            Some(ObjectSlot::Live(_)) => return Err(RefgraphError::ObjectExists(index)),
            Some(ObjectSlot::Disposed) => return Err(RefgraphError::ObjectDisposed(index)),
            Some(ObjectSlot::Vacant) | None => {}
        }
        if self.objects.len() <= position {
            self.objects.resize(position.saturating_add(1), ObjectSlot::Vacant);
        }

        let id = match kind {
            ObjectKind::Plain => self.graph.new_record(),
            ObjectKind::Container(container) => self.graph.insert(container.empty_node()),
        };
        self.set_slot(position, ObjectSlot::Live(id));
        Ok(())
    }

    pub(crate) fn dispose_object(&mut self, index: u64) -> Result<(), RefgraphError> {
        self.live(index)?;
        let position = usize::try_from(index).map_err(|_| RefgraphError::UnknownObject(index))?;
        self.set_slot(position, ObjectSlot::Disposed);
        Ok(())
    }

    pub(crate) fn declare_property(&mut self, name: &str, index: u64) -> Result<(), RefgraphError> {
        let expected = u64::try_from(self.properties.len()).unwrap_or(u64::MAX);
        if index != expected {
            return Err(RefgraphError::PropertyIndexMismatch {
                expected,
                actual: index,
            });
        }
        if name == CONTAINER_INDEX_KEY || name == CONTAINER_CONTENTS_KEY || self.options.keys().role(name).is_some() {
            return Err(RefgraphError::ReservedProperty(name.to_string()));
        }
        self.properties.push(name.to_string());
        Ok(())
    }

    fn property_name(&self, index: u64) -> Result<String, RefgraphError> {
        usize::try_from(index)
            .ok()
            .and_then(|position| self.properties.get(position))
            .cloned()
            .ok_or(RefgraphError::UnknownProperty(index))
    }

    /// Turn an event payload into a value.
    ///
    /// `{ "<p>>": n }` is the live object `n`; anything else is imported as
    /// fresh literal data. Literal data may not use marker keys anywhere.
    fn resolve(&mut self, payload: &JsonValue) -> Result<Value, RefgraphError> {
        let keys = self.options.keys();
        if let JsonValue::Object(fields) = payload
            && let Some(target) = keys.reference_target(fields, "$")?
        {
            return self.live(target).map(Value::Node);
        }

        let mut pending = vec![(payload, String::from("$"))];
        while let Some((value, path)) = pending.pop() {
            match value {
                JsonValue::Object(fields) => {
                    for (key, item) in fields {
                        if keys.role(key).is_some() {
                            return Err(RefgraphError::MarkerConflict { key: key.clone(), path });
                        }
                        pending.push((item, format!("{path}.{key}")));
                    }
                }
                JsonValue::Array(items) => {
                    pending.extend(items.iter().enumerate().map(|(i, item)| (item, format!("{path}[{i}]"))));
                }
                _ => {}
            }
        }
        self.graph.import_json(payload)
    }

    pub(crate) fn set_property(
        &mut self,
        object: u64,
        property: u64,
        payload: &JsonValue,
    ) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let name = self.property_name(property)?;
        let value = self.resolve(payload)?;
        match self.node_mut(id)? {
            Node::Record(fields) => {
                fields.insert(name, value);
                Ok(())
            }
            other => Err(wrong_kind(object, "record", other)),
        }
    }

    pub(crate) fn list_insert(&mut self, object: u64, position: u64, payload: &JsonValue) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let value = self.resolve(payload)?;
        let items = self.sequence_mut(object, id)?;
        let at = checked_position(object, position, items.len(), true)?;
        items.insert(at, value);
        Ok(())
    }

    pub(crate) fn list_remove_at(&mut self, object: u64, position: u64) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let items = self.sequence_mut(object, id)?;
        let at = checked_position(object, position, items.len(), false)?;
        items.remove(at);
        Ok(())
    }

    pub(crate) fn list_set_at(&mut self, object: u64, position: u64, payload: &JsonValue) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let value = self.resolve(payload)?;
        let items = self.sequence_mut(object, id)?;
        let at = checked_position(object, position, items.len(), false)?;
        if let Some(slot) = items.get_mut(at) {
            *slot = value;
        }
        Ok(())
    }

    pub(crate) fn clear_collection(&mut self, object: u64) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        match self.node_mut(id)? {
            Node::Sequence(items) => items.clear(),
            Node::Map(entries) => entries.clear(),
            Node::Set(members) => members.clear(),
            other => return Err(wrong_kind(object, "sequence, map or set", other)),
        }
        Ok(())
    }

    pub(crate) fn remove_key(&mut self, object: u64, payload: &JsonValue) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let key = self.resolve(payload)?;
        let removed = match self.node_mut(id)? {
            Node::Map(entries) => entries.shift_remove(&key).is_some(),
            Node::Set(members) => members.shift_remove(&key),
            other => return Err(wrong_kind(object, "map or set", other)),
        };
        if removed {
            Ok(())
        } else {
            Err(RefgraphError::MissingEntry { object })
        }
    }

    pub(crate) fn map_set(&mut self, object: u64, key: &JsonValue, value: &JsonValue) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let key = self.resolve(key)?;
        let value = self.resolve(value)?;
        match self.node_mut(id)? {
            Node::Map(entries) => {
                entries.insert(key, value);
                Ok(())
            }
            other => Err(wrong_kind(object, "map", other)),
        }
    }

    pub(crate) fn set_add(&mut self, object: u64, payload: &JsonValue) -> Result<(), RefgraphError> {
        let id = self.live(object)?;
        let value = self.resolve(payload)?;
        match self.node_mut(id)? {
            Node::Set(members) => {
                if members.insert(value) {
                    Ok(())
                } else {
                    Err(RefgraphError::DuplicateEntry { object })
                }
            }
            other => Err(wrong_kind(object, "set", other)),
        }
    }

    fn sequence_mut(&mut self, object: u64, id: NodeId) -> Result<&mut Vec<Value>, RefgraphError> {
        match self.node_mut(id)? {
            Node::Sequence(items) => Ok(items),
            other => Err(wrong_kind(object, "sequence", other)),
        }
    }
}

/// Check `position` against a sequence of `len` elements. Inserts may also
/// target `len` itself.
fn checked_position(object: u64, position: u64, len: usize, allow_end: bool) -> Result<usize, RefgraphError> {
    usize::try_from(position)
        .ok()
        .filter(|at| if allow_end { *at <= len } else { *at < len })
        .ok_or(RefgraphError::PositionOutOfRange {
            object,
            position,
            len,
        })
}

fn wrong_kind(object: u64, expected: &'static str, node: &Node) -> RefgraphError {
    RefgraphError::WrongKind {
        target: format!("object {object}"),
        expected,
        actual: node.kind(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Event;
    use crate::{ContainerKind, NodeKind};
    use serde_json::json;

    fn batch(transaction: u64, events: JsonValue) -> EventBatch {
        serde_json::from_value(json!({"transaction": transaction, "events": events})).expect("batch")
    }

    /// Store with a plain object 0, a sequence 1, a map 2 and a set 3.
    fn seeded() -> GraphStore {
        let mut store = GraphStore::new();
        store
            .apply(&batch(
                1,
                json!([
                    ["N", 0, "plain"],
                    ["N", 1, "sequence"],
                    ["N", 2, "map"],
                    ["N", 3, "set"],
                    ["P", "Name", 0]
                ]),
            ))
            .expect("seed");
        store
    }

    #[test]
    fn hello_scenario() {
        let mut store = GraphStore::new();
        store
            .apply(&batch(
                1,
                json!([
                    ["New-Object", 0, "plain"],
                    ["New-Property", "Name", 0],
                    ["Property-Changed", 0, 0, "Hello!"]
                ]),
            ))
            .expect("apply");

        assert_eq!(store.transaction(), 1);
        assert_eq!(store.properties(), ["Name".to_string()]);
        let id = store.object(0).expect("object 0");
        let record = store.graph().record(id).expect("record");
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("Name"), Some(&Value::from("Hello!")));
    }

    #[test]
    fn out_of_order_batch_changes_nothing() {
        let mut store = seeded();
        let err = store.apply(&batch(3, json!([["N", 9, "plain"]]))).expect_err("gap");

        assert!(matches!(
            err,
            RefgraphError::OutOfOrderTransaction {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(store.transaction(), 1);
        assert!(store.object(9).is_none());
    }

    #[test]
    fn failing_event_rolls_back_batch() {
        let mut store = seeded();
        let graph_len = store.graph().len();
        let err = store
            .apply(&batch(
                2,
                json!([
                    ["N", 4, "plain"],
                    ["C", 0, 0, {"nested": [1, 2]}],
                    ["R", 1, 0]
                ]),
            ))
            .expect_err("remove from empty sequence");

        assert!(matches!(err, RefgraphError::PositionOutOfRange { object: 1, .. }));
        assert_eq!(store.transaction(), 1);
        assert!(store.object(4).is_none());
        assert_eq!(store.graph().len(), graph_len);
        let record = store.graph().record(store.object(0).expect("0")).expect("record");
        assert!(record.is_empty());
    }

    #[test]
    fn object_lifecycle() {
        let mut store = seeded();
        store.apply(&batch(2, json!([["D", 0]]))).expect("dispose");
        assert!(store.object(0).is_none());
        assert_eq!(store.objects()[0], ObjectSlot::Disposed);

        let reuse = store.apply(&batch(3, json!([["N", 0, "plain"]])));
        assert!(matches!(reuse, Err(RefgraphError::ObjectDisposed(0))));

        let twice = store.apply(&batch(3, json!([["N", 1, "plain"]])));
        assert!(matches!(twice, Err(RefgraphError::ObjectExists(1))));

        let unknown = store.apply(&batch(3, json!([["D", 42]])));
        assert!(matches!(unknown, Err(RefgraphError::UnknownObject(42))));

        let limit = store.apply(&batch(3, json!([["N", MAX_OBJECT_TABLE_LEN, "plain"]])));
        assert!(matches!(limit, Err(RefgraphError::ObjectLimit(_))));
    }

    #[test]
    fn sparse_creation_leaves_vacant_slots() {
        let mut store = GraphStore::new();
        store.apply(&batch(1, json!([["N", 2, "plain"]]))).expect("apply");

        assert_eq!(store.objects(), [ObjectSlot::Vacant, ObjectSlot::Vacant, ObjectSlot::Live(store.object(2).expect("2"))]);
        assert_eq!(store.live_objects().count(), 1);
    }

    #[test]
    fn property_declarations_are_sequential() {
        let mut store = seeded();
        let err = store.apply(&batch(2, json!([["P", "Other", 5]]))).expect_err("gap");
        assert!(matches!(
            err,
            RefgraphError::PropertyIndexMismatch {
                expected: 1,
                actual: 5
            }
        ));

        let err = store.apply(&batch(2, json!([["C", 0, 3, 1]]))).expect_err("unknown");
        assert!(matches!(err, RefgraphError::UnknownProperty(3)));

        let err = store.apply(&batch(2, json!([["C", 1, 0, 1]]))).expect_err("kind");
        assert!(matches!(
            err,
            RefgraphError::WrongKind {
                actual: NodeKind::Sequence,
                ..
            }
        ));
    }

    #[test]
    fn reference_payload_links_live_object() {
        let mut store = seeded();
        store
            .apply(&batch(2, json!([["C", 0, 0, {"~$£€>": 1}], ["I", 1, 0, {"~$£€>": 0}]])))
            .expect("apply");

        let record_id = store.object(0).expect("0");
        let list_id = store.object(1).expect("1");
        let record = store.graph().record(record_id).expect("record");
        assert_eq!(record.get("Name"), Some(&Value::Node(list_id)));
        assert_eq!(store.graph().sequence(list_id).expect("seq"), &vec![Value::Node(record_id)]);

        let err = store.apply(&batch(3, json!([["I", 1, 0, {"~$£€>": 7}]]))).expect_err("dangling");
        assert!(matches!(err, RefgraphError::UnknownObject(7)));
    }

    #[test]
    fn literal_payload_is_imported() {
        let mut store = seeded();
        store
            .apply(&batch(2, json!([["C", 0, 0, {"first": "Ada", "tags": ["x"]}]])))
            .expect("apply");

        let graph = store.graph();
        let record = graph.record(store.object(0).expect("0")).expect("record");
        let name = record.get("Name").and_then(Value::as_node).expect("nested");
        assert_eq!(graph.record(name).expect("nested").get("first"), Some(&Value::from("Ada")));
    }

    #[test]
    fn list_operations() {
        let mut store = seeded();
        store
            .apply(&batch(
                2,
                json!([
                    ["I", 1, 0, "b"],
                    ["I", 1, 0, "a"],
                    ["I", 1, 2, "d"],
                    ["I", 1, 2, "c"],
                    ["S", 1, 3, "D"],
                    ["R", 1, 0]
                ]),
            ))
            .expect("apply");

        let items = store.graph().sequence(store.object(1).expect("1")).expect("seq");
        assert_eq!(items, &vec![Value::from("b"), Value::from("c"), Value::from("D")]);

        let err = store.apply(&batch(3, json!([["I", 1, 4, "x"]]))).expect_err("past end");
        assert!(matches!(
            err,
            RefgraphError::PositionOutOfRange {
                position: 4,
                len: 3,
                ..
            }
        ));
        let err = store.apply(&batch(3, json!([["S", 1, 3, "x"]]))).expect_err("past end");
        assert!(matches!(err, RefgraphError::PositionOutOfRange { .. }));
        let err = store.apply(&batch(3, json!([["I", 2, 0, "x"]]))).expect_err("map");
        assert!(matches!(err, RefgraphError::WrongKind { .. }));
    }

    #[test]
    fn map_operations() {
        let mut store = seeded();
        store
            .apply(&batch(
                2,
                json!([
                    ["M", 2, "k", 1],
                    ["M", 2, null, "none"],
                    ["M", 2, "k", 2],
                    ["K", 2, null]
                ]),
            ))
            .expect("apply");

        let map = store.graph().map(store.object(2).expect("2")).expect("map");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::from("k")), Some(&Value::from(2)));

        let err = store.apply(&batch(3, json!([["K", 2, "gone"]]))).expect_err("missing");
        assert!(matches!(err, RefgraphError::MissingEntry { object: 2 }));
        let err = store.apply(&batch(3, json!([["K", 1, "k"]]))).expect_err("sequence");
        assert!(matches!(err, RefgraphError::WrongKind { .. }));
    }

    #[test]
    fn set_operations() {
        let mut store = seeded();
        store
            .apply(&batch(
                2,
                json!([
                    ["A", 3, 1],
                    ["A", 3, {"~$£€>": 3}],
                    ["K", 3, 1]
                ]),
            ))
            .expect("apply");

        let set_id = store.object(3).expect("3");
        let members = store.graph().set(set_id).expect("set");
        assert_eq!(members.len(), 1);
        assert!(members.contains(&Value::Node(set_id)));

        let err = store.apply(&batch(3, json!([["A", 3, {"~$£€>": 3}]]))).expect_err("dup");
        assert!(matches!(err, RefgraphError::DuplicateEntry { object: 3 }));
    }

    #[test]
    fn clear_empties_every_collection() {
        let mut store = seeded();
        store
            .apply(&batch(
                2,
                json!([
                    ["I", 1, 0, 1],
                    ["M", 2, 1, 1],
                    ["A", 3, 1],
                    ["CL", 1],
                    ["CL", 2],
                    ["CL", 3]
                ]),
            ))
            .expect("apply");

        let graph = store.graph();
        assert!(graph.sequence(store.object(1).expect("1")).expect("seq").is_empty());
        assert!(graph.map(store.object(2).expect("2")).expect("map").is_empty());
        assert!(graph.set(store.object(3).expect("3")).expect("set").is_empty());

        let err = store.apply(&batch(3, json!([["CL", 0]]))).expect_err("record");
        assert!(matches!(err, RefgraphError::WrongKind { .. }));
    }

    #[test]
    fn failed_batch_restores_every_table() {
        let mut store = seeded();
        store.apply(&batch(2, json!([["I", 1, 0, "keep"], ["M", 2, "k", 1]]))).expect("apply");
        let before = store.snapshot().expect("export");

        let err = store
            .apply(&batch(
                3,
                json!([
                    ["D", 0],
                    ["P", "Extra", 1],
                    ["S", 1, 0, "changed"],
                    ["M", 2, "k", 2],
                    ["N", 9, "set"],
                    ["K", 2, "gone"]
                ]),
            ))
            .expect_err("missing key");

        assert!(matches!(err, RefgraphError::MissingEntry { object: 2 }));
        assert_eq!(store.snapshot().expect("export"), before);
        assert_eq!(store.objects().len(), 4);
        assert_eq!(store.properties(), ["Name".to_string()]);
        assert!(store.object(0).is_some());
    }

    #[test]
    fn malformed_reference_payload_is_rejected() {
        let mut store = seeded();
        let before = store.snapshot().expect("export");

        for payload in [json!({"~$£€>": "oops"}), json!({"~$£€>": -1}), json!({"~$£€>": 1, "x": 2})] {
            let err = store
                .apply(&batch(2, json!([["C", 0, 0, payload.clone()]])))
                .expect_err("malformed reference");
            assert!(
                matches!(err, RefgraphError::InvalidMarker { ref path, .. } if path == "$"),
                "{payload} gave {err}"
            );
        }
        assert_eq!(store.snapshot().expect("export"), before);
    }

    #[test]
    fn literal_payload_may_not_carry_marker_keys() {
        let mut store = seeded();
        let err = store
            .apply(&batch(2, json!([["C", 0, 0, {"a": [1, {"~$£€°": 3}]}]])))
            .expect_err("marker key");

        match err {
            RefgraphError::MarkerConflict { key, path } => {
                assert_eq!(key, "~$£€°");
                assert_eq!(path, "$.a[1]");
            }
            other => unreachable!("unexpected error: {other}"),
        }

        let err = store
            .apply(&batch(2, json!([["A", 3, {"~$£€þ": [0, "S"]}]])))
            .expect_err("type tag");
        assert!(matches!(err, RefgraphError::MarkerConflict { .. }));
        store.snapshot().expect("still exportable");
    }

    #[test]
    fn reserved_property_names_are_rejected() {
        for name in ["$container-index", "$container-contents", "~$£€°", "~$£€>", "~$£€þ"] {
            let mut store = seeded();
            let err = store.apply(&batch(2, json!([["P", name, 1]]))).expect_err("reserved");
            assert!(matches!(err, RefgraphError::ReservedProperty(ref rejected) if rejected == name));
            assert_eq!(store.properties().len(), 1);
        }
    }

    #[test]
    fn overwritten_values_are_reclaimed() {
        let mut store = seeded();
        for transaction in 2..3002 {
            store
                .apply(&batch(transaction, json!([["C", 0, 0, {"a": [1, 2, 3]}]])))
                .expect("apply");
            assert!(store.graph().len() <= ARENA_COMPACTION_FLOOR + 2);
        }

        let graph = store.graph();
        let record = graph.record(store.object(0).expect("0")).expect("record");
        let nested = record.get("Name").and_then(Value::as_node).expect("nested");
        let list = graph.record(nested).expect("nested").get("a").and_then(Value::as_node).expect("a");
        assert_eq!(graph.sequence(list).expect("seq").len(), 3);
        assert_eq!(store.live_objects().count(), 4);
    }

    #[test]
    fn compact_preserves_exported_form() {
        let mut store = seeded();
        store
            .apply(&batch(
                2,
                json!([
                    ["C", 0, 0, {"old": true}],
                    ["C", 0, 0, {"~$£€>": 2}],
                    ["M", 2, "self", {"~$£€>": 2}],
                    ["A", 3, {"~$£€>": 1}]
                ]),
            ))
            .expect("apply");
        let before = store.snapshot().expect("export");
        let arena = store.graph().len();

        store.compact();

        assert_eq!(store.graph().len(), arena - 1);
        assert_eq!(store.snapshot().expect("export"), before);
    }

    #[test]
    fn engine_and_store_agree_on_container_kind() {
        let mut store = GraphStore::new();
        MutationEngine::apply_event(
            &mut store,
            &Event::NewObject {
                object: 0,
                kind: ObjectKind::Container(ContainerKind::Map),
            },
        )
        .expect("create");
        let id = store.object(0).expect("0");
        assert_eq!(store.graph().node(id).expect("node").kind(), NodeKind::Map);
    }
}
