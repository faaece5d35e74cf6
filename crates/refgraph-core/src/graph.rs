//! # Graph Arena
//!
//! Storage for compound values. Every record, sequence, map, set and external
//! lives in one `Graph` and is addressed by a `NodeId`; fields and elements
//! hold `Value::Node(id)` instead of pointers, so cycles and shared identity
//! need no ownership tricks.
//!
//! Allocation only appends. Unreachable nodes are dropped by
//! [`Graph::compact`], which renumbers the survivors.

use crate::primitives::MAX_NESTING_DEPTH;
use crate::{External, Node, NodeId, Record, RefgraphError, UniqueMap, UniqueSet, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Arena of compound nodes.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the arena, reachable or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Allocate a node and return its handle.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn new_record(&mut self) -> NodeId {
        self.insert(Node::Record(Record::new()))
    }

    pub fn new_sequence(&mut self) -> NodeId {
        self.insert(Node::Sequence(Vec::new()))
    }

    pub fn new_map(&mut self) -> NodeId {
        self.insert(Node::Map(UniqueMap::new()))
    }

    pub fn new_set(&mut self) -> NodeId {
        self.insert(Node::Set(UniqueSet::new()))
    }

    pub fn new_external(&mut self, external: External) -> NodeId {
        self.insert(Node::External(external))
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, RefgraphError> {
        self.nodes.get(id.0).ok_or(RefgraphError::NodeNotFound(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, RefgraphError> {
        self.nodes
            .get_mut(id.0)
            .ok_or(RefgraphError::NodeNotFound(id))
    }

    /// Swap the node stored at `id`, returning the previous one.
    pub(crate) fn replace(&mut self, id: NodeId, node: Node) -> Result<Node, RefgraphError> {
        Ok(std::mem::replace(self.node_mut(id)?, node))
    }

    /// All nodes in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    /// Drop every node allocated at or after position `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    // -------------------------------------------------------------------------
    // Reclamation
    // -------------------------------------------------------------------------

    /// Rewrite every `Value::Node(from)` held by any node into `Value::Node(to)`.
    ///
    /// Maps and sets are rebuilt, so the targets must stay distinct from the
    /// members they end up next to.
    pub fn redirect(&mut self, moves: &BTreeMap<NodeId, NodeId>) {
        let moved = |value: Value| match value {
            Value::Node(id) => Value::Node(moves.get(&id).copied().unwrap_or(id)),
            other => other,
        };

        for node in &mut self.nodes {
            match node {
                Node::Record(fields) => {
                    for value in fields.values_mut() {
                        *value = moved(std::mem::take(value));
                    }
                }
                Node::Sequence(items) => {
                    for item in items.iter_mut() {
                        *item = moved(std::mem::take(item));
                    }
                }
                Node::Map(entries) => {
                    let rebuilt: UniqueMap = entries.drain(..).map(|(k, v)| (moved(k), moved(v))).collect();
                    *entries = rebuilt;
                }
                Node::Set(members) => {
                    let rebuilt: UniqueSet = members.drain(..).map(moved).collect();
                    *members = rebuilt;
                }
                Node::External(_) => {}
            }
        }
    }

    /// Keep only the nodes reachable from `roots`, in their current relative
    /// order, and return the new id of every kept node.
    ///
    /// Every `NodeId` issued before the call is invalid afterwards unless
    /// translated through the returned table.
    pub fn compact(&mut self, roots: &[NodeId]) -> BTreeMap<NodeId, NodeId> {
        let mut reachable = vec![false; self.nodes.len()];
        let mut pending = roots.to_vec();
        while let Some(id) = pending.pop() {
            let Some(seen) = reachable.get_mut(id.0) else {
                continue;
            };
            if *seen {
                continue;
            }
            *seen = true;
            if let Some(node) = self.nodes.get(id.0) {
                pending.extend(children(node));
            }
        }

        let mut moves = BTreeMap::new();
        let mut kept = Vec::new();
        for ((index, node), keep) in std::mem::take(&mut self.nodes).into_iter().enumerate().zip(reachable) {
            if keep {
                moves.insert(NodeId(index), NodeId(kept.len()));
                kept.push(node);
            }
        }
        self.nodes = kept;
        self.redirect(&moves);
        moves
    }

    // -------------------------------------------------------------------------
    // Typed access
    // -------------------------------------------------------------------------

    pub fn record(&self, id: NodeId) -> Result<&Record, RefgraphError> {
        match self.node(id)? {
            Node::Record(fields) => Ok(fields),
            other => Err(wrong_kind(id, "record", other)),
        }
    }

    pub fn record_mut(&mut self, id: NodeId) -> Result<&mut Record, RefgraphError> {
        match self.node_mut(id)? {
            Node::Record(fields) => Ok(fields),
            other => Err(wrong_kind(id, "record", other)),
        }
    }

    pub fn sequence(&self, id: NodeId) -> Result<&Vec<Value>, RefgraphError> {
        match self.node(id)? {
            Node::Sequence(items) => Ok(items),
            other => Err(wrong_kind(id, "sequence", other)),
        }
    }

    pub fn sequence_mut(&mut self, id: NodeId) -> Result<&mut Vec<Value>, RefgraphError> {
        match self.node_mut(id)? {
            Node::Sequence(items) => Ok(items),
            other => Err(wrong_kind(id, "sequence", other)),
        }
    }

    pub fn map(&self, id: NodeId) -> Result<&UniqueMap, RefgraphError> {
        match self.node(id)? {
            Node::Map(entries) => Ok(entries),
            other => Err(wrong_kind(id, "map", other)),
        }
    }

    pub fn map_mut(&mut self, id: NodeId) -> Result<&mut UniqueMap, RefgraphError> {
        match self.node_mut(id)? {
            Node::Map(entries) => Ok(entries),
            other => Err(wrong_kind(id, "map", other)),
        }
    }

    pub fn set(&self, id: NodeId) -> Result<&UniqueSet, RefgraphError> {
        match self.node(id)? {
            Node::Set(members) => Ok(members),
            other => Err(wrong_kind(id, "set", other)),
        }
    }

    pub fn set_mut(&mut self, id: NodeId) -> Result<&mut UniqueSet, RefgraphError> {
        match self.node_mut(id)? {
            Node::Set(members) => Ok(members),
            other => Err(wrong_kind(id, "set", other)),
        }
    }

    pub fn external(&self, id: NodeId) -> Result<&External, RefgraphError> {
        match self.node(id)? {
            Node::External(external) => Ok(external),
            other => Err(wrong_kind(id, "external", other)),
        }
    }

    // -------------------------------------------------------------------------
    // Building helpers
    // -------------------------------------------------------------------------

    /// Set a record field, returning the previous value.
    pub fn set_field(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, RefgraphError> {
        Ok(self.record_mut(id)?.insert(key.into(), value.into()))
    }

    /// Append to a sequence.
    pub fn push(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), RefgraphError> {
        self.sequence_mut(id)?.push(value.into());
        Ok(())
    }

    /// Insert or replace a map entry, returning the previous value.
    pub fn map_insert(
        &mut self,
        id: NodeId,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, RefgraphError> {
        Ok(self.map_mut(id)?.insert(key.into(), value.into()))
    }

    /// Add a set member. Returns false if it was already present.
    pub fn set_insert(&mut self, id: NodeId, value: impl Into<Value>) -> Result<bool, RefgraphError> {
        Ok(self.set_mut(id)?.insert(value.into()))
    }

    /// Import a plain JSON tree: objects become records, arrays become sequences.
    ///
    /// No marker interpretation happens here; use the codec for encoded text.
    pub fn import_json(&mut self, json: &JsonValue) -> Result<Value, RefgraphError> {
        self.import_at(json, 0)
    }

    fn import_at(&mut self, json: &JsonValue, depth: usize) -> Result<Value, RefgraphError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(RefgraphError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let value = match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.clone()),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.import_at(item, depth.saturating_add(1)))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Node(self.insert(Node::Sequence(values)))
            }
            JsonValue::Object(fields) => {
                let mut record = Record::with_capacity(fields.len());
                for (key, item) in fields {
                    record.insert(key.clone(), self.import_at(item, depth.saturating_add(1))?);
                }
                Value::Node(self.insert(Node::Record(record)))
            }
        };
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Comparison
    // -------------------------------------------------------------------------

    /// Check whether `left` in this graph and `right` in `other` are the same
    /// graph up to renaming of nodes.
    ///
    /// Node correspondence must be a bijection: shared nodes stay shared,
    /// cycles stay cycles. Record fields compare by key; sequences, map entries
    /// and set members compare in order. Externals compare by identity.
    #[must_use]
    pub fn isomorphic(&self, left: &Value, other: &Graph, right: &Value) -> bool {
        let mut forward: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut backward: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut pending = vec![(left.clone(), right.clone())];

        while let Some((a, b)) = pending.pop() {
            let (x, y) = match (&a, &b) {
                (Value::Node(x), Value::Node(y)) => (*x, *y),
                (Value::Node(_), _) | (_, Value::Node(_)) => return false,
                _ => {
                    if a != b {
                        return false;
                    }
                    continue;
                }
            };

            match (forward.get(&x), backward.get(&y)) {
                (Some(fx), Some(by)) => {
                    if *fx != y || *by != x {
                        return false;
                    }
                    continue;
                }
                (None, None) => {
                    forward.insert(x, y);
                    backward.insert(y, x);
                }
                _ => return false,
            }

            let (Ok(nx), Ok(ny)) = (self.node(x), other.node(y)) else {
                return false;
            };
            match (nx, ny) {
                (Node::Record(r1), Node::Record(r2)) => {
                    if r1.len() != r2.len() {
                        return false;
                    }
                    for (key, v1) in r1 {
                        let Some(v2) = r2.get(key) else {
                            return false;
                        };
                        pending.push((v1.clone(), v2.clone()));
                    }
                }
                (Node::Sequence(s1), Node::Sequence(s2)) => {
                    if s1.len() != s2.len() {
                        return false;
                    }
                    pending.extend(s1.iter().cloned().zip(s2.iter().cloned()));
                }
                (Node::Map(m1), Node::Map(m2)) => {
                    if m1.len() != m2.len() {
                        return false;
                    }
                    for ((k1, v1), (k2, v2)) in m1.iter().zip(m2) {
                        pending.push((k1.clone(), k2.clone()));
                        pending.push((v1.clone(), v2.clone()));
                    }
                }
                (Node::Set(s1), Node::Set(s2)) => {
                    if s1.len() != s2.len() {
                        return false;
                    }
                    pending.extend(s1.iter().cloned().zip(s2.iter().cloned()));
                }
                (Node::External(e1), Node::External(e2)) => {
                    if !e1.ptr_eq(e2) {
                        return false;
                    }
                }
                _ => return false,
            }
        }

        true
    }
}

/// Nodes directly held by `node`.
fn children(node: &Node) -> Vec<NodeId> {
    match node {
        Node::Record(fields) => fields.values().filter_map(Value::as_node).collect(),
        Node::Sequence(items) => items.iter().filter_map(Value::as_node).collect(),
        Node::Map(entries) => entries
            .iter()
            .flat_map(|(k, v)| [k.as_node(), v.as_node()])
            .flatten()
            .collect(),
        Node::Set(members) => members.iter().filter_map(Value::as_node).collect(),
        Node::External(_) => Vec::new(),
    }
}

fn wrong_kind(id: NodeId, expected: &'static str, node: &Node) -> RefgraphError {
    RefgraphError::WrongKind {
        target: format!("node {id}"),
        expected,
        actual: node.kind(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
