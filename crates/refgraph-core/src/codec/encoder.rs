//! # Graph Encoder
//!
//! Single-pass, pre-order walk that numbers every compound node on its first
//! visit and emits a reference marker on every later one.
//!
//! The walk counts emitted JSON levels and stops at `MAX_JSON_DEPTH`, so its
//! output always parses again.

use super::{CodecOptions, JsonMap, MarkerKeys, Path, Segment};
use crate::primitives::MAX_JSON_DEPTH;
use crate::{Codec, Graph, Node, NodeId, RefgraphError, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Encode the graph reachable from `root` into JSON text.
pub fn serialize(graph: &Graph, root: &Value, options: &CodecOptions) -> Result<String, RefgraphError> {
    let tree = encode(graph, root, options)?;
    Ok(serde_json::to_string(&tree)?)
}

/// Encode the graph reachable from `root` into a JSON tree.
pub fn encode(graph: &Graph, root: &Value, options: &CodecOptions) -> Result<JsonValue, RefgraphError> {
    encode_nested(graph, root, options, 0)
}

/// Encode a tree that will be embedded under `enclosing` JSON levels.
pub(crate) fn encode_nested(
    graph: &Graph,
    root: &Value,
    options: &CodecOptions,
    enclosing: usize,
) -> Result<JsonValue, RefgraphError> {
    let mut encoder = Encoder {
        graph,
        keys: options.keys(),
        codec: options.codec(),
        ordinals: BTreeMap::new(),
        next_ordinal: 0,
        path: Path::default(),
        depth: enclosing,
    };
    let tree = encoder.encode_value(root)?;
    tracing::debug!(nodes = encoder.ordinals.len(), "encoded graph");
    Ok(tree)
}

struct Encoder<'g, 'o> {
    graph: &'g Graph,
    keys: MarkerKeys,
    codec: Option<&'o dyn Codec>,
    /// Node -> ordinal, for every node visited so far in this call.
    ordinals: BTreeMap<NodeId, u64>,
    next_ordinal: u64,
    path: Path<'g>,
    /// JSON arrays and objects enclosing the value being emitted.
    depth: usize,
}

impl<'g> Encoder<'g, '_> {
    fn encode_value(&mut self, value: &Value) -> Result<JsonValue, RefgraphError> {
        Ok(match value {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => JsonValue::Number(n.clone()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Node(id) => self.encode_node(*id)?,
        })
    }

    fn encode_node(&mut self, id: NodeId) -> Result<JsonValue, RefgraphError> {
        if let Some(ordinal) = self.ordinals.get(&id) {
            self.reserve(1)?;
            return Ok(self.keys.reference_marker(*ordinal));
        }

        let ordinal = self.next_ordinal;
        self.next_ordinal = self.next_ordinal.saturating_add(1);
        self.ordinals.insert(id, ordinal);

        let graph = self.graph;
        match graph.node(id)? {
            Node::Record(fields) => {
                if let Some(replacement) = self.substitution(id) {
                    return self.encode_substitution(ordinal, replacement);
                }
                self.encode_record(ordinal, fields)
            }
            Node::External(_) => match self.substitution(id) {
                Some(replacement) => self.encode_substitution(ordinal, replacement),
                None => Err(RefgraphError::OpaqueValue {
                    path: self.path.to_string(),
                }),
            },
            Node::Sequence(items) => {
                self.reserve(3)?;
                let mut out = Vec::with_capacity(items.len().saturating_add(1));
                out.push(self.container_tag(ordinal, crate::ContainerKind::Sequence));
                for (i, item) in items.iter().enumerate() {
                    out.push(self.encode_child(Segment::Index(i), 1, item)?);
                }
                Ok(JsonValue::Array(out))
            }
            Node::Map(entries) => {
                self.reserve(3)?;
                let mut out = Vec::with_capacity(entries.len().saturating_add(1));
                out.push(self.container_tag(ordinal, crate::ContainerKind::Map));
                for (i, (key, value)) in entries.iter().enumerate() {
                    let key = self.encode_child(Segment::EntryKey(i), 2, key)?;
                    let value = self.encode_child(Segment::EntryValue(i), 2, value)?;
                    out.push(JsonValue::Array(vec![key, value]));
                }
                Ok(JsonValue::Array(out))
            }
            Node::Set(members) => {
                self.reserve(3)?;
                let mut out = Vec::with_capacity(members.len().saturating_add(1));
                out.push(self.container_tag(ordinal, crate::ContainerKind::Set));
                for (i, member) in members.iter().enumerate() {
                    out.push(self.encode_child(Segment::Index(i), 1, member)?);
                }
                Ok(JsonValue::Array(out))
            }
        }
    }

    /// Encode `value` nested `levels` JSON levels below the current one.
    fn encode_child(&mut self, segment: Segment<'g>, levels: usize, value: &Value) -> Result<JsonValue, RefgraphError> {
        self.path.push(segment)?;
        self.depth = self.depth.saturating_add(levels);
        let encoded = self.encode_value(value);
        self.depth = self.depth.saturating_sub(levels);
        self.path.pop();
        encoded
    }

    /// Fail unless `levels` more JSON levels fit under the parser limit.
    fn reserve(&self, levels: usize) -> Result<(), RefgraphError> {
        if self.depth.saturating_add(levels) > MAX_JSON_DEPTH {
            tracing::debug!(path = %self.path, depth = self.depth, "json nesting limit reached");
            return Err(RefgraphError::NestingTooDeep(MAX_JSON_DEPTH));
        }
        Ok(())
    }

    fn encode_record(&mut self, ordinal: u64, fields: &'g crate::Record) -> Result<JsonValue, RefgraphError> {
        self.reserve(1)?;
        let mut out = JsonMap::with_capacity(fields.len().saturating_add(1));
        out.insert(self.keys.index.clone(), ordinal.into());
        for (key, value) in fields {
            if self.keys.role(key).is_some() {
                return Err(RefgraphError::MarkerConflict {
                    key: key.clone(),
                    path: self.path.to_string(),
                });
            }
            let encoded = self.encode_child(Segment::Field(key), 1, value)?;
            out.insert(key.clone(), encoded);
        }
        Ok(JsonValue::Object(out))
    }

    fn substitution(&self, id: NodeId) -> Option<JsonMap> {
        self.codec.and_then(|codec| codec.substitute(self.graph, id))
    }

    /// `{ "<p>°": ordinal, "<p>þ": tag, ...fields }`
    fn encode_substitution(&self, ordinal: u64, mut replacement: JsonMap) -> Result<JsonValue, RefgraphError> {
        let tag = match replacement.remove(&self.keys.type_tag) {
            None => String::new(),
            Some(JsonValue::String(tag)) => tag,
            Some(other) => {
                return Err(RefgraphError::InvalidTypeTag {
                    path: self.path.to_string(),
                    reason: format!("substitution tag must be a string, found {}", super::json_kind(&other)),
                });
            }
        };

        let mut out = JsonMap::with_capacity(replacement.len().saturating_add(2));
        out.insert(self.keys.index.clone(), ordinal.into());
        out.insert(self.keys.type_tag.clone(), JsonValue::String(tag));
        for (key, value) in replacement {
            if self.keys.role(&key).is_some() {
                return Err(RefgraphError::MarkerConflict {
                    key,
                    path: self.path.to_string(),
                });
            }
            out.insert(key, value);
        }
        let out = JsonValue::Object(out);
        self.reserve(json_depth(&out))?;
        Ok(out)
    }

    /// `{ "<p>þ": [ordinal, "A" | "M" | "S"] }`
    fn container_tag(&self, ordinal: u64, kind: crate::ContainerKind) -> JsonValue {
        let mut tag = JsonMap::with_capacity(1);
        tag.insert(
            self.keys.type_tag.clone(),
            JsonValue::Array(vec![ordinal.into(), kind.tag().into()]),
        );
        JsonValue::Object(tag)
    }
}

/// Number of nested arrays and objects in `value`, itself included.
fn json_depth(value: &JsonValue) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(value, 0usize)];
    while let Some((value, above)) = pending.pop() {
        let children: Vec<&JsonValue> = match value {
            JsonValue::Array(items) => items.iter().collect(),
            JsonValue::Object(fields) => fields.values().collect(),
            _ => continue,
        };
        let level = above.saturating_add(1);
        deepest = deepest.max(level);
        pending.extend(children.into_iter().map(|child| (child, level)));
    }
    deepest
}

// =============================================================================
// TESTS
// =============================================================================
