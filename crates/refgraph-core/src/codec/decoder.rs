//! # Graph Decoder
//!
//! Two phases:
//! 1. Materialize: walk the tree once, allocate every compound node, register
//!    the ones carrying an index, and remember reference markers as [`Slot`]s.
//! 2. Fixup: build each node's contents, replacing references inside
//!    registered nodes by the registered node.
//!
//! References inside plain (unregistered) nodes are left as literal
//! single-key records.

use super::{CodecOptions, JsonMap, MarkerKeys, Path, Segment, json_kind, parse_index};
use crate::{
    Codec, ContainerKind, Graph, Node, NodeId, Record, RefgraphError, UniqueMap, UniqueSet, Value,
};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Decode JSON text, allocating the decoded nodes in `graph`.
pub fn deserialize(text: &str, graph: &mut Graph, options: &CodecOptions) -> Result<Value, RefgraphError> {
    let tree: JsonValue = serde_json::from_str(text)?;
    decode(&tree, graph, options)
}

/// Decode an already parsed JSON tree, allocating the decoded nodes in `graph`.
pub fn decode(tree: &JsonValue, graph: &mut Graph, options: &CodecOptions) -> Result<Value, RefgraphError> {
    let mut decoder = Decoder {
        graph,
        keys: options.keys(),
        codec: options.codec(),
        registry: BTreeMap::new(),
        pending: Vec::new(),
        activated: 0,
        path: Path::default(),
    };

    let root = decoder.materialize(tree)?;
    let root = match root {
        Slot::Value(value) => value,
        Slot::Reference { index, path } => decoder.lookup(index, path)?,
    };
    decoder.fixup()?;

    tracing::debug!(
        registered = decoder.registry.len(),
        activated = decoder.activated,
        "decoded graph"
    );
    Ok(root)
}

// =============================================================================
// INTERMEDIATE FORM
// =============================================================================

/// A decoded child: either a final value or a reference awaiting fixup.
#[derive(Debug)]
enum Slot {
    Value(Value),
    Reference { index: u64, path: String },
}

/// Contents of a node whose children may still be references.
#[derive(Debug)]
enum Draft {
    Record(Vec<(String, Slot)>),
    Sequence(Vec<Slot>),
    Map(Vec<(Slot, Slot)>),
    Set(Vec<Slot>),
}

#[derive(Debug)]
struct Pending {
    id: NodeId,
    draft: Draft,
    registered: bool,
}

struct Decoder<'t, 'g, 'o> {
    graph: &'g mut Graph,
    keys: MarkerKeys,
    codec: Option<&'o dyn Codec>,
    /// Ordinal -> node, for every node carrying an index.
    registry: BTreeMap<u64, NodeId>,
    pending: Vec<Pending>,
    activated: usize,
    path: Path<'t>,
}

impl<'t> Decoder<'t, '_, '_> {
    // -------------------------------------------------------------------------
    // Phase 1: materialize
    // -------------------------------------------------------------------------

    fn materialize(&mut self, json: &'t JsonValue) -> Result<Slot, RefgraphError> {
        let value = match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.clone()),
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => self.materialize_array(items)?,
            JsonValue::Object(fields) => return self.materialize_object(fields),
        };
        Ok(Slot::Value(value))
    }

    fn materialize_child(&mut self, segment: Segment<'t>, json: &'t JsonValue) -> Result<Slot, RefgraphError> {
        self.path.push(segment)?;
        let slot = self.materialize(json);
        self.path.pop();
        slot
    }

    fn materialize_array(&mut self, items: &'t [JsonValue]) -> Result<Value, RefgraphError> {
        let Some((index, kind)) = self.container_tag(items.first())? else {
            let id = self.graph.new_sequence();
            let mut slots = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                slots.push(self.materialize_child(Segment::Index(i), item)?);
            }
            self.pending.push(Pending {
                id,
                draft: Draft::Sequence(slots),
                registered: false,
            });
            return Ok(Value::Node(id));
        };

        let id = self.graph.insert(kind.empty_node());
        self.register(index, id)?;

        let elements = items.get(1..).unwrap_or_default();
        let draft = match kind {
            ContainerKind::Sequence | ContainerKind::Set => {
                let mut slots = Vec::with_capacity(elements.len());
                for (i, item) in elements.iter().enumerate() {
                    slots.push(self.materialize_child(Segment::Index(i), item)?);
                }
                if kind == ContainerKind::Set {
                    Draft::Set(slots)
                } else {
                    Draft::Sequence(slots)
                }
            }
            ContainerKind::Map => {
                let mut entries = Vec::with_capacity(elements.len());
                for (i, item) in elements.iter().enumerate() {
                    let Some([key, value]) = as_pair(item) else {
                        self.path.push(Segment::Index(i))?;
                        let path = self.path.to_string();
                        self.path.pop();
                        return Err(RefgraphError::MalformedEntry { path });
                    };
                    let key = self.materialize_child(Segment::EntryKey(i), key)?;
                    let value = self.materialize_child(Segment::EntryValue(i), value)?;
                    entries.push((key, value));
                }
                Draft::Map(entries)
            }
        };

        self.pending.push(Pending {
            id,
            draft,
            registered: true,
        });
        Ok(Value::Node(id))
    }

    /// Parse `{ "<p>þ": [index, kind] }` at the head of an array.
    fn container_tag(&self, head: Option<&JsonValue>) -> Result<Option<(u64, ContainerKind)>, RefgraphError> {
        let Some(JsonValue::Object(head)) = head else {
            return Ok(None);
        };
        if head.len() != 1 {
            return Ok(None);
        }
        let Some(tag) = head.get(&self.keys.type_tag) else {
            return Ok(None);
        };

        let malformed = |reason: String| RefgraphError::InvalidTypeTag {
            path: self.path.to_string(),
            reason,
        };
        let Some([index, kind]) = as_pair(tag) else {
            return Err(malformed(format!(
                "container tag must be an [index, kind] pair, found {}",
                json_kind(tag)
            )));
        };
        let Some(index) = index.as_u64() else {
            return Err(malformed(format!(
                "container index must be a non-negative integer, found {}",
                json_kind(index)
            )));
        };
        let Some(kind) = kind.as_str() else {
            return Err(malformed(format!(
                "container kind must be a string, found {}",
                json_kind(kind)
            )));
        };
        let kind = ContainerKind::from_tag(kind).ok_or_else(|| RefgraphError::UnknownContainerType {
            tag: kind.to_string(),
            path: self.path.to_string(),
        })?;
        Ok(Some((index, kind)))
    }

    fn materialize_object(&mut self, fields: &'t JsonMap) -> Result<Slot, RefgraphError> {
        let here = self.path.to_string();
        if let Some(index) = self.keys.reference_target(fields, &here)? {
            return Ok(Slot::Reference { index, path: here });
        }

        let index = fields
            .get(&self.keys.index)
            .map(|raw| parse_index(raw, &self.keys.index, &here))
            .transpose()?;

        let tag = match fields.get(&self.keys.type_tag) {
            None => None,
            Some(JsonValue::String(tag)) => Some(tag.as_str()),
            Some(other) => {
                return Err(RefgraphError::InvalidTypeTag {
                    path: here,
                    reason: format!("type tag must be a string, found {}", json_kind(other)),
                });
            }
        };

        let Some(index) = index else {
            if tag.is_some() {
                return Err(RefgraphError::InvalidMarker {
                    key: self.keys.type_tag.clone(),
                    path: here,
                    reason: "type tag without an index".to_string(),
                });
            }
            let id = self.graph.new_record();
            let draft = self.materialize_fields(fields)?;
            self.pending.push(Pending {
                id,
                draft,
                registered: false,
            });
            return Ok(Slot::Value(Value::Node(id)));
        };

        if let (Some(tag), Some(codec)) = (tag, self.codec) {
            let stripped: JsonMap = fields
                .iter()
                .filter(|(key, _)| **key != self.keys.index && **key != self.keys.type_tag)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if let Some(external) = codec.activate(&stripped, tag) {
                let id = self.graph.new_external(external);
                self.register(index, id)?;
                self.activated = self.activated.saturating_add(1);
                return Ok(Slot::Value(Value::Node(id)));
            }
        }

        let id = self.graph.new_record();
        self.register(index, id)?;
        let draft = self.materialize_fields(fields)?;
        self.pending.push(Pending {
            id,
            draft,
            registered: true,
        });
        Ok(Slot::Value(Value::Node(id)))
    }

    /// Record fields without the index and type-tag markers.
    fn materialize_fields(&mut self, fields: &'t JsonMap) -> Result<Draft, RefgraphError> {
        let mut slots = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if *key == self.keys.index || *key == self.keys.type_tag {
                continue;
            }
            slots.push((key.clone(), self.materialize_child(Segment::Field(key), value)?));
        }
        Ok(Draft::Record(slots))
    }

    fn register(&mut self, index: u64, id: NodeId) -> Result<(), RefgraphError> {
        if self.registry.insert(index, id).is_some() {
            return Err(RefgraphError::DuplicateIndex(index));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Phase 2: fixup
    // -------------------------------------------------------------------------

    fn lookup(&self, index: u64, path: String) -> Result<Value, RefgraphError> {
        self.registry
            .get(&index)
            .map(|id| Value::Node(*id))
            .ok_or(RefgraphError::DanglingReference { index, path })
    }

    fn resolve(&mut self, slot: Slot, registered: bool) -> Result<Value, RefgraphError> {
        match slot {
            Slot::Value(value) => Ok(value),
            Slot::Reference { index, path } if registered => self.lookup(index, path),
            Slot::Reference { index, .. } => {
                let mut literal = Record::with_capacity(1);
                literal.insert(self.keys.reference.clone(), Value::from(index));
                Ok(Value::Node(self.graph.insert(Node::Record(literal))))
            }
        }
    }

    fn fixup(&mut self) -> Result<(), RefgraphError> {
        for Pending { id, draft, registered } in std::mem::take(&mut self.pending) {
            let node = match draft {
                Draft::Record(slots) => {
                    let mut record = Record::with_capacity(slots.len());
                    for (key, slot) in slots {
                        record.insert(key, self.resolve(slot, registered)?);
                    }
                    Node::Record(record)
                }
                Draft::Sequence(slots) => Node::Sequence(
                    slots
                        .into_iter()
                        .map(|slot| self.resolve(slot, registered))
                        .collect::<Result<_, _>>()?,
                ),
                Draft::Map(entries) => {
                    let mut map = UniqueMap::with_capacity(entries.len());
                    for (key, value) in entries {
                        let key = self.resolve(key, registered)?;
                        let value = self.resolve(value, registered)?;
                        map.insert(key, value);
                    }
                    Node::Map(map)
                }
                Draft::Set(slots) => {
                    let mut set = UniqueSet::with_capacity(slots.len());
                    for slot in slots {
                        set.insert(self.resolve(slot, registered)?);
                    }
                    Node::Set(set)
                }
            };
            self.graph.replace(id, node)?;
        }
        Ok(())
    }
}

fn as_pair(json: &JsonValue) -> Option<&[JsonValue; 2]> {
    json.as_array()
        .and_then(|items| <&[JsonValue; 2]>::try_from(items.as_slice()).ok())
}

// =============================================================================
// TESTS
// =============================================================================
