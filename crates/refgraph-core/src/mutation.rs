//! # Mutation Engine
//!
//! Mutation events and their application to a [`GraphStore`].
//!
//! Events address objects and properties purely by numeric index. On the
//! wire an event is an array `[code, ...args]`; codes are accepted in long
//! (`"New-Object"`) or short (`"N"`) form and always written short.
//!
//! All mutations are:
//! - Deterministic
//! - Applied in order
//! - Checked: an event that cannot apply exactly is an error, never skipped

use crate::store::GraphStore;
use crate::{ContainerKind, RefgraphError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

// =============================================================================
// OBJECT KIND
// =============================================================================

/// Kind of object created by `New-Object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Plain,
    Container(ContainerKind),
}

impl ObjectKind {
    /// Accepts `plain`, `sequence`/`A`, `map`/`M` and `set`/`S`.
    pub fn parse(raw: &str) -> Result<Self, RefgraphError> {
        match raw {
            "plain" => Ok(Self::Plain),
            "sequence" => Ok(Self::Container(ContainerKind::Sequence)),
            "map" => Ok(Self::Container(ContainerKind::Map)),
            "set" => Ok(Self::Container(ContainerKind::Set)),
            other => ContainerKind::from_tag(other)
                .map(Self::Container)
                .ok_or_else(|| RefgraphError::MalformedEvent(format!("unknown object kind {other:?}"))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Container(kind) => kind.tag(),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// One mutation. Payload values are raw JSON, resolved against the store
/// when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub enum Event {
    /// `N`: create an empty object at `object`.
    NewObject { object: u64, kind: ObjectKind },
    /// `D`: tombstone `object`.
    Disposed { object: u64 },
    /// `P`: append a property name; `index` must equal the table length.
    NewProperty { name: String, index: u64 },
    /// `C`: set a record field.
    PropertyChanged {
        object: u64,
        property: u64,
        value: JsonValue,
    },
    /// `I`: insert into a sequence; `position == len` appends.
    ListInsert {
        object: u64,
        position: u64,
        value: JsonValue,
    },
    /// `CL`: empty a sequence, map or set.
    CollectionClear { object: u64 },
    /// `R`: remove a sequence element.
    ListRemoveAt { object: u64, position: u64 },
    /// `K`: remove a map key or a set member.
    CollectionRemoveKey { object: u64, key: JsonValue },
    /// `S`: replace a sequence element.
    ListSetAt {
        object: u64,
        position: u64,
        value: JsonValue,
    },
    /// `M`: insert or replace a map entry.
    CollectionMapSet {
        object: u64,
        key: JsonValue,
        value: JsonValue,
    },
    /// `A`: add a set member.
    CollectionAdd { object: u64, value: JsonValue },
}

impl Event {
    /// Short wire code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NewObject { .. } => "N",
            Self::Disposed { .. } => "D",
            Self::NewProperty { .. } => "P",
            Self::PropertyChanged { .. } => "C",
            Self::ListInsert { .. } => "I",
            Self::CollectionClear { .. } => "CL",
            Self::ListRemoveAt { .. } => "R",
            Self::CollectionRemoveKey { .. } => "K",
            Self::ListSetAt { .. } => "S",
            Self::CollectionMapSet { .. } => "M",
            Self::CollectionAdd { .. } => "A",
        }
    }
}

/// Sequential reader over an event's arguments.
struct EventArgs<'a> {
    code: &'a str,
    args: std::slice::Iter<'a, JsonValue>,
}

impl<'a> EventArgs<'a> {
    fn next(&mut self, what: &str) -> Result<&'a JsonValue, RefgraphError> {
        self.args
            .next()
            .ok_or_else(|| RefgraphError::MalformedEvent(format!("{}: missing {what}", self.code)))
    }

    fn index(&mut self, what: &str) -> Result<u64, RefgraphError> {
        let raw = self.next(what)?;
        raw.as_u64().ok_or_else(|| {
            RefgraphError::MalformedEvent(format!(
                "{}: {what} must be a non-negative integer, found {raw}",
                self.code
            ))
        })
    }

    fn string(&mut self, what: &str) -> Result<&'a str, RefgraphError> {
        let raw = self.next(what)?;
        raw.as_str().ok_or_else(|| {
            RefgraphError::MalformedEvent(format!("{}: {what} must be a string, found {raw}", self.code))
        })
    }

    fn value(&mut self, what: &str) -> Result<JsonValue, RefgraphError> {
        self.next(what).cloned()
    }

    fn finish(mut self) -> Result<(), RefgraphError> {
        match self.args.next() {
            None => Ok(()),
            Some(extra) => Err(RefgraphError::MalformedEvent(format!(
                "{}: unexpected trailing argument {extra}",
                self.code
            ))),
        }
    }
}

impl TryFrom<JsonValue> for Event {
    type Error = RefgraphError;

    fn try_from(raw: JsonValue) -> Result<Self, Self::Error> {
        let items = match raw {
            JsonValue::Array(items) => items,
            other => {
                return Err(RefgraphError::MalformedEvent(format!(
                    "event must be an array, found {other}"
                )));
            }
        };
        let Some((code, args)) = items.split_first() else {
            return Err(RefgraphError::MalformedEvent("empty event".to_string()));
        };
        let Some(code) = code.as_str() else {
            return Err(RefgraphError::MalformedEvent(format!(
                "event code must be a string, found {code}"
            )));
        };

        let mut args = EventArgs {
            code,
            args: args.iter(),
        };
        let event = match code {
            "New-Object" | "N" => Self::NewObject {
                object: args.index("object")?,
                kind: ObjectKind::parse(args.string("kind")?)?,
            },
            "Disposed" | "D" => Self::Disposed {
                object: args.index("object")?,
            },
            "New-Property" | "P" => Self::NewProperty {
                name: args.string("name")?.to_string(),
                index: args.index("index")?,
            },
            "Property-Changed" | "C" => Self::PropertyChanged {
                object: args.index("object")?,
                property: args.index("property")?,
                value: args.value("value")?,
            },
            "List-Insert" | "I" => Self::ListInsert {
                object: args.index("object")?,
                position: args.index("position")?,
                value: args.value("value")?,
            },
            "Collection-Clear" | "CL" => Self::CollectionClear {
                object: args.index("object")?,
            },
            "List-Remove-At" | "R" => Self::ListRemoveAt {
                object: args.index("object")?,
                position: args.index("position")?,
            },
            "Collection-Remove-Key" | "K" => Self::CollectionRemoveKey {
                object: args.index("object")?,
                key: args.value("key")?,
            },
            "List-Set-At" | "S" => Self::ListSetAt {
                object: args.index("object")?,
                position: args.index("position")?,
                value: args.value("value")?,
            },
            "Collection-Map-Set" | "M" => Self::CollectionMapSet {
                object: args.index("object")?,
                key: args.value("key")?,
                value: args.value("value")?,
            },
            "Collection-Add" | "A" => Self::CollectionAdd {
                object: args.index("object")?,
                value: args.value("value")?,
            },
            other => {
                return Err(RefgraphError::MalformedEvent(format!(
                    "unknown event code {other:?}"
                )));
            }
        };
        args.finish()?;
        Ok(event)
    }
}

impl From<Event> for JsonValue {
    fn from(event: Event) -> Self {
        let code = JsonValue::from(event.code());
        let items = match event {
            Event::NewObject { object, kind } => vec![code, object.into(), kind.as_str().into()],
            Event::Disposed { object } | Event::CollectionClear { object } => vec![code, object.into()],
            Event::NewProperty { name, index } => vec![code, name.into(), index.into()],
            Event::PropertyChanged {
                object,
                property,
                value,
            } => vec![code, object.into(), property.into(), value],
            Event::ListInsert {
                object,
                position,
                value,
            }
            | Event::ListSetAt {
                object,
                position,
                value,
            } => vec![code, object.into(), position.into(), value],
            Event::ListRemoveAt { object, position } => vec![code, object.into(), position.into()],
            Event::CollectionRemoveKey { object, key } => vec![code, object.into(), key],
            Event::CollectionMapSet { object, key, value } => vec![code, object.into(), key, value],
            Event::CollectionAdd { object, value } => vec![code, object.into(), value],
        };
        JsonValue::Array(items)
    }
}

/// A transaction: the events that advance a store from `transaction - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub transaction: u64,
    pub events: Vec<Event>,
}

impl EventBatch {
    #[must_use]
    pub fn new(transaction: u64, events: Vec<Event>) -> Self {
        Self {
            transaction,
            events,
        }
    }

    /// Parse the batch wire format `{"transaction": N, "events": [...]}`.
    pub fn from_json_str(text: &str) -> Result<Self, RefgraphError> {
        Ok(serde_json::from_str(text)?)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Applies single events to a store.
///
/// Transaction ordering and atomicity are handled by [`GraphStore::apply`];
/// the engine only maps each event onto the store operation it names.
pub struct MutationEngine;

impl MutationEngine {
    /// Apply one event in place.
    ///
    /// On error the store may be partially modified; callers that need
    /// atomicity go through `GraphStore::apply`.
    pub fn apply_event(store: &mut GraphStore, event: &Event) -> Result<(), RefgraphError> {
        match event {
            Event::NewObject { object, kind } => store.create_object(*object, *kind),
            Event::Disposed { object } => store.dispose_object(*object),
            Event::NewProperty { name, index } => store.declare_property(name, *index),
            Event::PropertyChanged {
                object,
                property,
                value,
            } => store.set_property(*object, *property, value),
            Event::ListInsert {
                object,
                position,
                value,
            } => store.list_insert(*object, *position, value),
            Event::CollectionClear { object } => store.clear_collection(*object),
            Event::ListRemoveAt { object, position } => store.list_remove_at(*object, *position),
            Event::CollectionRemoveKey { object, key } => store.remove_key(*object, key),
            Event::ListSetAt {
                object,
                position,
                value,
            } => store.list_set_at(*object, *position, value),
            Event::CollectionMapSet { object, key, value } => store.map_set(*object, key, value),
            Event::CollectionAdd { object, value } => store.set_add(*object, value),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
