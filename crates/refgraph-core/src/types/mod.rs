//! # Core Type Definitions
//!
//! This module contains the value model shared by the codec and the store:
//! - Arena identifiers (`NodeId`)
//! - Values and compound nodes (`Value`, `Node`, `NodeKind`, `ContainerKind`)
//! - Opaque host handles (`External`)
//! - Error types (`RefgraphError`)
//!
//! ## Identity
//!
//! Compound values live in a [`Graph`](crate::Graph) arena and are referenced
//! by `NodeId`. Two `Value::Node` are equal iff they address the same slot,
//! which is what gives maps and sets their identity semantics. Scalars compare
//! by value.

use indexmap::{IndexMap, IndexSet};
use serde_json::Number;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::primitives::{MAP_TAG, SEQUENCE_TAG, SET_TAG};

// =============================================================================
// NODE IDENTIFIER
// =============================================================================

/// Handle to a compound node inside a `Graph` arena.
///
/// Handles are only meaningful for the graph that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in its arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// The universal unit carried by records, sequences, maps and sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// A compound value, by identity.
    Node(NodeId),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

// =============================================================================
// EXTERNAL HANDLE
// =============================================================================

/// An opaque host value. The codec never looks inside it.
///
/// Cloning shares the same instance; equality is pointer identity.
#[derive(Clone)]
pub struct External(Arc<dyn Any + Send + Sync>);

impl External {
    /// Wrap a host value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already shared host value, keeping its identity.
    #[must_use]
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// True if both handles point at the same host value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "External({:p})", Arc::as_ptr(&self.0))
    }
}

impl PartialEq for External {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for External {}

// =============================================================================
// NODE
// =============================================================================

/// Ordered string-keyed fields of a plain record.
pub type Record = IndexMap<String, Value>;

/// Ordered key-unique mapping. A later insert on an existing key replaces its value.
pub type UniqueMap = IndexMap<Value, Value>;

/// Ordered collection with identity/equality membership.
pub type UniqueSet = IndexSet<Value>;

/// A compound value stored in the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Record(Record),
    Sequence(Vec<Value>),
    Map(UniqueMap),
    Set(UniqueSet),
    External(External),
}

impl Node {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Record(_) => NodeKind::Record,
            Self::Sequence(_) => NodeKind::Sequence,
            Self::Map(_) => NodeKind::Map,
            Self::Set(_) => NodeKind::Set,
            Self::External(_) => NodeKind::External,
        }
    }

    /// The container kind, if this node is a sequence, map or set.
    #[must_use]
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            Self::Sequence(_) => Some(ContainerKind::Sequence),
            Self::Map(_) => Some(ContainerKind::Map),
            Self::Set(_) => Some(ContainerKind::Set),
            Self::Record(_) | Self::External(_) => None,
        }
    }
}

/// Discriminant of a `Node`, used in error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Record,
    Sequence,
    Map,
    Set,
    External,
}

impl NodeKind {
    /// True for sequences, maps and sets.
    #[must_use]
    pub const fn is_container(self) -> bool {
        matches!(self, Self::Sequence | Self::Map | Self::Set)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Record => "record",
            Self::Sequence => "sequence",
            Self::Map => "map",
            Self::Set => "set",
            Self::External => "external",
        };
        f.write_str(name)
    }
}

/// The three typed containers the wire format can tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContainerKind {
    Sequence,
    Map,
    Set,
}

impl ContainerKind {
    /// Wire tag: `"A"`, `"M"` or `"S"`.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Sequence => SEQUENCE_TAG,
            Self::Map => MAP_TAG,
            Self::Set => SET_TAG,
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            SEQUENCE_TAG => Some(Self::Sequence),
            MAP_TAG => Some(Self::Map),
            SET_TAG => Some(Self::Set),
            _ => None,
        }
    }

    /// A fresh, empty node of this kind.
    #[must_use]
    pub fn empty_node(self) -> Node {
        match self {
            Self::Sequence => Node::Sequence(Vec::new()),
            Self::Map => Node::Map(UniqueMap::new()),
            Self::Set => Node::Set(UniqueSet::new()),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the refgraph codec and store.
///
/// - No silent failures
/// - Use `Result<T, RefgraphError>` for fallible operations
/// - The core never panics; every detectable inconsistency is reported
#[derive(Debug, Error)]
pub enum RefgraphError {
    /// A user record carries a field named like a reserved marker key.
    #[error("Marker conflict: reserved key {key:?} found on record at {path}")]
    MarkerConflict { key: String, path: String },

    /// A type tag is not a string, or a container tag is not an `[index, kind]` pair.
    #[error("Invalid type tag at {path}: {reason}")]
    InvalidTypeTag { path: String, reason: String },

    /// A container tag names a kind other than `A`, `M` or `S`.
    #[error("Unknown container type {tag:?} at {path}")]
    UnknownContainerType { tag: String, path: String },

    /// A reference targets an index that no decoded node carries.
    #[error("Dangling reference to index {index} at {path}")]
    DanglingReference { index: u64, path: String },

    /// A marker is present but its payload is malformed.
    #[error("Invalid marker {key:?} at {path}: {reason}")]
    InvalidMarker {
        key: String,
        path: String,
        reason: String,
    },

    /// A map entry is not a two-element `[key, value]` array.
    #[error("Malformed map entry at {path}")]
    MalformedEntry { path: String },

    /// Two decoded nodes claim the same index.
    #[error("Index {0} is carried by more than one node")]
    DuplicateIndex(u64),

    /// An external value reached the encoder and the codec did not substitute it.
    #[error("External value at {path} has no substitution")]
    OpaqueValue { path: String },

    /// The value nests deeper than the supported limit.
    #[error("Nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A node handle does not belong to this graph.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// A node or object has a different kind than the operation requires.
    #[error("{target} is a {actual}, expected {expected}")]
    WrongKind {
        target: String,
        expected: &'static str,
        actual: NodeKind,
    },

    /// The batch does not continue the store's transaction history.
    #[error("Out of order transaction: expected {expected}, got {actual}")]
    OutOfOrderTransaction { expected: u64, actual: u64 },

    /// No live object at this index.
    #[error("Unknown object: {0}")]
    UnknownObject(u64),

    /// An object already lives at this index.
    #[error("Object {0} already exists")]
    ObjectExists(u64),

    /// The object at this index was disposed; indices are never reused.
    #[error("Object {0} was disposed")]
    ObjectDisposed(u64),

    /// The object index is beyond the table limit.
    #[error("Object index {0} exceeds the object table limit")]
    ObjectLimit(u64),

    /// No property declared at this index.
    #[error("Unknown property index: {0}")]
    UnknownProperty(u64),

    /// Property declarations must be strictly sequential.
    #[error("Property index mismatch: expected {expected}, got {actual}")]
    PropertyIndexMismatch { expected: u64, actual: u64 },

    /// A list position outside the sequence.
    #[error("Position {position} out of range for object {object} (length {len})")]
    PositionOutOfRange {
        object: u64,
        position: u64,
        len: usize,
    },

    /// Removal of a key or member that is not present.
    #[error("Object {object} has no such entry")]
    MissingEntry { object: u64 },

    /// A property name that would make a record look like a container wrapper.
    #[error("Property name {0:?} is reserved")]
    ReservedProperty(String),

    /// Addition of a member that is already present.
    #[error("Object {object} already contains this entry")]
    DuplicateEntry { object: u64 },

    /// An event record cannot be parsed.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A snapshot document is structurally invalid.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// The JSON text could not be parsed or produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred (application layer).
    #[error("I/O error: {0}")]
    IoError(String),

    /// A configuration file could not be parsed (application layer).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Re-encoding a document did not reproduce it (application layer).
    #[error("Document is not canonical: first difference at byte {offset}")]
    NotCanonical { offset: usize },
}

// =============================================================================
// TESTS
// =============================================================================
