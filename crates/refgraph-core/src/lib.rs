//! # refgraph-core
//!
//! Reference-preserving JSON graph codec and event-sourced graph store.
//!
//! This crate turns an arbitrary, possibly cyclic graph of records,
//! sequences, maps, sets and opaque host values into JSON text and back,
//! keeping topology, cycles and shared identity intact. A [`GraphStore`]
//! then keeps a decoded graph up to date from ordered batches of small
//! index-addressed mutation events.
//!
//! ## Layout
//!
//! - `types`: value model and error type
//! - `graph`: the node arena
//! - `codec`: encoder, decoder and substitution hooks
//! - `mutation` / `store`: events and the store they advance
//! - `formats`: the snapshot document a store is seeded from
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network, no file I/O
//! - Deterministic: the same graph always encodes to the same text
//! - Exact: every inconsistency is an error, never silently repaired
//! - Closed: the only injected logic is the caller's [`Codec`]

// =============================================================================
// MODULES
// =============================================================================

pub mod codec;
pub mod formats;
pub mod graph;
pub mod mutation;
pub mod primitives;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ContainerKind, External, Node, NodeId, NodeKind, Record, RefgraphError, UniqueMap, UniqueSet,
    Value,
};

// =============================================================================
// RE-EXPORTS: Codec
// =============================================================================

pub use codec::{
    Codec, CodecOptions, JsonMap, MarkerKeys, MarkerRole, decode, deserialize, encode, serialize,
};
pub use graph::Graph;

// =============================================================================
// RE-EXPORTS: Store
// =============================================================================

pub use mutation::{Event, EventBatch, MutationEngine, ObjectKind};
pub use store::{GraphStore, ObjectSlot};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{MAX_SNAPSHOT_SIZE, SnapshotDocument, store_from_str, store_to_string};
