//! # Formats
//!
//! Document formats built on top of the graph codec. File I/O is in the app
//! layer.

pub mod snapshot;

pub use snapshot::{
    MAX_SNAPSHOT_SIZE, SnapshotDocument, store_from_document, store_from_str, store_to_document,
    store_to_string,
};
