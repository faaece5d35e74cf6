//! # Reference-Preserving Codec
//!
//! Encodes a possibly cyclic `Graph` into JSON text and back.
//!
//! ## Wire Format
//!
//! A value is written in its natural JSON shape, except:
//! - the first occurrence of a record carries `"<prefix>°": <index>`
//! - every later occurrence is replaced by `{ "<prefix>>": <index> }`
//! - a sequence, map or set becomes an array whose first element is
//!   `{ "<prefix>þ": [<index>, "A" | "M" | "S"] }`, followed by the elements
//!   (map entries as `[key, value]` pairs)
//! - a substituted value carries `"<prefix>°"` and `"<prefix>þ": "<tag>"`
//!   next to the fields returned by the [`Codec`]
//!
//! Indexes are assigned in pre-order, first discovered first numbered,
//! starting at zero.

mod decoder;
mod encoder;

pub use decoder::{decode, deserialize};
pub use encoder::{encode, serialize};
pub(crate) use encoder::encode_nested;

use crate::primitives::{DEFAULT_PREFIX, INDEX_SUFFIX, REFERENCE_SUFFIX, TYPE_SUFFIX};
use crate::{External, Graph, NodeId, RefgraphError};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Plain JSON object, as handed to and returned by a [`Codec`].
pub type JsonMap = serde_json::Map<String, JsonValue>;

// =============================================================================
// CODEC TRAIT
// =============================================================================

/// Substitution hooks for values that must never be inlined.
///
/// - `substitute`: called once per first-visited record or external during
///   encoding. Returning fields replaces the node in the output; the fields
///   may declare their type tag under the `<prefix>þ` key (a string).
/// - `activate`: called once per decoded record carrying a type tag.
///   Returning an external makes it the decoded node; it is then opaque.
///
/// Implementations must be pure: the same input always yields the same
/// output, and `activate` inverts `substitute`.
pub trait Codec: Send + Sync {
    fn substitute(&self, graph: &Graph, node: NodeId) -> Option<JsonMap> {
        let _ = (graph, node);
        None
    }

    fn activate(&self, fields: &JsonMap, tag: &str) -> Option<External> {
        let _ = (fields, tag);
        None
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Options shared by encoding and decoding. Both sides must agree.
#[derive(Clone)]
pub struct CodecOptions {
    prefix: String,
    codec: Option<Arc<dyn Codec>>,
}

impl CodecOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different marker-key prefix. The empty string is allowed.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn codec(&self) -> Option<&dyn Codec> {
        self.codec.as_deref()
    }

    #[must_use]
    pub fn keys(&self) -> MarkerKeys {
        MarkerKeys::new(&self.prefix)
    }
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            codec: None,
        }
    }
}

impl fmt::Debug for CodecOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecOptions")
            .field("prefix", &self.prefix)
            .field("codec", &self.codec.is_some())
            .finish()
    }
}

// =============================================================================
// MARKER KEYS
// =============================================================================

/// Which reserved role a key plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerRole {
    Index,
    Reference,
    TypeTag,
}

/// The three reserved keys for one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerKeys {
    pub index: String,
    pub reference: String,
    pub type_tag: String,
}

impl MarkerKeys {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            index: format!("{prefix}{INDEX_SUFFIX}"),
            reference: format!("{prefix}{REFERENCE_SUFFIX}"),
            type_tag: format!("{prefix}{TYPE_SUFFIX}"),
        }
    }

    /// The role of `key`, if it is reserved.
    #[must_use]
    pub fn role(&self, key: &str) -> Option<MarkerRole> {
        if key == self.index {
            Some(MarkerRole::Index)
        } else if key == self.reference {
            Some(MarkerRole::Reference)
        } else if key == self.type_tag {
            Some(MarkerRole::TypeTag)
        } else {
            None
        }
    }

    /// `{ "<prefix>>": index }`
    #[must_use]
    pub fn reference_marker(&self, index: u64) -> JsonValue {
        let mut marker = JsonMap::with_capacity(1);
        marker.insert(self.reference.clone(), index.into());
        JsonValue::Object(marker)
    }

    /// The target of a reference marker, if `fields` is exactly one.
    ///
    /// A reference key mixed with other fields is malformed, not a reference.
    pub fn reference_target(&self, fields: &JsonMap, path: &str) -> Result<Option<u64>, RefgraphError> {
        let Some(target) = fields.get(&self.reference) else {
            return Ok(None);
        };
        if fields.len() != 1 {
            return Err(RefgraphError::InvalidMarker {
                key: self.reference.clone(),
                path: path.to_string(),
                reason: "reference marker mixed with other fields".to_string(),
            });
        }
        parse_index(target, &self.reference, path).map(Some)
    }
}

/// Read a marker's index payload: a non-negative integer.
pub(crate) fn parse_index(value: &JsonValue, key: &str, path: &str) -> Result<u64, RefgraphError> {
    value.as_u64().ok_or_else(|| RefgraphError::InvalidMarker {
        key: key.to_string(),
        path: path.to_string(),
        reason: format!("expected a non-negative integer, found {}", json_kind(value)),
    })
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

// =============================================================================
// PATH
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Segment<'a> {
    Field(&'a str),
    Index(usize),
    EntryKey(usize),
    EntryValue(usize),
}

/// Location of the value being visited, for error reports: `$.a[2].key`.
#[derive(Debug, Default)]
struct Path<'a> {
    segments: Vec<Segment<'a>>,
}

impl<'a> Path<'a> {
    fn push(&mut self, segment: Segment<'a>) -> Result<(), RefgraphError> {
        if self.segments.len() >= crate::primitives::MAX_NESTING_DEPTH {
            return Err(RefgraphError::NestingTooDeep(
                crate::primitives::MAX_NESTING_DEPTH,
            ));
        }
        self.segments.push(segment);
        Ok(())
    }

    fn pop(&mut self) {
        self.segments.pop();
    }
}

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.segments {
            match segment {
                Segment::Field(name) => write!(f, ".{name}")?,
                Segment::Index(i) => write!(f, "[{i}]")?,
                Segment::EntryKey(i) => write!(f, "[{i}].key")?,
                Segment::EntryValue(i) => write!(f, "[{i}].value")?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_keys_use_default_prefix() {
        let keys = CodecOptions::default().keys();
        assert_eq!(keys.index, "~$£€°");
        assert_eq!(keys.reference, "~$£€>");
        assert_eq!(keys.type_tag, "~$£€þ");
    }

    #[test]
    fn empty_prefix_keys_are_bare_suffixes() {
        let keys = CodecOptions::new().with_prefix("").keys();
        assert_eq!(keys.role("°"), Some(MarkerRole::Index));
        assert_eq!(keys.role(">"), Some(MarkerRole::Reference));
        assert_eq!(keys.role("þ"), Some(MarkerRole::TypeTag));
        assert_eq!(keys.role("i"), None);
    }

    #[test]
    fn reference_target_requires_single_key() {
        let keys = MarkerKeys::new("-");
        let single = json!({"->": 4});
        let mixed = json!({"->": 4, "x": 1});
        let plain = json!({"x": 1});

        let as_map = |v: &JsonValue| v.as_object().cloned().unwrap_or_default();
        assert_eq!(keys.reference_target(&as_map(&single), "$").expect("ref"), Some(4));
        assert_eq!(keys.reference_target(&as_map(&plain), "$").expect("plain"), None);
        assert!(matches!(
            keys.reference_target(&as_map(&mixed), "$"),
            Err(RefgraphError::InvalidMarker { .. })
        ));
    }

    #[test]
    fn negative_index_is_invalid() {
        let result = parse_index(&json!(-1), "°", "$.a");
        assert!(matches!(result, Err(RefgraphError::InvalidMarker { .. })));
    }

    #[test]
    fn path_display() {
        let mut path = Path::default();
        path.push(Segment::Field("items")).expect("push");
        path.push(Segment::Index(2)).expect("push");
        path.push(Segment::EntryValue(0)).expect("push");
        assert_eq!(path.to_string(), "$.items[2][0].value");
    }
}
