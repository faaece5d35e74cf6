//! # Wire Primitives
//!
//! Fixed constants of the refgraph wire format and runtime limits.
//!
//! These are compiled into the binary and are immutable at runtime. Changing
//! any marker constant changes the wire format.

/// Default marker-key prefix.
///
/// Chosen so that an accidental collision with a real field name is
/// vanishingly unlikely. Callers controlling the whole schema may use `""`.
pub const DEFAULT_PREFIX: &str = "~$£€";

/// Suffix of the key carrying a node's index on its first occurrence.
pub const INDEX_SUFFIX: &str = "°";

/// Suffix of the key of a reference marker `{ "<prefix>>": index }`.
pub const REFERENCE_SUFFIX: &str = ">";

/// Suffix of the key carrying a container or substitution type tag.
pub const TYPE_SUFFIX: &str = "þ";

/// Container tag of an ordered sequence.
pub const SEQUENCE_TAG: &str = "A";

/// Container tag of a key-unique map.
pub const MAP_TAG: &str = "M";

/// Container tag of a uniqueness set.
pub const SET_TAG: &str = "S";

// =============================================================================
// SNAPSHOT WRAPPERS
// =============================================================================

/// Field of a container wrapper record holding the wrapper's table position.
pub const CONTAINER_INDEX_KEY: &str = "$container-index";

/// Field of a container wrapper record holding the container itself.
pub const CONTAINER_CONTENTS_KEY: &str = "$container-contents";

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum nesting of compound values along one path.
///
/// Encoding, decoding and literal import are recursive; this bounds the stack.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Maximum number of nested JSON arrays and objects the `serde_json` parser
/// accepts. The encoder refuses to emit deeper text.
///
/// Compound values cost more than one level on the wire: a container takes
/// three (array, tag object, tag array) and a map entry adds its pair array.
pub const MAX_JSON_DEPTH: usize = 127;

/// Maximum size of a store's object table.
///
/// `New-Object` grows the table up to the requested index; this prevents a
/// single event from allocating an unbounded table.
pub const MAX_OBJECT_TABLE_LEN: u64 = 1 << 24;

/// Arena size below which a store never compacts.
///
/// Above it, a store compacts once its arena has doubled since the last
/// compaction, so reclamation cost stays proportional to allocation.
pub const ARENA_COMPACTION_FLOOR: usize = 1024;
