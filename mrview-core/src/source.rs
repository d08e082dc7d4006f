// src/source.rs
// The external collaborators from spec §6: the source database (shared
// read-only, owns documents and the change feed) and the secondary
// store (exclusively owned by one index, an ordered key/value space).
// Grounded on the `Storage` trait split in
// `ironbase-core/src/storage/traits.rs` - same idea of a narrow trait
// boundary so a production backend and an in-memory test backend can
// both satisfy it.

use crate::error::Result;
use serde_json::Value;

/// One record from the source's change feed (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub id: String,
    pub seq: u64,
    pub doc: Option<Value>,
    pub deleted: bool,
}

/// A row returned by a range/key scan over the secondary store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub key: Vec<u8>,
    pub value: Value,
}

/// Bounds for [`SecondaryStore::scan`]. `None` means unbounded on that
/// side; `descending` reverses iteration order (but bounds are always
/// given in "low..high" terms - the store, not the caller, flips them).
#[derive(Debug, Clone, Default)]
pub struct ScanRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub skip: usize,
}

/// Read-only view of the document-oriented source database (spec §6).
/// The engine never writes through this trait - all mutation happens
/// on the secondary store it owns.
pub trait SourceDatabase: Send + Sync {
    /// `info().db_name` - used to derive the persistent index name (§4.2).
    fn db_name(&self) -> &str;

    /// Fetch a single document by id, or `None` if absent.
    fn get(&self, doc_id: &str) -> Result<Option<Value>>;

    /// Every change with `seq > since`, in strictly increasing `seq`
    /// order. A finite, restartable sequence per spec §9's design note -
    /// callers drain it to completion on each `update` invocation.
    fn changes_since(&self, since: u64) -> Result<Vec<ChangeRecord>>;

    /// The highest `seq` currently known to the source, used only to
    /// check invariant 4 (lastSeq never exceeds it) in tests/assertions.
    fn current_seq(&self) -> u64;
}

/// The ordered key/value space exclusively owned by one index (spec §6).
/// Keys are raw bytes (composite indexable keys, or the handful of
/// `_local/...` well-known keys); ordering is plain lexicographic.
pub trait SecondaryStore: Send + Sync {
    /// Write a batch of puts and deletes atomically; see spec §4.3 for
    /// the ordering requirement when the backend can't offer true
    /// multi-key atomicity (data records, then meta, then `lastSeq`).
    fn bulk_write(&mut self, puts: Vec<(Vec<u8>, Value)>, deletes: Vec<Vec<u8>>) -> Result<()>;

    /// Point lookup.
    fn get(&self, key: &[u8]) -> Result<Option<Value>>;

    /// Ranged/ordered scan, honoring [`ScanRange`].
    fn scan(&self, range: &ScanRange) -> Result<Vec<StoreRow>>;

    /// Tear down the whole store (spec §4.2 `removeIndex`).
    fn destroy(&mut self) -> Result<()>;
}

/// `_local/lastSeq` key (spec §3).
pub const LAST_SEQ_KEY: &[u8] = b"_local/lastSeq";

/// `_local/doc_<id>` key for a source doc's meta record (spec §3).
pub fn meta_key(doc_id: &str) -> Vec<u8> {
    format!("_local/doc_{doc_id}").into_bytes()
}

/// One `(key, value)` emission from a single map invocation (spec glossary).
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedRow {
    pub key: Value,
    pub value: Value,
}

/// A fully materialized key/value record as persisted in the secondary
/// store's value payload (spec §3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KvRecord {
    pub id: String,
    pub key: Value,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_output: Option<Value>,
    #[serde(default)]
    pub deleted: bool,
}

/// Meta record per source doc (spec §3): every composite key currently
/// attributable to that doc, live or tombstoned.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DocMeta {
    #[serde(with = "hex_keys")]
    pub keys: Vec<Vec<u8>>,
}

/// Composite keys are opaque bytes; store them in JSON as hex so the
/// secondary store (whose value type is `serde_json::Value`) can carry
/// them without UTF-8 validity concerns.
mod hex_keys {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(keys: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let hex: Vec<String> = keys.iter().map(|k| hex_encode(k)).collect();
        hex.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let hex: Vec<String> = Vec::deserialize(d)?;
        hex.iter().map(|h| hex_decode(h)).collect()
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn hex_decode<E: serde::de::Error>(s: &str) -> Result<Vec<u8>, E> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// A reducer identified by source string, per the view definition (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReduceSrc {
    Builtin(BuiltinReducer),
    Custom(String),
}

impl ReduceSrc {
    /// The literal source string used in the naming hash (spec §4.2) -
    /// builtins and custom sources are both just strings at that layer.
    pub fn as_str(&self) -> &str {
        match self {
            ReduceSrc::Builtin(b) => b.as_str(),
            ReduceSrc::Custom(s) => s,
        }
    }

    pub fn parse(src: &str) -> Self {
        match src {
            "_sum" => ReduceSrc::Builtin(BuiltinReducer::Sum),
            "_count" => ReduceSrc::Builtin(BuiltinReducer::Count),
            "_stats" => ReduceSrc::Builtin(BuiltinReducer::Stats),
            other => ReduceSrc::Custom(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinReducer {
    Sum,
    Count,
    Stats,
}

impl BuiltinReducer {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinReducer::Sum => "_sum",
            BuiltinReducer::Count => "_count",
            BuiltinReducer::Stats => "_stats",
        }
    }
}

/// A `{mapSrc, reduceSrc}` view definition (spec §3). Two definitions
/// are equivalent iff their source strings are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewSignature {
    pub map_src: String,
    pub reduce_src: Option<String>,
}

impl ViewSignature {
    pub fn map_only(map_src: impl Into<String>) -> Self {
        ViewSignature { map_src: map_src.into(), reduce_src: None }
    }

    pub fn with_reduce(map_src: impl Into<String>, reduce_src: impl Into<String>) -> Self {
        ViewSignature { map_src: map_src.into(), reduce_src: Some(reduce_src.into()) }
    }

    /// The exact byte string hashed for the index name (spec §4.2):
    /// `mapSrc || reduceSrc`.
    pub fn hash_input(&self) -> String {
        format!("{}{}", self.map_src, self.reduce_src.as_deref().unwrap_or(""))
    }

    pub fn reduce(&self) -> Option<ReduceSrc> {
        self.reduce_src.as_deref().map(ReduceSrc::parse)
    }
}
