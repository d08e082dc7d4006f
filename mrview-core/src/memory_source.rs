// src/memory_source.rs
// In-memory reference implementation of the two external collaborators
// from spec §6, grounded on `ironbase-core/src/storage/memory_storage.rs`
// ("fast, ephemeral storage ... perfect for unit tests"). Not a
// production backend: a real deployment binds `SourceDatabase` and
// `SecondaryStore` to its own ordered key/value store, the way the
// original system binds to PouchDB/CouchDB's LevelDOWN.

use crate::error::Result;
use crate::source::{ChangeRecord, ScanRange, SecondaryStore, SourceDatabase, StoreRow};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Bound;

struct Inner {
    docs: HashMap<String, Value>,
    changes: Vec<ChangeRecord>,
    next_seq: u64,
}

/// An in-memory source database that records every `put`/`delete` as a
/// change-feed entry with a monotonically increasing `seq`.
pub struct MemorySourceDatabase {
    name: String,
    inner: RwLock<Inner>,
}

impl MemorySourceDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        MemorySourceDatabase {
            name: name.into(),
            inner: RwLock::new(Inner { docs: HashMap::new(), changes: Vec::new(), next_seq: 0 }),
        }
    }

    /// Insert or overwrite a document, appending a change record. `doc`
    /// must already carry its `_id` field for callers that care, but the
    /// id parameter is authoritative for the change feed and lookups.
    pub fn put(&self, id: &str, doc: Value) -> u64 {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.docs.insert(id.to_string(), doc.clone());
        inner.changes.push(ChangeRecord { id: id.to_string(), seq, doc: Some(doc), deleted: false });
        seq
    }

    /// Mark a document deleted, appending a deletion tombstone to the
    /// change feed (spec §3).
    pub fn delete(&self, id: &str) -> u64 {
        let mut inner = self.inner.write();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.docs.remove(id);
        inner.changes.push(ChangeRecord { id: id.to_string(), seq, doc: None, deleted: true });
        seq
    }
}

impl SourceDatabase for MemorySourceDatabase {
    fn db_name(&self) -> &str {
        &self.name
    }

    fn get(&self, doc_id: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().docs.get(doc_id).cloned())
    }

    fn changes_since(&self, since: u64) -> Result<Vec<ChangeRecord>> {
        Ok(self.inner.read().changes.iter().filter(|c| c.seq > since).cloned().collect())
    }

    fn current_seq(&self) -> u64 {
        self.inner.read().next_seq
    }
}

/// An in-memory, `BTreeMap`-backed secondary store. Lexicographic
/// ordering of `Vec<u8>` keys already matches the byte order the
/// composite-key codec is built to produce, so no extra comparator is
/// needed here.
pub struct MemorySecondaryStore {
    data: RwLock<BTreeMap<Vec<u8>, Value>>,
}

impl MemorySecondaryStore {
    pub fn new() -> Self {
        MemorySecondaryStore { data: RwLock::new(BTreeMap::new()) }
    }
}

impl Default for MemorySecondaryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecondaryStore for MemorySecondaryStore {
    fn bulk_write(&mut self, puts: Vec<(Vec<u8>, Value)>, deletes: Vec<Vec<u8>>) -> Result<()> {
        let mut data = self.data.write();
        for key in deletes {
            data.remove(&key);
        }
        for (key, value) in puts {
            data.insert(key, value);
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<StoreRow>> {
        let data = self.data.read();
        let lo = range.start.clone().map(Bound::Included).unwrap_or(Bound::Unbounded);
        let hi = range.end.clone().map(Bound::Excluded).unwrap_or(Bound::Unbounded);

        let mut rows: Vec<StoreRow> = data
            .range((lo, hi))
            .map(|(k, v)| StoreRow { key: k.clone(), value: v.clone() })
            .collect();

        if range.descending {
            rows.reverse();
        }
        if range.skip > 0 {
            rows = rows.into_iter().skip(range.skip).collect();
        }
        if let Some(limit) = range.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn destroy(&mut self) -> Result<()> {
        self.data.write().clear();
        Ok(())
    }
}
