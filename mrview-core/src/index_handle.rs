// src/index_handle.rs
// Index naming (spec §4.2) and the process-local index handle.

use crate::source::{SecondaryStore, ViewSignature, LAST_SEQ_KEY};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// FNV-1a, masked to 28 bits. Not cryptographic by design - spec §4.2
/// is explicit that callers needing stronger collision resistance
/// should layer a stronger hash themselves (e.g. MD5) on top of the
/// same `mapSrc || reduceSrc` input.
fn hash28(input: &str) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;
    let mut h = FNV_OFFSET;
    for byte in input.as_bytes() {
        h ^= *byte as u32;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h & 0x0FFF_FFFF
}

/// `db_name + "-mrview-" + hash`, per spec §4.2 step 2.
pub fn index_name(db_name: &str, signature: &ViewSignature) -> String {
    format!("{db_name}-mrview-{:07x}", hash28(&signature.hash_input()))
}

/// The process-local handle described in spec §3: name, the secondary
/// store it owns, the view definition it was built from, and an
/// in-memory cache of `lastSeq`. Created on first `query`/`removeIndex`,
/// destroyed only by `removeIndex` (spec §3's lifecycle note).
pub struct IndexHandle<S: SecondaryStore> {
    pub name: String,
    pub signature: ViewSignature,
    pub store: Mutex<S>,
    last_seq: AtomicU64,
}

impl<S: SecondaryStore> IndexHandle<S> {
    /// Wrap a freshly opened store, reading `_local/lastSeq` if present
    /// (spec §4.2 step 4: absent means `lastSeq = 0`).
    pub fn open(name: String, signature: ViewSignature, store: S) -> crate::error::Result<Self> {
        let last_seq = match store.get(LAST_SEQ_KEY)? {
            Some(v) => v.get("seq").and_then(|s| s.as_u64()).unwrap_or(0),
            None => 0,
        };
        Ok(IndexHandle { name, signature, store: Mutex::new(store), last_seq: AtomicU64::new(last_seq) })
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    /// Advance the in-memory cache. Callers must have already durably
    /// written the matching `_local/lastSeq` record before calling this -
    /// the atomic here is about cross-thread visibility, not durability.
    pub(crate) fn set_last_seq(&self, seq: u64) {
        self.last_seq.store(seq, Ordering::Release);
    }
}
