// src/updater.rs
// Incremental updater (spec §4.3): drains the source's change feed from
// `lastSeq`, diffs each document's previously emitted rows against a
// fresh `map` run, and commits tombstones/rewrites/inserts atomically.
// Grounded on the read-modify-diff-write shape of
// `ironbase-core/src/recovery/operation_replay.rs` (replay changes
// against storage in order) and the write-ordering discipline of
// `ironbase-core/src/wal/writer.rs` (never advance a durable cursor
// ahead of what's actually been committed).

use crate::collation::composite_key;
use crate::error::Result;
use crate::eval::MapReduceEvaluator;
use crate::index_handle::IndexHandle;
use crate::source::{meta_key, ChangeRecord, DocMeta, KvRecord, SecondaryStore, SourceDatabase, LAST_SEQ_KEY};
use serde_json::json;
use std::collections::HashSet;

/// `update(index)`: apply every change with `seq > index.lastSeq`, in
/// order, and return the new `lastSeq`. On any error, processing stops
/// immediately and `lastSeq` reflects only the changes fully committed
/// before the failure (spec §4.3/§7).
pub fn update<D: SourceDatabase, S: SecondaryStore>(
    handle: &IndexHandle<S>,
    source: &D,
    evaluator: &dyn MapReduceEvaluator,
) -> Result<u64> {
    let since = handle.last_seq();
    let changes = source.changes_since(since)?;

    for change in &changes {
        apply_change(handle, evaluator, change)?;
        handle.set_last_seq(change.seq);
        crate::log_debug!("applied change seq={} id={:?} to index {}", change.seq, change.id, handle.name);
    }

    Ok(handle.last_seq())
}

fn apply_change<S: SecondaryStore>(
    handle: &IndexHandle<S>,
    evaluator: &dyn MapReduceEvaluator,
    change: &ChangeRecord,
) -> Result<()> {
    // Replay safety: a change already covered by lastSeq is a no-op.
    if change.seq <= handle.last_seq() {
        return Ok(());
    }

    // Reserved ids never get indexed, but the change still counts
    // toward progress so `lastSeq` can move past it.
    if change.id.starts_with('_') {
        handle.store.lock().bulk_write(vec![(LAST_SEQ_KEY.to_vec(), json!({"seq": change.seq}))], vec![])?;
        return Ok(());
    }

    let new_rows: Vec<(Vec<u8>, KvRecord)> = if change.deleted {
        Vec::new()
    } else {
        let doc = change.doc.as_ref().ok_or_else(|| {
            crate::error::ViewError::SourceIo(format!("change seq={} for {:?} has no doc but isn't deleted", change.seq, change.id))
        })?;

        let mut emitted: Vec<(serde_json::Value, serde_json::Value)> = Vec::new();
        {
            let mut emit = |k: serde_json::Value, v: serde_json::Value| emitted.push((k, v));
            evaluator.eval_map(&handle.signature.map_src, doc, &mut emit)?;
        }

        let reduce_src = handle.signature.reduce();
        emitted
            .into_iter()
            .enumerate()
            .map(|(idx, (key, value))| {
                let composite = composite_key(&key, &change.id, &value, idx);
                let reduce_output = match &reduce_src {
                    Some(r) => Some(evaluator.eval_reduce(r, Some(&[key.clone()]), &[value.clone()], false)?),
                    None => None,
                };
                Ok((composite, KvRecord { id: change.id.clone(), key, value, reduce_output, deleted: false }))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let new_key_set: HashSet<Vec<u8>> = new_rows.iter().map(|(k, _)| k.clone()).collect();

    let old_meta: DocMeta = handle
        .store
        .lock()
        .get(&meta_key(&change.id))?
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .unwrap_or_default();
    let old_key_set: HashSet<Vec<u8>> = old_meta.keys.iter().cloned().collect();

    let mut puts: Vec<(Vec<u8>, serde_json::Value)> = Vec::new();

    // New and rewritten (re-emitted unchanged) composite keys.
    for (composite, record) in &new_rows {
        puts.push((composite.clone(), serde_json::to_value(record)?));
    }

    // Keys no longer emitted: tombstone them. The record's own key/value
    // payload is irrelevant once deleted - the executor filters these
    // out of every scan - so a minimal tombstone is enough.
    for composite in old_key_set.difference(&new_key_set) {
        let tombstone = KvRecord { id: change.id.clone(), key: serde_json::Value::Null, value: serde_json::Value::Null, reduce_output: None, deleted: true };
        puts.push((composite.clone(), serde_json::to_value(&tombstone)?));
    }

    // Union of old and new keys, per spec §4.3 - retaining tombstoned
    // entries is harmless; this implementation does not prune them.
    let merged_keys: Vec<Vec<u8>> = old_key_set.union(&new_key_set).cloned().collect();
    puts.push((meta_key(&change.id), serde_json::to_value(&DocMeta { keys: merged_keys })?));
    puts.push((LAST_SEQ_KEY.to_vec(), json!({"seq": change.seq})));

    handle.store.lock().bulk_write(puts, vec![])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NativeEvaluator;
    use crate::index_handle::IndexHandle;
    use crate::memory_source::{MemorySecondaryStore, MemorySourceDatabase};
    use crate::source::{BuiltinReducer, ReduceSrc, ScanRange, ViewSignature};
    use serde_json::json;
    use std::sync::Arc;

    fn evaluator() -> NativeEvaluator {
        let ev = NativeEvaluator::new();
        ev.register_map(
            "emit(doc._id, doc.n)",
            Arc::new(|doc, emit| emit(doc["_id"].clone(), doc["n"].clone())),
        );
        ev
    }

    fn live_records<S: crate::source::SecondaryStore>(handle: &IndexHandle<S>) -> Vec<KvRecord> {
        let rows = handle.store.lock().scan(&ScanRange::default()).unwrap();
        rows.into_iter()
            .filter(|r| !r.key.starts_with(b"_local/"))
            .map(|r| serde_json::from_value::<KvRecord>(r.value).unwrap())
            .filter(|r| !r.deleted)
            .collect()
    }

    #[test]
    fn update_indexes_every_emitted_row() {
        let source = MemorySourceDatabase::new("t");
        source.put("a", json!({"_id": "a", "n": 1}));
        source.put("b", json!({"_id": "b", "n": 2}));

        let sig = ViewSignature::map_only("emit(doc._id, doc.n)");
        let handle = IndexHandle::open("idx".into(), sig, MemorySecondaryStore::new()).unwrap();
        let ev = evaluator();

        let last_seq = update(&handle, &source, &ev).unwrap();
        assert_eq!(last_seq, 2);

        let records = live_records(&handle);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn update_is_idempotent_on_replay() {
        let source = MemorySourceDatabase::new("t");
        source.put("a", json!({"_id": "a", "n": 1}));
        let sig = ViewSignature::map_only("emit(doc._id, doc.n)");
        let handle = IndexHandle::open("idx".into(), sig, MemorySecondaryStore::new()).unwrap();
        let ev = evaluator();

        update(&handle, &source, &ev).unwrap();
        let first_pass = live_records(&handle).len();
        // Nothing new since lastSeq; update() should be a no-op.
        update(&handle, &source, &ev).unwrap();
        assert_eq!(live_records(&handle).len(), first_pass);
    }

    #[test]
    fn delete_tombstones_the_doc_rows() {
        let source = MemorySourceDatabase::new("t");
        source.put("a", json!({"_id": "a", "n": 1}));
        source.put("b", json!({"_id": "b", "n": 2}));
        let sig = ViewSignature::map_only("emit(doc._id, doc.n)");
        let handle = IndexHandle::open("idx".into(), sig, MemorySecondaryStore::new()).unwrap();
        let ev = evaluator();
        update(&handle, &source, &ev).unwrap();
        assert_eq!(live_records(&handle).len(), 2);

        source.delete("b");
        update(&handle, &source, &ev).unwrap();
        let remaining = live_records(&handle);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "a");
    }

    #[test]
    fn document_update_replaces_its_emitted_rows() {
        let source = MemorySourceDatabase::new("t");
        source.put("a", json!({"_id": "a", "n": 1}));
        let sig = ViewSignature::map_only("emit(doc._id, doc.n)");
        let handle = IndexHandle::open("idx".into(), sig, MemorySecondaryStore::new()).unwrap();
        let ev = evaluator();
        update(&handle, &source, &ev).unwrap();

        source.put("a", json!({"_id": "a", "n": 99}));
        update(&handle, &source, &ev).unwrap();

        let records = live_records(&handle);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, json!(99));
    }

    #[test]
    fn reserved_ids_are_skipped_but_advance_last_seq() {
        let source = MemorySourceDatabase::new("t");
        source.put("_design/foo", json!({"_id": "_design/foo"}));
        let sig = ViewSignature::map_only("emit(doc._id, doc.n)");
        let handle = IndexHandle::open("idx".into(), sig, MemorySecondaryStore::new()).unwrap();
        let ev = evaluator();
        let last_seq = update(&handle, &source, &ev).unwrap();
        assert_eq!(last_seq, 1);
        assert!(live_records(&handle).is_empty());
    }

    #[test]
    fn stores_reduce_output_per_row_when_a_reducer_is_configured() {
        let source = MemorySourceDatabase::new("t");
        source.put("a", json!({"_id": "a", "n": 1}));
        let sig = ViewSignature::with_reduce("emit(doc._id, doc.n)", "_sum");
        let handle = IndexHandle::open("idx".into(), sig, MemorySecondaryStore::new()).unwrap();
        let ev = evaluator();
        update(&handle, &source, &ev).unwrap();

        let records = live_records(&handle);
        assert_eq!(records[0].reduce_output, Some(json!(1.0)));
        let _ = ReduceSrc::Builtin(BuiltinReducer::Sum); // sanity: signature round-trips to the builtin
    }
}
