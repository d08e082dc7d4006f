// src/query/executor.rs
// Drives a `Plan` against a secondary store: scan, decode live rows,
// group/reduce (spec §4.5), join `include_docs`, and apply whatever
// pagination the planner deferred to this stage.

use super::planner::{Plan, ScanKind};
use super::{QueryResult, ResultRow};
use crate::eval::MapReduceEvaluator;
use crate::error::Result;
use crate::reduce::{group_rows, reduce_group, MaterializedRow};
use crate::source::{KvRecord, ScanRange, SecondaryStore, SourceDatabase, ViewSignature};
use serde_json::Value;

pub fn execute<D: SourceDatabase, S: SecondaryStore>(
    plan: Plan,
    signature: &ViewSignature,
    store: &S,
    source: &D,
    evaluator: &dyn MapReduceEvaluator,
    include_docs: bool,
) -> Result<QueryResult> {
    // total_rows/offset only apply to the persisted-view map shape (spec
    // §9's open question resolves the reduce path to carry neither).
    let (total_rows, offset) = if plan.effective_reduce {
        (None, None)
    } else {
        match &plan.scans {
            ScanKind::Range(range) => range_stats(store, range)?,
            ScanKind::Keys(_) => (Some(count_live_before(store, None)?), None),
        }
    };

    let rows = match plan.scans {
        ScanKind::Range(range) => decode_live_rows(store, &range)?,
        ScanKind::Keys(per_key) => {
            let mut merged = Vec::new();
            let mut cache: Vec<(Value, Vec<MaterializedRow>)> = Vec::new();
            for (key, range) in per_key {
                let rows = match cache.iter().find(|(k, _)| *k == key) {
                    Some((_, rows)) => rows.clone(),
                    None => {
                        let fresh = decode_live_rows(store, &range)?;
                        cache.push((key.clone(), fresh.clone()));
                        fresh
                    }
                };
                merged.extend(rows);
            }
            merged
        }
    };

    let mut rows = if let Some(reduce_src) = signature.reduce().filter(|_| plan.effective_reduce) {
        let groups = group_rows(rows, plan.group);
        groups
            .into_iter()
            .map(|g| {
                let key = g.key.clone();
                reduce_group(&g, &reduce_src, evaluator).map(|value| ResultRow { id: None, key: key.unwrap_or(Value::Null), value, doc: None })
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        rows.into_iter()
            .map(|r| ResultRow { id: Some(r.id), key: r.key, value: r.value, doc: None })
            .collect()
    };

    if plan.post_skip > 0 {
        rows = rows.into_iter().skip(plan.post_skip).collect();
    }
    if let Some(limit) = plan.post_limit {
        rows.truncate(limit);
    }

    if include_docs {
        for row in &mut rows {
            let join_id = row.value.get("_id").and_then(Value::as_str).map(str::to_string).or_else(|| row.id.clone());
            if let Some(id) = join_id {
                row.doc = source.get(&id)?;
            }
        }
    }

    Ok(QueryResult { rows, total_rows, offset })
}

/// `total_rows` is the whole view's live row count; `offset` is how many
/// of those rows sort before the first row this range would return,
/// plus whatever `skip` the planner already baked into `range` - mirrors
/// CouchDB's persisted-view result shape.
fn range_stats<S: SecondaryStore>(store: &S, range: &ScanRange) -> Result<(Option<usize>, Option<usize>)> {
    let total = count_live_before(store, None)?;
    let before_range = if range.descending {
        total - count_live_before(store, range.end.as_deref())?
    } else {
        count_live_before(store, range.start.as_deref())?
    };
    Ok((Some(total), Some(before_range + range.skip)))
}

/// Count live rows with a composite key strictly less than `end`
/// (unbounded, i.e. the whole store, when `end` is `None`).
fn count_live_before<S: SecondaryStore>(store: &S, end: Option<&[u8]>) -> Result<usize> {
    let range = ScanRange { end: end.map(<[u8]>::to_vec), ..Default::default() };
    Ok(decode_live_rows(store, &range)?.len())
}

fn decode_live_rows<S: SecondaryStore>(store: &S, range: &crate::source::ScanRange) -> Result<Vec<MaterializedRow>> {
    let stored = store.scan(range)?;
    stored
        .into_iter()
        .filter(|row| !row.key.starts_with(b"_local/"))
        .map(|row| serde_json::from_value::<KvRecord>(row.value).map_err(Into::into))
        .filter(|rec| !matches!(rec, Ok(r) if r.deleted))
        .map(|rec| rec.map(|r| MaterializedRow { id: r.id, key: r.key, value: r.value, reduce_output: r.reduce_output }))
        .collect()
}
