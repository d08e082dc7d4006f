// src/query/planner.rs
// Validates a `QueryOptions` bag and turns it into one or more
// `ScanRange`s over the secondary store, per spec §4.4.

use super::{QueryOptions, StaleMode};
use crate::collation::{collate, lower_bound, upper_bound};
use crate::error::{Result, ViewError};
use crate::source::ScanRange;
use serde_json::Value;

#[derive(Debug)]
pub(crate) struct Plan {
    pub effective_reduce: bool,
    pub group: bool,
    pub scans: ScanKind,
    /// Pagination applied after the scan (and after grouping, when
    /// reducing) rather than pushed into the store's own `ScanRange`.
    pub post_limit: Option<usize>,
    pub post_skip: usize,
    pub stale: StaleMode,
}

#[derive(Debug)]
pub(crate) enum ScanKind {
    Range(ScanRange),
    /// One scan per entry of `keys`, in the user's original order
    /// (duplicates preserved) - spec §4.4's "keys query" rule.
    Keys(Vec<(Value, ScanRange)>),
}

pub(crate) fn plan(options: &QueryOptions, reducer_configured: bool) -> Result<Plan> {
    let effective_reduce = reducer_configured && options.reduce != Some(false);
    if effective_reduce && options.include_docs {
        return Err(ViewError::QueryParseError("include_docs is invalid when reduce is effectively true".into()));
    }

    // `group_level` as a numeric depth isn't implemented (spec §4.4
    // explicitly allows leaving this unimplemented); any truthy value,
    // numeric or boolean, collapses to full-key grouping.
    let group = options.group || matches!(options.group_level, Some(n) if n > 0);

    let scans = if let Some(keys) = &options.keys {
        let per_key = keys
            .iter()
            .map(|k| (k.clone(), ScanRange { start: Some(lower_bound(k)), end: Some(upper_bound(k)), descending: options.descending, ..Default::default() }))
            .collect();
        ScanKind::Keys(per_key)
    } else {
        let (raw_start, raw_end) = match &options.key {
            Some(k) => (Some(k.clone()), Some(k.clone())),
            None => (options.startkey.clone(), options.endkey.clone()),
        };

        // `descending` swaps which bound is logically low/high (spec
        // §4.4): with descending, `startkey` is the high end of the
        // range and `endkey` the low end.
        let (lo_opt, hi_opt) = if options.descending { (raw_end, raw_start) } else { (raw_start, raw_end) };

        if let (Some(lo), Some(hi)) = (&lo_opt, &hi_opt) {
            if collate(lo, hi) == std::cmp::Ordering::Greater {
                return Err(ViewError::QueryParseError(format!(
                    "startkey/endkey range is empty: {lo:?} is greater than {hi:?}"
                )));
            }
        }

        let lo_key = lo_opt.clone().unwrap_or(Value::Null);
        let hi_key = hi_opt.clone().unwrap_or_else(crate::collation::max_object);
        let start_bytes = lo_opt.as_ref().map(|_| lower_bound(&lo_key));
        let end_bytes = hi_opt.as_ref().map(|_| upper_bound(&hi_key));

        let (scan_limit, scan_skip) = if effective_reduce { (None, 0) } else { (options.limit, options.skip) };
        ScanKind::Range(ScanRange { start: start_bytes, end: end_bytes, descending: options.descending, limit: scan_limit, skip: scan_skip })
    };

    let (post_limit, post_skip) = match &scans {
        ScanKind::Range(_) if !effective_reduce => (None, 0),
        _ => (options.limit, options.skip),
    };

    Ok(Plan { effective_reduce, group, scans, post_limit, post_skip, stale: options.stale })
}
