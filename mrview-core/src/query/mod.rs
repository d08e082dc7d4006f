// src/query/mod.rs
// Public query types for spec §4.4: the option bag a caller builds, the
// rows an executed query returns, and the staleness policy that gates
// whether `update` runs before the scan.

mod executor;
mod planner;

pub use executor::execute;
pub(crate) use planner::plan;

use serde_json::Value;

/// `'ok'` / `'update_after'` / anything else (spec §4.4's `stale` row).
/// The default, `Update`, is "update-then-query".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleMode {
    /// Serve whatever the index currently holds; never run `update`.
    Ok,
    /// Serve the current index state, then kick off `update` in the
    /// background so the *next* query sees fresh data.
    UpdateAfter,
    /// Run `update` to completion before scanning (the default).
    #[default]
    Update,
}

/// Identifies a view to query: either a reference to a registered
/// persisted view (the `_design/<n>/_view/<v>` lookup path from spec
/// §1), or an inline `{map, reduce?}` pair evaluated without ever being
/// registered - spec §6's "temporary view" half of `query(viewSpec, ..)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewSpec {
    Persisted { design_doc: String, view_name: String },
    Inline { map_src: String, reduce_src: Option<String> },
}

impl ViewSpec {
    pub fn new(design_doc: impl Into<String>, view_name: impl Into<String>) -> Self {
        ViewSpec::Persisted { design_doc: design_doc.into(), view_name: view_name.into() }
    }

    /// A temporary view: never looked up in, or written to, a view
    /// registration table - its `ViewSignature` is built directly from
    /// the sources given here.
    pub fn inline(map_src: impl Into<String>, reduce_src: Option<String>) -> Self {
        ViewSpec::Inline { map_src: map_src.into(), reduce_src }
    }

    /// `_design/<n>/_view/<v>`, for `Persisted` only - an inline view has
    /// no registration name to qualify.
    pub fn qualified_name(&self) -> Option<String> {
        match self {
            ViewSpec::Persisted { design_doc, view_name } => Some(format!("{design_doc}/{view_name}")),
            ViewSpec::Inline { .. } => None,
        }
    }
}

/// The option bag from spec §4.4's table. `Default` matches an
/// unqualified query: full range, ascending, no pagination, reduce if
/// a reducer is configured, update-then-query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub startkey: Option<Value>,
    pub endkey: Option<Value>,
    pub key: Option<Value>,
    pub keys: Option<Vec<Value>>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub skip: usize,
    pub include_docs: bool,
    /// `None` means "use the reducer if the view has one"; `Some(false)`
    /// forces a map-only result even when a reducer is configured.
    pub reduce: Option<bool>,
    pub group: bool,
    /// Full numeric `group_level` is out of scope (spec §4.4); `true`
    /// collapses to full-key grouping, anything else is ignored.
    pub group_level: Option<usize>,
    pub stale: StaleMode,
}

/// One output row. Reduced rows never carry `id`/`doc` - a group has no
/// single originating document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub id: Option<String>,
    pub key: Value,
    pub value: Value,
    pub doc: Option<Value>,
}

/// `total_rows`/`offset` follow CouchDB's persisted-view shape: the size
/// of the whole view and how many of its rows were skipped before the
/// first returned row. Spec §9's open question resolves the reduce path
/// to carry neither, uniformly - they're `None` whenever reduction ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<ResultRow>,
    pub total_rows: Option<usize>,
    pub offset: Option<usize>,
}
