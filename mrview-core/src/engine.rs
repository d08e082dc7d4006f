// src/engine.rs
// The public `ViewEngine` facade: design-document lookup, registration,
// and the `query`/`removeIndex` operations, all serialized through the
// task queue per spec §4.6. Grounded on `DatabaseCore`'s role in
// `ironbase-core/src/database.rs` as the single entry point that owns a
// registry and hands out handles on demand.

use crate::config::EngineConfig;
use crate::error::{Result, ViewError};
use crate::eval::MapReduceEvaluator;
use crate::query::{self, QueryOptions, QueryResult, StaleMode, ViewSpec};
use crate::registry::{SecondaryStoreFactory, ViewRegistry};
use crate::source::{SecondaryStore, SourceDatabase, ViewSignature};
use crate::task_queue::TaskQueue;
use crate::updater;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Ties a source database, a map/reduce evaluator, and a secondary
/// store factory together behind one process-wide task queue (spec §3).
pub struct ViewEngine<D: SourceDatabase + 'static, S: SecondaryStore + 'static, F: SecondaryStoreFactory<S> + 'static> {
    source: Arc<D>,
    evaluator: Arc<dyn MapReduceEvaluator>,
    registry: Arc<ViewRegistry<S, F>>,
    task_queue: TaskQueue,
    config: EngineConfig,
    /// `_design/<n>/_view/<v>` -> `{map, reduce}`, per spec §1's "trivial
    /// fetch" - an in-memory registration table, not a persisted store.
    views: RwLock<HashMap<String, ViewSignature>>,
}

impl<D: SourceDatabase + 'static, S: SecondaryStore + 'static, F: SecondaryStoreFactory<S> + 'static> ViewEngine<D, S, F> {
    pub fn new(source: Arc<D>, evaluator: Arc<dyn MapReduceEvaluator>, factory: F, config: EngineConfig) -> Self {
        let db_name = source.db_name().to_string();
        ViewEngine {
            source,
            evaluator,
            registry: Arc::new(ViewRegistry::new(db_name, factory)),
            task_queue: TaskQueue::new(config.lane_capacity),
            config,
            views: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or overwrite) the `{map, reduce}` pair a view resolves
    /// to. Does not touch any secondary store - the backing index is
    /// opened lazily on first `query`.
    pub fn register_view(&self, design_doc: &str, view_name: &str, def: ViewSignature) {
        let spec = ViewSpec::new(design_doc, view_name);
        let name = spec.qualified_name().expect("Persisted spec always has a qualified_name");
        self.views.write().insert(name, def);
    }

    /// `Persisted` looks up a registered `{map, reduce}` pair by name;
    /// `Inline` needs no lookup at all - its signature is the view spec
    /// itself, never written to `self.views`.
    fn resolve(&self, view_spec: &ViewSpec) -> Result<ViewSignature> {
        match view_spec {
            ViewSpec::Persisted { .. } => {
                let name = view_spec.qualified_name().expect("Persisted spec always has a qualified_name");
                self.views.read().get(&name).cloned().ok_or_else(|| ViewError::NotFound(format!("no view registered as {name}")))
            }
            ViewSpec::Inline { map_src, reduce_src } => Ok(match reduce_src {
                Some(r) => ViewSignature::with_reduce(map_src.clone(), r.clone()),
                None => ViewSignature::map_only(map_src.clone()),
            }),
        }
    }

    /// Run `options.stale`'s update policy, then scan, as a single task
    /// on the process-wide queue (spec §4.6). `stale = 'update_after'`
    /// scans the current state and schedules a background `update` for
    /// the next caller to benefit from.
    pub fn query(&self, view_spec: ViewSpec, options: QueryOptions) -> Result<QueryResult> {
        let signature = self.resolve(&view_spec)?;
        let source = Arc::clone(&self.source);
        let evaluator = Arc::clone(&self.evaluator);
        let registry = Arc::clone(&self.registry);
        let stale = effective_stale(&options, &self.config);
        let include_docs = options.include_docs;

        let task_queue_for_followup = if stale == StaleMode::UpdateAfter { Some(&self.task_queue) } else { None };

        let result = self.task_queue.submit({
            let signature = signature.clone();
            let source = Arc::clone(&source);
            let evaluator = Arc::clone(&evaluator);
            let registry = Arc::clone(&registry);
            move || -> Result<(QueryResult, Arc<crate::index_handle::IndexHandle<S>>)> {
                let handle = registry.get_index(&signature)?;
                if stale == StaleMode::Update {
                    updater::update(&*handle, &*source, &*evaluator)?;
                }
                let plan = query::plan(&options, signature.reduce().is_some())?;
                let result = {
                    let store = handle.store.lock();
                    query::execute(plan, &handle.signature, &*store, &*source, &*evaluator, include_docs)?
                };
                Ok((result, handle))
            }
        })?;

        let (result, handle) = result;

        if let Some(queue) = task_queue_for_followup {
            queue.submit_detached(move || {
                if let Err(err) = updater::update(&*handle, &*source, &*evaluator) {
                    crate::log_warn!("background update for {} failed: {}", handle.name, err);
                }
            });
        }

        Ok(result)
    }

    /// `removeIndex`: tear down the backing secondary store. Serialized
    /// through the queue's global lane so it can never interleave with
    /// an in-flight `updateIndex`/`queryIndex` for the same index.
    pub fn remove_index(&self, view_spec: ViewSpec) -> Result<()> {
        let signature = self.resolve(&view_spec)?;
        let registry = Arc::clone(&self.registry);
        self.task_queue.submit(move || registry.remove_index(&signature))
    }
}

fn effective_stale(options: &QueryOptions, config: &EngineConfig) -> StaleMode {
    if options.stale == StaleMode::default() {
        config.default_stale
    } else {
        options.stale
    }
}
