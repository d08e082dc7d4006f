// src/lib.rs
// An incremental map/reduce view engine over an ordered-key document
// store: given a source database with a change feed and a map/reduce
// view definition, this crate maintains a secondary index and serves
// range/group/reduce queries against it (spec §1-§2).

pub mod collation;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod index_handle;
pub mod logging;
pub mod memory_source;
pub mod query;
pub mod reduce;
pub mod registry;
pub mod source;
pub mod task_queue;
pub mod updater;

pub use config::EngineConfig;
pub use engine::ViewEngine;
pub use error::{Result, ViewError};
pub use eval::{MapReduceEvaluator, NativeEvaluator};
pub use query::{QueryOptions, QueryResult, ResultRow, StaleMode, ViewSpec};
pub use registry::SecondaryStoreFactory;
pub use source::{SecondaryStore, SourceDatabase, ViewSignature};
