use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mrview_core::logging::{set_log_level, LogLevel};
use mrview_core::memory_source::{MemorySecondaryStore, MemorySourceDatabase};
use mrview_core::registry::SecondaryStoreFactory;
use mrview_core::{EngineConfig, NativeEvaluator, QueryOptions, ViewEngine, ViewSignature, ViewSpec};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mrview")]
#[command(about = "mrview CLI - drive an incremental map/reduce view over a JSON document set")]
#[command(version)]
struct Cli {
    /// ERROR, WARN, INFO, DEBUG, or TRACE.
    #[arg(long, global = true, default_value = "INFO")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a view over a JSON document set and print the result rows.
    Query {
        /// JSON file: an array of documents, each needing an `_id` field.
        data: PathBuf,
        /// Map function name (see `mrview list-maps`), e.g. `group:status`.
        #[arg(long)]
        map: String,
        /// Reducer: `_sum`, `_count`, or `_stats`.
        #[arg(long)]
        reduce: Option<String>,
        /// JSON-literal lower bound on the emitted key.
        #[arg(long)]
        startkey: Option<String>,
        /// JSON-literal upper bound on the emitted key.
        #[arg(long)]
        endkey: Option<String>,
        /// JSON-literal exact key (shorthand for startkey = endkey = key).
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        descending: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        /// Group rows by key before reducing.
        #[arg(long)]
        group: bool,
        /// Force map-only output even if a reducer is given.
        #[arg(long)]
        no_reduce: bool,
        /// Attach the source document to each row.
        #[arg(long)]
        include_docs: bool,
    },
    /// List the built-in map function patterns the CLI understands.
    ListMaps,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(level) = LogLevel::from_str(&cli.log_level) {
        set_log_level(level);
    }

    match cli.command {
        Commands::Query { data, map, reduce, startkey, endkey, key, descending, limit, skip, group, no_reduce, include_docs } => {
            run_query(&data, &map, reduce, startkey, endkey, key, descending, limit, skip, group, no_reduce, include_docs)
        }
        Commands::ListMaps => {
            print_map_catalog();
            Ok(())
        }
    }
}

fn print_map_catalog() {
    println!("Built-in map functions:");
    println!("  id                     emit(doc._id, doc)");
    println!("  group:<field>          emit(doc[field], 1)");
    println!("  group-sum:<f>:<numf>   emit(doc[f], doc[numf])");
}

/// Parse a `--map` argument into a closure. Mirrors the registered-native-
/// function strategy `NativeEvaluator` is built around: the literal string
/// the user passes on the command line doubles as the view's `mapSrc`.
fn build_map(spec: &str) -> Result<mrview_core::eval::MapFn> {
    if spec == "id" {
        return Ok(Arc::new(|doc, emit| emit(doc["_id"].clone(), doc.clone())));
    }
    if let Some(field) = spec.strip_prefix("group:") {
        let field = field.to_string();
        return Ok(Arc::new(move |doc, emit| emit(doc[field.as_str()].clone(), Value::from(1))));
    }
    if let Some(rest) = spec.strip_prefix("group-sum:") {
        let (key_field, num_field) = rest.split_once(':').with_context(|| format!("group-sum needs <field>:<numfield>, got {rest:?}"))?;
        let (key_field, num_field) = (key_field.to_string(), num_field.to_string());
        return Ok(Arc::new(move |doc, emit| emit(doc[key_field.as_str()].clone(), doc[num_field.as_str()].clone())));
    }
    bail!("unknown map function {spec:?}; see `mrview list-maps`")
}

fn parse_json_arg(name: &str, raw: &Option<String>) -> Result<Option<Value>> {
    raw.as_deref().map(|s| serde_json::from_str(s).with_context(|| format!("--{name} is not valid JSON: {s:?}"))).transpose()
}

struct TransientFactory;

impl SecondaryStoreFactory<MemorySecondaryStore> for TransientFactory {
    fn open_or_create(&self, _name: &str) -> mrview_core::Result<MemorySecondaryStore> {
        Ok(MemorySecondaryStore::new())
    }
    fn destroy(&self, _name: &str) -> mrview_core::Result<()> {
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn run_query(
    data: &Path,
    map: &str,
    reduce: Option<String>,
    startkey: Option<String>,
    endkey: Option<String>,
    key: Option<String>,
    descending: bool,
    limit: Option<usize>,
    skip: usize,
    group: bool,
    no_reduce: bool,
    include_docs: bool,
) -> Result<()> {
    let content = fs::read_to_string(data).with_context(|| format!("failed to read {}", data.display()))?;
    let docs: Vec<Value> = serde_json::from_str(&content).with_context(|| format!("{} must contain a JSON array of documents", data.display()))?;

    let source = Arc::new(MemorySourceDatabase::new(data.to_string_lossy().into_owned()));
    for doc in &docs {
        let id = doc.get("_id").and_then(Value::as_str).with_context(|| "every document needs a string _id field")?;
        source.put(id, doc.clone());
    }

    let map_fn = build_map(map)?;
    let evaluator = NativeEvaluator::new();
    evaluator.register_map(map, map_fn);

    let signature = match &reduce {
        Some(r) => ViewSignature::with_reduce(map, r.as_str()),
        None => ViewSignature::map_only(map),
    };

    let engine = ViewEngine::new(Arc::clone(&source), Arc::new(evaluator), TransientFactory, EngineConfig::default());
    engine.register_view("cli", "view", signature);

    let options = QueryOptions {
        startkey: parse_json_arg("startkey", &startkey)?,
        endkey: parse_json_arg("endkey", &endkey)?,
        key: parse_json_arg("key", &key)?,
        keys: None,
        descending,
        limit,
        skip,
        include_docs,
        reduce: if no_reduce { Some(false) } else { None },
        group,
        group_level: None,
        stale: mrview_core::StaleMode::Update,
    };

    let result = engine.query(ViewSpec::new("cli", "view"), options)?;

    let rendered: Vec<Value> = result
        .rows
        .into_iter()
        .map(|row| {
            let mut obj = serde_json::Map::new();
            if let Some(id) = row.id {
                obj.insert("id".into(), Value::String(id));
            }
            obj.insert("key".into(), row.key);
            obj.insert("value".into(), row.value);
            if let Some(doc) = row.doc {
                obj.insert("doc".into(), doc);
            }
            Value::Object(obj)
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&rendered)?);
    if let Some(total) = result.total_rows {
        println!("{} row(s) ({} total, offset {})", rendered.len(), total, result.offset.unwrap_or(0));
    } else {
        println!("{} row(s)", rendered.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_map_rejects_unknown_names() {
        assert!(build_map("nope").is_err());
    }

    #[test]
    fn build_map_group_sum_requires_two_fields() {
        assert!(build_map("group-sum:onlyone").is_err());
    }

    #[test]
    fn parse_json_arg_passes_through_none() {
        assert_eq!(parse_json_arg("key", &None).unwrap(), None);
    }

    #[test]
    fn parse_json_arg_rejects_bad_json() {
        assert!(parse_json_arg("key", &Some("{not json".into())).is_err());
    }
}
