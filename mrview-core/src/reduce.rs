// src/reduce.rs
// Grouper and reducer (spec §4.5), plus the built-in reducers
// (`_sum`/`_count`/`_stats`). The group-by-equal-keys walk mirrors
// `ironbase-core/src/aggregation.rs`'s `GroupStage::execute` (bucket
// documents by key, then run one accumulator per bucket); the
// accumulator bodies themselves follow `Accumulator::compute`'s
// numeric-accumulation style.

use crate::collation::collate;
use crate::eval::MapReduceEvaluator;
use crate::error::Result;
use crate::source::ReduceSrc;
use serde_json::Value;
use std::cmp::Ordering;

/// A scan result row with everything the grouper needs (spec §4.5).
#[derive(Debug, Clone)]
pub struct MaterializedRow {
    pub id: String,
    pub key: Value,
    pub value: Value,
    pub reduce_output: Option<Value>,
}

/// A maximal run of collation-equal keys (ungrouped: the whole scan is one group, key = null).
#[derive(Debug, Clone)]
pub struct Group {
    pub key: Option<Value>,
    pub rows: Vec<MaterializedRow>,
}

/// Walk `rows` (already in collated key order) into groups.
pub fn group_rows(rows: Vec<MaterializedRow>, grouped: bool) -> Vec<Group> {
    if !grouped {
        return if rows.is_empty() {
            Vec::new()
        } else {
            vec![Group { key: None, rows }]
        };
    }

    let mut groups: Vec<Group> = Vec::new();
    for row in rows {
        let extend = match groups.last() {
            Some(g) => collate(g.key.as_ref().unwrap(), &row.key) == Ordering::Equal,
            None => false,
        };
        if extend {
            groups.last_mut().unwrap().rows.push(row);
        } else {
            groups.push(Group { key: Some(row.key.clone()), rows: vec![row] });
        }
    }
    groups
}

/// Reduce one group to its final `(key, value)` output row, per the
/// three-tier rule in spec §4.5.
pub fn reduce_group(group: &Group, reduce_src: &ReduceSrc, evaluator: &dyn MapReduceEvaluator) -> Result<Value> {
    if group.rows.len() == 1 {
        if let Some(out) = &group.rows[0].reduce_output {
            return Ok(out.clone());
        }
    }

    let all_have_outputs = !group.rows.is_empty() && group.rows.iter().all(|r| r.reduce_output.is_some());
    if all_have_outputs {
        let outputs: Vec<Value> = group.rows.iter().map(|r| r.reduce_output.clone().unwrap()).collect();
        return evaluator.eval_reduce(reduce_src, None, &outputs, true);
    }

    let keys: Vec<Value> = group.rows.iter().map(|r| r.key.clone()).collect();
    let values: Vec<Value> = group.rows.iter().map(|r| r.value.clone()).collect();
    evaluator.eval_reduce(reduce_src, Some(&keys), &values, false)
}

pub mod builtin {
    use crate::error::{Result, ViewError};
    use crate::source::BuiltinReducer;
    use serde_json::{json, Value};

    pub fn reduce(which: BuiltinReducer, values: &[Value], rereduce: bool) -> Result<Value> {
        match which {
            BuiltinReducer::Sum => sum(values),
            BuiltinReducer::Count => count(values, rereduce),
            BuiltinReducer::Stats => stats(values, rereduce),
        }
    }

    fn as_number(v: &Value) -> Result<f64> {
        v.as_f64().ok_or_else(|| ViewError::InvalidValue(format!("_sum/_stats requires numeric values, got {v}")))
    }

    /// `Σ values`. A value that is itself an array sums component-wise
    /// (ragged arrays are padded with zero on the short side, per
    /// spec §4.5's "a proper implementation MAY extend").
    fn sum(values: &[Value]) -> Result<Value> {
        if values.iter().any(|v| v.is_array()) {
            let mut acc: Vec<f64> = Vec::new();
            for v in values {
                match v {
                    Value::Array(items) => {
                        if items.len() > acc.len() {
                            acc.resize(items.len(), 0.0);
                        }
                        for (i, item) in items.iter().enumerate() {
                            acc[i] += as_number(item)?;
                        }
                    }
                    other => {
                        if acc.is_empty() {
                            acc.push(0.0);
                        }
                        acc[0] += as_number(other)?;
                    }
                }
            }
            return Ok(Value::Array(acc.into_iter().map(|n| json!(n)).collect()));
        }

        let mut total = 0.0;
        for v in values {
            total += as_number(v)?;
        }
        Ok(json!(total))
    }

    /// `values.len()`, ignoring keys; rereduce sums the partial counts.
    fn count(values: &[Value], rereduce: bool) -> Result<Value> {
        if rereduce {
            let mut total: i64 = 0;
            for v in values {
                total += v
                    .as_i64()
                    .ok_or_else(|| ViewError::InvalidValue("_count rereduce expects integer partial counts".into()))?;
            }
            Ok(json!(total))
        } else {
            Ok(json!(values.len() as i64))
        }
    }

    #[derive(Debug, Clone, Copy)]
    struct Stats {
        sum: f64,
        min: f64,
        max: f64,
        count: i64,
        sumsqr: f64,
    }

    impl Stats {
        fn from_value(n: f64) -> Self {
            Stats { sum: n, min: n, max: n, count: 1, sumsqr: n * n }
        }

        fn combine(self, other: Stats) -> Stats {
            Stats {
                sum: self.sum + other.sum,
                min: self.min.min(other.min),
                max: self.max.max(other.max),
                count: self.count + other.count,
                sumsqr: self.sumsqr + other.sumsqr,
            }
        }

        fn to_value(self) -> Value {
            json!({
                "sum": self.sum,
                "min": self.min,
                "max": self.max,
                "count": self.count,
                "sumsqr": self.sumsqr,
            })
        }

        fn from_partial(v: &Value) -> Result<Self> {
            let get = |field: &str| -> Result<f64> {
                v.get(field)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| ViewError::InvalidValue(format!("_stats rereduce input missing numeric field {field:?}")))
            };
            Ok(Stats {
                sum: get("sum")?,
                min: get("min")?,
                max: get("max")?,
                count: v
                    .get("count")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ViewError::InvalidValue("_stats rereduce input missing integer count".into()))?,
                sumsqr: get("sumsqr")?,
            })
        }
    }

    fn stats(values: &[Value], rereduce: bool) -> Result<Value> {
        if values.is_empty() {
            return Err(ViewError::InvalidValue("_stats requires at least one value".into()));
        }

        let combined = if rereduce {
            let mut iter = values.iter();
            let mut acc = Stats::from_partial(iter.next().unwrap())?;
            for v in iter {
                acc = acc.combine(Stats::from_partial(v)?);
            }
            acc
        } else {
            let mut iter = values.iter();
            let mut acc = Stats::from_value(as_number(iter.next().unwrap())?);
            for v in iter {
                acc = acc.combine(Stats::from_value(as_number(v)?));
            }
            acc
        };

        Ok(combined.to_value())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn sum_of_scalars() {
            assert_eq!(sum(&[json!(1), json!(2), json!(3)]).unwrap(), json!(6.0));
        }

        #[test]
        fn sum_rejects_non_numeric() {
            let err = sum(&[json!(1), json!("x")]).unwrap_err();
            assert_eq!(err.name(), "invalid_value");
        }

        #[test]
        fn sum_component_wise_over_arrays() {
            let out = sum(&[json!([1, 2]), json!([3, 4, 5])]).unwrap();
            assert_eq!(out, json!([4.0, 6.0, 5.0]));
        }

        #[test]
        fn count_non_rereduce_counts_values() {
            assert_eq!(count(&[json!(1), json!(2)], false).unwrap(), json!(2));
        }

        #[test]
        fn count_rereduce_sums_partials() {
            assert_eq!(count(&[json!(2), json!(3)], true).unwrap(), json!(5));
        }

        #[test]
        fn stats_non_rereduce() {
            let out = stats(&[json!(1), json!(3)], false).unwrap();
            assert_eq!(out["sum"], json!(4.0));
            assert_eq!(out["min"], json!(1.0));
            assert_eq!(out["max"], json!(3.0));
            assert_eq!(out["count"], json!(2));
            assert_eq!(out["sumsqr"], json!(10.0));
        }

        #[test]
        fn stats_rereduce_combines_partials() {
            let p1 = json!({"sum": 4.0, "min": 1.0, "max": 3.0, "count": 2, "sumsqr": 10.0});
            let p2 = json!({"sum": 5.0, "min": 5.0, "max": 5.0, "count": 1, "sumsqr": 25.0});
            let out = stats(&[p1, p2], true).unwrap();
            assert_eq!(out["sum"], json!(9.0));
            assert_eq!(out["min"], json!(1.0));
            assert_eq!(out["max"], json!(5.0));
            assert_eq!(out["count"], json!(3));
            assert_eq!(out["sumsqr"], json!(35.0));
        }

        #[test]
        fn stats_rejects_non_numeric() {
            let err = stats(&[json!("x")], false).unwrap_err();
            assert_eq!(err.name(), "invalid_value");
        }

        #[test]
        fn reduce_rereduce_commute_for_sum() {
            // invariant 6: reduce(V) == rereduce(reduce(V1), reduce(V2))
            let v1 = vec![json!(1), json!(2)];
            let v2 = vec![json!(3), json!(4)];
            let whole: Vec<Value> = v1.iter().chain(v2.iter()).cloned().collect();
            let direct = sum(&whole).unwrap();
            let partial = vec![sum(&v1).unwrap(), sum(&v2).unwrap()];
            let via_rereduce = sum(&partial).unwrap();
            assert_eq!(direct, via_rereduce);
        }
    }
}
