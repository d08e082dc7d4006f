// src/collation.rs
// CouchDB-compatible collation and the composite indexable-key codec.
// Grounded on the type-precedence `Ord` scheme in the teacher's
// `index.rs` (`IndexKey`/`OrderedFloat`), generalized from a closed set
// of scalar variants to the full JSON value domain arrays and objects
// included, and retargeted from an in-memory `Ord` impl to a byte
// encoding since the secondary store only ever compares byte strings.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Type-precedence rank, ascending: null < false < true < number < string < array < object.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Canonicalize a JSON value for indexing: NaN/Infinity collapse to
/// `null` (serde_json already refuses to represent them, but a value
/// built from a raw arithmetic `f64` route can carry a `-0.0` that
/// needs collapsing to `0`), and the transform recurses into
/// arrays/objects. Idempotent by construction: every branch either
/// returns an already-canonical leaf or recurses into `normalize_key`
/// again.
pub fn normalize_key(v: &Value) -> Value {
    match v {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f == 0.0 {
                    return Value::Number(Number::from(0));
                }
            }
            Value::Number(n.clone())
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_key).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_key(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Total order over JSON values matching CouchDB collation.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.chars().cmp(y.chars()),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = collate(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        // `{}` is the maximal object in its type class (spec §4.4's
        // upper-bound trick depends on this) - the opposite of the
        // array arm, where the shorter prefix sorts first.
        (Value::Object(x), Value::Object(y)) => match (x.is_empty(), y.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                // Insertion order of the emitting map, per spec §4.1 - not
                // sorted. `serde_json`'s `preserve_order` feature keeps
                // that order for us.
                for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                    let kord = xk.chars().cmp(yk.chars());
                    if kord != Ordering::Equal {
                        return kord;
                    }
                    let vord = collate(xv, yv);
                    if vord != Ordering::Equal {
                        return vord;
                    }
                }
                x.len().cmp(&y.len())
            }
        },
        _ => unreachable!("type_rank equal but variant mismatch"),
    }
}

/// The maximal object sentinel used to build "anything greater than
/// any prefix" upper bounds in the query planner (spec §4.4).
pub fn max_object() -> Value {
    Value::Object(Map::new())
}

fn encode_string(s: &str, buf: &mut Vec<u8>) {
    for byte in s.as_bytes() {
        if *byte == 0 {
            buf.push(0);
            buf.push(0xFF);
        } else {
            buf.push(*byte);
        }
    }
    buf.push(0);
    buf.push(0);
}

/// Order-preserving sign-magnitude encoding of an IEEE-754 double: flip
/// the sign bit for positives, invert every bit for negatives. Two
/// doubles then compare the same way as their big-endian byte strings.
fn encode_f64(n: f64) -> [u8; 8] {
    let bits = n.to_bits();
    let t = if (bits >> 63) == 1 { !bits } else { bits | 0x8000_0000_0000_0000 };
    t.to_be_bytes()
}

fn encode_value(v: &Value, buf: &mut Vec<u8>) {
    match v {
        Value::Null => buf.push(1),
        Value::Bool(false) => buf.push(2),
        Value::Bool(true) => buf.push(3),
        Value::Number(n) => {
            buf.push(4);
            buf.extend_from_slice(&encode_f64(n.as_f64().unwrap_or(0.0)));
        }
        Value::String(s) => {
            buf.push(5);
            encode_string(s, buf);
        }
        Value::Array(items) => {
            buf.push(6);
            for item in items {
                encode_value(item, buf);
            }
            buf.push(0);
        }
        Value::Object(map) => {
            buf.push(7);
            if map.is_empty() {
                // 0xFF never opens a valid UTF-8 string, so it can't
                // collide with a real key's first byte - safe sentinel
                // for "the maximal object", matching `collate`'s
                // empty-object-sorts-last rule above.
                buf.push(0xFF);
            } else {
                for (k, v) in map {
                    encode_string(k, buf);
                    encode_value(v, buf);
                }
                buf.push(0);
            }
        }
    }
}

/// Encode a (already-normalized) JSON value to a byte string whose
/// lexicographic order matches [`collate`]. The encoding is opaque and
/// never decoded back by this crate — the composite key only needs to
/// sort correctly, the fields it represents are stored separately in
/// the key/value record's `value` payload.
pub fn to_indexable_string(v: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value(v, &mut buf);
    buf
}

/// The composite indexable key for one emitted row, per spec §4.1:
/// `toIndexableString([key, docId, value, emitIndex])`.
pub fn composite_key(key: &Value, doc_id: &str, value: &Value, emit_index: usize) -> Vec<u8> {
    let tuple = Value::Array(vec![
        normalize_key(key),
        Value::String(doc_id.to_string()),
        normalize_key(value),
        Value::Number(Number::from(emit_index as u64)),
    ]);
    to_indexable_string(&tuple)
}

/// Lower bound in composite-key space for a logical key bound: `[b]`
/// collates before any `[b, docId, ...]` because a 1-element array is a
/// prefix of, and therefore less than, any longer array sharing that
/// prefix (spec §4.4).
pub fn lower_bound(key: &Value) -> Vec<u8> {
    to_indexable_string(&Value::Array(vec![normalize_key(key)]))
}

/// Upper bound in composite-key space: `[b, {}, {}, {}]` collates after
/// any `[b, anyId, anyValue, anyEmitIdx]` because the empty object is
/// the maximal value in every type class above it (spec §4.4).
pub fn upper_bound(key: &Value) -> Vec<u8> {
    to_indexable_string(&Value::Array(vec![
        normalize_key(key),
        max_object(),
        max_object(),
        max_object(),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_collation_matches_bytes(a: &Value, b: &Value) {
        let collate_ord = collate(a, b);
        let bytes_ord = to_indexable_string(&normalize_key(a)).cmp(&to_indexable_string(&normalize_key(b)));
        assert_eq!(
            collate_ord, bytes_ord,
            "collate({a:?}, {b:?}) = {collate_ord:?} but byte comparison = {bytes_ord:?}"
        );
    }

    #[test]
    fn type_precedence_order() {
        let ladder = vec![
            json!(null),
            json!(false),
            json!(true),
            json!(-5),
            json!(0),
            json!(3.5),
            json!("apple"),
            json!("banana"),
            json!([1, 2]),
            json!([1, 2, 3]),
            json!({"a": 1}),
        ];
        for w in ladder.windows(2) {
            assert_eq!(collate(&w[0], &w[1]), Ordering::Less, "{:?} should be < {:?}", w[0], w[1]);
            assert_collation_matches_bytes(&w[0], &w[1]);
        }
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(collate(&json!(1), &json!(2)), Ordering::Less);
        assert_eq!(collate(&json!(-1), &json!(1)), Ordering::Less);
        assert_eq!(collate(&json!(1.5), &json!(1.50)), Ordering::Equal);
        assert_collation_matches_bytes(&json!(-100), &json!(100));
        assert_collation_matches_bytes(&json!(-0.5), &json!(0.5));
    }

    #[test]
    fn negative_zero_normalizes_to_zero() {
        let neg_zero = json!(-0.0);
        let zero = json!(0);
        assert_eq!(normalize_key(&neg_zero), normalize_key(&zero));
        assert_eq!(collate(&neg_zero, &zero), Ordering::Equal);
    }

    #[test]
    fn normalize_key_is_idempotent() {
        let values = vec![
            json!(-0.0),
            json!([1, -0.0, {"x": -0.0}]),
            json!({"a": [1,2], "b": null}),
            json!("plain string"),
        ];
        for v in values {
            let once = normalize_key(&v);
            let twice = normalize_key(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn strings_compare_by_code_point() {
        assert_eq!(collate(&json!("a"), &json!("b")), Ordering::Less);
        assert_eq!(collate(&json!("Z"), &json!("a")), Ordering::Less); // 'Z' (0x5A) < 'a' (0x61)
        assert_collation_matches_bytes(&json!("abc"), &json!("abd"));
    }

    #[test]
    fn arrays_compare_lexicographically_then_by_length() {
        assert_eq!(collate(&json!([1, 2]), &json!([1, 2, 0])), Ordering::Less);
        assert_eq!(collate(&json!([1, 3]), &json!([1, 2, 9])), Ordering::Greater);
        assert_collation_matches_bytes(&json!([1, 2]), &json!([1, 2, 0]));
    }

    #[test]
    fn empty_object_is_the_maximal_object() {
        let empty = json!({});
        let nonempty = json!({"a": 1});
        assert_eq!(collate(&empty, &nonempty), Ordering::Greater);
        assert_eq!(collate(&nonempty, &empty), Ordering::Less);
        assert_eq!(collate(&empty, &json!({})), Ordering::Equal);
        assert_collation_matches_bytes(&empty, &nonempty);
    }

    #[test]
    fn objects_compare_by_insertion_order_pairs() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 1, "b": 2});
        // "b" > "a" as the first key compared in insertion order.
        assert_eq!(collate(&a, &b), Ordering::Greater);
        assert_collation_matches_bytes(&a, &b);
    }

    #[test]
    fn composite_key_orders_by_key_then_docid_then_value() {
        let k1 = composite_key(&json!("a"), "doc1", &json!(1), 0);
        let k2 = composite_key(&json!("a"), "doc2", &json!(0), 0);
        let k3 = composite_key(&json!("b"), "doc0", &json!(0), 0);
        assert!(k1 < k2, "same key, docId breaks the tie");
        assert!(k2 < k3, "key is the primary sort");
    }

    #[test]
    fn composite_key_distinguishes_repeated_emits() {
        let k1 = composite_key(&json!("a"), "doc1", &json!(1), 0);
        let k2 = composite_key(&json!("a"), "doc1", &json!(1), 1);
        assert_ne!(k1, k2);
        assert!(k1 < k2);
    }

    #[test]
    fn range_bounds_bracket_matching_composite_keys() {
        let lo = lower_bound(&json!("b"));
        let hi = upper_bound(&json!("b"));
        let inside = composite_key(&json!("b"), "anything", &json!({"nested": true}), 7);
        assert!(lo < inside, "lower bound must sort before any [b, ...]");
        assert!(inside < hi, "upper bound must sort after any [b, ...]");

        let before = composite_key(&json!("a"), "z", &json!(null), 0);
        let after = composite_key(&json!("c"), "a", &json!(null), 0);
        assert!(before < lo);
        assert!(after > hi);
    }

    #[test]
    fn fuzz_like_random_pairs_agree_with_bytes() {
        let samples = vec![
            json!(null), json!(true), json!(false), json!(0), json!(-1), json!(1e10),
            json!(""), json!("x"), json!([]), json!([null]), json!({}), json!({"z": 1}),
        ];
        for a in &samples {
            for b in &samples {
                assert_collation_matches_bytes(a, b);
            }
        }
    }
}
