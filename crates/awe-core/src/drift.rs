//! Structural comparison and drift scoring over JSON values.
//!
//! Drift is a per-value dissimilarity in `[0, 1]`, defined recursively:
//!
//! - numbers: relative difference `|a - e| / |e|`, capped at 1
//! - strings: Levenshtein distance over chars, divided by the longer length
//! - objects: mean over the union of keys; a key on only one side scores 1
//! - arrays: mean over positions; a position on only one side scores 1
//! - bool / null: 0 when equal, 1 otherwise
//! - differing JSON types: 1

use std::collections::BTreeSet;

use serde_json::{Map, Number, Value};

fn as_f64(n: &Number) -> f64 {
    // Finite for every number serde_json can parse.
    n.as_f64().unwrap_or(f64::NAN)
}

fn numbers_equal(a: &Number, b: &Number, tolerance: f64) -> bool {
    (as_f64(a) - as_f64(b)).abs() <= tolerance
}

/// Type-aware structural equality. Numbers match within `tolerance`
/// (absolute); strings, bools and null match exactly.
pub fn structurally_equal(a: &Value, b: &Value, tolerance: f64) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y, tolerance),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.get(k)
                        .is_some_and(|w| structurally_equal(v, w, tolerance))
                })
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y)
                    .all(|(v, w)| structurally_equal(v, w, tolerance))
        }
        _ => a == b,
    }
}

/// Edit distance between two strings, counted in chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    if a.is_empty() {
        return n;
    }
    if n == 0 {
        return a.len();
    }

    // prev[j] = distance between a[0..i-1] and b[0..j]
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=n {
            let substitution = prev[j - 1] + usize::from(a[i - 1] != b[j - 1]);
            curr[j] = substitution.min(prev[j] + 1).min(curr[j - 1] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

fn numeric_drift(expected: f64, actual: f64, tolerance: f64) -> f64 {
    let diff = (actual - expected).abs();
    if diff <= tolerance {
        return 0.0;
    }
    if expected.abs() <= tolerance {
        return 1.0;
    }
    (diff / expected.abs()).min(1.0)
}

fn string_drift(expected: &str, actual: &str) -> f64 {
    if expected == actual {
        return 0.0;
    }
    let longest = expected.chars().count().max(actual.chars().count());
    levenshtein(expected, actual) as f64 / longest as f64
}

fn array_drift(expected: &[Value], actual: &[Value], tolerance: f64) -> f64 {
    let len = expected.len().max(actual.len());
    if len == 0 {
        return 0.0;
    }
    let total: f64 = (0..len)
        .map(|i| match (expected.get(i), actual.get(i)) {
            (Some(e), Some(a)) => value_drift(e, a, tolerance),
            _ => 1.0,
        })
        .sum();
    total / len as f64
}

fn map_drift(expected: &Map<String, Value>, actual: &Map<String, Value>, tolerance: f64) -> f64 {
    let keys: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
    if keys.is_empty() {
        return 0.0;
    }
    let total: f64 = keys
        .iter()
        .map(|k| match (expected.get(*k), actual.get(*k)) {
            (Some(e), Some(a)) => value_drift(e, a, tolerance),
            _ => 1.0,
        })
        .sum();
    total / keys.len() as f64
}

/// Dissimilarity between one expected and one actual value, in `[0, 1]`.
pub fn value_drift(expected: &Value, actual: &Value, tolerance: f64) -> f64 {
    let drift = match (expected, actual) {
        (Value::Number(e), Value::Number(a)) => numeric_drift(as_f64(e), as_f64(a), tolerance),
        (Value::String(e), Value::String(a)) => string_drift(e, a),
        (Value::Object(e), Value::Object(a)) => map_drift(e, a, tolerance),
        (Value::Array(e), Value::Array(a)) => array_drift(e, a, tolerance),
        (e, a) if e == a => 0.0,
        _ => 1.0,
    };
    if drift.is_nan() {
        1.0
    } else {
        drift.clamp(0.0, 1.0)
    }
}

/// Mean per-key drift between two output mappings, clamped to `[0, 1]`.
///
/// Two empty mappings have no drift.
pub fn output_drift(
    expected: &Map<String, Value>,
    actual: &Map<String, Value>,
    tolerance: f64,
) -> f64 {
    map_drift(expected, actual, tolerance).clamp(0.0, 1.0)
}
