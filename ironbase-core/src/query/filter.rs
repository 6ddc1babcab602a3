// query/filter.rs
// Filter grammar (§4.6.1): a field selector -> predicate map where a
// predicate is either a bare literal (implicit `$eq`) or an object of
// operator -> operand. Top-level fields combine with implicit AND; there is
// deliberately no `$and`/`$or` in this revision.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;

use crate::value_utils::{compare_values, get_nested_value};

const OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$regex", "$exists",
];

const REGEX_CACHE_CAPACITY: usize = 256;

lazy_static! {
    static ref REGEX_CACHE: Mutex<LruCache<String, Option<Arc<Regex>>>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap()));
}

/// Compiles `pattern` once and reuses it across calls; a pattern that fails
/// to compile is cached as `None` so a malformed `$regex` isn't recompiled
/// on every evaluation either.
fn compiled_regex(pattern: &str) -> Option<Arc<Regex>> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(hit) = cache.get(pattern) {
        return hit.clone();
    }
    let compiled = Regex::new(pattern).ok().map(Arc::new);
    cache.put(pattern.to_string(), compiled.clone());
    compiled
}

fn is_predicate_object(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => !map.is_empty() && map.keys().all(|k| OPERATORS.contains(&k.as_str())),
        None => false,
    }
}

/// Does `doc` satisfy every field predicate in `filter`? An empty filter
/// matches everything (the FULL SCAN no-op case).
pub fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let filter = match filter.as_object() {
        Some(map) => map,
        None => return true,
    };
    filter
        .iter()
        .all(|(field, predicate)| match_field(doc, field, predicate))
}

fn match_field(doc: &Value, field: &str, predicate: &Value) -> bool {
    let actual = get_nested_value(doc, field);
    if is_predicate_object(predicate) {
        let ops = predicate.as_object().unwrap();
        ops.iter().all(|(op, operand)| match_operator(op, actual, operand))
    } else {
        match_operator("$eq", actual, predicate)
    }
}

fn match_operator(op: &str, actual: Option<&Value>, operand: &Value) -> bool {
    match op {
        "$eq" => actual == Some(operand),
        "$ne" => actual != Some(operand),
        "$gt" => actual
            .zip(Some(operand))
            .and_then(|(a, b)| compare_values(a, b))
            .map(|o| o.is_gt())
            .unwrap_or(false),
        "$gte" => actual
            .zip(Some(operand))
            .and_then(|(a, b)| compare_values(a, b))
            .map(|o| o.is_ge())
            .unwrap_or(false),
        "$lt" => actual
            .zip(Some(operand))
            .and_then(|(a, b)| compare_values(a, b))
            .map(|o| o.is_lt())
            .unwrap_or(false),
        "$lte" => actual
            .zip(Some(operand))
            .and_then(|(a, b)| compare_values(a, b))
            .map(|o| o.is_le())
            .unwrap_or(false),
        "$in" => match (actual, operand.as_array()) {
            (Some(a), Some(list)) => list.contains(a),
            _ => false,
        },
        "$nin" => match (actual, operand.as_array()) {
            (Some(a), Some(list)) => !list.contains(a),
            (None, Some(_)) => true,
            _ => false,
        },
        "$regex" => match (actual.and_then(Value::as_str), operand.as_str()) {
            (Some(s), Some(pattern)) => compiled_regex(pattern).map(|re| re.is_match(s)).unwrap_or(false),
            _ => false,
        },
        "$exists" => {
            let want = operand.as_bool().unwrap_or(true);
            actual.is_some() == want
        }
        _ => false,
    }
}
