// query/planner.rs
// Cost-based chooser between a full collection scan and a secondary-index
// lookup (§4.6.2). The index is only ever a pre-filter: whatever plan runs,
// the caller re-applies the full filter to each candidate document.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    FullScan,
    IndexEq { field: String, value: Value },
    IndexRange { field: String, start: Value, end: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub strategy: &'static str,
    pub field: Option<String>,
    pub estimated_cost: f64,
    pub selectivity: Option<f64>,
}

fn selectivity_for(predicate: &Value) -> f64 {
    match predicate.as_object() {
        None => 0.01, // bare literal == implicit $eq
        Some(ops) => {
            if ops.contains_key("$eq") {
                0.01
            } else if ops.contains_key("$ne") {
                0.99
            } else if ops.contains_key("$gt")
                || ops.contains_key("$gte")
                || ops.contains_key("$lt")
                || ops.contains_key("$lte")
            {
                0.30
            } else if let Some(list) = ops.get("$in").and_then(Value::as_array) {
                (0.05 * list.len() as f64).min(0.5)
            } else if ops.contains_key("$regex") {
                0.20
            } else {
                0.50
            }
        }
    }
}

/// Plan shape executable via an index lookup: equality, or a closed range
/// expressed as `$gte` + `$lte` on the same field. Anything else still costs
/// into the comparison but cannot be executed as an index op (§4.6.2 step 3).
enum Shape {
    Eq(Value),
    Range(Value, Value),
    Other,
}

fn shape_of(predicate: &Value) -> Shape {
    match predicate.as_object() {
        None => Shape::Eq(predicate.clone()),
        Some(ops) => {
            if let Some(v) = ops.get("$eq") {
                Shape::Eq(v.clone())
            } else if let (Some(start), Some(end)) = (ops.get("$gte"), ops.get("$lte")) {
                Shape::Range(start.clone(), end.clone())
            } else {
                Shape::Other
            }
        }
    }
}

/// Choose a plan for `filter` given the set of currently-indexed fields and
/// an estimate of the collection's document count.
pub fn plan(filter: &Value, indexed_fields: &[String], collection_size: u64) -> (Plan, Explanation) {
    let fields = match filter.as_object() {
        Some(map) if !map.is_empty() => map,
        _ => {
            return (
                Plan::FullScan,
                Explanation {
                    strategy: "full_scan",
                    field: None,
                    estimated_cost: collection_size as f64,
                    selectivity: None,
                },
            )
        }
    };

    let n = collection_size as f64;
    let scan_cost = n;

    let mut best: Option<(String, Value, f64, f64)> = None; // field, predicate, cost, selectivity
    for (field, predicate) in fields {
        if !indexed_fields.iter().any(|f| f == field) {
            continue;
        }
        let selectivity = selectivity_for(predicate);
        let index_cost = (n + 1.0).log2() + n * selectivity;
        if best.as_ref().map(|(_, _, c, _)| index_cost < *c).unwrap_or(true) {
            best = Some((field.clone(), predicate.clone(), index_cost, selectivity));
        }
    }

    match best {
        Some((field, predicate, index_cost, selectivity)) if index_cost < 0.3 * scan_cost => {
            match shape_of(&predicate) {
                Shape::Eq(value) => (
                    Plan::IndexEq {
                        field: field.clone(),
                        value,
                    },
                    Explanation {
                        strategy: "index_eq",
                        field: Some(field),
                        estimated_cost: index_cost,
                        selectivity: Some(selectivity),
                    },
                ),
                Shape::Range(start, end) => (
                    Plan::IndexRange {
                        field: field.clone(),
                        start,
                        end,
                    },
                    Explanation {
                        strategy: "index_range",
                        field: Some(field),
                        estimated_cost: index_cost,
                        selectivity: Some(selectivity),
                    },
                ),
                Shape::Other => (
                    Plan::FullScan,
                    Explanation {
                        strategy: "full_scan",
                        field: Some(field),
                        estimated_cost: scan_cost,
                        selectivity: Some(selectivity),
                    },
                ),
            }
        }
        _ => (
            Plan::FullScan,
            Explanation {
                strategy: "full_scan",
                field: None,
                estimated_cost: scan_cost,
                selectivity: None,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_is_full_scan() {
        let (p, e) = plan(&json!({}), &["city".to_string()], 10_000);
        assert_eq!(p, Plan::FullScan);
        assert_eq!(e.strategy, "full_scan");
    }

    #[test]
    fn equality_on_indexed_field_with_large_collection_uses_index() {
        let (p, e) = plan(&json!({"city": "NYC"}), &["city".to_string()], 100_000);
        assert!(matches!(p, Plan::IndexEq { .. }));
        assert_eq!(e.strategy, "index_eq");
    }

    #[test]
    fn unindexed_field_falls_back_to_full_scan() {
        let (p, _) = plan(&json!({"city": "NYC"}), &[], 100_000);
        assert_eq!(p, Plan::FullScan);
    }

    #[test]
    fn small_collection_prefers_full_scan_even_when_indexed() {
        // log2(11) + 10*0.01 ~= 3.5+0.1, scan_cost=10, 0.3*10=3 -> index_cost
        // (~3.6) is NOT below threshold, so full scan wins.
        let (p, _) = plan(&json!({"city": "NYC"}), &["city".to_string()], 10);
        assert_eq!(p, Plan::FullScan);
    }

    #[test]
    fn range_predicate_on_indexed_field_uses_index_range() {
        let filter = json!({"age": {"$gte": 20, "$lte": 30}});
        let (p, e) = plan(&filter, &["age".to_string()], 100_000);
        assert!(matches!(p, Plan::IndexRange { .. }));
        assert_eq!(e.strategy, "index_range");
    }

    #[test]
    fn ne_predicate_is_never_worth_indexing() {
        let filter = json!({"status": {"$ne": "archived"}});
        let (p, _) = plan(&filter, &["status".to_string()], 100_000);
        assert_eq!(p, Plan::FullScan);
    }

    #[test]
    fn unsupported_shape_on_indexed_field_still_reports_field_but_scans() {
        let filter = json!({"tags": {"$regex": "^a"}});
        let (p, e) = plan(&filter, &["tags".to_string()], 100_000);
        // $regex selectivity 0.2 -> index_cost ~ log2(N)+0.2N, not below 0.3N
        // threshold for large N either, so this also lands on full scan; the
        // important behavioral check is that Shape::Other never executes as
        // an index op even when cost *would* favor it.
        assert_eq!(p, Plan::FullScan);
        assert!(e.field.is_none() || e.strategy == "full_scan");
    }
}
