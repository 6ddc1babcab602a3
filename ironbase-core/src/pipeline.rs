// pipeline.rs
// Aggregation pipeline (§6): the minimum subset needed for parity —
// `$match`, `$group` (one field, `$sum` only), `$sort`, `$limit`, `$project`.
// Stages run in order over the collection's full document set; there is no
// cross-stage index usage (`$match` does not consult the planner).

use serde_json::{Map, Value};

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::query::matches_filter;
use crate::value_utils::{compare_values_with_none, get_nested_value};

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Value),
    Group { by: String, sum_field: String, output_field: String },
    Sort { field: String, ascending: bool },
    Limit(usize),
    Project(Vec<String>),
}

pub fn run(collection: &Collection, pipeline: &[Stage]) -> Result<Vec<Value>> {
    let mut docs = collection.find(&Value::Object(Map::new()), None, false)?.documents;

    for stage in pipeline {
        docs = match stage {
            Stage::Match(filter) => docs.into_iter().filter(|d| matches_filter(d, filter)).collect(),
            Stage::Group {
                by,
                sum_field,
                output_field,
            } => group(&docs, by, sum_field, output_field),
            Stage::Sort { field, ascending } => {
                let mut docs = docs;
                docs.sort_by(|a, b| {
                    let ord = compare_values_with_none(get_nested_value(a, field), get_nested_value(b, field));
                    if *ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
                docs
            }
            Stage::Limit(n) => {
                docs.truncate(*n);
                docs
            }
            Stage::Project(fields) => docs.iter().map(|d| project(d, fields)).collect(),
        };
    }

    Ok(docs)
}

fn group(docs: &[Value], by: &str, sum_field: &str, output_field: &str) -> Vec<Value> {
    let mut groups: Vec<(Value, f64)> = Vec::new();
    for doc in docs {
        let key = get_nested_value(doc, by).cloned().unwrap_or(Value::Null);
        let amount = get_nested_value(doc, sum_field).and_then(Value::as_f64).unwrap_or(0.0);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, total)) => *total += amount,
            None => groups.push((key, amount)),
        }
    }
    groups
        .into_iter()
        .map(|(key, total)| {
            let mut obj = Map::new();
            obj.insert("_id".to_string(), key);
            obj.insert(output_field.to_string(), serde_json::json!(total));
            Value::Object(obj)
        })
        .collect()
}

fn project(doc: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(value) = get_nested_value(doc, field) {
            out.insert(field.clone(), value.clone());
        }
    }
    Value::Object(out)
}

/// Parse a MongoDB-shaped pipeline (`[{"$match": ...}, {"$group": ...}, ...]`)
/// into typed stages. Stage shapes outside the documented subset are a
/// validation error, not a silent no-op.
pub fn parse_pipeline(spec: &[Value]) -> Result<Vec<Stage>> {
    spec.iter().map(parse_stage).collect()
}

fn parse_stage(spec: &Value) -> Result<Stage> {
    let obj = spec
        .as_object()
        .ok_or_else(|| Error::validation("pipeline stage must be an object"))?;
    if let Some(filter) = obj.get("$match") {
        return Ok(Stage::Match(filter.clone()));
    }
    if let Some(group_spec) = obj.get("$group") {
        let group_obj = group_spec
            .as_object()
            .ok_or_else(|| Error::validation("$group must be an object"))?;
        let by = group_obj
            .get("_id")
            .and_then(Value::as_str)
            .map(|s| s.trim_start_matches('$').to_string())
            .ok_or_else(|| Error::validation("$group._id must be a field reference string"))?;
        let (output_field, sum_spec) = group_obj
            .iter()
            .find(|(k, _)| *k != "_id")
            .ok_or_else(|| Error::validation("$group must define one accumulator field"))?;
        let sum_field = sum_spec
            .as_object()
            .and_then(|m| m.get("$sum"))
            .and_then(Value::as_str)
            .map(|s| s.trim_start_matches('$').to_string())
            .ok_or_else(|| Error::validation("only the $sum accumulator is supported"))?;
        return Ok(Stage::Group {
            by,
            sum_field,
            output_field: output_field.clone(),
        });
    }
    if let Some(sort_spec) = obj.get("$sort") {
        let sort_obj = sort_spec
            .as_object()
            .ok_or_else(|| Error::validation("$sort must be an object"))?;
        let (field, direction) = sort_obj
            .iter()
            .next()
            .ok_or_else(|| Error::validation("$sort must name exactly one field"))?;
        let ascending = direction.as_i64().map(|d| d >= 0).unwrap_or(true);
        return Ok(Stage::Sort {
            field: field.clone(),
            ascending,
        });
    }
    if let Some(limit) = obj.get("$limit") {
        let n = limit
            .as_u64()
            .ok_or_else(|| Error::validation("$limit must be a non-negative integer"))?;
        return Ok(Stage::Limit(n as usize));
    }
    if let Some(project_spec) = obj.get("$project") {
        let project_obj = project_spec
            .as_object()
            .ok_or_else(|| Error::validation("$project must be an object"))?;
        let fields = project_obj.keys().cloned().collect();
        return Ok(Stage::Project(fields));
    }
    Err(Error::validation(format!(
        "unsupported aggregation stage: {spec}"
    )))
}
