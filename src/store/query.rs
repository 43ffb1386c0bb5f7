//! Selector matching, sorting and modifiers for JSON documents.

use super::types::{SortOrder, SortSpec};
use crate::error::{LiveError, Result};
use crate::types::Document;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Follow a dotted path through nested objects.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, key| value.get(key))
}

/// Does `doc` satisfy `filter`?
pub fn matches(doc: &Document, filter: &Document) -> Result<bool> {
    let Some(clauses) = filter.as_object() else {
        return Err(LiveError::InvalidSelector(format!(
            "selector must be an object, got {}",
            filter
        )));
    };

    for (key, condition) in clauses {
        let ok = match key.as_str() {
            "$and" => all_of(doc, condition, key)?.iter().all(|m| *m),
            "$or" => all_of(doc, condition, key)?.iter().any(|m| *m),
            "$nor" => !all_of(doc, condition, key)?.iter().any(|m| *m),
            op if op.starts_with('$') => {
                return Err(LiveError::InvalidSelector(format!(
                    "unknown top-level operator {}",
                    op
                )))
            }
            path => field_matches(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_of(doc: &Document, filters: &Value, op: &str) -> Result<Vec<bool>> {
    let Some(filters) = filters.as_array() else {
        return Err(LiveError::InvalidSelector(format!("{} takes an array", op)));
    };
    filters.iter().map(|filter| matches(doc, filter)).collect()
}

fn is_operator_object(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        None => false,
    }
}

fn field_matches(field: Option<&Value>, condition: &Value) -> Result<bool> {
    if !is_operator_object(condition) {
        return Ok(equals_or_contains(field, condition));
    }

    let Some(operators) = condition.as_object() else {
        return Ok(false);
    };
    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals_or_contains(field, operand),
            "$ne" => !equals_or_contains(field, operand),
            "$gt" => ordered(field, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(field, operand, |o| o != Ordering::Less),
            "$lt" => ordered(field, operand, |o| o == Ordering::Less),
            "$lte" => ordered(field, operand, |o| o != Ordering::Greater),
            "$in" => one_of(field, operand, op)?,
            "$nin" => !one_of(field, operand, op)?,
            "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
            other => {
                return Err(LiveError::InvalidSelector(format!(
                    "unknown operator {}",
                    other
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality, where an array field also matches any of its elements and a
/// missing field matches null.
fn equals_or_contains(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(value) if values_equal(value, expected) => true,
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        Some(_) => false,
    }
}

fn one_of(field: Option<&Value>, candidates: &Value, op: &str) -> Result<bool> {
    let Some(candidates) = candidates.as_array() else {
        return Err(LiveError::InvalidSelector(format!("{} takes an array", op)));
    };
    Ok(candidates
        .iter()
        .any(|candidate| equals_or_contains(field, candidate)))
}

/// Range comparison. Values of different types never compare.
fn ordered(field: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match field {
        Some(value) if type_rank(value) == type_rank(operand) => {
            accept(compare_values(value, operand))
        }
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values: null < numbers < strings < objects <
/// arrays < booleans.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ordering = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Stable sort by `spec`. Missing keys sort as null.
pub fn sort_documents(docs: &mut [Document], spec: &SortSpec) {
    docs.sort_by(|a, b| {
        for (key, order) in &spec.0 {
            let left = lookup(a, key).unwrap_or(&Value::Null);
            let right = lookup(b, key).unwrap_or(&Value::Null);
            let ordering = match order {
                SortOrder::Ascending => compare_values(left, right),
                SortOrder::Descending => compare_values(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Apply an update document: either `$`-operators or a full replacement.
/// The `_id` always survives.
pub fn apply_modifier(doc: &Document, modifier: &Document) -> Result<Document> {
    let Some(ops) = modifier.as_object() else {
        return Err(LiveError::InvalidModifier(format!(
            "modifier must be an object, got {}",
            modifier
        )));
    };

    let operator_count = ops.keys().filter(|k| k.starts_with('$')).count();
    if operator_count == 0 {
        let mut replacement = ops.clone();
        if let Some(id) = doc.get("_id") {
            replacement.insert("_id".to_string(), id.clone());
        }
        return Ok(Value::Object(replacement));
    }
    if operator_count != ops.len() {
        return Err(LiveError::InvalidModifier(
            "cannot mix operators and plain fields".to_string(),
        ));
    }

    let mut result = doc.clone();
    for (op, fields) in ops {
        let Some(fields) = fields.as_object() else {
            return Err(LiveError::InvalidModifier(format!("{} takes an object", op)));
        };
        for (path, operand) in fields {
            if path == "_id" {
                return Err(LiveError::InvalidModifier("_id is immutable".to_string()));
            }
            match op.as_str() {
                "$set" => set_path(&mut result, path, operand.clone())?,
                "$unset" => unset_path(&mut result, path),
                "$inc" => {
                    let current = lookup(&result, path).cloned().unwrap_or(Value::from(0));
                    let sum = add_numbers(&current, operand).ok_or_else(|| {
                        LiveError::InvalidModifier(format!("$inc on non-number {}", path))
                    })?;
                    set_path(&mut result, path, sum)?;
                }
                "$push" => {
                    let mut items = match lookup(&result, path) {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(LiveError::InvalidModifier(format!(
                                "$push on non-array {}",
                                path
                            )))
                        }
                    };
                    items.push(operand.clone());
                    set_path(&mut result, path, Value::Array(items))?;
                }
                other => {
                    return Err(LiveError::InvalidModifier(format!(
                        "unknown modifier {}",
                        other
                    )))
                }
            }
        }
    }
    Ok(result)
}

fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Some(Value::from(x.checked_add(y)?)),
        _ => Some(Value::from(a.as_f64()? + b.as_f64()?)),
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut keys = path.split('.').peekable();
    let mut current = doc;
    while let Some(key) = keys.next() {
        let Some(map) = current.as_object_mut() else {
            return Err(LiveError::InvalidModifier(format!(
                "cannot set {} inside a non-object",
                path
            )));
        };
        if keys.peek().is_none() {
            map.insert(key.to_string(), value);
            return Ok(());
        }
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

fn unset_path(doc: &mut Value, path: &str) {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    };
    let target = if parent.is_empty() {
        Some(doc)
    } else {
        parent
            .split('.')
            .try_fold(doc, |value, key| value.get_mut(key))
    };
    if let Some(Value::Object(map)) = target {
        map.remove(leaf);
    }
}

/// Seed document for an upsert: the plain equality clauses of the filter.
pub fn upsert_seed(filter: &Document) -> Result<Document> {
    let mut seed = Value::Object(Map::new());
    if let Some(clauses) = filter.as_object() {
        for (key, condition) in clauses {
            if key.starts_with('$') || is_operator_object(condition) {
                continue;
            }
            set_path(&mut seed, key, condition.clone())?;
        }
    }
    Ok(seed)
}
