//! Filter matching, sorting, projection, update operators and the aggregation
//! subset understood by the in-memory store.
//!
//! Values compare the way a document store orders them: numbers by
//! magnitude regardless of integer/float representation, then across types by
//! a fixed type rank. A filter on a field holding an array matches when the
//! array itself or any of its elements satisfies the condition.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use crate::options::Document;
use crate::store::{StoreError, StoreResult};

fn invalid(reason: impl Into<String>) -> StoreError {
    StoreError::InvalidRequest(reason.into())
}

/// Resolve a dotted path. Numeric segments index into arrays.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a dotted path, creating intermediate objects.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Value) -> StoreResult<()> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (Some(parent), leaf),
        None => (None, path),
    };
    let target = match parent {
        None => document,
        Some(parent) => {
            let mut current = document;
            for segment in parent.split('.') {
                let entry = current
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                current = match entry {
                    Value::Object(map) => map,
                    _ => return Err(invalid(format!("cannot create field '{path}' inside a non-object"))),
                };
            }
            current
        }
    };
    target.insert(leaf.to_string(), value);
    Ok(())
}

fn remove_path(document: &mut Document, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => document.remove(path).is_some(),
        Some((parent, leaf)) => {
            let mut current = document;
            for segment in parent.split('.') {
                current = match current.get_mut(segment) {
                    Some(Value::Object(map)) => map,
                    _ => return false,
                };
            }
            current.remove(leaf).is_some()
        }
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

/// Total order over JSON values
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
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
            for ((key_a, left), (key_b, right)) in x.iter().zip(y.iter()) {
                let ordering = key_a.cmp(key_b).then_with(|| compare_values(left, right));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    match (x.as_i64(), y.as_i64()) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => {
            let a = x.as_f64().unwrap_or(f64::NAN);
            let b = y.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Does `document` satisfy `filter`?
pub(crate) fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => all_clauses(document, condition, key)?.iter().all(|hit| *hit),
            "$or" => all_clauses(document, condition, key)?.iter().any(|hit| *hit),
            "$nor" => !all_clauses(document, condition, key)?.iter().any(|hit| *hit),
            other if other.starts_with('$') => {
                return Err(invalid(format!("unsupported top-level operator '{other}'")))
            }
            field => field_matches(get_path(document, field), condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_clauses(document: &Document, clauses: &Value, operator: &str) -> StoreResult<Vec<bool>> {
    let Value::Array(clauses) = clauses else {
        return Err(invalid(format!("{operator} expects an array of filters")));
    };
    clauses
        .iter()
        .map(|clause| match clause {
            Value::Object(filter) => matches(document, filter),
            _ => Err(invalid(format!("{operator} clauses must be documents"))),
        })
        .collect()
}

fn is_operator_document(condition: &Value) -> Option<&Document> {
    match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|key| key.starts_with('$')) => Some(map),
        _ => None,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> StoreResult<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals(value, condition));
    };
    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => any_candidate(value, |v| same_type(v, operand) && compare_values(v, operand).is_gt()),
            "$gte" => any_candidate(value, |v| same_type(v, operand) && compare_values(v, operand).is_ge()),
            "$lt" => any_candidate(value, |v| same_type(v, operand) && compare_values(v, operand).is_lt()),
            "$lte" => any_candidate(value, |v| same_type(v, operand) && compare_values(v, operand).is_le()),
            "$in" => in_list(value, operand, operator)?,
            "$nin" => !in_list(value, operand, operator)?,
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or_else(|| operand.as_f64().is_some_and(|n| n != 0.0));
                value.is_some() == wanted
            }
            "$size" => match (value, operand.as_u64()) {
                (Some(Value::Array(items)), Some(size)) => items.len() as u64 == size,
                _ => false,
            },
            other => return Err(invalid(format!("unsupported query operator '{other}'"))),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn same_type(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

/// The value itself plus, for arrays, each element.
fn any_candidate(value: Option<&Value>, predicate: impl Fn(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&predicate) || predicate(&Value::Array(items.clone())),
        Some(other) => predicate(other),
    }
}

fn equals(value: Option<&Value>, operand: &Value) -> bool {
    match value {
        None => operand.is_null(),
        Some(found) => any_candidate(Some(found), |candidate| values_equal(candidate, operand)),
    }
}

fn in_list(value: Option<&Value>, operand: &Value, operator: &str) -> StoreResult<bool> {
    let Value::Array(options) = operand else {
        return Err(invalid(format!("{operator} expects an array")));
    };
    Ok(options.iter().any(|option| equals(value, option)))
}

/// Stable multi-key sort following a sort specification (`1` / `-1`).
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) -> StoreResult<()> {
    sort_by_spec(documents, sort, |document| document)
}

/// Sort arbitrary items by the document each one refers to.
pub(crate) fn sort_by_spec<T>(
    items: &mut [T],
    sort: &Document,
    document: impl Fn(&T) -> &Document,
) -> StoreResult<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (field, direction) in sort {
        let descending = match direction.as_f64() {
            Some(n) if n < 0.0 => true,
            Some(_) => false,
            None => return Err(invalid(format!("sort direction for '{field}' must be 1 or -1"))),
        };
        keys.push((field.as_str(), descending));
    }
    items.sort_by(|a, b| {
        let (a, b) = (document(a), document(b));
        for (field, descending) in &keys {
            let left = get_path(a, field).unwrap_or(&Value::Null);
            let right = get_path(b, field).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Null => false,
        _ => true,
    }
}

/// Apply an inclusion or exclusion projection. `_id` is kept unless excluded.
pub(crate) fn project(document: &Document, projection: &Document) -> StoreResult<Document> {
    let inclusive = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .any(|(_, flag)| truthy(flag));
    let exclusive = projection
        .iter()
        .filter(|(field, _)| field.as_str() != "_id")
        .any(|(_, flag)| !truthy(flag));
    if inclusive && exclusive {
        return Err(invalid("projection cannot mix inclusion and exclusion"));
    }
    let keep_id = projection.get("_id").map_or(true, truthy);

    let mut projected = if inclusive {
        let mut projected = Document::new();
        for (field, flag) in projection {
            if field != "_id" && truthy(flag) {
                if let Some(value) = get_path(document, field) {
                    set_path(&mut projected, field, value.clone())?;
                }
            }
        }
        if keep_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id".to_string(), id.clone());
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for (field, flag) in projection {
            if !truthy(flag) {
                remove_path(&mut projected, field);
            }
        }
        projected
    };
    if !keep_id {
        projected.remove("_id");
    }
    Ok(projected)
}

/// Apply an operator update in place; returns whether the document changed.
///
/// `inserting` enables `$setOnInsert`.
pub(crate) fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> StoreResult<bool> {
    let before = document.clone();
    for (operator, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(invalid(format!("{operator} expects a document of fields")));
        };
        for (path, operand) in fields {
            if path == "_id" && operator != "$setOnInsert" && !inserting {
                let unchanged = get_path(document, "_id").is_some_and(|id| values_equal(id, operand));
                if !unchanged {
                    return Err(invalid("the _id field is immutable"));
                }
            }
            match operator.as_str() {
                "$set" => set_path(document, path, operand.clone())?,
                "$setOnInsert" => {
                    if inserting {
                        set_path(document, path, operand.clone())?;
                    }
                }
                "$unset" => {
                    remove_path(document, path);
                }
                "$inc" => {
                    let current = get_path(document, path).cloned().unwrap_or_else(|| Value::from(0));
                    set_path(document, path, add(&current, operand, path)?)?;
                }
                "$push" => match get_path(document, path).cloned() {
                    None => set_path(document, path, Value::Array(vec![operand.clone()]))?,
                    Some(Value::Array(mut items)) => {
                        items.push(operand.clone());
                        set_path(document, path, Value::Array(items))?;
                    }
                    Some(_) => return Err(invalid(format!("$push target '{path}' is not an array"))),
                },
                other => return Err(invalid(format!("unsupported update operator '{other}'"))),
            }
        }
    }
    Ok(*document != before)
}

fn add(current: &Value, increment: &Value, path: &str) -> StoreResult<Value> {
    let (Value::Number(a), Value::Number(b)) = (current, increment) else {
        return Err(invalid(format!("$inc on '{path}' requires numeric values")));
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let sum = a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| invalid(format!("$inc on '{path}' produced a non-finite number")))
}

/// Seed for an upsert: the equality conditions of the filter.
pub(crate) fn upsert_seed(filter: &Document) -> StoreResult<Document> {
    let mut seed = Document::new();
    for (field, condition) in filter {
        if field.starts_with('$') {
            continue;
        }
        match is_operator_document(condition) {
            None => set_path(&mut seed, field, condition.clone())?,
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seed, field, value.clone())?;
                }
            }
        }
    }
    Ok(seed)
}

/// Run the supported aggregation stages over `documents`.
pub(crate) fn aggregate(mut documents: Vec<Document>, pipeline: &[Document]) -> StoreResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(invalid("each pipeline stage must have exactly one operator"));
        };
        documents = match (name.as_str(), spec) {
            ("$match", Value::Object(filter)) => {
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, filter)? {
                        kept.push(document);
                    }
                }
                kept
            }
            ("$sort", Value::Object(sort)) => {
                sort_documents(&mut documents, sort)?;
                documents
            }
            ("$skip", count) => {
                let count = stage_count(name, count)?;
                documents.into_iter().skip(count).collect()
            }
            ("$limit", count) => {
                let count = stage_count(name, count)?;
                documents.into_iter().take(count).collect()
            }
            ("$project", Value::Object(projection)) => documents
                .iter()
                .map(|document| project(document, projection))
                .collect::<StoreResult<Vec<_>>>()?,
            ("$count", Value::String(field)) => {
                let mut counted = Document::new();
                counted.insert(field.clone(), Value::from(documents.len() as u64));
                if documents.is_empty() {
                    Vec::new()
                } else {
                    vec![counted]
                }
            }
            (other, _) => {
                return Err(StoreError::Unsupported(format!("aggregation stage '{other}'")))
            }
        };
    }
    Ok(documents)
}

fn stage_count(stage: &str, value: &Value) -> StoreResult<usize> {
    value
        .as_u64()
        .map(|count| count as usize)
        .ok_or_else(|| invalid(format!("{stage} expects a non-negative integer")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn equality_and_comparison_operators() {
        let user = doc(json!({"name": "ada", "age": 36, "tags": ["admin", "ops"], "address": {"city": "London"}}));
        assert!(matches(&user, &doc(json!({"name": "ada"}))).unwrap());
        assert!(matches(&user, &doc(json!({"age": {"$gte": 36.0, "$lt": 40}}))).unwrap());
        assert!(!matches(&user, &doc(json!({"age": {"$gt": "30"}}))).unwrap());
        assert!(matches(&user, &doc(json!({"tags": "ops"}))).unwrap());
        assert!(matches(&user, &doc(json!({"address.city": {"$in": ["Paris", "London"]}}))).unwrap());
        assert!(matches(&user, &doc(json!({"missing": {"$exists": false}}))).unwrap());
        assert!(matches(&user, &doc(json!({"missing": null}))).unwrap());
        assert!(!matches(&user, &doc(json!({"name": {"$ne": "ada"}}))).unwrap());
    }

    #[test]
    fn logical_operators() {
        let item = doc(json!({"kind": "book", "price": 12}));
        let filter = doc(json!({"$or": [{"kind": "film"}, {"price": {"$lte": 12}}]}));
        assert!(matches(&item, &filter).unwrap());
        let filter = doc(json!({"$and": [{"kind": "book"}, {"price": {"$gt": 20}}]}));
        assert!(!matches(&item, &filter).unwrap());
        let filter = doc(json!({"$nor": [{"kind": "film"}]}));
        assert!(matches(&item, &filter).unwrap());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let item = doc(json!({"a": 1}));
        let err = matches(&item, &doc(json!({"a": {"$regex": "x"}}))).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }

    #[test]
    fn sorts_by_multiple_keys() {
        let mut docs = vec![
            doc(json!({"g": 1, "n": "b"})),
            doc(json!({"g": 2, "n": "a"})),
            doc(json!({"g": 1, "n": "a"})),
        ];
        sort_documents(&mut docs, &doc(json!({"g": -1, "n": 1}))).unwrap();
        let order: Vec<_> = docs.iter().map(|d| Value::Object(d.clone())).collect();
        assert_eq!(
            order,
            vec![json!({"g": 2, "n": "a"}), json!({"g": 1, "n": "a"}), json!({"g": 1, "n": "b"})]
        );
    }

    #[test]
    fn projection_keeps_id_by_default() {
        let user = doc(json!({"_id": "u1", "name": "ada", "secret": "x"}));
        let projected = project(&user, &doc(json!({"name": 1}))).unwrap();
        assert_eq!(Value::Object(projected), json!({"name": "ada", "_id": "u1"}));
        let projected = project(&user, &doc(json!({"secret": 0, "_id": 0}))).unwrap();
        assert_eq!(Value::Object(projected), json!({"name": "ada"}));
    }

    #[test]
    fn update_operators() {
        let mut counter = doc(json!({"_id": 1, "hits": 1, "old": true}));
        let changed = apply_update(
            &mut counter,
            &doc(json!({"$inc": {"hits": 2}, "$unset": {"old": ""}, "$push": {"log": "x"}, "$set": {"meta.seen": true}})),
            false,
        )
        .unwrap();
        assert!(changed);
        assert_eq!(
            Value::Object(counter.clone()),
            json!({"_id": 1, "hits": 3, "log": ["x"], "meta": {"seen": true}})
        );

        let unchanged = apply_update(&mut counter, &doc(json!({"$set": {"hits": 3}})), false).unwrap();
        assert!(!unchanged);
        assert!(apply_update(&mut counter, &doc(json!({"$set": {"_id": 2}})), false).is_err());
    }

    #[test]
    fn upsert_seed_uses_equality_conditions() {
        let seed = upsert_seed(&doc(json!({"email": "a@b.c", "age": {"$gt": 3}, "tier": {"$eq": "gold"}}))).unwrap();
        assert_eq!(Value::Object(seed), json!({"email": "a@b.c", "tier": "gold"}));
    }

    #[test]
    fn aggregation_subset() {
        let docs: Vec<Document> = (1..=5).map(|n| doc(json!({"n": n, "odd": n % 2 == 1}))).collect();
        let pipeline = vec![
            doc(json!({"$match": {"odd": true}})),
            doc(json!({"$sort": {"n": -1}})),
            doc(json!({"$skip": 1})),
            doc(json!({"$limit": 5})),
            doc(json!({"$project": {"n": 1}})),
        ];
        let out = aggregate(docs.clone(), &pipeline).unwrap();
        assert_eq!(
            out.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![json!({"n": 3}), json!({"n": 1})]
        );

        let counted = aggregate(docs, &[doc(json!({"$count": "total"}))]).unwrap();
        assert_eq!(Value::Object(counted[0].clone()), json!({"total": 5}));
    }
}
