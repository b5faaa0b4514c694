//! JSON document <-> BSON conversion and option mapping
//!
//! Documents cross the boundary as relaxed extended JSON, so `{"$oid": ..}`
//! and `{"$date": ..}` values round-trip as their BSON types.

use std::time::Duration;

use docrepo_core::{
    AggregateOptions, CountOptions, DeleteOptions, Document, FindOneAndUpdateOptions,
    FindOneOptions, FindOptions, Hint, IndexDescriptor, IndexInfo, InsertManyOptions,
    ReturnDocument, StoreError, UpdateOptions,
};
use mongodb::bson::{self, Bson};
use mongodb::options;
use mongodb::IndexModel;
use serde_json::Value;

pub fn to_bson(document: &Document) -> Result<bson::Document, StoreError> {
    bson::Document::try_from(document.clone())
        .map_err(|err| StoreError::InvalidRequest(format!("document is not valid BSON: {err}")))
}

pub fn to_bson_all(documents: &[Document]) -> Result<Vec<bson::Document>, StoreError> {
    documents.iter().map(to_bson).collect()
}

pub fn from_bson(document: bson::Document) -> Document {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn optional(document: &Option<Document>) -> Result<Option<bson::Document>, StoreError> {
    document.as_ref().map(to_bson).transpose()
}

pub fn hint(hint: &Option<Hint>) -> Result<Option<options::Hint>, StoreError> {
    Ok(match hint {
        None => None,
        Some(Hint::Name(name)) => Some(options::Hint::Name(name.clone())),
        Some(Hint::Keys(keys)) => Some(options::Hint::Keys(to_bson(keys)?)),
    })
}

pub fn find_options(opts: &FindOptions) -> Result<options::FindOptions, StoreError> {
    let mut out = options::FindOptions::default();
    out.sort = optional(&opts.sort)?;
    out.projection = optional(&opts.projection)?;
    out.skip = opts.skip;
    out.limit = opts.limit;
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn find_one_options(opts: &FindOneOptions) -> Result<options::FindOneOptions, StoreError> {
    let mut out = options::FindOneOptions::default();
    out.sort = optional(&opts.sort)?;
    out.projection = optional(&opts.projection)?;
    out.skip = opts.skip;
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn find_one_and_update_options(
    opts: &FindOneAndUpdateOptions,
) -> Result<options::FindOneAndUpdateOptions, StoreError> {
    let mut out = options::FindOneAndUpdateOptions::default();
    out.return_document = Some(match opts.return_document {
        ReturnDocument::Before => options::ReturnDocument::Before,
        ReturnDocument::After => options::ReturnDocument::After,
    });
    out.upsert = Some(opts.upsert);
    out.sort = optional(&opts.sort)?;
    out.projection = optional(&opts.projection)?;
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn update_options(opts: &UpdateOptions) -> Result<options::UpdateOptions, StoreError> {
    let mut out = options::UpdateOptions::default();
    out.upsert = Some(opts.upsert);
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn upsert_options(upsert: bool) -> options::UpdateOptions {
    let mut out = options::UpdateOptions::default();
    out.upsert = Some(upsert);
    out
}

pub fn replace_options(upsert: bool) -> options::ReplaceOptions {
    let mut out = options::ReplaceOptions::default();
    out.upsert = Some(upsert);
    out
}

pub fn delete_options(opts: &DeleteOptions) -> Result<options::DeleteOptions, StoreError> {
    let mut out = options::DeleteOptions::default();
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn count_options(opts: &CountOptions) -> Result<options::CountOptions, StoreError> {
    let mut out = options::CountOptions::default();
    out.skip = opts.skip;
    out.limit = opts.limit;
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn insert_many_options(opts: &InsertManyOptions) -> options::InsertManyOptions {
    let mut out = options::InsertManyOptions::default();
    out.ordered = Some(opts.ordered);
    out
}

pub fn aggregate_options(opts: &AggregateOptions) -> Result<options::AggregateOptions, StoreError> {
    let mut out = options::AggregateOptions::default();
    if opts.allow_disk_use {
        out.allow_disk_use = Some(true);
    }
    out.hint = hint(&opts.hint)?;
    Ok(out)
}

pub fn index_model(index: &IndexDescriptor) -> Result<IndexModel, StoreError> {
    let mut opts = options::IndexOptions::default();
    opts.name = Some(index.name.clone());
    if index.unique {
        opts.unique = Some(true);
    }
    if index.sparse {
        opts.sparse = Some(true);
    }
    opts.expire_after = index.expire_after_secs.map(Duration::from_secs);

    Ok(IndexModel::builder()
        .keys(to_bson(&index.keys_document())?)
        .options(opts)
        .build())
}

/// Live index as reported by `listIndexes`. Unnamed models are skipped.
pub fn index_info(model: IndexModel) -> Option<IndexInfo> {
    let opts = model.options.unwrap_or_default();
    let keys = expand_text_keys(normalize_keys(from_bson(model.keys)), opts.weights.as_ref());
    Some(IndexInfo {
        name: opts.name?,
        keys,
        unique: opts.unique.unwrap_or(false),
        sparse: opts.sparse.unwrap_or(false),
        expire_after_secs: opts.expire_after.map(|ttl| ttl.as_secs()),
    })
}

/// Servers may report key orders as doubles (`1.0`). Compare as integers.
fn normalize_keys(keys: Document) -> Document {
    keys.into_iter()
        .map(|(field, order)| {
            let order = match order.as_f64() {
                Some(number) if number.fract() == 0.0 => Value::from(number as i64),
                _ => order,
            };
            (field, order)
        })
        .collect()
}

/// Text indexes are listed as `{_fts: "text", _ftsx: 1}` with the indexed
/// fields under `weights`. Put those fields back where `_fts` stood.
fn expand_text_keys(keys: Document, weights: Option<&bson::Document>) -> Document {
    let Some(weights) = weights else {
        return keys;
    };
    let mut expanded = Document::new();
    for (field, order) in keys {
        match field.as_str() {
            "_fts" => {
                for text_field in weights.keys() {
                    expanded.insert(text_field.clone(), Value::from("text"));
                }
            }
            "_ftsx" => {}
            _ => {
                expanded.insert(field, order);
            }
        }
    }
    expanded
}
