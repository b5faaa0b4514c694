//! Index descriptors and reconciliation
//!
//! The reconciler converges the live index set of one collection to a
//! declared desired set:
//!
//! 1. validate the desired descriptors (named, unique names, not `_id_`, keyed)
//! 2. list live indexes, ignoring the primary-key index
//! 3. drop every live index whose name is not desired, in name order
//! 4. create every desired index, in name order; identical creates are no-ops
//!
//! A failure aborts the run with the phase and index name. Nothing is rolled
//! back: rerunning with the same desired set finishes the convergence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::CallContext;
use crate::error::{Error, ReconcilePhase, Result};
use crate::options::Document;
use crate::store::{StoreCollection, StoreError};

/// Name of the implicit primary-key index. Never dropped or created.
pub const PRIMARY_KEY_INDEX: &str = "_id_";

/// Sort order or special type of one indexed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexOrder {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "hashed")]
    Hashed,
}

impl IndexOrder {
    /// Value used for this order in a key specification document
    pub fn key_value(self) -> Value {
        match self {
            IndexOrder::Ascending => Value::from(1),
            IndexOrder::Descending => Value::from(-1),
            IndexOrder::Text => Value::from("text"),
            IndexOrder::Hashed => Value::from("hashed"),
        }
    }
}

/// One field of an index key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default = "default_order")]
    pub order: IndexOrder,
}

fn default_order() -> IndexOrder {
    IndexOrder::Ascending
}

/// A named index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_secs: Option<u64>,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            unique: false,
            sparse: false,
            expire_after_secs: None,
        }
    }

    /// Append a key field.
    pub fn key(mut self, field: impl Into<String>, order: IndexOrder) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            order,
        });
        self
    }

    pub fn ascending(self, field: impl Into<String>) -> Self {
        self.key(field, IndexOrder::Ascending)
    }

    pub fn descending(self, field: impl Into<String>) -> Self {
        self.key(field, IndexOrder::Descending)
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn expire_after_secs(mut self, secs: u64) -> Self {
        self.expire_after_secs = Some(secs);
        self
    }

    /// Key specification document, in declared field order
    pub fn keys_document(&self) -> Document {
        self.keys
            .iter()
            .map(|key| (key.field.clone(), key.order.key_value()))
            .collect()
    }

    /// The live form this descriptor takes once created
    pub fn to_info(&self) -> IndexInfo {
        IndexInfo {
            name: self.name.clone(),
            keys: self.keys_document(),
            unique: self.unique,
            sparse: self.sparse,
            expire_after_secs: self.expire_after_secs,
        }
    }
}

/// An index as reported by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_secs: Option<u64>,
}

impl IndexInfo {
    /// True when `descriptor` would create exactly this index.
    ///
    /// Numeric key values compare by magnitude so `1` and `1.0` agree.
    pub fn matches(&self, descriptor: &IndexDescriptor) -> bool {
        self.same_definition(&descriptor.to_info())
    }

    /// True when both describe the same keys and options, ignoring the name.
    ///
    /// Adjacent text fields compare in any order.
    pub fn same_definition(&self, other: &IndexInfo) -> bool {
        let (ours, theirs) = (comparable_keys(&self.keys), comparable_keys(&other.keys));
        self.unique == other.unique
            && self.sparse == other.sparse
            && self.expire_after_secs == other.expire_after_secs
            && ours.len() == theirs.len()
            && ours
                .iter()
                .zip(theirs.iter())
                .all(|((field_a, a), (field_b, b))| field_a == field_b && key_values_equal(a, b))
    }
}

/// Key fields with every run of adjacent text fields sorted by name
fn comparable_keys(keys: &Document) -> Vec<(&str, &Value)> {
    let mut fields: Vec<(&str, &Value)> = keys
        .iter()
        .map(|(field, value)| (field.as_str(), value))
        .collect();
    let mut start = 0;
    while start < fields.len() {
        let run = fields[start..]
            .iter()
            .take_while(|(_, value)| is_text_key(value))
            .count();
        fields[start..start + run].sort_by_key(|(field, _)| *field);
        start += run.max(1);
    }
    fields
}

fn is_text_key(value: &Value) -> bool {
    value.as_str() == Some("text")
}

fn key_values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// What a reconciliation would do, computed without changing anything
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcilePlan {
    /// Live indexes not in the desired set, in drop order
    pub to_drop: Vec<String>,
    /// Desired indexes not yet present, in create order
    pub to_create: Vec<String>,
    /// Desired indexes already present with the same definition
    pub unchanged: Vec<String>,
    /// Desired indexes present under the same name with another definition.
    /// The store rejects these on create; rename the index to replace it.
    pub redefined: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_converged(&self) -> bool {
        self.to_drop.is_empty() && self.to_create.is_empty() && self.redefined.is_empty()
    }
}

/// What a reconciliation did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub dropped: Vec<String>,
    pub created: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReconcileReport {
    /// Number of drop and create operations that changed the collection
    pub fn operations(&self) -> usize {
        self.dropped.len() + self.created.len()
    }
}

/// Converges one collection's indexes to a desired set.
///
/// Not safe to run concurrently against the same collection; run it once at
/// startup.
#[derive(Clone)]
pub struct IndexReconciler {
    collection: Arc<dyn StoreCollection>,
}

impl IndexReconciler {
    /// `collection` must be a write-connection handle.
    pub fn new(collection: Arc<dyn StoreCollection>) -> Self {
        Self { collection }
    }

    fn collection_name(&self) -> &str {
        self.collection.name()
    }

    /// Compute the diff between the live and desired index sets.
    pub async fn plan(&self, ctx: &CallContext, desired: &[IndexDescriptor]) -> Result<ReconcilePlan> {
        let desired = self.validate(desired)?;
        let live = self.live_indexes(ctx).await?;
        Ok(diff(&live, &desired))
    }

    /// Drop undesired indexes, then create every desired index.
    pub async fn reconcile(
        &self,
        ctx: &CallContext,
        desired: &[IndexDescriptor],
    ) -> Result<ReconcileReport> {
        let desired = self.validate(desired)?;
        let live = self.live_indexes(ctx).await?;
        let plan = diff(&live, &desired);

        info!(
            collection = %self.collection_name(),
            drop = ?plan.to_drop,
            create = ?plan.to_create,
            unchanged = plan.unchanged.len(),
            "reconciling indexes"
        );

        let mut report = ReconcileReport::default();

        for name in &plan.to_drop {
            let collection = self.collection.clone();
            ctx.run("drop_index", async move {
                collection
                    .drop_index(name)
                    .await
                    .map_err(|source| Error::reconcile(collection.name(), ReconcilePhase::Drop, name.as_str(), source))
            })
            .await
            .map_err(|err| interrupted(self.collection_name(), ReconcilePhase::Drop, name, err))?;
            debug!(collection = %self.collection_name(), index = %name, "dropped index");
            report.dropped.push(name.clone());
        }

        for descriptor in desired.values() {
            let collection = self.collection.clone();
            ctx.run("create_index", async move {
                collection.create_index(descriptor).await.map_err(|source| {
                    Error::reconcile(
                        collection.name(),
                        ReconcilePhase::Create,
                        descriptor.name.as_str(),
                        source,
                    )
                })
            })
            .await
            .map_err(|err| {
                interrupted(self.collection_name(), ReconcilePhase::Create, &descriptor.name, err)
            })?;
            if live.contains_key(&descriptor.name) {
                report.unchanged.push(descriptor.name.clone());
            } else {
                debug!(collection = %self.collection_name(), index = %descriptor.name, "created index");
                report.created.push(descriptor.name.clone());
            }
        }

        info!(
            collection = %self.collection_name(),
            dropped = report.dropped.len(),
            created = report.created.len(),
            "indexes reconciled"
        );
        Ok(report)
    }

    /// Desired descriptors keyed (and therefore ordered) by name.
    fn validate<'a>(
        &self,
        desired: &'a [IndexDescriptor],
    ) -> Result<BTreeMap<String, &'a IndexDescriptor>> {
        let mut by_name = BTreeMap::new();
        for descriptor in desired {
            let name = descriptor.name.as_str();
            if name.trim().is_empty() {
                return Err(Error::rejected_index(
                    self.collection_name(),
                    "",
                    "index descriptors must carry a name",
                ));
            }
            if name.trim() != name {
                return Err(Error::rejected_index(
                    self.collection_name(),
                    name,
                    "index names must not start or end with whitespace",
                ));
            }
            if name == PRIMARY_KEY_INDEX {
                return Err(Error::rejected_index(
                    self.collection_name(),
                    name,
                    "the primary-key index is managed by the store",
                ));
            }
            if descriptor.keys.is_empty() {
                return Err(Error::rejected_index(
                    self.collection_name(),
                    name,
                    "index descriptors must declare at least one key",
                ));
            }
            if by_name.insert(descriptor.name.clone(), descriptor).is_some() {
                return Err(Error::rejected_index(
                    self.collection_name(),
                    name,
                    "index name declared more than once",
                ));
            }
        }
        Ok(by_name)
    }

    async fn live_indexes(&self, ctx: &CallContext) -> Result<BTreeMap<String, IndexInfo>> {
        let collection = self.collection.clone();
        let listed = ctx
            .run("list_indexes", async move {
                collection.list_indexes().await.map_err(|source| {
                    Error::reconcile(collection.name(), ReconcilePhase::List, "*", source)
                })
            })
            .await
            .map_err(|err| interrupted(self.collection_name(), ReconcilePhase::List, "*", err))?;

        Ok(listed
            .into_iter()
            .filter(|info| info.name != PRIMARY_KEY_INDEX)
            .map(|info| (info.name.clone(), info))
            .collect())
    }
}

/// A deadline or cancellation that fires mid-run still names the phase and index.
fn interrupted(collection: &str, phase: ReconcilePhase, index: &str, err: Error) -> Error {
    if err.is_interrupted() {
        Error::reconcile(collection, phase, index, StoreError::Backend(Box::new(err)))
    } else {
        err
    }
}

fn diff(
    live: &BTreeMap<String, IndexInfo>,
    desired: &BTreeMap<String, &IndexDescriptor>,
) -> ReconcilePlan {
    let desired_names: BTreeSet<&String> = desired.keys().collect();
    let mut plan = ReconcilePlan {
        to_drop: live
            .keys()
            .filter(|name| !desired_names.contains(name))
            .cloned()
            .collect(),
        ..ReconcilePlan::default()
    };

    for (name, descriptor) in desired {
        match live.get(name) {
            None => plan.to_create.push(name.clone()),
            Some(info) if info.matches(descriptor) => plan.unchanged.push(name.clone()),
            Some(_) => plan.redefined.push(name.clone()),
        }
    }
    plan
}
