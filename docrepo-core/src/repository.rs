//! Generic repository
//!
//! A `Repository<T>` is bound to one model type and one collection name. It
//! routes reads (find, find_one, count, aggregate) to the read connection and
//! writes to the write connection. Inside a transaction every call uses the
//! write connection, since the session belongs to it.
//!
//! Two behaviours are explicit contracts rather than defaults:
//! - how an update payload is applied ([`Update::Set`] vs [`Update::Raw`])
//! - whether updates must carry an index hint ([`HintPolicy`])

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::index::{IndexDescriptor, IndexReconciler, ReconcilePlan, ReconcileReport};
use crate::model::Model;
use crate::options::{
    AggregateOptions, BulkWriteOptions, CountOptions, DeleteOptions, Document,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, InsertManyOptions, Update, UpdateOptions,
};
use crate::pagination::{Paginated, Pagination};
use crate::router::ConnectionRouter;
use crate::store::{Scope, StoreCollection, UpdateSummary, WriteModel};

/// Whether `update_one`, `update_many` and `update_set_one` require an index hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HintPolicy {
    /// Hints are passed through when present (default)
    #[default]
    Optional,
    /// A missing hint is a configuration error raised before the write
    Required,
}

/// Repository-wide behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RepositoryOptions {
    pub hint_policy: HintPolicy,
}

/// Counts reported by `update_one` / `update_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

impl From<UpdateSummary> for UpdateOutcome {
    fn from(summary: UpdateSummary) -> Self {
        Self {
            matched: summary.matched,
            modified: summary.modified,
            upserted: summary.upserted,
        }
    }
}

/// One typed operation of a bulk write
#[derive(Debug, Clone)]
pub enum BulkOperation<T> {
    InsertOne(T),
    UpdateOne {
        filter: Document,
        update: Update,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Update,
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: T,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

/// Per-category counts of a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResult {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
}

/// Typed CRUD over one collection
pub struct Repository<T> {
    write: Arc<dyn StoreCollection>,
    read: Arc<dyn StoreCollection>,
    collection: String,
    options: RepositoryOptions,
    _model: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            write: self.write.clone(),
            read: self.read.clone(),
            collection: self.collection.clone(),
            options: self.options,
            _model: PhantomData,
        }
    }
}

impl<T: Model> Repository<T> {
    /// Repository for `T` in the collection `T` names
    pub fn new(router: &ConnectionRouter) -> Self {
        Self::with_collection(router, T::collection_name())
    }

    /// Reconcile the collection's indexes with `T::indexes()`.
    pub async fn ensure_model_indexes(&self, ctx: &CallContext) -> Result<ReconcileReport> {
        self.ensure_indexes(ctx, &T::indexes()).await
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Repository for `T` in an explicitly named collection
    pub fn with_collection(router: &ConnectionRouter, collection: &str) -> Self {
        Self {
            write: router.collection_for_write(collection),
            read: router.collection_for_read(collection),
            collection: collection.to_string(),
            options: RepositoryOptions::default(),
            _model: PhantomData,
        }
    }

    pub fn with_options(mut self, options: RepositoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn options(&self) -> RepositoryOptions {
        self.options
    }

    /// Write-connection collection handle
    pub fn write_collection(&self) -> &Arc<dyn StoreCollection> {
        &self.write
    }

    fn reader(&self, ctx: &CallContext) -> &Arc<dyn StoreCollection> {
        if ctx.in_transaction() {
            &self.write
        } else {
            &self.read
        }
    }

    /// Query matching documents.
    ///
    /// With a pagination: count matches on the read connection, initialise
    /// the pagination from its requested page/limit, record the total and
    /// fetch only that page.
    pub async fn find(
        &self,
        ctx: &CallContext,
        filter: Document,
        options: FindOptions,
        pagination: Option<&mut Pagination>,
    ) -> Result<Vec<T>> {
        let collection = self.reader(ctx).clone();
        let mut options = options;

        if let Some(pagination) = pagination {
            let offset = pagination.init(pagination.page(), pagination.limit())?;
            let total = self
                .run(ctx, "count", collection.count(&filter, &CountOptions::default(), ctx.session()))
                .await?;
            pagination.set_total(total);
            options.skip = Some(offset as u64);
            options.limit = Some(pagination.limit());
        }

        debug!(collection = %self.collection, skip = ?options.skip, limit = ?options.limit, "find");
        let documents = self
            .run(ctx, "find", collection.find(&filter, &options, ctx.session()))
            .await?;
        documents
            .into_iter()
            .map(|document| self.decode("find", document))
            .collect()
    }

    /// Query one page of matching documents.
    pub async fn find_page(
        &self,
        ctx: &CallContext,
        filter: Document,
        options: FindOptions,
        page: i64,
        limit: i64,
    ) -> Result<Paginated<T>> {
        let mut pagination = Pagination::new(page, limit);
        let items = self.find(ctx, filter, options, Some(&mut pagination)).await?;
        Ok(Paginated { items, pagination })
    }

    /// Fetch one matching document; `Error::NotFound` when none matches.
    pub async fn find_one(&self, ctx: &CallContext, filter: Document, options: FindOneOptions) -> Result<T> {
        let collection = self.reader(ctx).clone();
        let found = self
            .run(ctx, "find_one", collection.find_one(&filter, &options, ctx.session()))
            .await?;
        match found {
            Some(document) => self.decode("find_one", document),
            None => Err(Error::not_found("find_one", &self.collection)),
        }
    }

    /// Atomically update one document and return it (after the update, by default).
    pub async fn find_one_and_update(
        &self,
        ctx: &CallContext,
        filter: Document,
        update: Update,
        options: FindOneAndUpdateOptions,
    ) -> Result<T> {
        let update = update.into_document("find_one_and_update")?;
        let found = self
            .run(
                ctx,
                "find_one_and_update",
                self.write.find_one_and_update(&filter, &update, &options, ctx.session()),
            )
            .await?;
        match found {
            Some(document) => self.decode("find_one_and_update", document),
            None => Err(Error::not_found("find_one_and_update", &self.collection)),
        }
    }

    pub async fn insert_one(&self, ctx: &CallContext, model: &T) -> Result<()> {
        let document = self.encode(model)?;
        self.run(ctx, "insert_one", self.write.insert_one(&document, ctx.session()))
            .await
    }

    /// Insert every model. An empty slice succeeds without contacting the store.
    pub async fn insert_many(&self, ctx: &CallContext, models: &[T]) -> Result<()> {
        if models.is_empty() {
            return Ok(());
        }
        let documents = models
            .iter()
            .map(|model| self.encode(model))
            .collect::<Result<Vec<_>>>()?;
        self.run(
            ctx,
            "insert_many",
            self.write
                .insert_many(&documents, &InsertManyOptions::default(), ctx.session()),
        )
        .await?;
        Ok(())
    }

    pub async fn update_one(
        &self,
        ctx: &CallContext,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.update(ctx, "update_one", Scope::One, filter, update, options)
            .await
    }

    pub async fn update_many(
        &self,
        ctx: &CallContext,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.update(ctx, "update_many", Scope::Many, filter, update, options)
            .await
    }

    /// Set the given fields on the first matching document.
    pub async fn update_set_one(
        &self,
        ctx: &CallContext,
        filter: Document,
        fields: Document,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        self.update_one(ctx, filter, Update::Set(fields), options)
            .await
    }

    async fn update(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        scope: Scope,
        filter: Document,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateOutcome> {
        if self.options.hint_policy == HintPolicy::Required && options.hint.is_none() {
            return Err(Error::configuration(format!(
                "missing required index hint for {operation} on '{}'",
                self.collection
            )));
        }
        let update = update.into_document(operation)?;
        let summary = self
            .run(
                ctx,
                operation,
                self.write.update(&filter, &update, scope, &options, ctx.session()),
            )
            .await?;
        Ok(summary.into())
    }

    /// Delete every document matching `filter`; returns how many were removed.
    pub async fn delete_matching(
        &self,
        ctx: &CallContext,
        filter: Document,
        options: DeleteOptions,
    ) -> Result<u64> {
        self.run(
            ctx,
            "delete_matching",
            self.write.delete(&filter, Scope::Many, &options, ctx.session()),
        )
        .await
    }

    pub async fn count(&self, ctx: &CallContext, filter: Document, options: CountOptions) -> Result<u64> {
        let collection = self.reader(ctx).clone();
        self.run(ctx, "count", collection.count(&filter, &options, ctx.session()))
            .await
    }

    /// Run a heterogeneous batch on the write connection. An empty batch is a no-op.
    pub async fn bulk_write(
        &self,
        ctx: &CallContext,
        operations: Vec<BulkOperation<T>>,
        options: BulkWriteOptions,
    ) -> Result<BulkResult> {
        if operations.is_empty() {
            return Ok(BulkResult::default());
        }
        let models = operations
            .into_iter()
            .map(|operation| self.write_model(operation))
            .collect::<Result<Vec<_>>>()?;

        let summary = self
            .run(ctx, "bulk_write", self.write.bulk_write(&models, &options, ctx.session()))
            .await?;
        Ok(BulkResult {
            inserted: summary.inserted,
            matched: summary.matched,
            modified: summary.modified,
            deleted: summary.deleted,
            upserted: summary.upserted,
        })
    }

    /// Run an aggregation pipeline on the read connection and decode each result as `V`.
    pub async fn aggregate<V: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        pipeline: Vec<Document>,
        options: AggregateOptions,
    ) -> Result<Vec<V>> {
        let collection = self.reader(ctx).clone();
        let documents = self
            .run(ctx, "aggregate", collection.aggregate(&pipeline, &options, ctx.session()))
            .await?;
        documents
            .into_iter()
            .map(|document| {
                serde_json::from_value(Value::Object(document))
                    .map_err(|source| Error::decode("aggregate", &self.collection, source))
            })
            .collect()
    }

    /// Reconcile the collection's indexes with `desired` on the write connection.
    pub async fn ensure_indexes(
        &self,
        ctx: &CallContext,
        desired: &[IndexDescriptor],
    ) -> Result<ReconcileReport> {
        self.reconciler().reconcile(ctx, desired).await
    }

    /// Compute what `ensure_indexes` would change.
    pub async fn plan_indexes(&self, ctx: &CallContext, desired: &[IndexDescriptor]) -> Result<ReconcilePlan> {
        self.reconciler().plan(ctx, desired).await
    }

    fn reconciler(&self) -> IndexReconciler {
        IndexReconciler::new(self.write.clone())
    }

    async fn run<R>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        future: impl std::future::Future<Output = crate::store::StoreResult<R>>,
    ) -> Result<R> {
        ctx.run(operation, async {
            future
                .await
                .map_err(|source| Error::query(operation, &self.collection, source))
        })
        .await
    }

    fn write_model(&self, operation: BulkOperation<T>) -> Result<WriteModel> {
        Ok(match operation {
            BulkOperation::InsertOne(model) => WriteModel::InsertOne {
                document: self.encode(&model)?,
            },
            BulkOperation::UpdateOne { filter, update, upsert } => WriteModel::UpdateOne {
                filter,
                update: update.into_document("bulk_write")?,
                upsert,
            },
            BulkOperation::UpdateMany { filter, update, upsert } => WriteModel::UpdateMany {
                filter,
                update: update.into_document("bulk_write")?,
                upsert,
            },
            BulkOperation::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => WriteModel::ReplaceOne {
                filter,
                replacement: self.encode(&replacement)?,
                upsert,
            },
            BulkOperation::DeleteOne { filter } => WriteModel::DeleteOne { filter },
            BulkOperation::DeleteMany { filter } => WriteModel::DeleteMany { filter },
        })
    }

    fn encode(&self, model: &T) -> Result<Document> {
        match serde_json::to_value(model) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(Error::Encode {
                collection: self.collection.clone(),
                reason: "model must serialize to a JSON object".to_string(),
            }),
            Err(err) => Err(Error::Encode {
                collection: self.collection.clone(),
                reason: err.to_string(),
            }),
        }
    }

    fn decode(&self, operation: &'static str, document: Document) -> Result<T> {
        serde_json::from_value(Value::Object(document))
            .map_err(|source| Error::decode(operation, &self.collection, source))
    }
}
