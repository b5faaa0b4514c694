use async_trait::async_trait;
use docrepo_core::store::{
    BulkWriteSummary, Scope, SessionHandle, StoreCollection, StoreResult, UpdateSummary,
    WriteModel,
};
use docrepo_core::{
    AggregateOptions, BulkWriteOptions, CountOptions, DeleteOptions, Document,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexDescriptor, IndexInfo,
    InsertManyOptions, StoreError, UpdateOptions,
};
use futures::TryStreamExt;
use mongodb::bson;
use mongodb::results::UpdateResult;
use mongodb::Collection;
use tracing::debug;

use crate::convert::{self, from_bson, to_bson, to_bson_all};
use crate::error::{map_error, server_code, NAMESPACE_NOT_FOUND};
use crate::session::client_session;

/// Runs a driver action inside the bound session, if any.
macro_rules! in_session {
    ($session:expr, $action:expr) => {
        match $session {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let session = client_session(&mut guard)?;
                $action.session(session).await
            }
            None => $action.await,
        }
        .map_err(map_error)
    };
}

/// A MongoDB collection of raw documents
pub struct MongoCollection {
    inner: Collection<bson::Document>,
    name: String,
}

impl MongoCollection {
    pub(crate) fn new(inner: Collection<bson::Document>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }

    async fn apply(
        &self,
        operation: &WriteModel,
        session: Option<&SessionHandle>,
        summary: &mut BulkWriteSummary,
    ) -> StoreResult<()> {
        match operation {
            WriteModel::InsertOne { document } => {
                let document = to_bson(document)?;
                in_session!(session, self.inner.insert_one(&document))?;
                summary.inserted += 1;
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => {
                let (filter, update) = (to_bson(filter)?, to_bson(update)?);
                let options = convert::upsert_options(*upsert);
                let result = in_session!(
                    session,
                    self.inner
                        .update_one(filter, update)
                        .with_options(options)
                )?;
                add_update(summary, &result);
            }
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => {
                let (filter, update) = (to_bson(filter)?, to_bson(update)?);
                let options = convert::upsert_options(*upsert);
                let result = in_session!(
                    session,
                    self.inner
                        .update_many(filter, update)
                        .with_options(options)
                )?;
                add_update(summary, &result);
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let (filter, replacement) = (to_bson(filter)?, to_bson(replacement)?);
                let options = convert::replace_options(*upsert);
                let result = in_session!(
                    session,
                    self.inner
                        .replace_one(filter, &replacement)
                        .with_options(options)
                )?;
                add_update(summary, &result);
            }
            WriteModel::DeleteOne { filter } => {
                let filter = to_bson(filter)?;
                let result = in_session!(session, self.inner.delete_one(filter))?;
                summary.deleted += result.deleted_count;
            }
            WriteModel::DeleteMany { filter } => {
                let filter = to_bson(filter)?;
                let result = in_session!(session, self.inner.delete_many(filter))?;
                summary.deleted += result.deleted_count;
            }
        }
        Ok(())
    }
}

fn add_update(summary: &mut BulkWriteSummary, result: &UpdateResult) {
    summary.matched += result.matched_count;
    summary.modified += result.modified_count;
    if result.upserted_id.is_some() {
        summary.upserted += 1;
    }
}

#[async_trait]
impl StoreCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(
        &self,
        filter: &Document,
        options: &FindOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>> {
        let filter = to_bson(filter)?;
        let options = convert::find_options(options)?;
        let action = self.inner.find(filter).with_options(options);

        let documents: Vec<bson::Document> = match session {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let session = client_session(&mut guard)?;
                let mut cursor = action.session(&mut *session).await.map_err(map_error)?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next(&mut *session).await {
                    documents.push(document.map_err(map_error)?);
                }
                documents
            }
            None => action
                .await
                .map_err(map_error)?
                .try_collect()
                .await
                .map_err(map_error)?,
        };
        Ok(documents.into_iter().map(from_bson).collect())
    }

    async fn find_one(
        &self,
        filter: &Document,
        options: &FindOneOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Option<Document>> {
        let filter = to_bson(filter)?;
        let options = convert::find_one_options(options)?;
        let found = in_session!(session, self.inner.find_one(filter).with_options(options))?;
        Ok(found.map(from_bson))
    }

    async fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Option<Document>> {
        let (filter, update) = (to_bson(filter)?, to_bson(update)?);
        let options = convert::find_one_and_update_options(options)?;
        let found = in_session!(
            session,
            self.inner
                .find_one_and_update(filter, update)
                .with_options(options)
        )?;
        Ok(found.map(from_bson))
    }

    async fn insert_one(&self, document: &Document, session: Option<&SessionHandle>) -> StoreResult<()> {
        let document = to_bson(document)?;
        in_session!(session, self.inner.insert_one(&document))?;
        Ok(())
    }

    async fn insert_many(
        &self,
        documents: &[Document],
        options: &InsertManyOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64> {
        let documents = to_bson_all(documents)?;
        let options = convert::insert_many_options(options);
        let result = in_session!(
            session,
            self.inner.insert_many(&documents).with_options(options)
        )?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn update(
        &self,
        filter: &Document,
        update: &Document,
        scope: Scope,
        options: &UpdateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateSummary> {
        let (filter, update) = (to_bson(filter)?, to_bson(update)?);
        let options = convert::update_options(options)?;
        let result = match scope {
            Scope::One => in_session!(
                session,
                self.inner
                    .update_one(filter, update)
                    .with_options(options)
            )?,
            Scope::Many => in_session!(
                session,
                self.inner
                    .update_many(filter, update)
                    .with_options(options)
            )?,
        };
        Ok(UpdateSummary {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: u64::from(result.upserted_id.is_some()),
        })
    }

    async fn delete(
        &self,
        filter: &Document,
        scope: Scope,
        options: &DeleteOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64> {
        let filter = to_bson(filter)?;
        let options = convert::delete_options(options)?;
        let result = match scope {
            Scope::One => in_session!(
                session,
                self.inner.delete_one(filter).with_options(options)
            )?,
            Scope::Many => in_session!(
                session,
                self.inner.delete_many(filter).with_options(options)
            )?,
        };
        Ok(result.deleted_count)
    }

    async fn count(
        &self,
        filter: &Document,
        options: &CountOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64> {
        let filter = to_bson(filter)?;
        let options = convert::count_options(options)?;
        in_session!(session, self.inner.count_documents(filter).with_options(options))
    }

    async fn aggregate(
        &self,
        pipeline: &[Document],
        options: &AggregateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>> {
        let pipeline = to_bson_all(pipeline)?;
        let options = convert::aggregate_options(options)?;
        let action = self.inner.aggregate(pipeline).with_options(options);

        let documents: Vec<bson::Document> = match session {
            Some(handle) => {
                let mut guard = handle.lock().await;
                let session = client_session(&mut guard)?;
                let mut cursor = action.session(&mut *session).await.map_err(map_error)?;
                let mut documents = Vec::new();
                while let Some(document) = cursor.next(&mut *session).await {
                    documents.push(document.map_err(map_error)?);
                }
                documents
            }
            None => action
                .await
                .map_err(map_error)?
                .try_collect()
                .await
                .map_err(map_error)?,
        };
        Ok(documents.into_iter().map(from_bson).collect())
    }

    async fn bulk_write(
        &self,
        operations: &[WriteModel],
        options: &BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<BulkWriteSummary> {
        let mut summary = BulkWriteSummary::default();
        let mut first_failure: Option<StoreError> = None;

        for (position, operation) in operations.iter().enumerate() {
            if let Err(err) = self.apply(operation, session, &mut summary).await {
                debug!(collection = %self.name, position, error = %err, "bulk operation failed");
                if options.ordered {
                    return Err(err);
                }
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        let cursor = match self.inner.list_indexes().await {
            Ok(cursor) => cursor,
            Err(err) if server_code(&err) == Some(NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
            Err(err) => return Err(map_error(err)),
        };
        let models: Vec<mongodb::IndexModel> = cursor.try_collect().await.map_err(map_error)?;
        Ok(models.into_iter().filter_map(convert::index_info).collect())
    }

    async fn create_index(&self, index: &IndexDescriptor) -> StoreResult<()> {
        let model = convert::index_model(index)?;
        self.inner.create_index(model).await.map_err(map_error)?;
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> StoreResult<()> {
        self.inner.drop_index(name).await.map_err(map_error)
    }
}
