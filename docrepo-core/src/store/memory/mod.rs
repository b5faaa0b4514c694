//! In-process document store
//!
//! Every `memory://` target opened through one [`MemoryConnector`] talks to
//! the same [`MemoryServer`], so a split router sees one data set behind two
//! connections just like a replica set. The server records every command in
//! a journal and supports one-shot fault injection, artificial latency and
//! unreachable targets, which is what the test-suite drives it with.
//!
//! Transactions stage a copy of each touched collection inside the session.
//! Commit installs the staged copies (last commit wins per collection);
//! abort, end and drop discard them.

mod query;

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::index::{IndexDescriptor, IndexInfo, PRIMARY_KEY_INDEX};
use crate::observe::{CommandEvent, CommandObserver, CommandOutcome};
use crate::options::{
    AggregateOptions, BulkWriteOptions, CountOptions, DeleteOptions, Document,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, Hint, InsertManyOptions, ReturnDocument,
    UpdateOptions,
};
use crate::store::{
    BulkWriteSummary, ConnectOptions, Connection, ConnectionRole, Connector, ReadPreference, Scope,
    SessionHandle, StoreCollection, StoreError, StoreResult, StoreSession, UpdateSummary,
    WriteModel,
};

/// Scheme every in-memory target must use
pub const MEMORY_SCHEME: &str = "memory://";

type Namespace = (String, String);

/// One command as the server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub role: ConnectionRole,
    pub command: String,
    pub database: String,
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct CollectionState {
    created: bool,
    documents: Vec<Document>,
    indexes: BTreeMap<String, IndexInfo>,
}

#[derive(Default)]
struct ServerState {
    collections: HashMap<Namespace, CollectionState>,
    journal: Vec<CommandRecord>,
    faults: Vec<(String, StoreError)>,
    latency: Duration,
    unreachable: HashSet<String>,
    open_sessions: usize,
}

/// Shared state behind every in-memory connection
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command executed so far, oldest first
    pub fn journal(&self) -> Vec<CommandRecord> {
        self.state.lock().journal.clone()
    }

    /// Command names of the journal, oldest first
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .journal
            .iter()
            .map(|record| record.command.clone())
            .collect()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Fail the next execution of `command` with a backend error.
    pub fn fail_on(&self, command: &str) {
        self.fail_with(
            command,
            StoreError::Backend(format!("injected failure on {command}").into()),
        );
    }

    /// Fail the next execution of `command` with `error`.
    pub fn fail_with(&self, command: &str, error: StoreError) {
        self.state.lock().faults.push((command.to_string(), error));
    }

    /// Delay every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Refuse connections and commands for `target` until marked reachable again.
    pub fn mark_unreachable(&self, target: &str) {
        self.state.lock().unreachable.insert(target.to_string());
    }

    pub fn mark_reachable(&self, target: &str) {
        self.state.lock().unreachable.remove(target);
    }

    /// Sessions started and not yet ended or dropped
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    /// Committed documents of one collection, in insertion order
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(&namespace(database, collection))
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }

    /// Index names of one collection, `_id_` included once the collection exists
    pub fn index_names(&self, database: &str, collection: &str) -> Vec<String> {
        self.state
            .lock()
            .collections
            .get(&namespace(database, collection))
            .map(|state| state.list_indexes().into_iter().map(|info| info.name).collect())
            .unwrap_or_default()
    }

    fn is_unreachable(&self, target: &str) -> bool {
        self.state.lock().unreachable.contains(target)
    }

    /// Journal the command and report the latency to apply before running it.
    fn admit(
        &self,
        target: &str,
        role: ConnectionRole,
        command: &str,
        database: &str,
        collection: Option<&str>,
    ) -> StoreResult<Duration> {
        let mut state = self.state.lock();
        if state.unreachable.contains(target) {
            return Err(StoreError::Unreachable(format!("{target} is not answering")));
        }
        state.journal.push(CommandRecord {
            role,
            command: command.to_string(),
            database: database.to_string(),
            collection: collection.map(str::to_string),
        });
        Ok(state.latency)
    }

    fn take_fault(&self, command: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        match state.faults.iter().position(|(name, _)| name == command) {
            Some(position) => Err(state.faults.remove(position).1),
            None => Ok(()),
        }
    }

    fn with_collection<R>(
        &self,
        namespace: &Namespace,
        op: impl FnOnce(&mut CollectionState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut state = self.state.lock();
        op(state.collections.entry(namespace.clone()).or_default())
    }

    fn snapshot(&self, namespace: &Namespace) -> CollectionState {
        self.state
            .lock()
            .collections
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    fn install(&self, staged: HashMap<Namespace, CollectionState>) {
        let mut state = self.state.lock();
        for (namespace, collection) in staged {
            state.collections.insert(namespace, collection);
        }
    }

    fn session_opened(&self) {
        self.state.lock().open_sessions += 1;
    }

    fn session_closed(&self) {
        let mut state = self.state.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

fn acknowledged() -> std::future::Ready<StoreResult<()>> {
    std::future::ready(Ok(()))
}

fn namespace(database: &str, collection: &str) -> Namespace {
    (database.to_string(), collection.to_string())
}

/// Opens connections to the shared [`MemoryServer`]
#[derive(Clone, Default)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(server: MemoryServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &str, options: ConnectOptions) -> StoreResult<Arc<dyn Connection>> {
        if !target.starts_with(MEMORY_SCHEME) {
            return Err(StoreError::InvalidRequest(format!(
                "unsupported target '{target}', expected {MEMORY_SCHEME}<name>"
            )));
        }
        if self.server.is_unreachable(target) {
            return Err(StoreError::Unreachable(format!("{target} is not answering")));
        }
        debug!(uri = %target, role = %options.role, "opened in-memory connection");
        Ok(Arc::new(MemoryConnection {
            channel: Channel {
                server: self.server.clone(),
                target: target.to_string(),
                role: options.role,
                observer: options.observer,
            },
            read_preference: options.read_preference,
        }))
    }
}

/// Command path shared by a connection, its collections and its sessions
#[derive(Clone)]
struct Channel {
    server: MemoryServer,
    target: String,
    role: ConnectionRole,
    observer: Option<Arc<dyn CommandObserver>>,
}

impl Channel {
    async fn execute<R, F>(
        &self,
        command: &'static str,
        database: &str,
        collection: Option<&str>,
        op: F,
    ) -> StoreResult<R>
    where
        F: Future<Output = StoreResult<R>> + Send,
        R: Send,
    {
        let started = Instant::now();
        let result = match self.admit(command, database, collection).await {
            Ok(()) => op.await,
            Err(err) => Err(err),
        };
        self.observe(command, database, collection, started.elapsed(), &result);
        result
    }

    async fn admit(&self, command: &str, database: &str, collection: Option<&str>) -> StoreResult<()> {
        let latency = self
            .server
            .admit(&self.target, self.role, command, database, collection)?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.server.take_fault(command)
    }

    fn observe<R>(
        &self,
        command: &str,
        database: &str,
        collection: Option<&str>,
        duration: Duration,
        result: &StoreResult<R>,
    ) {
        let Some(observer) = &self.observer else {
            return;
        };
        observer.on_command(&CommandEvent {
            role: self.role,
            command: command.to_string(),
            database: Some(database.to_string()),
            collection: collection.map(str::to_string),
            duration,
            outcome: match result {
                Ok(_) => CommandOutcome::Succeeded,
                Err(err) => CommandOutcome::Failed(err.to_string()),
            },
        });
    }
}

struct MemoryConnection {
    channel: Channel,
    read_preference: ReadPreference,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn role(&self) -> ConnectionRole {
        self.channel.role
    }

    fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }

    async fn ping(&self) -> StoreResult<()> {
        self.channel
            .execute("ping", "admin", None, acknowledged())
            .await
    }

    fn collection(&self, database: &str, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(MemoryCollection {
            channel: self.channel.clone(),
            namespace: namespace(database, name),
        })
    }

    async fn start_session(&self) -> StoreResult<Box<dyn StoreSession>> {
        self.channel
            .execute("startSession", "admin", None, acknowledged())
            .await?;
        Ok(Box::new(MemorySession::open(self.channel.clone())))
    }
}

/// Session over the in-memory server
pub struct MemorySession {
    channel: Channel,
    staged: HashMap<Namespace, CollectionState>,
    in_transaction: bool,
    ended: bool,
}

impl MemorySession {
    fn open(channel: Channel) -> Self {
        channel.server.session_opened();
        Self {
            channel,
            staged: HashMap::new(),
            in_transaction: false,
            ended: false,
        }
    }

    fn apply<R>(
        &mut self,
        namespace: &Namespace,
        op: impl FnOnce(&mut CollectionState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        if self.ended {
            return Err(StoreError::Transaction("session has ended".to_string()));
        }
        if !self.in_transaction {
            return self.channel.server.with_collection(namespace, op);
        }
        let staged = match self.staged.entry(namespace.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let snapshot = self.channel.server.snapshot(entry.key());
                entry.insert(snapshot)
            }
        };
        op(staged)
    }

    fn release(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.in_transaction = false;
        self.staged.clear();
        self.channel.server.session_closed();
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn start_transaction(&mut self) -> StoreResult<()> {
        if self.ended {
            return Err(StoreError::Transaction("session has ended".to_string()));
        }
        if self.in_transaction {
            return Err(StoreError::Transaction("transaction already in progress".to_string()));
        }
        self.staged.clear();
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no transaction in progress".to_string()));
        }
        self.channel
            .execute("commitTransaction", "admin", None, acknowledged())
            .await?;
        let staged = std::mem::take(&mut self.staged);
        self.in_transaction = false;
        self.channel.server.install(staged);
        Ok(())
    }

    async fn abort_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction {
            return Err(StoreError::Transaction("no transaction in progress".to_string()));
        }
        self.staged.clear();
        self.in_transaction = false;
        self.channel
            .execute("abortTransaction", "admin", None, acknowledged())
            .await
    }

    async fn end(&mut self) {
        self.release();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

struct MemoryCollection {
    channel: Channel,
    namespace: Namespace,
}

impl MemoryCollection {
    async fn run<R, F>(
        &self,
        command: &'static str,
        session: Option<&SessionHandle>,
        op: F,
    ) -> StoreResult<R>
    where
        F: FnOnce(&mut CollectionState) -> StoreResult<R> + Send,
        R: Send,
    {
        let (database, name) = &self.namespace;
        self.channel
            .execute(command, database, Some(name.as_str()), self.apply(session, op))
            .await
    }

    async fn apply<R, F>(&self, session: Option<&SessionHandle>, op: F) -> StoreResult<R>
    where
        F: FnOnce(&mut CollectionState) -> StoreResult<R> + Send,
        R: Send,
    {
        match session {
            None => self.channel.server.with_collection(&self.namespace, op),
            Some(handle) => {
                let mut guard = handle.lock().await;
                let session = guard
                    .as_any_mut()
                    .downcast_mut::<MemorySession>()
                    .ok_or_else(|| {
                        StoreError::InvalidRequest(
                            "session was not started by the in-memory store".to_string(),
                        )
                    })?;
                session.apply(&self.namespace, op)
            }
        }
    }
}

#[async_trait]
impl StoreCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.namespace.1
    }

    async fn find(
        &self,
        filter: &Document,
        options: &FindOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>> {
        self.run("find", session, |state| {
            state.check_hint(options.hint.as_ref())?;
            let limit = options
                .limit
                .filter(|limit| *limit != 0)
                .map(|limit| limit.unsigned_abs());
            let found = state.select(filter, options.sort.as_ref(), options.skip.unwrap_or(0), limit)?;
            shape_all(found, options.projection.as_ref())
        })
        .await
    }

    async fn find_one(
        &self,
        filter: &Document,
        options: &FindOneOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Option<Document>> {
        self.run("find", session, |state| {
            state.check_hint(options.hint.as_ref())?;
            let found = state.select(filter, options.sort.as_ref(), options.skip.unwrap_or(0), Some(1))?;
            found
                .into_iter()
                .next()
                .map(|document| shape(document, options.projection.as_ref()))
                .transpose()
        })
        .await
    }

    async fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Option<Document>> {
        self.run("findAndModify", session, |state| {
            state.find_one_and_update(filter, update, options)
        })
        .await
    }

    async fn insert_one(&self, document: &Document, session: Option<&SessionHandle>) -> StoreResult<()> {
        self.run("insert", session, |state| state.insert(document.clone()).map(|_| ()))
            .await
    }

    async fn insert_many(
        &self,
        documents: &[Document],
        options: &InsertManyOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64> {
        self.run("insert", session, |state| {
            let mut inserted = 0;
            let mut first_error = None;
            for document in documents {
                match state.insert(document.clone()) {
                    Ok(_) => inserted += 1,
                    Err(err) if options.ordered => return Err(err),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(inserted),
            }
        })
        .await
    }

    async fn update(
        &self,
        filter: &Document,
        update: &Document,
        scope: Scope,
        options: &UpdateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateSummary> {
        self.run("update", session, |state| {
            state.check_hint(options.hint.as_ref())?;
            state.update(filter, update, scope, options.upsert)
        })
        .await
    }

    async fn delete(
        &self,
        filter: &Document,
        scope: Scope,
        options: &DeleteOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64> {
        self.run("delete", session, |state| {
            state.check_hint(options.hint.as_ref())?;
            state.delete(filter, scope)
        })
        .await
    }

    async fn count(
        &self,
        filter: &Document,
        options: &CountOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64> {
        self.run("count", session, |state| {
            state.check_hint(options.hint.as_ref())?;
            let limit = options.limit.filter(|limit| *limit != 0);
            let found = state.matching(filter, None)?.len() as u64;
            let remaining = found.saturating_sub(options.skip.unwrap_or(0));
            Ok(limit.map_or(remaining, |limit| remaining.min(limit)))
        })
        .await
    }

    async fn aggregate(
        &self,
        pipeline: &[Document],
        options: &AggregateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>> {
        self.run("aggregate", session, |state| {
            state.check_hint(options.hint.as_ref())?;
            query::aggregate(state.documents.clone(), pipeline)
        })
        .await
    }

    async fn bulk_write(
        &self,
        operations: &[WriteModel],
        options: &BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<BulkWriteSummary> {
        self.run("bulkWrite", session, |state| {
            let mut summary = BulkWriteSummary::default();
            let mut first_error = None;
            for operation in operations {
                if let Err(err) = state.apply_write(operation, &mut summary) {
                    if options.ordered {
                        return Err(err);
                    }
                    first_error.get_or_insert(err);
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(summary),
            }
        })
        .await
    }

    async fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        self.run("listIndexes", None, |state| Ok(state.list_indexes()))
            .await
    }

    async fn create_index(&self, index: &IndexDescriptor) -> StoreResult<()> {
        self.run("createIndexes", None, |state| state.create_index(index))
            .await
    }

    async fn drop_index(&self, name: &str) -> StoreResult<()> {
        self.run("dropIndexes", None, |state| state.drop_index(name))
            .await
    }
}

fn shape(document: Document, projection: Option<&Document>) -> StoreResult<Document> {
    match projection {
        Some(projection) => query::project(&document, projection),
        None => Ok(document),
    }
}

fn shape_all(documents: Vec<Document>, projection: Option<&Document>) -> StoreResult<Vec<Document>> {
    documents
        .into_iter()
        .map(|document| shape(document, projection))
        .collect()
}

fn primary_key_index() -> IndexInfo {
    IndexDescriptor::new(PRIMARY_KEY_INDEX).ascending("_id").to_info()
}

fn keys_equal(a: &Document, b: &Document) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|((field_a, x), (field_b, y))| field_a == field_b && query::values_equal(x, y))
}

/// Key tuple of `document` under `index`; `None` when a sparse index skips it.
fn index_key(index: &IndexInfo, document: &Document) -> Option<Vec<Value>> {
    let values: Vec<Option<&Value>> = index
        .keys
        .keys()
        .map(|field| query::get_path(document, field))
        .collect();
    if index.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|value| value.cloned().unwrap_or(Value::Null))
            .collect(),
    )
}

fn tuples_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| query::values_equal(x, y))
}

impl CollectionState {
    fn list_indexes(&self) -> Vec<IndexInfo> {
        if !self.created {
            return Vec::new();
        }
        std::iter::once(primary_key_index())
            .chain(self.indexes.values().cloned())
            .collect()
    }

    fn check_hint(&self, hint: Option<&Hint>) -> StoreResult<()> {
        let Some(hint) = hint else {
            return Ok(());
        };
        let known = match hint {
            Hint::Name(name) => name == PRIMARY_KEY_INDEX || self.indexes.contains_key(name),
            Hint::Keys(keys) => {
                keys_equal(keys, &primary_key_index().keys)
                    || self.indexes.values().any(|info| keys_equal(&info.keys, keys))
            }
        };
        if known {
            Ok(())
        } else {
            Err(StoreError::InvalidRequest(
                "hint does not correspond to an existing index".to_string(),
            ))
        }
    }

    /// Positions of matching documents, in sort order when `sort` is given.
    fn matching(&self, filter: &Document, sort: Option<&Document>) -> StoreResult<Vec<usize>> {
        let mut found: Vec<(usize, &Document)> = Vec::new();
        for (position, document) in self.documents.iter().enumerate() {
            if query::matches(document, filter)? {
                found.push((position, document));
            }
        }
        if let Some(sort) = sort {
            query::sort_by_spec(&mut found, sort, |entry| entry.1)?;
        }
        Ok(found.into_iter().map(|(position, _)| position).collect())
    }

    fn select(
        &self,
        filter: &Document,
        sort: Option<&Document>,
        skip: u64,
        limit: Option<u64>,
    ) -> StoreResult<Vec<Document>> {
        let take = limit.map_or(usize::MAX, |limit| limit as usize);
        Ok(self
            .matching(filter, sort)?
            .into_iter()
            .skip(skip as usize)
            .take(take)
            .map(|position| self.documents[position].clone())
            .collect())
    }

    fn check_unique(&self, candidate: &Document, skip: Option<usize>) -> StoreResult<()> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(position, _)| Some(*position) != skip)
                .map(|(_, document)| document)
        };

        if let Some(id) = candidate.get("_id") {
            let taken = others().any(|document| {
                document
                    .get("_id")
                    .is_some_and(|other| query::values_equal(other, id))
            });
            if taken {
                return Err(StoreError::DuplicateKey(format!(
                    "index {PRIMARY_KEY_INDEX} dup key: {{ _id: {id} }}"
                )));
            }
        }

        for index in self.indexes.values().filter(|index| index.unique) {
            let Some(key) = index_key(index, candidate) else {
                continue;
            };
            let taken = others().any(|document| {
                index_key(index, document).is_some_and(|other| tuples_equal(&key, &other))
            });
            if taken {
                return Err(StoreError::DuplicateKey(format!(
                    "index {} dup key: {}",
                    index.name,
                    Value::Array(key)
                )));
            }
        }
        Ok(())
    }

    /// Store a document, generating an `_id` when missing. Returns its position.
    fn insert(&mut self, document: Document) -> StoreResult<usize> {
        let document = if document.contains_key("_id") {
            document
        } else {
            let mut with_id = Document::new();
            with_id.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
            with_id.extend(document);
            with_id
        };
        self.check_unique(&document, None)?;
        self.created = true;
        self.documents.push(document);
        Ok(self.documents.len() - 1)
    }

    fn update(
        &mut self,
        filter: &Document,
        update: &Document,
        scope: Scope,
        upsert: bool,
    ) -> StoreResult<UpdateSummary> {
        let mut positions = self.matching(filter, None)?;
        if scope == Scope::One {
            positions.truncate(1);
        }

        let mut summary = UpdateSummary::default();
        for position in positions {
            let mut updated = self.documents[position].clone();
            let changed = query::apply_update(&mut updated, update, false)?;
            summary.matched += 1;
            if changed {
                self.check_unique(&updated, Some(position))?;
                self.documents[position] = updated;
                summary.modified += 1;
            }
        }

        if summary.matched == 0 && upsert {
            let mut document = query::upsert_seed(filter)?;
            query::apply_update(&mut document, update, true)?;
            self.insert(document)?;
            summary.upserted = 1;
        }
        Ok(summary)
    }

    fn replace(&mut self, filter: &Document, replacement: &Document, upsert: bool) -> StoreResult<UpdateSummary> {
        if replacement.keys().any(|key| key.starts_with('$')) {
            return Err(StoreError::InvalidRequest(
                "replacement documents cannot contain update operators".to_string(),
            ));
        }
        let Some(position) = self.matching(filter, None)?.into_iter().next() else {
            if !upsert {
                return Ok(UpdateSummary::default());
            }
            let mut document = replacement.clone();
            if !document.contains_key("_id") {
                if let Some(id) = query::upsert_seed(filter)?.remove("_id") {
                    document.insert("_id".to_string(), id);
                }
            }
            self.insert(document)?;
            return Ok(UpdateSummary {
                upserted: 1,
                ..UpdateSummary::default()
            });
        };

        let existing = &self.documents[position];
        let mut replaced = Document::new();
        if let Some(id) = existing.get("_id") {
            if replacement
                .get("_id")
                .is_some_and(|new_id| !query::values_equal(new_id, id))
            {
                return Err(StoreError::InvalidRequest("the _id field is immutable".to_string()));
            }
            replaced.insert("_id".to_string(), id.clone());
        }
        for (field, value) in replacement {
            if field != "_id" {
                replaced.insert(field.clone(), value.clone());
            }
        }

        let changed = replaced != *existing;
        if changed {
            self.check_unique(&replaced, Some(position))?;
            self.documents[position] = replaced;
        }
        Ok(UpdateSummary {
            matched: 1,
            modified: u64::from(changed),
            upserted: 0,
        })
    }

    fn delete(&mut self, filter: &Document, scope: Scope) -> StoreResult<u64> {
        let mut positions = self.matching(filter, None)?;
        if scope == Scope::One {
            positions.truncate(1);
        }
        for position in positions.iter().rev() {
            self.documents.remove(*position);
        }
        Ok(positions.len() as u64)
    }

    fn find_one_and_update(
        &mut self,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
    ) -> StoreResult<Option<Document>> {
        self.check_hint(options.hint.as_ref())?;
        let position = self
            .matching(filter, options.sort.as_ref())?
            .into_iter()
            .next();

        let (before, after) = match position {
            Some(position) => {
                let before = self.documents[position].clone();
                let mut after = before.clone();
                if query::apply_update(&mut after, update, false)? {
                    self.check_unique(&after, Some(position))?;
                    self.documents[position] = after.clone();
                }
                (Some(before), after)
            }
            None if options.upsert => {
                let mut document = query::upsert_seed(filter)?;
                query::apply_update(&mut document, update, true)?;
                let position = self.insert(document)?;
                (None, self.documents[position].clone())
            }
            None => return Ok(None),
        };

        let chosen = match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => Some(after),
        };
        chosen
            .map(|document| shape(document, options.projection.as_ref()))
            .transpose()
    }

    fn apply_write(&mut self, operation: &WriteModel, summary: &mut BulkWriteSummary) -> StoreResult<()> {
        match operation {
            WriteModel::InsertOne { document } => {
                self.insert(document.clone())?;
                summary.inserted += 1;
            }
            WriteModel::UpdateOne { filter, update, upsert } => {
                let outcome = self.update(filter, update, Scope::One, *upsert)?;
                absorb(summary, outcome);
            }
            WriteModel::UpdateMany { filter, update, upsert } => {
                let outcome = self.update(filter, update, Scope::Many, *upsert)?;
                absorb(summary, outcome);
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let outcome = self.replace(filter, replacement, *upsert)?;
                absorb(summary, outcome);
            }
            WriteModel::DeleteOne { filter } => {
                summary.deleted += self.delete(filter, Scope::One)?;
            }
            WriteModel::DeleteMany { filter } => {
                summary.deleted += self.delete(filter, Scope::Many)?;
            }
        }
        Ok(())
    }

    fn create_index(&mut self, descriptor: &IndexDescriptor) -> StoreResult<()> {
        let info = descriptor.to_info();
        if info.name == PRIMARY_KEY_INDEX {
            return Err(StoreError::InvalidRequest(
                "the _id_ index is created by the store".to_string(),
            ));
        }
        if let Some(existing) = self.indexes.get(&info.name) {
            if existing.same_definition(&info) {
                return Ok(());
            }
            return Err(StoreError::IndexConflict(format!(
                "an index named '{}' already exists with a different definition",
                info.name
            )));
        }
        if let Some(existing) = self
            .indexes
            .values()
            .find(|existing| keys_equal(&existing.keys, &info.keys))
        {
            return Err(StoreError::IndexConflict(format!(
                "index '{}' already covers the keys of '{}'",
                existing.name, info.name
            )));
        }
        if info.unique {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            for document in &self.documents {
                let Some(key) = index_key(&info, document) else {
                    continue;
                };
                if seen.iter().any(|other| tuples_equal(other, &key)) {
                    return Err(StoreError::DuplicateKey(format!(
                        "cannot build unique index '{}': dup key {}",
                        info.name,
                        Value::Array(key)
                    )));
                }
                seen.push(key);
            }
        }
        self.created = true;
        self.indexes.insert(info.name.clone(), info);
        Ok(())
    }

    fn drop_index(&mut self, name: &str) -> StoreResult<()> {
        if name == PRIMARY_KEY_INDEX {
            return Err(StoreError::InvalidRequest("cannot drop the _id_ index".to_string()));
        }
        match self.indexes.remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::IndexNotFound(format!("index '{name}' not found"))),
        }
    }
}

fn absorb(summary: &mut BulkWriteSummary, outcome: UpdateSummary) {
    summary.matched += outcome.matched;
    summary.modified += outcome.modified;
    summary.upserted += outcome.upserted;
}
