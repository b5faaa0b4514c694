use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use docrepo_core::store::{
    ConnectOptions, Connection, Connector, StoreCollection, StoreResult, StoreSession,
};
use docrepo_core::{
    CommandEvent, CommandObserver, CommandOutcome, ConnectionRole, ReadPreference, StoreError,
};
use mongodb::bson::{doc, Document};
use mongodb::event::command::CommandEvent as DriverEvent;
use mongodb::event::EventHandler;
use mongodb::options::{self, ClientOptions, SelectionCriteria};
use mongodb::Client;
use parking_lot::Mutex;
use tracing::debug;

use crate::collection::MongoCollection;
use crate::error::map_error;
use crate::session::MongoSession;

/// URI schemes accepted by [`MongoConnector`]
pub const MONGODB_SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

/// Opens MongoDB clients, one per router side.
#[derive(Debug, Clone, Default)]
pub struct MongoConnector {
    app_name: Option<String>,
}

impl MongoConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported to the server in connection metadata and logs.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Connector for MongoConnector {
    async fn connect(&self, target: &str, opts: ConnectOptions) -> StoreResult<Arc<dyn Connection>> {
        if !MONGODB_SCHEMES.iter().any(|scheme| target.starts_with(scheme)) {
            return Err(StoreError::InvalidRequest(format!(
                "unsupported connection string scheme (expected {})",
                MONGODB_SCHEMES.join(" or ")
            )));
        }

        let mut client_options = ClientOptions::parse(target).await.map_err(map_error)?;
        client_options.selection_criteria =
            Some(SelectionCriteria::ReadPreference(driver_preference(opts.read_preference)));
        client_options.connect_timeout = Some(opts.connect_timeout);
        client_options.server_selection_timeout = Some(opts.connect_timeout);
        if let Some(name) = &self.app_name {
            client_options.app_name = Some(name.clone());
        }
        if let Some(observer) = opts.observer.clone() {
            client_options.command_event_handler = Some(forward_events(opts.role, observer));
        }

        let client = Client::with_options(client_options).map_err(map_error)?;
        debug!(role = %opts.role, "mongodb client created");

        Ok(Arc::new(MongoConnection {
            client,
            role: opts.role,
            read_preference: opts.read_preference,
        }))
    }
}

fn driver_preference(preference: ReadPreference) -> options::ReadPreference {
    match preference {
        ReadPreference::Primary => options::ReadPreference::Primary,
        ReadPreference::SecondaryPreferred => options::ReadPreference::SecondaryPreferred {
            options: Default::default(),
        },
    }
}

/// Relay completed driver commands to the router's observer.
///
/// The database and collection come from the matching started event.
fn forward_events(role: ConnectionRole, observer: Arc<dyn CommandObserver>) -> EventHandler<DriverEvent> {
    let in_flight: Mutex<HashMap<i32, (String, Option<String>)>> = Mutex::default();
    EventHandler::callback(move |event: DriverEvent| {
        let (request_id, command, duration, outcome) = match event {
            DriverEvent::Started(started) => {
                let collection = target_collection(&started.command);
                in_flight
                    .lock()
                    .insert(started.request_id, (started.db, collection));
                return;
            }
            DriverEvent::Succeeded(done) => (
                done.request_id,
                done.command_name,
                done.duration,
                CommandOutcome::Succeeded,
            ),
            DriverEvent::Failed(failed) => (
                failed.request_id,
                failed.command_name,
                failed.duration,
                CommandOutcome::Failed(failed.failure.to_string()),
            ),
            _ => return,
        };
        let (database, collection) = match in_flight.lock().remove(&request_id) {
            Some((database, collection)) => (Some(database), collection),
            None => (None, None),
        };
        observer.on_command(&CommandEvent {
            role,
            command,
            database,
            collection,
            duration,
            outcome,
        });
    })
}

/// Collection named by a command's leading field, as in `{find: "users"}`
fn target_collection(command: &Document) -> Option<String> {
    command
        .iter()
        .next()
        .and_then(|(_, value)| value.as_str())
        .map(str::to_string)
}

/// One client with a fixed read preference
pub struct MongoConnection {
    client: Client,
    role: ConnectionRole,
    read_preference: ReadPreference,
}

#[async_trait]
impl Connection for MongoConnection {
    fn role(&self) -> ConnectionRole {
        self.role
    }

    fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }

    async fn ping(&self) -> StoreResult<()> {
        let criteria = SelectionCriteria::ReadPreference(driver_preference(self.read_preference));
        let _: Document = self
            .client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .selection_criteria(criteria)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    fn collection(&self, database: &str, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(MongoCollection::new(
            self.client.database(database).collection::<Document>(name),
        ))
    }

    async fn start_session(&self) -> StoreResult<Box<dyn StoreSession>> {
        let session = self.client.start_session().await.map_err(map_error)?;
        Ok(Box::new(MongoSession::new(session)))
    }
}
