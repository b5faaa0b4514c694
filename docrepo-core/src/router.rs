//! Connection router
//!
//! Owns the write connection (primary read preference) and the read
//! connection (secondary-preferred when the split is enabled, otherwise the
//! write connection itself). Construction connects and pings both sides and
//! fails fast naming the side that failed.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{redact, RouterConfig};
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::store::{
    ConnectOptions, Connection, ConnectionRole, Connector, ReadPreference, StoreCollection,
    StoreError,
};
use crate::transaction::TransactionCoordinator;

/// Write/read connection pair for one logical database
#[derive(Clone)]
pub struct ConnectionRouter {
    write: Arc<dyn Connection>,
    read: Arc<dyn Connection>,
    database: String,
    split: bool,
}

impl ConnectionRouter {
    /// Validate `config`, connect both sides and health-check them.
    pub async fn connect(config: RouterConfig, connector: &dyn Connector) -> Result<Self> {
        config.validate()?;

        let write = open(&config, connector, ConnectionRole::Write).await?;
        let read = if config.split_read_write {
            open(&config, connector, ConnectionRole::Read).await?
        } else {
            write.clone()
        };

        info!(
            database = %config.database_name,
            write = %redact(&config.write_target),
            read = %redact(config.effective_read_target()),
            split = config.split_read_write,
            "connection router ready"
        );

        Ok(Self {
            write,
            read,
            database: config.database_name,
            split: config.split_read_write,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    /// True when reads use their own secondary-preferring connection
    pub fn is_split(&self) -> bool {
        self.split
    }

    /// Collection handle on the write connection
    pub fn collection_for_write(&self, name: &str) -> Arc<dyn StoreCollection> {
        self.write.collection(&self.database, name)
    }

    /// Collection handle on the read connection
    pub fn collection_for_read(&self, name: &str) -> Arc<dyn StoreCollection> {
        self.read.collection(&self.database, name)
    }

    pub fn write_connection(&self) -> &Arc<dyn Connection> {
        &self.write
    }

    pub fn read_connection(&self) -> &Arc<dyn Connection> {
        &self.read
    }

    /// Coordinator running transactions on the write connection
    pub fn transactions(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self.write.clone())
    }

    /// Re-check reachability of both sides.
    pub async fn ping(&self, ctx: &CallContext) -> Result<()> {
        ping_side(ctx, &self.write, ConnectionRole::Write).await?;
        if self.split {
            ping_side(ctx, &self.read, ConnectionRole::Read).await?;
        }
        Ok(())
    }
}

async fn open(
    config: &RouterConfig,
    connector: &dyn Connector,
    role: ConnectionRole,
) -> Result<Arc<dyn Connection>> {
    let (target, read_preference) = match role {
        ConnectionRole::Write => (config.write_target.as_str(), ReadPreference::Primary),
        ConnectionRole::Read => (config.effective_read_target(), ReadPreference::SecondaryPreferred),
    };
    let options = ConnectOptions {
        role,
        read_preference,
        connect_timeout: config.connect_timeout,
        observer: config.observability_hook.clone(),
    };

    let ctx = CallContext::background().with_timeout(config.connect_timeout);
    let connection = ctx
        .run("connect", async {
            connector
                .connect(target, options)
                .await
                .map_err(|source| Error::Connectivity { side: role, source })
        })
        .await
        .map_err(|err| timed_out(err, role, config.connect_timeout))?;

    ping_side(&ctx, &connection, role)
        .await
        .map_err(|err| timed_out(err, role, config.connect_timeout))?;
    Ok(connection)
}

async fn ping_side(ctx: &CallContext, connection: &Arc<dyn Connection>, role: ConnectionRole) -> Result<()> {
    ctx.run("ping", async {
        connection
            .ping()
            .await
            .map_err(|source| Error::Connectivity { side: role, source })
    })
    .await
}

fn timed_out(err: Error, role: ConnectionRole, timeout: Duration) -> Error {
    match err {
        Error::Timeout { operation } => Error::Connectivity {
            side: role,
            source: StoreError::Unreachable(format!("{operation} did not finish within {timeout:?}")),
        },
        other => other,
    }
}
