//! Command observation hook
//!
//! Observers see every command a connection executes. They are pure
//! observers: nothing they do changes the outcome of the command.

use std::time::Duration;

use crate::store::ConnectionRole;

/// Outcome of one executed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed(String),
}

/// A command completed on one side of the router
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub role: ConnectionRole,
    /// Wire-level command name (`find`, `insert`, `createIndexes`, ...)
    pub command: String,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub duration: Duration,
    pub outcome: CommandOutcome,
}

/// Receives command events for metrics or logging
pub trait CommandObserver: Send + Sync {
    fn on_command(&self, event: &CommandEvent);
}

/// Emits each command as a `tracing` event on the `docrepo::command` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CommandObserver for TracingObserver {
    fn on_command(&self, event: &CommandEvent) {
        match &event.outcome {
            CommandOutcome::Succeeded => tracing::debug!(
                target: "docrepo::command",
                role = %event.role,
                command = %event.command,
                database = event.database.as_deref().unwrap_or("-"),
                collection = event.collection.as_deref().unwrap_or("-"),
                elapsed_us = event.duration.as_micros() as u64,
                "command succeeded"
            ),
            CommandOutcome::Failed(reason) => tracing::warn!(
                target: "docrepo::command",
                role = %event.role,
                command = %event.command,
                database = event.database.as_deref().unwrap_or("-"),
                collection = event.collection.as_deref().unwrap_or("-"),
                elapsed_us = event.duration.as_micros() as u64,
                error = %reason,
                "command failed"
            ),
        }
    }
}
