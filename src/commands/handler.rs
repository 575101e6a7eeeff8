//! Command Dispatcher
//!
//! Receives decoded requests, executes them against the storage engine,
//! and returns the reply to send back.
//!
//! ## Supported Commands
//!
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds | EX seconds]` - Set a key
//! - `GET key` - Get a key's value
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Dispatcher                            │
//! │                                                             │
//! │  ┌──────────────────────┐        ┌─────────────┐            │
//! │  │ Command::from_request│───────>│  execute()  │            │
//! │  └──────────┬───────────┘        └──────┬──────┘            │
//! │             │ CommandError              │                   │
//! │             ▼                           ▼                   │
//! │        Reply::Error               StorageEngine             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::commands::command::Command;
use crate::protocol::{Reply, Request};
use crate::storage::StorageEngine;
use std::sync::Arc;
use tracing::trace;

/// Executes client requests against the shared store.
///
/// Cloning is cheap: every clone points at the same store.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    storage: Arc<StorageEngine>,
}

impl Dispatcher {
    /// Creates a new dispatcher over the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes a request and returns the reply.
    ///
    /// Invalid requests become error replies; they never reach the store.
    pub fn dispatch(&self, request: Request) -> Reply {
        match Command::from_request(request) {
            Ok(command) => self.execute(command),
            Err(err) => {
                trace!(error = %err, "Rejected command");
                err.into()
            }
        }
    }

    /// Executes an already validated command.
    pub fn execute(&self, command: Command) -> Reply {
        trace!(command = command.name(), "Executing command");

        match command {
            Command::Ping(None) => Reply::pong(),
            Command::Ping(Some(message)) => Reply::Bulk(message),
            Command::Echo(message) => Reply::Bulk(message),
            Command::Set { key, value, expiry } => {
                self.storage.set(key, value, expiry);
                Reply::ok()
            }
            Command::Get { key } => match self.storage.get(&key) {
                Some(value) => Reply::Bulk(value),
                None => Reply::Nil,
            },
        }
    }

    /// The store this dispatcher operates on.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }
}
