//! Contains the events and functionality for monitoring the commands executed by a client.

use std::time::Duration;

use derive_more::From;

use crate::{bson::Document, error::Error, options::ServerAddress};

/// An event that triggers when a database command is initiated.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The command being run. The bodies of security-sensitive commands are replaced with an
    /// empty document.
    pub command: Document,

    /// The name of the database the command is being run against.
    pub db: String,

    /// The type of command being run, e.g. "insert" or "ping".
    pub command_name: String,

    /// The client-generated identifier for the request. Applications can use this to identify the
    /// corresponding event triggered by the completion of this command (i.e. either
    /// `CommandSucceededEvent` or `CommandFailedEvent`).
    pub request_id: i32,

    /// The address of the server the command is sent to.
    pub address: ServerAddress,
}

/// An event that triggers when a database command completes without an error.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// The time spent waiting for the server, including the network round-trip. Server selection
    /// and message building are not included.
    pub duration: Duration,

    /// The server's reply to the command. `{ ok: 1 }` for unacknowledged writes.
    pub reply: Document,

    /// The type of command that was run, e.g. "insert" or "ping".
    pub command_name: String,

    /// The client-generated identifier for the request. Applications can use this to identify the
    /// corresponding `CommandStartedEvent` that triggered earlier.
    pub request_id: i32,

    /// The address of the server the command was sent to.
    pub address: ServerAddress,
}

/// An event that triggers when a command failed to complete successfully.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// The time spent waiting for the server, including the network round-trip.
    pub duration: Duration,

    /// The type of command that was run, e.g. "insert" or "ping".
    pub command_name: String,

    /// The error that the command failed with. Its [`kind`](Error::kind) classifies the failure
    /// and its `Display` output describes it.
    pub failure: Error,

    /// The client-generated identifier for the request. Applications can use this to identify the
    /// corresponding `CommandStartedEvent` that triggered earlier.
    pub request_id: i32,

    /// The address of the server the command was sent to.
    pub address: ServerAddress,
}

/// An event emitted around the dispatch of a command.
#[derive(Clone, Debug, From)]
#[allow(clippy::large_enum_variant)]
#[non_exhaustive]
pub enum CommandEvent {
    /// A command was sent.
    Started(CommandStartedEvent),
    /// A command completed successfully.
    Succeeded(CommandSucceededEvent),
    /// A command failed.
    Failed(CommandFailedEvent),
}

impl CommandEvent {
    /// The identifier of the request the event belongs to.
    pub fn request_id(&self) -> i32 {
        match self {
            CommandEvent::Started(event) => event.request_id,
            CommandEvent::Failed(event) => event.request_id,
            CommandEvent::Succeeded(event) => event.request_id,
        }
    }

    /// The name of the command the event belongs to.
    pub fn command_name(&self) -> &str {
        match self {
            CommandEvent::Started(event) => event.command_name.as_str(),
            CommandEvent::Failed(event) => event.command_name.as_str(),
            CommandEvent::Succeeded(event) => event.command_name.as_str(),
        }
    }

    /// The address of the server the command was sent to.
    pub fn address(&self) -> &ServerAddress {
        match self {
            CommandEvent::Started(event) => &event.address,
            CommandEvent::Failed(event) => &event.address,
            CommandEvent::Succeeded(event) => &event.address,
        }
    }

    /// Whether this event ends a command: a succeeded or failed event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandEvent::Started(_))
    }
}
