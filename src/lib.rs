//! This crate contains the operation execution core of a MongoDB client: the part of a driver
//! that sits between a high level API and the connections to the servers. It uses the [`bson`]
//! crate for BSON support and is fully async, built on [`tokio`].
//!
//! Given an [`Operation`](operation::Operation) (an insert, update, delete, or arbitrary
//! command), a [`Client`]:
//!
//! - selects a server for it from the latest [`Topology`](sdam::Topology) snapshot, always the
//!   primary for writes;
//! - renders it for the server's capabilities, as an OP_MSG with the write batch in a document
//!   sequence for servers that support it and as a legacy OP_QUERY command otherwise;
//! - attaches the session id and the newest known cluster time where supported;
//! - hands the message to a [`Transport`](conn::Transport) and interprets the reply;
//! - publishes started, succeeded and failed [`CommandEvent`](event::command::CommandEvent)s to
//!   its subscribers;
//! - retries an acknowledged operation once after a network error or a failover.
//!
//! Connection establishment, pooling, authentication and topology monitoring are the
//! responsibility of the [`Transport`](conn::Transport) implementation and of whatever feeds the
//! [`TopologyUpdater`](sdam::TopologyUpdater).
//!
//! # Example
//!
//! ```rust
//! # use mongodb_executor::{
//! #     bson::doc,
//! #     error::Result,
//! #     operation::{Namespace, Operation},
//! #     options::WriteConcern,
//! #     Client,
//! # };
//! # async fn run(client: Client) -> Result<()> {
//! let insert = Operation::insert(
//!     Namespace::new("db", "books"),
//!     vec![doc! { "title": "1984" }, doc! { "title": "Animal Farm" }],
//! )
//! .write_concern(WriteConcern::majority());
//!
//! let reply = client.execute(insert).await?;
//! assert_eq!(reply.n, 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Monitoring
//!
//! ```rust
//! # use mongodb_executor::{event::{command::CommandEvent, EventHandler}, Client};
//! # fn subscribe(client: &Client) {
//! client.subscribe(EventHandler::callback(|event: CommandEvent| {
//!     if let CommandEvent::Failed(failed) = event {
//!         eprintln!("{} failed: {}", failed.command_name, failed.failure);
//!     }
//! }));
//! # }
//! ```
//!
//! Every command event is also emitted as a `tracing` event with the target
//! `mongodb_executor::command`, and server selection is logged under
//! `mongodb_executor::server_selection`.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;

pub use ::bson;

mod bson_util;
mod client;
mod concern;
pub mod conn;
pub mod error;
pub mod event;
pub mod operation;
pub mod sdam;
mod selection_criteria;
mod serde_util;
#[cfg(test)]
mod test;
mod trace;

pub use crate::client::{
    session::{ClientSession, ClusterTime},
    Client,
};
