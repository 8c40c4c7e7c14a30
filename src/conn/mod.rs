//! Contains the wire message types and the [`Transport`] trait that delivers them.

mod command;
mod stream_description;
mod transport;
pub(crate) mod wire;

pub(crate) use self::command::Command;
pub use self::{
    command::WireMessage,
    stream_description::{MessageMode, StreamDescription},
    transport::Transport,
    wire::{DocumentSequence, Message, MessageFlags, Query, QueryFlags, Reply},
};
