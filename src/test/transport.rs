use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use futures_core::future::BoxFuture;
use tokio::sync::Notify;

use crate::{
    bson::{doc, Document, RawDocumentBuf},
    conn::{Transport, WireMessage},
    error::{Error, Result},
    options::ServerAddress,
};

/// A scripted reply for the next message sent to one address.
#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    Document(Document),
    Error(Error),
    /// Never replies.
    Hang,
    /// Replies as if nothing was scripted once the gate is notified.
    Gated(Arc<Notify>),
}

/// A message the transport was asked to send.
#[derive(Clone, Debug)]
pub(crate) struct SentMessage {
    pub(crate) address: ServerAddress,
    pub(crate) message: WireMessage,
}

/// A [`Transport`] that answers from per-address queues of scripted replies and records every
/// message it is given. Without a scripted reply, a command is answered with `ok: 1` and, for a
/// write, `n` set to the size of its batch. Scripted errors are returned even for messages with
/// `moreToCome` set; scripted documents are dropped for them.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

#[derive(Debug, Default)]
struct MockTransportState {
    replies: HashMap<ServerAddress, VecDeque<MockReply>>,
    sent: Vec<SentMessage>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, address: &ServerAddress, reply: MockReply) {
        self.state
            .lock()
            .unwrap()
            .replies
            .entry(address.clone())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub(crate) fn sent_commands(&self) -> Vec<Document> {
        self.sent()
            .iter()
            .map(|sent| sent.message.get_command_document())
            .collect()
    }
}

impl Transport for MockTransport {
    fn send_message<'a>(
        &'a self,
        address: &'a ServerAddress,
        message: WireMessage,
    ) -> BoxFuture<'a, Result<Option<RawDocumentBuf>>> {
        Box::pin(async move {
            let scripted = {
                let mut state = self.state.lock().unwrap();
                state.sent.push(SentMessage {
                    address: address.clone(),
                    message: message.clone(),
                });
                state
                    .replies
                    .get_mut(address)
                    .and_then(VecDeque::pop_front)
            };

            let reply = match scripted {
                Some(MockReply::Error(error)) => return Err(error),
                Some(MockReply::Hang) => futures::future::pending().await,
                Some(MockReply::Gated(gate)) => {
                    gate.notified().await;
                    None
                }
                Some(MockReply::Document(reply)) => Some(reply),
                None => None,
            };
            if message.more_to_come() {
                return Ok(None);
            }

            let reply =
                reply.unwrap_or_else(|| default_reply(&message.get_command_document()));
            Ok(Some(RawDocumentBuf::from_document(&reply)?))
        })
    }
}

fn default_reply(command: &Document) -> Document {
    let batch_size = ["documents", "updates", "deletes"]
        .iter()
        .find_map(|identifier| command.get_array(identifier).ok())
        .map(Vec::len);
    match batch_size {
        Some(n) => doc! { "ok": 1, "n": n as i32 },
        None => doc! { "ok": 1 },
    }
}
