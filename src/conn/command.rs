use derive_more::From;
use serde::Serialize;
use tokio::io::AsyncWrite;

use super::{
    wire::{next_request_id, DocumentSequence, Message, MessageFlags, Query, QueryFlags},
    MessageMode,
};
use crate::{
    bson::{doc, Array, Document, RawDocumentBuf},
    client::{session::ClusterTime, HELLO_COMMAND_NAMES, REDACTED_COMMANDS},
    error::Result,
    selection_criteria::ReadPreference,
};

/// Client-side model of a database command, rendered from an operation for one target server.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
pub(crate) struct Command {
    #[serde(skip)]
    pub(crate) name: String,

    #[serde(skip)]
    pub(crate) target_db: String,

    #[serde(skip)]
    pub(crate) mode: MessageMode,

    #[serde(skip)]
    pub(crate) more_to_come: bool,

    #[serde(flatten)]
    pub(crate) body: Document,

    #[serde(skip)]
    pub(crate) document_sequences: Vec<DocumentSequence>,

    pub(crate) lsid: Option<Document>,

    #[serde(rename = "$clusterTime")]
    pub(crate) cluster_time: Option<ClusterTime>,

    #[serde(rename = "$readPreference")]
    pub(crate) read_preference: Option<ReadPreference>,
}

impl Command {
    pub(crate) fn new(
        name: impl ToString,
        target_db: impl ToString,
        mode: MessageMode,
        body: Document,
    ) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            mode,
            more_to_come: false,
            body,
            document_sequences: Vec::new(),
            lsid: None,
            cluster_time: None,
            read_preference: None,
        }
    }

    pub(crate) fn add_document_sequence(
        &mut self,
        identifier: impl ToString,
        documents: Vec<RawDocumentBuf>,
    ) {
        self.document_sequences.push(DocumentSequence {
            identifier: identifier.to_string(),
            documents,
        });
    }

    pub(crate) fn set_session(&mut self, lsid: &Document) {
        self.lsid = Some(lsid.clone());
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) {
        self.cluster_time = Some(cluster_time.clone());
    }

    pub(crate) fn set_read_preference(&mut self, read_preference: ReadPreference) {
        self.read_preference = Some(read_preference);
    }

    /// Whether the command and its reply must be hidden from event subscribers and logs.
    pub(crate) fn should_redact(&self) -> bool {
        let name = self.name.to_lowercase();
        REDACTED_COMMANDS.contains(name.as_str())
            || (HELLO_COMMAND_NAMES.contains(name.as_str())
                && self.body.contains_key("speculativeAuthenticate"))
    }

    /// Renders this command into the wire message for its mode, assigning it a fresh request id.
    pub(crate) fn into_wire_message(self) -> Result<WireMessage> {
        let mut body = crate::bson::to_document(&self)?;
        let request_id = next_request_id();

        match self.mode {
            MessageMode::Modern => {
                body.insert("$db", self.target_db);
                let mut flags = MessageFlags::empty();
                if self.more_to_come {
                    flags |= MessageFlags::MORE_TO_COME;
                }
                Ok(Message {
                    document_payload: RawDocumentBuf::from_document(&body)?,
                    document_sequences: self.document_sequences,
                    response_to: 0,
                    flags,
                    checksum: None,
                    request_id: Some(request_id),
                }
                .into())
            }
            MessageMode::Legacy => {
                // OP_QUERY has no sections, so any sequence travels as an array field.
                for sequence in self.document_sequences {
                    let mut documents = Array::new();
                    for document in sequence.documents {
                        documents.push(document.to_document()?.into());
                    }
                    body.insert(sequence.identifier, documents);
                }
                let mut flags = QueryFlags::empty();
                if let Some(read_preference) = body.remove("$readPreference") {
                    flags |= QueryFlags::SECONDARY_OK;
                    body = doc! { "$query": body, "$readPreference": read_preference };
                }
                let mut query = Query::command(&self.target_db, body);
                query.flags = flags;
                query.request_id = Some(request_id);
                Ok(query.into())
            }
        }
    }
}

/// A rendered command, ready to be handed to a [`Transport`](crate::conn::Transport).
#[derive(Clone, Debug, From)]
#[non_exhaustive]
pub enum WireMessage {
    /// An OP_QUERY against `<db>.$cmd`, for servers that predate OP_MSG.
    Legacy(Query),

    /// An OP_MSG.
    Modern(Message),
}

impl WireMessage {
    /// The request id the message is sent with.
    pub fn request_id(&self) -> i32 {
        match self {
            Self::Legacy(query) => query.request_id(),
            Self::Modern(message) => message.request_id(),
        }
        .unwrap_or_default()
    }

    /// The mode the message was rendered in.
    pub fn mode(&self) -> MessageMode {
        match self {
            Self::Legacy(_) => MessageMode::Legacy,
            Self::Modern(_) => MessageMode::Modern,
        }
    }

    /// Whether the sender will not wait for a reply to this message.
    pub fn more_to_come(&self) -> bool {
        match self {
            Self::Legacy(_) => false,
            Self::Modern(message) => message.flags().contains(MessageFlags::MORE_TO_COME),
        }
    }

    /// The command carried by this message as a single document, with document sequences folded
    /// back in as arrays.
    pub fn get_command_document(&self) -> Document {
        match self {
            Self::Legacy(query) => query.query().clone(),
            Self::Modern(message) => message.get_command_document(),
        }
    }

    /// Serializes the message and writes it to `writer`.
    pub async fn write_to<W: AsyncWrite + Send + Unpin>(&self, writer: W) -> Result<()> {
        match self {
            Self::Legacy(query) => query.write_to(writer).await,
            Self::Modern(message) => message.write_to(writer).await,
        }
    }
}
