use serde::Deserialize;

use super::UpsertedId;
use crate::{
    bson::{doc, Document, RawDocumentBuf, Timestamp},
    bson_util,
    client::session::ClusterTime,
    error::{
        BulkWriteFailure,
        CommandError,
        Error,
        ErrorKind,
        IndexedWriteError,
        Result,
        WriteConcernError,
    },
    options::ServerAddress,
};

/// The reply to an executed operation.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct CommandReply {
    /// The address of the server that executed the operation.
    pub address: ServerAddress,

    /// The reply document. `{ ok: 1 }` for an unacknowledged write.
    pub body: Document,

    /// Whether the server acknowledged the operation. When it did not, no counts are known.
    pub acknowledged: bool,

    /// The number of documents inserted, matched by an update, or deleted.
    pub n: u64,

    /// The number of documents an update modified.
    pub n_modified: Option<u64>,

    /// The ids of the documents inserted by upserts.
    pub upserted: Vec<UpsertedId>,
}

impl CommandReply {
    pub(crate) fn unacknowledged(address: ServerAddress) -> Self {
        Self {
            address,
            body: doc! { "ok": 1 },
            acknowledged: false,
            n: 0,
            n_modified: None,
            upserted: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandErrorBody {
    #[serde(flatten)]
    command_error: CommandError,

    #[serde(rename = "errorLabels")]
    error_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponseBody {
    n: Option<u64>,

    n_modified: Option<u64>,

    upserted: Option<Vec<UpsertedId>>,

    write_errors: Option<Vec<IndexedWriteError>>,

    write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    labels: Option<Vec<String>>,
}

/// A raw reply from a server, checked to be a command reply.
#[derive(Clone, Debug)]
pub(crate) struct CommandResponse {
    pub(crate) address: ServerAddress,
    pub(crate) body: Document,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
}

impl CommandResponse {
    /// Parses the reply `raw` received from `address`. A reply without an `ok` field is not a
    /// command reply.
    pub(crate) fn new(address: ServerAddress, raw: RawDocumentBuf) -> Result<Self> {
        let body = raw.to_document().map_err(|e| {
            Error::invalid_response(format!("the reply is not a valid document: {e}"))
        })?;
        if !body.contains_key("ok") {
            return Err(Error::invalid_response(
                "the reply is missing the \"ok\" field",
            ));
        }

        let cluster_time = body
            .get_document("$clusterTime")
            .ok()
            .and_then(|doc| crate::bson::from_document(doc.clone()).ok());
        let operation_time = body.get_timestamp("operationTime").ok();

        Ok(Self {
            address,
            body,
            cluster_time,
            operation_time,
        })
    }

    /// Whether the reply is `ok: 1`.
    pub(crate) fn is_success(&self) -> bool {
        self.body.get("ok").and_then(bson_util::get_int) == Some(1)
    }

    /// The cluster time the server reported, if any.
    pub(crate) fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The operation time the server reported, if any.
    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    /// Returns the server's error if the command failed.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        let error_body: CommandErrorBody = crate::bson::from_document(self.body.clone())
            .map_err(|_| Error::invalid_response("invalid server response"))?;
        Err(Error::new(
            ErrorKind::Command(error_body.command_error),
            error_body.error_labels,
        ))
    }

    /// Interprets a successful reply. Item-level write errors and write concern errors are
    /// returned as a [`BulkWriteFailure`].
    pub(crate) fn into_reply(self, ordered: bool) -> Result<CommandReply> {
        let body: WriteResponseBody = crate::bson::from_document(self.body.clone())
            .map_err(|e| Error::invalid_response(e.to_string()))?;

        if body.write_errors.is_some() || body.write_concern_error.is_some() {
            return Err(Error::new(
                ErrorKind::Write(BulkWriteFailure {
                    ordered,
                    n: body.n.unwrap_or(0),
                    write_errors: body.write_errors.unwrap_or_default(),
                    write_concern_error: body.write_concern_error,
                    address: self.address,
                }),
                body.labels,
            ));
        }

        Ok(CommandReply {
            address: self.address,
            body: self.body,
            acknowledged: true,
            n: body.n.unwrap_or(0),
            n_modified: body.n_modified,
            upserted: body.upserted.unwrap_or_default(),
        })
    }
}
