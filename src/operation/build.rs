use std::cmp;

use super::{Operation, OperationKind};
use crate::{
    bson::{doc, Array, Bson, RawDocumentBuf},
    bson_util,
    client::session::{ClientSession, ClusterTime},
    conn::{Command, MessageMode, StreamDescription},
    error::{Error, Result},
};

/// Room reserved in a message or legacy command document for the command's global arguments.
const COMMAND_OVERHEAD_SIZE: usize = 16_000;

/// Renders `op` into a command for a server with the capabilities in `description`.
///
/// Servers that understand OP_MSG receive write batches as a document sequence next to the
/// command's global arguments; older servers receive a single command document with the batch
/// embedded as an array. An unacknowledged write is sent with `moreToCome` set.
///
/// The write concern is included only when one was set explicitly on the operation. Session and
/// cluster time fields are added separately by [`propagate_session_and_cluster_time`].
pub(crate) fn build(op: &Operation, description: &StreamDescription) -> Result<Command> {
    let mode = description.message_mode();
    let name = op.command_name().to_string();

    let (mut body, document_sequence) = match op.kind() {
        OperationKind::Command { document } => (document.clone(), None),
        kind => {
            let (identifier, documents) = write_payload(kind)?;
            check_batch_limits(&name, &documents, mode, description)?;

            let mut body = doc! { name.as_str(): op.collection().unwrap_or_default() };
            match mode {
                MessageMode::Legacy => {
                    let mut array = Array::with_capacity(documents.len());
                    for document in &documents {
                        array.push(Bson::Document(document.to_document()?));
                    }
                    body.insert(identifier, array);
                    (body, None)
                }
                MessageMode::Modern => (body, Some((identifier, documents))),
            }
        }
    };

    if op.kind().payload_identifier().is_some() {
        body.insert("ordered", op.is_ordered());
    }

    if let Some(write_concern) = op.get_write_concern().filter(|wc| !wc.is_empty()) {
        if !body.contains_key("writeConcern") {
            body.insert("writeConcern", crate::bson::to_bson(write_concern)?);
        }
    }

    for (key, value) in op.get_options() {
        body.insert(key.clone(), value.clone());
    }

    let mut command = Command::new(name, op.db(), mode, body);
    if let Some((identifier, documents)) = document_sequence {
        command.add_document_sequence(identifier, documents);
    }
    command.more_to_come = mode == MessageMode::Modern && !op.is_acknowledged();

    Ok(command)
}

/// Adds the session id and the newest known cluster time to `command`, as far as the target
/// server supports them.
///
/// The session id is left out of unacknowledged writes running in an implicit session: nothing
/// can be causally ordered after a write whose outcome is never reported.
pub(crate) fn propagate_session_and_cluster_time(
    command: &mut Command,
    op: &Operation,
    description: &StreamDescription,
    session: Option<&ClientSession>,
    topology_cluster_time: Option<&ClusterTime>,
) {
    if let Some(session) = session {
        if description.supports_sessions() && (op.is_acknowledged() || !session.is_implicit()) {
            command.set_session(session.id());
        }
    }

    if description.supports_cluster_time() {
        let session_cluster_time = session.and_then(ClientSession::cluster_time);
        if let Some(cluster_time) = cmp::max(session_cluster_time.as_ref(), topology_cluster_time)
        {
            command.set_cluster_time(cluster_time);
        }
    }
}

fn write_payload(kind: &OperationKind) -> Result<(&'static str, Vec<RawDocumentBuf>)> {
    let documents = match kind {
        OperationKind::Insert { documents } => documents
            .iter()
            .map(|document| RawDocumentBuf::from_document(document).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?,
        OperationKind::Update { updates } => updates
            .iter()
            .map(|update| crate::bson::to_raw_document_buf(update).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?,
        OperationKind::Delete { deletes } => deletes
            .iter()
            .map(|delete| crate::bson::to_raw_document_buf(delete).map_err(Error::from))
            .collect::<Result<Vec<_>>>()?,
        OperationKind::Command { .. } => {
            return Err(Error::internal("a command has no write payload"));
        }
    };

    let identifier = kind
        .payload_identifier()
        .ok_or_else(|| Error::internal("a command has no write payload"))?;
    Ok((identifier, documents))
}

fn check_batch_limits(
    name: &str,
    documents: &[RawDocumentBuf],
    mode: MessageMode,
    description: &StreamDescription,
) -> Result<()> {
    let max_batch_size = usize::try_from(description.max_write_batch_size).unwrap_or(usize::MAX);
    if documents.len() > max_batch_size {
        return Err(Error::invalid_argument(format!(
            "{name} batch of {} items exceeds the server's maximum of {max_batch_size}",
            documents.len()
        )));
    }

    let max_doc_size = usize::try_from(description.max_bson_object_size).unwrap_or(usize::MAX);
    let max_payload_size = match mode {
        MessageMode::Modern => usize::try_from(description.max_message_size_bytes)
            .unwrap_or(usize::MAX)
            .saturating_sub(COMMAND_OVERHEAD_SIZE),
        MessageMode::Legacy => max_doc_size,
    };

    let mut payload_size = 0;
    for (i, document) in documents.iter().enumerate() {
        let doc_size = document.as_bytes().len();
        if doc_size > max_doc_size {
            return Err(Error::invalid_argument(format!(
                "{name} document must be within {max_doc_size} bytes, but document provided is \
                 {doc_size} bytes"
            )));
        }

        payload_size += match mode {
            MessageMode::Modern => doc_size,
            MessageMode::Legacy => bson_util::array_entry_size_bytes(i, doc_size),
        };
    }

    if payload_size > max_payload_size {
        return Err(Error::invalid_argument(format!(
            "{name} batch of {payload_size} bytes exceeds the {max_payload_size} bytes a single \
             message can carry"
        )));
    }

    Ok(())
}
