//! Contains the `Error` and `Result` types that `mongodb_executor` uses.


use std::{collections::HashSet, fmt, sync::Arc};

use serde::Deserialize;
use thiserror::Error;

use crate::{bson::Document, options::ServerAddress};

const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];

/// Retryable write error label. This label will be added to an error when the error is
/// write-retryable.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";

/// Reported by a server on an error from an attempt that performed no writes. When a retry fails
/// with this label, the error of the first attempt is returned instead.
pub const NO_WRITES_PERFORMED: &str = "NoWritesPerformed";

/// The result type for all methods that can return an error in the `mongodb_executor` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongodb_executor` crate. The inner
/// [`ErrorKind`](enum.ErrorKind.html) is wrapped in a `Box` to keep the error small; the error
/// itself is cheap to clone so that it can be shared with command event subscribers.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(wc) = kind.get_write_concern_error() {
            labels.extend(wc.labels.clone());
        }
        Self {
            kind: Box::new(kind),
            labels,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn no_primary_available(message: impl Into<String>) -> Error {
        ErrorKind::NoPrimaryAvailable {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn server_selection_timeout(message: impl Into<String>) -> Error {
        ErrorKind::ServerSelection {
            message: message.into(),
        }
        .into()
    }

    /// Constructs the error surfaced by a transport that failed to send a message or to receive
    /// its reply.
    pub fn network(error: std::io::Error) -> Error {
        ErrorKind::Io(Arc::new(error)).into()
    }

    /// Whether this error was produced while sending to or reading from the network.
    pub fn is_network_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(..))
    }

    /// Whether this error indicates that the target server was not (or was no longer) a writable
    /// primary when the command reached it.
    pub fn is_not_writable_primary(&self) -> bool {
        self.kind
            .code_and_message()
            .map(|(code, message)| is_not_writable_primary(code, message))
            .unwrap_or(false)
    }

    /// Whether this error indicates that the target server is recovering or shutting down.
    pub fn is_recovering(&self) -> bool {
        self.kind
            .code_and_message()
            .map(|(code, message)| is_recovering(code, message))
            .unwrap_or(false)
    }

    /// Whether this error means the topology needs to be re-checked: the failed server should no
    /// longer be treated as the primary.
    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_network_error() || self.is_not_writable_primary() || self.is_recovering()
    }

    /// Whether a write should be retried after this error, provided the operation is otherwise
    /// eligible for a retry. Server-validated write errors never are.
    pub(crate) fn is_write_retryable(&self) -> bool {
        if matches!(self.kind.as_ref(), ErrorKind::Write(..)) {
            return false;
        }
        self.is_network_error()
            || self.is_not_writable_primary()
            || self.is_recovering()
            || self.contains_label(RETRYABLE_WRITE_ERROR)
    }

    /// Whether an error originated from the server.
    pub(crate) fn is_server_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Command(_) | ErrorKind::Write(_)
        )
    }

    /// Whether this error was produced because server selection could not complete.
    pub fn is_server_selection_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::ServerSelection { .. } | ErrorKind::NoPrimaryAvailable { .. }
        )
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels.contains(label.as_ref())
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        self.labels.insert(label.as_ref().to_string());
    }

    /// Gets the code from this error, if applicable.
    pub fn code(&self) -> Option<i32> {
        self.kind.code_and_message().map(|(code, _)| code)
    }

    /// Replaces the bodies of any documents carried by this error. Used before handing errors for
    /// sensitive commands to event subscribers.
    pub(crate) fn redact(&mut self) {
        if let ErrorKind::Command(ref mut command_error) = *self.kind {
            command_error.message = "REDACTED".to_string();
        }
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// No server satisfying the selection criteria was found before the server selection
    /// timeout elapsed.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// A primary was requested, but the current topology snapshot has none.
    #[error("No primary available: {message}")]
    #[non_exhaustive]
    NoPrimaryAvailable { message: String },

    /// Wrapper around [`std::io::Error`]. Transport failures are reported with this kind.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// The server validated the write and rejected some or all of it.
    #[error("An error occurred when trying to execute a write operation: {0}")]
    Write(BulkWriteFailure),

    /// The server returned an invalid reply to a database operation.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    /// Wrapper around `bson::raw::Error`.
    #[error("{0}")]
    RawBson(crate::bson::raw::Error),

    /// The operation was abandoned by its caller while the command was in flight.
    #[error("The operation was cancelled while a command was in flight")]
    Cancelled,

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(err: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(err)
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(err: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(err)
    }
}

impl From<crate::bson::raw::Error> for ErrorKind {
    fn from(err: crate::bson::raw::Error) -> Self {
        Self::RawBson(err)
    }
}

impl ErrorKind {
    /// Gets the code/message tuple from this error, if applicable. In the case of write errors,
    /// the code and message are taken from the write concern error, if there is one.
    pub(crate) fn code_and_message(&self) -> Option<(i32, &str)> {
        match self {
            ErrorKind::Command(ref cmd_err) => Some((cmd_err.code, cmd_err.message.as_str())),
            ErrorKind::Write(ref failure) => failure
                .write_concern_error
                .as_ref()
                .map(|wc_err| (wc_err.code, wc_err.message.as_str())),
            _ => None,
        }
    }

    fn get_write_concern_error(&self) -> Option<&WriteConcernError> {
        match self {
            ErrorKind::Write(failure) => failure.write_concern_error.as_ref(),
            _ => None,
        }
    }
}

fn is_not_writable_primary(code: i32, message: &str) -> bool {
    if NOTWRITABLEPRIMARY_CODES.contains(&code) {
        return true;
    } else if is_recovering(code, message) {
        return false;
    }
    message.contains("not master")
}

fn is_recovering(code: i32, message: &str) -> bool {
    if RECOVERING_CODES.contains(&code) {
        return true;
    }
    message.contains("not master or secondary") || message.contains("node is recovering")
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default = "String::new")]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Error code {} ({}): {}", self.code, self.code_name, self.message)
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(alias = "errmsg", default)]
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,

    /// The error labels that the server returned.
    #[serde(rename = "errorLabels", default)]
    pub labels: Vec<String>,
}

/// An error that occurred for one item of a write batch.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[non_exhaustive]
pub struct IndexedWriteError {
    /// Index into the batch of the item this error corresponds to.
    pub index: usize,

    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    ///
    /// Note that the server will not return this in some cases, hence `code_name` being an
    /// `Option`.
    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// A document providing more information about the write error (e.g. details pertaining to
    /// document validation).
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// The set of errors the server reported for a write batch it otherwise processed.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct BulkWriteFailure {
    /// Whether the batch was executed in order. An ordered batch stops at the first failed item,
    /// so `write_errors` then holds at most one entry.
    pub ordered: bool,

    /// The number of batch items the server applied.
    pub n: u64,

    /// The error(s) that occurred on account of a non write concern failure.
    pub write_errors: Vec<IndexedWriteError>,

    /// The error that occurred on account of write concern failure.
    pub write_concern_error: Option<WriteConcernError>,

    /// The address of the server that processed the batch.
    pub address: ServerAddress,
}

impl BulkWriteFailure {
    /// For an ordered batch, the error that halted it and how many items preceded it.
    pub fn ordered_failure(&self) -> Option<(&IndexedWriteError, usize)> {
        if !self.ordered {
            return None;
        }
        self.write_errors.first().map(|err| (err, err.index))
    }
}

impl fmt::Display for BulkWriteFailure {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.ordered_failure() {
            Some((first, preceding)) => write!(
                fmt,
                "ordered batch halted at item {} after {} successful item(s): {}",
                first.index, preceding, first.message
            )?,
            None if !self.write_errors.is_empty() => write!(
                fmt,
                "{} item(s) of an unordered batch failed",
                self.write_errors.len()
            )?,
            None => {}
        }
        if let Some(ref wc_error) = self.write_concern_error {
            if !self.write_errors.is_empty() {
                write!(fmt, "; ")?;
            }
            write!(fmt, "write concern error: {}", wc_error.message)?;
        }
        Ok(())
    }
}
