//! Contains the [`Operation`] value and the rendering of operations into commands.

mod build;
mod models;
mod response;
#[cfg(test)]
mod test;

use std::fmt;

use crate::{
    bson::{doc, oid::ObjectId, Document},
    bson_util,
    client::session::ClientSession,
    concern::WriteConcern,
    error::{Error, Result},
    selection_criteria::ReadPreference,
};

pub(crate) use self::{
    build::{build, propagate_session_and_cluster_time},
    response::CommandResponse,
};
pub use self::{
    models::{DeleteModel, Hint, UpdateModel, UpsertedId},
    response::CommandReply,
};

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

/// The payload of an [`Operation`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum OperationKind {
    /// Insert the documents, in order.
    Insert {
        /// The documents to insert. Each has an `_id`.
        documents: Vec<Document>,
    },

    /// Apply the update statements, in order.
    Update {
        /// The update statements.
        updates: Vec<UpdateModel>,
    },

    /// Apply the delete statements, in order.
    Delete {
        /// The delete statements.
        deletes: Vec<DeleteModel>,
    },

    /// Run an arbitrary database command.
    Command {
        /// The command document. Its first key names the command.
        document: Document,
    },
}

impl OperationKind {
    /// The identifier of the document sequence (or array field) carrying a write batch.
    pub(crate) fn payload_identifier(&self) -> Option<&'static str> {
        match self {
            Self::Insert { .. } => Some("documents"),
            Self::Update { .. } => Some("updates"),
            Self::Delete { .. } => Some("deletes"),
            Self::Command { .. } => None,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Insert { documents } => documents.len(),
            Self::Update { updates } => updates.len(),
            Self::Delete { deletes } => deletes.len(),
            Self::Command { .. } => 1,
        }
    }
}

/// One logical request: an insert, update, delete or command together with the options that
/// govern its execution.
///
/// An `Operation` is built once by the caller and never modified by the client. Every dispatch
/// attempt, including a retry, renders a fresh command from it.
///
/// ```
/// use mongodb_executor::{
///     bson::doc,
///     operation::{Namespace, Operation},
///     options::WriteConcern,
/// };
///
/// let insert = Operation::insert(Namespace::new("db", "coll"), vec![doc! { "x": 1 }])
///     .ordered(false)
///     .write_concern(WriteConcern::majority());
/// assert_eq!(insert.command_name(), "insert");
/// ```
#[derive(Clone, Debug)]
pub struct Operation {
    db: String,
    coll: Option<String>,
    kind: OperationKind,
    ordered: bool,
    write_concern: Option<WriteConcern>,
    session: Option<ClientSession>,
    options: Document,
    read_preference: ReadPreference,
}

impl Operation {
    fn new(db: String, coll: Option<String>, kind: OperationKind) -> Self {
        Self {
            db,
            coll,
            kind,
            ordered: true,
            write_concern: None,
            session: None,
            options: Document::new(),
            read_preference: ReadPreference::Primary,
        }
    }

    /// Inserts `documents` into the collection `ns`.
    ///
    /// Documents without an `_id` are given a new [`ObjectId`] as their first field, here rather
    /// than at dispatch time, so that a retried insert sends the same ids.
    pub fn insert(ns: Namespace, documents: impl IntoIterator<Item = Document>) -> Self {
        let documents = documents.into_iter().map(with_id).collect();
        Self::new(ns.db, Some(ns.coll), OperationKind::Insert { documents })
    }

    /// Applies the update statements `updates` to the collection `ns`.
    pub fn update(ns: Namespace, updates: impl IntoIterator<Item = UpdateModel>) -> Self {
        let updates = updates.into_iter().collect();
        Self::new(ns.db, Some(ns.coll), OperationKind::Update { updates })
    }

    /// Applies the delete statements `deletes` to the collection `ns`.
    pub fn delete(ns: Namespace, deletes: impl IntoIterator<Item = DeleteModel>) -> Self {
        let deletes = deletes.into_iter().collect();
        Self::new(ns.db, Some(ns.coll), OperationKind::Delete { deletes })
    }

    /// Runs `command` against the database `db`.
    pub fn command(db: impl Into<String>, command: Document) -> Self {
        Self::new(
            db.into(),
            None,
            OperationKind::Command { document: command },
        )
    }

    /// Sets whether a write batch stops at its first failed item. Defaults to `true`.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Sets an explicit write concern. Without one, the server's default applies.
    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }

    /// Executes the operation as part of `session`.
    pub fn session(mut self, session: &ClientSession) -> Self {
        self.session = Some(session.clone());
        self
    }

    /// Sets additional command fields, such as `bypassDocumentValidation`, which are sent
    /// verbatim. Fields the client renders itself (the command name, `ordered`, the batch,
    /// `writeConcern`, `$db`, `lsid`, `$clusterTime` and `$readPreference`) are rejected when
    /// the operation is executed.
    pub fn options(mut self, options: Document) -> Self {
        self.options = options;
        self
    }

    /// Sets the read preference used to route a command. Writes are always sent to the primary.
    pub fn read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = read_preference;
        self
    }

    /// The name of the database the operation runs against.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// The name of the target collection. `None` for commands.
    pub fn collection(&self) -> Option<&str> {
        self.coll.as_deref()
    }

    /// The payload of the operation.
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Whether a write batch stops at its first failed item.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// The explicit write concern, if one was given.
    pub fn get_write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    /// The session the operation runs in, if one was given.
    pub fn get_session(&self) -> Option<&ClientSession> {
        self.session.as_ref()
    }

    /// The additional command fields.
    pub fn get_options(&self) -> &Document {
        &self.options
    }

    /// The name of the command this operation renders to: `insert`, `update`, `delete`, or the
    /// first key of a command document.
    pub fn command_name(&self) -> &str {
        match self.kind {
            OperationKind::Insert { .. } => "insert",
            OperationKind::Update { .. } => "update",
            OperationKind::Delete { .. } => "delete",
            OperationKind::Command { ref document } => {
                bson_util::first_key(document).unwrap_or_default()
            }
        }
    }

    /// The read preference used for server selection: always the primary for writes.
    pub(crate) fn selection_criteria(&self) -> ReadPreference {
        match self.kind {
            OperationKind::Command { .. } => self.read_preference.clone(),
            _ => ReadPreference::Primary,
        }
    }

    /// Whether the server will acknowledge the operation. Only an explicit unacknowledged write
    /// concern turns acknowledgement off.
    pub fn is_acknowledged(&self) -> bool {
        self.write_concern
            .as_ref()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    /// Checks the operation before any server is selected.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(ref write_concern) = self.write_concern {
            write_concern.validate()?;
        }

        if let Some(key) = self.options.keys().find(|key| self.is_reserved_field(key)) {
            return Err(Error::invalid_argument(format!(
                "the {key:?} field of {} cannot be set through options",
                self.command_name()
            )));
        }

        match self.kind {
            OperationKind::Command { ref document } => {
                if document.is_empty() {
                    return Err(Error::invalid_argument("command document must not be empty"));
                }
            }
            ref kind => {
                if self.coll.as_deref().unwrap_or_default().is_empty() {
                    return Err(Error::invalid_argument(format!(
                        "{} requires a collection name",
                        self.command_name()
                    )));
                }
                if kind.payload_len() == 0 {
                    return Err(Error::invalid_argument(format!(
                        "{} requires at least one {}",
                        self.command_name(),
                        match kind {
                            OperationKind::Insert { .. } => "document",
                            _ => "statement",
                        }
                    )));
                }
                if let OperationKind::Update { ref updates } = kind {
                    for update in updates {
                        update.validate()?;
                    }
                }
            }
        }

        Ok(())
    }

    fn is_reserved_field(&self, key: &str) -> bool {
        RESERVED_FIELDS.contains(&key)
            || key == self.command_name()
            || match self.kind.payload_identifier() {
                Some(identifier) => key == "ordered" || key == identifier,
                None => false,
            }
    }
}

/// Fields of a rendered command that are owned by the client.
const RESERVED_FIELDS: &[&str] = &["writeConcern", "$db", "lsid", "$clusterTime", "$readPreference"];

fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    let mut with_id = doc! { "_id": ObjectId::new() };
    with_id.extend(document);
    with_id
}
