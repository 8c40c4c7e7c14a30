use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    bson_util,
    error::Result,
};

/// Specifies the index to use for an update or delete.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// Specifies the keys of the index to use.
    Keys(Document),
    /// Specifies the name of the index to use.
    Name(String),
}

/// One statement of an `update` command.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct UpdateModel {
    /// The selector for the documents to update.
    pub q: Document,

    /// The update operators to apply. The first key must be an update operator such as `$set`.
    pub u: Document,

    /// Whether to update every matching document rather than only the first.
    #[builder(default, setter(strip_option))]
    pub multi: Option<bool>,

    /// Whether to insert a document if none match.
    #[builder(default, setter(strip_option))]
    pub upsert: Option<bool>,

    /// Filters determining which array elements to modify.
    #[builder(default, setter(strip_option))]
    pub array_filters: Option<Vec<Document>>,

    /// The collation to use when matching.
    #[builder(default, setter(strip_option))]
    pub collation: Option<Document>,

    /// The index to use.
    #[builder(default, setter(strip_option))]
    pub hint: Option<Hint>,
}

impl UpdateModel {
    pub(crate) fn validate(&self) -> Result<()> {
        bson_util::update_document_check(&self.u)
    }
}

/// One statement of a `delete` command.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct DeleteModel {
    /// The selector for the documents to delete.
    pub q: Document,

    /// The number of matching documents to delete: 1 for at most one, 0 for all of them.
    #[builder(default)]
    pub limit: u32,

    /// The collation to use when matching.
    #[builder(default, setter(strip_option))]
    pub collation: Option<Document>,

    /// The index to use.
    #[builder(default, setter(strip_option))]
    pub hint: Option<Hint>,
}

/// The `upserted` entry the server reports for an update statement that inserted a document.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct UpsertedId {
    /// The index of the statement within the batch.
    pub index: usize,

    /// The `_id` of the inserted document.
    #[serde(rename = "_id")]
    pub id: Bson,
}
