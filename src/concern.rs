//! Contains the types related to write concerns.


use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    error::{Error, Result},
    serde_util,
};

/// The acknowledgement a write operation asks of the server.
///
/// An operation without a write concern, or with an empty one, is sent without a `writeConcern`
/// field and gets the server's default. `{ w: 0 }` makes the write fire-and-forget.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct WriteConcern {
    /// How many, or which, members must have applied the write.
    pub w: Option<Acknowledgment>,

    /// How long the server waits for `w` to be satisfied before reporting a write concern error.
    /// Writes applied before the timeout are not rolled back.
    #[serde(rename = "wtimeout", alias = "wtimeoutMS")]
    #[serde(serialize_with = "serde_util::serialize_duration_option_as_int_millis")]
    #[serde(deserialize_with = "serde_util::deserialize_duration_option_from_u64_millis")]
    #[serde(default)]
    pub w_timeout: Option<Duration>,

    /// Whether the write must reach the on-disk journal first.
    #[serde(rename = "j", alias = "journal")]
    pub journal: Option<bool>,
}

/// The `w` field of a [`WriteConcern`]: a node count, `"majority"`, or a custom tag set name.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Acknowledgment {
    /// That many nodes. `0` is unacknowledged: the command is sent with `moreToCome` and no
    /// reply is read.
    Nodes(u32),

    /// A majority of the voting members.
    Majority,

    /// A custom write concern defined in the replica set configuration.
    Custom(String),
}

impl Serialize for Acknowledgment {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Acknowledgment::Majority => serializer.serialize_str("majority"),
            Acknowledgment::Nodes(n) => serializer.serialize_i32((*n).try_into().map_err(|e| {
                serde::ser::Error::custom(format!("could not serialize w: {e}"))
            })?),
            Acknowledgment::Custom(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for Acknowledgment {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IntOrString {
            Int(u32),
            String(String),
        }
        match IntOrString::deserialize(deserializer)? {
            IntOrString::String(s) => Ok(s.into()),
            IntOrString::Int(i) => Ok(i.into()),
        }
    }
}

impl From<u32> for Acknowledgment {
    fn from(i: u32) -> Self {
        Acknowledgment::Nodes(i)
    }
}

impl From<&str> for Acknowledgment {
    fn from(s: &str) -> Self {
        if s == "majority" {
            Acknowledgment::Majority
        } else {
            Acknowledgment::Custom(s.to_string())
        }
    }
}

impl From<String> for Acknowledgment {
    fn from(s: String) -> Self {
        Acknowledgment::from(s.as_str())
    }
}

impl WriteConcern {
    /// A write concern requesting no acknowledgement at all (`{ w: 0 }`).
    pub fn unacknowledged() -> Self {
        Self {
            w: Some(Acknowledgment::Nodes(0)),
            ..Default::default()
        }
    }

    /// A write concern requesting acknowledgement from a majority of nodes.
    pub fn majority() -> Self {
        Self {
            w: Some(Acknowledgment::Majority),
            ..Default::default()
        }
    }

    /// Whether the server will send a reply for a write using this write concern.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Some(Acknowledgment::Nodes(0)) || self.journal == Some(true)
    }

    /// Whether the write concern was created with no values specified. An empty write concern is
    /// equivalent to not specifying one.
    pub fn is_empty(&self) -> bool {
        self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none()
    }

    /// Rejects `{ w: 0, j: true }` and timeouts that do not fit the wire format.
    pub fn validate(&self) -> Result<()> {
        if self.w == Some(Acknowledgment::Nodes(0)) && self.journal == Some(true) {
            return Err(Error::invalid_argument(
                "write concern cannot have w=0 and j=true",
            ));
        }

        if let Some(w_timeout) = self.w_timeout {
            if w_timeout.as_millis() > i64::MAX as u128 {
                return Err(Error::invalid_argument(
                    "write concern `w_timeout` field cannot exceed i64::MAX milliseconds",
                ));
            }
        }

        Ok(())
    }
}
