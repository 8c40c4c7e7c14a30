use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    conn::StreamDescription,
    options::ServerAddress,
    selection_criteria::TagSet,
};

/// Enum representing the possible types of servers that the executor can route to.
#[derive(Debug, Default, Deserialize, Clone, Copy, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the replica
    /// set config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A server that the monitor has not yet reached, or whose last probe failed.
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
        )
    }

    pub(crate) fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown)
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One server's entry in a topology snapshot: its address, its role, and the capabilities it
/// negotiated on its most recent probe.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct ServerDescription {
    /// The address of the server.
    pub address: ServerAddress,

    /// The role of the server.
    pub server_type: ServerType,

    /// The moving average of the probe round trip times.
    pub average_round_trip_time: Option<Duration>,

    /// The replica set tags the server advertises.
    pub tags: TagSet,

    pub(crate) stream_description: Option<StreamDescription>,

    /// Why the server is unknown, if its last probe failed.
    pub(crate) error: Option<String>,
}

impl ServerDescription {
    /// Describes a server that answered its probe.
    pub fn new(
        address: ServerAddress,
        server_type: ServerType,
        stream_description: StreamDescription,
    ) -> Self {
        Self {
            address,
            server_type,
            average_round_trip_time: None,
            tags: TagSet::new(),
            stream_description: Some(stream_description),
            error: None,
        }
    }

    /// Describes a server that has not been reached yet.
    pub fn unknown(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            average_round_trip_time: None,
            tags: TagSet::new(),
            stream_description: None,
            error: None,
        }
    }

    /// Sets the average round trip time used for latency window calculations.
    pub fn with_round_trip_time(mut self, rtt: Duration) -> Self {
        self.average_round_trip_time = Some(rtt);
        self
    }

    /// Sets the tags the server advertises.
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// The capabilities negotiated with this server. `None` while the server is unknown.
    pub fn stream_description(&self) -> Option<&StreamDescription> {
        self.stream_description.as_ref()
    }

    /// Whether this server is "available" as per the definition in the server selection spec.
    pub(crate) fn is_available(&self) -> bool {
        self.server_type.is_available() && self.stream_description.is_some()
    }

    pub(crate) fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        tag_set
            .iter()
            .all(|(key, val)| self.tags.get(key) == Some(val))
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ Address: {}, Type: {}",
            self.address, self.server_type
        )?;

        if let Some(ref sd) = self.stream_description {
            write!(f, ", Max Wire Version: {}", sd.max_wire_version)?;
        }

        if let Some(rtt) = self.average_round_trip_time {
            write!(f, ", Average RTT: {rtt:?}")?;
        }

        if let Some(ref error) = self.error {
            write!(f, ", Error: {error}")?;
        }

        write!(f, " }}")
    }
}
