pub(crate) mod server_selection;

use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    client::session::ClusterTime,
    conn::Command,
    options::ServerAddress,
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::ReadPreference,
};

/// The possible types for a topology.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single mongod server.
    Single,

    /// A replica set with no primary.
    ReplicaSetNoPrimary,

    /// A replica set with a primary.
    ReplicaSetWithPrimary,

    /// A sharded topology.
    Sharded,

    /// A topology whose type is not known.
    Unknown,
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Default for TopologyType {
    fn default() -> Self {
        TopologyType::Unknown
    }
}

/// An immutable snapshot of the cluster as known at one instant.
///
/// Snapshots are produced by the topology monitor and shared by value: a change to any server
/// produces a new snapshot rather than editing this one.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TopologyDescription {
    /// The type of the topology.
    pub(crate) topology_type: TopologyType,

    /// The replica set name.
    pub(crate) set_name: Option<String>,

    /// The server descriptions of each member of the topology.
    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,

    /// The highest reported cluster time by any server in this topology.
    pub(crate) cluster_time: Option<ClusterTime>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        self.topology_type == other.topology_type
            && self.set_name == other.set_name
            && self.servers == other.servers
    }
}

impl TopologyDescription {
    /// Creates a snapshot from the servers the monitor currently knows about.
    ///
    /// If more than one server claims to be the replica set primary, every claimant but the last
    /// is recorded as unknown.
    pub fn new(
        topology_type: TopologyType,
        servers: impl IntoIterator<Item = ServerDescription>,
    ) -> Self {
        let mut description = Self {
            topology_type,
            ..Default::default()
        };
        for server in servers {
            description.update(server);
        }
        description
    }

    /// Sets the replica set name.
    pub fn with_set_name(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    /// The type of this topology.
    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    /// The highest cluster time any server has reported.
    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The servers in this snapshot, in no particular order.
    pub fn servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.values()
    }

    /// Gets the description of the server at `address`, if it is part of this topology.
    pub fn get_server_description(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// The address of the server that accepts writes for the whole topology, if one is known.
    ///
    /// For a replica set this is the elected primary. A single-server topology reports its lone
    /// server once it has been reached as a standalone, a primary or a router; a directly
    /// connected secondary is not a primary. A sharded topology has no such server: writes may
    /// go to any router.
    pub fn primary_address(&self) -> Option<&ServerAddress> {
        match self.topology_type {
            TopologyType::Single => self
                .servers_with_type(&[
                    ServerType::Standalone,
                    ServerType::RsPrimary,
                    ServerType::Mongos,
                ])
                .next()
                .map(|server| &server.address),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => self
                .servers_with_type(&[ServerType::RsPrimary])
                .next()
                .map(|server| &server.address),
            TopologyType::Sharded | TopologyType::Unknown => None,
        }
    }

    /// The shortest session timeout among the data-bearing servers, or `None` if any of them
    /// does not support sessions.
    pub(crate) fn logical_session_timeout(&self) -> Option<Duration> {
        let mut timeout: Option<Duration> = None;
        for server in self
            .servers
            .values()
            .filter(|server| server.server_type.is_data_bearing())
        {
            let server_timeout = server
                .stream_description
                .as_ref()?
                .logical_session_timeout?;
            timeout = Some(timeout.map_or(server_timeout, |timeout| timeout.min(server_timeout)));
        }
        timeout
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers.values().any(|server| server.is_available())
    }

    pub(crate) fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers
            .values()
            .filter(move |server| types.contains(&server.server_type) && server.is_available())
    }

    /// Replaces the description of `server_description.address` as a whole.
    pub(crate) fn update(&mut self, server_description: ServerDescription) {
        if server_description.server_type == ServerType::RsPrimary {
            for server in self.servers.values_mut() {
                if server.server_type == ServerType::RsPrimary
                    && server.address != server_description.address
                {
                    let mut stale = ServerDescription::unknown(server.address.clone());
                    stale.error = Some(format!(
                        "{} was superseded as primary by {}",
                        server.address, server_description.address
                    ));
                    *server = stale;
                }
            }
        }

        self.topology_type = self.next_topology_type(server_description.server_type);
        self.servers
            .insert(server_description.address.clone(), server_description);
        self.update_replica_set_type();
    }

    /// Records `address` as unknown, e.g. after it reported that it is no longer the primary.
    pub(crate) fn mark_unknown(&mut self, address: &ServerAddress, reason: String) -> bool {
        match self.servers.get_mut(address) {
            Some(server) if server.server_type != ServerType::Unknown => {
                let mut unknown = ServerDescription::unknown(address.clone());
                unknown.error = Some(reason);
                *server = unknown;
                self.update_replica_set_type();
                true
            }
            _ => false,
        }
    }

    /// Adds `$readPreference` to `command` where the server at `address` needs it to accept a
    /// command routed with `read_preference`.
    pub(crate) fn update_command_with_read_pref(
        &self,
        address: &ServerAddress,
        command: &mut Command,
        read_preference: &ReadPreference,
    ) {
        let server_type = self
            .get_server_description(address)
            .map(|sd| sd.server_type)
            .unwrap_or(ServerType::Unknown);

        match (self.topology_type, server_type) {
            (TopologyType::Single, ServerType::Standalone) => {}
            (TopologyType::Single, ServerType::Mongos) | (TopologyType::Sharded, _) => {
                if *read_preference != ReadPreference::Primary {
                    command.set_read_preference(read_preference.clone())
                }
            }
            // a directly connected member only serves commands marked as secondary-safe
            (TopologyType::Single, _) => {
                let resolved_read_pref = match read_preference {
                    ReadPreference::Primary => ReadPreference::PrimaryPreferred { options: None },
                    other => other.clone(),
                };
                command.set_read_preference(resolved_read_pref)
            }
            _ => {
                if *read_preference != ReadPreference::Primary {
                    command.set_read_preference(read_preference.clone())
                }
            }
        }
    }

    /// Advances the topology's cluster time if `to` is newer. Returns whether it changed.
    pub(crate) fn advance_cluster_time(&mut self, to: &ClusterTime) -> bool {
        if self.cluster_time.as_ref().map(|ct| ct < to).unwrap_or(true) {
            self.cluster_time = Some(to.clone());
            return true;
        }
        false
    }

    fn next_topology_type(&self, server_type: ServerType) -> TopologyType {
        match (self.topology_type, server_type) {
            (TopologyType::Unknown, ServerType::Standalone) => TopologyType::Single,
            (TopologyType::Unknown, ServerType::Mongos) => TopologyType::Sharded,
            (
                TopologyType::Unknown,
                ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::RsArbiter
                | ServerType::RsOther,
            ) => TopologyType::ReplicaSetNoPrimary,
            (current, _) => current,
        }
    }

    fn update_replica_set_type(&mut self) {
        if !matches!(
            self.topology_type,
            TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary
        ) {
            return;
        }

        self.topology_type = if self.servers_with_type(&[ServerType::RsPrimary]).next().is_some()
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "{{ Type: {}", self.topology_type)?;

        if let Some(ref set_name) = self.set_name {
            write!(f, ", Set Name: {set_name}")?;
        }

        if !self.servers.is_empty() {
            write!(f, ", Servers: [ ")?;
            let mut iter = self.servers.values();
            if let Some(server) = iter.next() {
                write!(f, "{server}")?;
            }
            for server in iter {
                write!(f, ", {server}")?;
            }
            write!(f, " ]")?;
        }

        write!(f, " }}")
    }
}
