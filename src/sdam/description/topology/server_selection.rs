#[cfg(test)]
mod test;

use std::time::Duration;

use rand::seq::IndexedRandom;

use super::{TopologyDescription, TopologyType};
use crate::{
    conn::StreamDescription,
    error::{Error, Result},
    options::ServerAddress,
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::{ReadPreference, TagSet},
};

/// A server chosen for one dispatch attempt, together with the capabilities it had in the
/// snapshot it was chosen from.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedServer {
    /// The address of the selected server.
    pub address: ServerAddress,

    /// The role the server had when it was selected.
    pub server_type: ServerType,

    /// The capabilities negotiated with the server.
    pub stream_description: StreamDescription,
}

impl SelectedServer {
    fn new(description: &ServerDescription) -> Option<Self> {
        description
            .stream_description
            .clone()
            .map(|stream_description| Self {
                address: description.address.clone(),
                server_type: description.server_type,
                stream_description,
            })
    }
}

/// Attempts to select a server from `topology` for `read_preference`. Never blocks.
///
/// A [`ReadPreference::Primary`] request fails immediately with a "no primary available" error
/// when the snapshot knows of no primary. For every other request `Ok(None)` means that no
/// server is currently suitable; callers wanting to wait must call again with a newer snapshot.
pub fn attempt_to_select_server(
    topology: &TopologyDescription,
    read_preference: &ReadPreference,
    local_threshold: Duration,
) -> Result<Option<SelectedServer>> {
    if matches!(read_preference, ReadPreference::Primary)
        && topology.topology_type != TopologyType::Sharded
    {
        return match topology.primary_address() {
            Some(address) => Ok(topology
                .get_server_description(address)
                .and_then(SelectedServer::new)),
            None => Err(Error::no_primary_available(topology.to_string())),
        };
    }

    let mut suitable_servers = topology.suitable_servers(read_preference);
    retain_servers_within_latency_window(&mut suitable_servers, local_threshold);

    Ok(suitable_servers
        .choose(&mut rand::rng())
        .and_then(|server| SelectedServer::new(server)))
}

impl TopologyDescription {
    pub(crate) fn server_selection_timeout_error_message(
        &self,
        read_preference: &ReadPreference,
    ) -> String {
        if self.has_available_servers() {
            format!(
                "Server selection timeout: None of the available servers suitable for criteria \
                 {read_preference}. Topology: {self}"
            )
        } else {
            format!("Server selection timeout: No available servers. Topology: {self}")
        }
    }

    fn suitable_servers(&self, read_preference: &ReadPreference) -> Vec<&ServerDescription> {
        match self.topology_type {
            TopologyType::Unknown => Vec::new(),
            TopologyType::Single => self
                .servers
                .values()
                .filter(|server| server.is_available())
                .collect(),
            TopologyType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                self.suitable_servers_in_replica_set(read_preference)
            }
        }
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Vec<&ServerDescription> {
        let tag_sets = read_preference.tag_sets();

        match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => {
                self.suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets)
            }
            ReadPreference::PrimaryPreferred { .. } => {
                match self.servers_with_type(&[ServerType::RsPrimary]).next() {
                    Some(primary) => vec![primary],
                    None => self
                        .suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets),
                }
            }
            ReadPreference::SecondaryPreferred { .. } => {
                let suitable_servers = self
                    .suitable_servers_for_read_preference(&[ServerType::RsSecondary], tag_sets);

                if suitable_servers.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    suitable_servers
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
            ),
        }
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&Vec<TagSet>>,
    ) -> Vec<&ServerDescription> {
        let mut servers = self.servers_with_type(types).collect();

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        servers
    }
}

fn retain_servers_within_latency_window(
    suitable_servers: &mut Vec<&ServerDescription>,
    local_threshold: Duration,
) {
    let shortest_average_rtt = suitable_servers
        .iter()
        .filter_map(|server_desc| server_desc.average_round_trip_time)
        .min();

    let max_rtt_within_window = match shortest_average_rtt {
        Some(rtt) => rtt.checked_add(local_threshold).unwrap_or(Duration::MAX),
        // No round trip times have been measured yet, so every server is in the window.
        None => return,
    };

    suitable_servers.retain(move |server_desc| {
        server_desc
            .average_round_trip_time
            .map(|rtt| rtt <= max_rtt_within_window)
            .unwrap_or(false)
    });
}

fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }

    for tag_set in tag_sets {
        let matches_tag_set = |server: &&ServerDescription| server.matches_tag_set(tag_set);

        if servers.iter().any(matches_tag_set) {
            servers.retain(matches_tag_set);

            return;
        }
    }

    servers.clear();
}
