use std::{collections::HashSet, time::Duration};

use pretty_assertions::assert_eq;

use super::attempt_to_select_server;
use crate::{
    conn::StreamDescription,
    error::ErrorKind,
    options::ServerAddress,
    sdam::description::{
        server::{ServerDescription, ServerType},
        topology::{TopologyDescription, TopologyType},
    },
    selection_criteria::{ReadPreference, TagSet},
};

const LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

fn address(host: &str) -> ServerAddress {
    ServerAddress::Tcp {
        host: host.to_string(),
        port: None,
    }
}

fn server(host: &str, server_type: ServerType, rtt_ms: u64) -> ServerDescription {
    ServerDescription::new(
        address(host),
        server_type,
        StreamDescription::new_testing(),
    )
    .with_round_trip_time(Duration::from_millis(rtt_ms))
}

fn replica_set(servers: Vec<ServerDescription>) -> TopologyDescription {
    TopologyDescription::new(TopologyType::ReplicaSetNoPrimary, servers).with_set_name("rs")
}

fn select_many(
    topology: &TopologyDescription,
    read_preference: &ReadPreference,
) -> HashSet<ServerAddress> {
    (0..100)
        .filter_map(|_| {
            attempt_to_select_server(topology, read_preference, LOCAL_THRESHOLD)
                .unwrap()
                .map(|selected| selected.address)
        })
        .collect()
}

#[test]
fn primary_selects_primary_address() {
    let topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 50),
        server("b", ServerType::RsSecondary, 1),
        server("c", ServerType::RsSecondary, 1),
    ]);
    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetWithPrimary);
    assert_eq!(topology.primary_address(), Some(&address("a")));

    let selected = attempt_to_select_server(&topology, &ReadPreference::Primary, LOCAL_THRESHOLD)
        .unwrap()
        .unwrap();
    assert_eq!(selected.address, address("a"));
    assert_eq!(selected.server_type, ServerType::RsPrimary);
}

#[test]
fn primary_without_primary_fails_immediately() {
    let topology = replica_set(vec![
        server("b", ServerType::RsSecondary, 1),
        ServerDescription::unknown(address("a")),
    ]);
    assert_eq!(topology.primary_address(), None);

    let error = attempt_to_select_server(&topology, &ReadPreference::Primary, LOCAL_THRESHOLD)
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::NoPrimaryAvailable { .. }));
    assert!(error.is_server_selection_error());
}

#[test]
fn primary_never_returns_non_primary() {
    let topologies = vec![
        replica_set(vec![server("a", ServerType::RsSecondary, 1)]),
        replica_set(vec![
            server("a", ServerType::RsSecondary, 1),
            server("b", ServerType::RsPrimary, 100),
        ]),
        replica_set(vec![
            server("a", ServerType::RsArbiter, 1),
            ServerDescription::unknown(address("b")),
        ]),
        TopologyDescription::new(TopologyType::Unknown, vec![]),
        TopologyDescription::new(
            TopologyType::Single,
            vec![server("a", ServerType::RsSecondary, 1)],
        ),
    ];

    for topology in topologies {
        match attempt_to_select_server(&topology, &ReadPreference::Primary, LOCAL_THRESHOLD) {
            Ok(Some(selected)) => {
                assert_eq!(Some(&selected.address), topology.primary_address())
            }
            Ok(None) => panic!("primary selection should either succeed or fail"),
            Err(error) => assert!(matches!(*error.kind, ErrorKind::NoPrimaryAvailable { .. })),
        }
    }
}

#[test]
fn direct_connection_primary_requires_writable_server() {
    for server_type in [ServerType::Standalone, ServerType::RsPrimary, ServerType::Mongos] {
        let topology =
            TopologyDescription::new(TopologyType::Single, vec![server("a", server_type, 1)]);
        let selected = attempt_to_select_server(&topology, &ReadPreference::Primary, LOCAL_THRESHOLD)
            .unwrap()
            .unwrap();
        assert_eq!(selected.server_type, server_type);
    }

    let secondary = TopologyDescription::new(
        TopologyType::Single,
        vec![server("a", ServerType::RsSecondary, 1)],
    );
    assert_eq!(secondary.primary_address(), None);
    let error = attempt_to_select_server(&secondary, &ReadPreference::Primary, LOCAL_THRESHOLD)
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::NoPrimaryAvailable { .. }));

    // other preferences still reach the directly connected member
    let selected = attempt_to_select_server(
        &secondary,
        &ReadPreference::Secondary { options: None },
        LOCAL_THRESHOLD,
    )
    .unwrap()
    .unwrap();
    assert_eq!(selected.address, address("a"));
}

#[test]
fn newer_primary_demotes_old_one() {
    let mut topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 1),
        server("b", ServerType::RsSecondary, 1),
    ]);
    topology.update(server("b", ServerType::RsPrimary, 1));

    assert_eq!(topology.primary_address(), Some(&address("b")));
    assert_eq!(
        topology
            .get_server_description(&address("a"))
            .unwrap()
            .server_type,
        ServerType::Unknown
    );
    assert_eq!(topology.servers_with_type(&[ServerType::RsPrimary]).count(), 1);
}

#[test]
fn secondary_respects_latency_window() {
    let topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 1),
        server("b", ServerType::RsSecondary, 10),
        server("c", ServerType::RsSecondary, 20),
        server("d", ServerType::RsSecondary, 100),
    ]);

    let selected = select_many(&topology, &ReadPreference::Secondary { options: None });
    assert_eq!(selected, [address("b"), address("c")].into_iter().collect());
}

#[test]
fn secondary_preferred_falls_back_to_primary() {
    let topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 1),
        ServerDescription::unknown(address("b")),
    ]);

    let selected = select_many(
        &topology,
        &ReadPreference::SecondaryPreferred { options: None },
    );
    assert_eq!(selected, [address("a")].into_iter().collect());

    let none = attempt_to_select_server(
        &topology,
        &ReadPreference::Secondary { options: None },
        LOCAL_THRESHOLD,
    )
    .unwrap();
    assert_eq!(none, None);
}

#[test]
fn primary_preferred_prefers_primary() {
    let topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 100),
        server("b", ServerType::RsSecondary, 1),
    ]);
    let selected = select_many(&topology, &ReadPreference::PrimaryPreferred { options: None });
    assert_eq!(selected, [address("a")].into_iter().collect());
}

#[test]
fn nearest_filters_by_tags() {
    let east: TagSet = [("dc".to_string(), "east".to_string())].into_iter().collect();
    let west: TagSet = [("dc".to_string(), "west".to_string())].into_iter().collect();
    let topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 1).with_tags(east.clone()),
        server("b", ServerType::RsSecondary, 1).with_tags(west.clone()),
    ]);

    let read_preference = ReadPreference::Nearest { options: None }
        .with_tags(vec![west])
        .unwrap();
    let selected = select_many(&topology, &read_preference);
    assert_eq!(selected, [address("b")].into_iter().collect());

    let other: TagSet = [("dc".to_string(), "north".to_string())].into_iter().collect();
    let read_preference = ReadPreference::Nearest { options: None }
        .with_tags(vec![other])
        .unwrap();
    assert!(select_many(&topology, &read_preference).is_empty());
}

#[test]
fn sharded_selects_mongos_for_primary() {
    let topology = TopologyDescription::new(
        TopologyType::Sharded,
        vec![
            server("a", ServerType::Mongos, 1),
            server("b", ServerType::Mongos, 5),
            server("c", ServerType::Mongos, 500),
        ],
    );
    assert_eq!(topology.primary_address(), None);

    let selected = select_many(&topology, &ReadPreference::Primary);
    assert_eq!(selected, [address("a"), address("b")].into_iter().collect());
}

#[test]
fn single_selects_lone_server() {
    let topology = TopologyDescription::new(
        TopologyType::Unknown,
        vec![server("a", ServerType::Standalone, 1)],
    );
    assert_eq!(topology.topology_type(), TopologyType::Single);

    for read_preference in [
        ReadPreference::Primary,
        ReadPreference::Secondary { options: None },
        ReadPreference::Nearest { options: None },
    ] {
        let selected = attempt_to_select_server(&topology, &read_preference, LOCAL_THRESHOLD)
            .unwrap()
            .unwrap();
        assert_eq!(selected.address, address("a"));
    }
}

#[test]
fn mark_unknown_clears_primary() {
    let mut topology = replica_set(vec![
        server("a", ServerType::RsPrimary, 1),
        server("b", ServerType::RsSecondary, 1),
    ]);
    assert!(topology.mark_unknown(&address("a"), "not writable primary".to_string()));
    assert!(!topology.mark_unknown(&address("a"), "again".to_string()));

    assert_eq!(topology.topology_type(), TopologyType::ReplicaSetNoPrimary);
    assert_eq!(topology.primary_address(), None);
    assert!(topology
        .server_selection_timeout_error_message(&ReadPreference::Primary)
        .contains("None of the available servers"));
}
