mod transport;

use std::time::Duration;

pub(crate) use self::{
    event::EventRecorder,
    transport::{MockReply, MockTransport},
};
use crate::{
    bson::{doc, Document},
    client::session::{ClientSession, ServerSessionPool},
    conn::StreamDescription,
    error::{Error, ErrorKind},
    options::{ClientOptions, ServerAddress},
    sdam::{ServerDescription, ServerType, Topology, TopologyDescription, TopologyType},
    Client,
};

const SESSION_TIMEOUT: Option<Duration> = Some(Duration::from_secs(30 * 60));

pub(crate) fn address(host: &str) -> ServerAddress {
    ServerAddress::Tcp {
        host: host.to_string(),
        port: None,
    }
}

pub(crate) fn localhost() -> ServerAddress {
    ServerAddress::default()
}

/// An explicit session backed by a throwaway pool.
pub(crate) fn session() -> ClientSession {
    let pool = ServerSessionPool::new();
    ClientSession::new(pool.check_out(SESSION_TIMEOUT), pool, false, SESSION_TIMEOUT)
}

/// An implicit session backed by a throwaway pool.
pub(crate) fn implicit_session() -> ClientSession {
    let pool = ServerSessionPool::new();
    ClientSession::new(pool.check_out(SESSION_TIMEOUT), pool, true, SESSION_TIMEOUT)
}

pub(crate) fn server(
    host: &str,
    server_type: ServerType,
    stream_description: StreamDescription,
) -> ServerDescription {
    ServerDescription::new(address(host), server_type, stream_description)
        .with_round_trip_time(Duration::from_millis(1))
}

/// A replica set whose primary is `primary`, with the other hosts as secondaries.
pub(crate) fn replica_set(
    primary: &str,
    secondaries: &[&str],
    stream_description: StreamDescription,
) -> Topology {
    let mut servers = vec![server(primary, ServerType::RsPrimary, stream_description.clone())];
    servers.extend(
        secondaries
            .iter()
            .map(|host| server(host, ServerType::RsSecondary, stream_description.clone())),
    );
    Topology::new(
        TopologyDescription::new(TopologyType::ReplicaSetNoPrimary, servers).with_set_name("rs"),
    )
}

/// Stands in for the topology monitor: each time the topology asks for a re-probe, the given
/// server descriptions are published.
pub(crate) fn spawn_monitor(topology: &Topology, servers: Vec<ServerDescription>) {
    let mut requests = topology.subscribe_to_update_requests();
    let updater = topology.updater();
    tokio::spawn(async move {
        while requests
            .wait_for_update_request(Duration::from_secs(10))
            .await
        {
            for server in servers.iter().cloned() {
                updater.update_server(server);
            }
        }
    });
}

pub(crate) fn test_options() -> ClientOptions {
    ClientOptions::builder()
        .server_selection_timeout(Duration::from_millis(500))
        .heartbeat_frequency(Duration::from_millis(50))
        .build()
}

pub(crate) fn client(topology: Topology, transport: &MockTransport) -> Client {
    Client::new(test_options(), topology, transport.clone())
}

pub(crate) fn command_error(code: i32, message: &str) -> Document {
    doc! { "ok": 0, "code": code, "errmsg": message }
}

pub(crate) fn network_error(message: &str) -> Error {
    Error::network(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        message.to_string(),
    ))
}

pub(crate) fn io_message(error: &Error) -> String {
    match *error.kind {
        ErrorKind::Io(ref io) => io.to_string(),
        ref other => panic!("expected an I/O error, got {other:?}"),
    }
}
