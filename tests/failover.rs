use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::BoxFuture;
use mongodb_executor::{
    bson::{doc, Document, RawDocumentBuf},
    conn::{StreamDescription, Transport, WireMessage},
    error::{Error, ErrorKind, Result, RETRYABLE_WRITE_ERROR},
    event::{command::CommandEvent, EventHandler},
    operation::{Namespace, Operation},
    options::{ClientOptions, ServerAddress, WriteConcern},
    sdam::{ServerDescription, ServerType, Topology, TopologyDescription, TopologyType},
    Client,
};

enum Scripted {
    Fail(std::io::ErrorKind),
    Hang,
}

/// Answers each address from a queue of scripted outcomes, falling back to `{ ok: 1, n: 1 }`.
#[derive(Clone, Default)]
struct ScriptedTransport {
    scripts: Arc<Mutex<HashMap<ServerAddress, VecDeque<Scripted>>>>,
    sent: Arc<Mutex<Vec<(ServerAddress, Document)>>>,
}

impl ScriptedTransport {
    fn script(&self, address: &ServerAddress, outcome: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .push_back(outcome);
    }

    fn sent(&self) -> Vec<(ServerAddress, Document)> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self) -> Vec<ServerAddress> {
        self.sent().into_iter().map(|(address, _)| address).collect()
    }
}

impl Transport for ScriptedTransport {
    fn send_message<'a>(
        &'a self,
        address: &'a ServerAddress,
        message: WireMessage,
    ) -> BoxFuture<'a, Result<Option<RawDocumentBuf>>> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap()
                .push((address.clone(), message.get_command_document()));
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(address)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(Scripted::Fail(kind)) => {
                    return Err(Error::network(std::io::Error::new(
                        kind,
                        "scripted failure",
                    )))
                }
                Some(Scripted::Hang) => futures::future::pending::<()>().await,
                None => {}
            }
            if message.more_to_come() {
                return Ok(None);
            }
            Ok(Some(RawDocumentBuf::from_document(&doc! { "ok": 1, "n": 1 })?))
        })
    }
}

fn address(host: &str) -> ServerAddress {
    ServerAddress::parse(host).unwrap()
}

fn member(host: &str, server_type: ServerType) -> ServerDescription {
    let stream_description = StreamDescription::builder()
        .max_wire_version(8)
        .logical_session_timeout(Duration::from_secs(1800))
        .cluster_time_supported(true)
        .build();
    ServerDescription::new(address(host), server_type, stream_description)
        .with_round_trip_time(Duration::from_millis(1))
}

fn two_member_set() -> Topology {
    Topology::new(
        TopologyDescription::new(
            TopologyType::ReplicaSetNoPrimary,
            vec![
                member("a", ServerType::RsPrimary),
                member("b", ServerType::RsSecondary),
            ],
        )
        .with_set_name("rs"),
    )
}

/// Promotes `b` the first time the topology asks to be re-probed.
fn elect_b_on_request(topology: &Topology) {
    let mut requests = topology.subscribe_to_update_requests();
    let updater = topology.updater();
    tokio::spawn(async move {
        if requests
            .wait_for_update_request(Duration::from_secs(5))
            .await
        {
            updater.update_server(member("b", ServerType::RsPrimary));
            updater.update_server(member("a", ServerType::RsSecondary));
        }
    });
}

type Recorded = Arc<Mutex<Vec<CommandEvent>>>;

fn client(topology: Topology, transport: &ScriptedTransport) -> (Client, Recorded) {
    let options = ClientOptions::builder()
        .server_selection_timeout(Duration::from_secs(2))
        .heartbeat_frequency(Duration::from_millis(20))
        .build();
    let client = Client::new(options, topology, transport.clone());
    let events = Recorded::default();
    let recorded = events.clone();
    client.subscribe(EventHandler::callback(move |event: CommandEvent| {
        recorded.lock().unwrap().push(event)
    }));
    (client, events)
}

fn insert() -> Operation {
    Operation::insert(Namespace::new("db", "coll"), vec![doc! { "_id": 1 }])
}

#[tokio::test]
async fn insert_survives_primary_failover() {
    let topology = two_member_set();
    elect_b_on_request(&topology);
    let transport = ScriptedTransport::default();
    transport.script(&address("a"), Scripted::Fail(std::io::ErrorKind::ConnectionReset));
    let (client, events) = client(topology, &transport);

    let reply = client.execute(insert()).await.unwrap();
    assert_eq!(reply.address, address("b"));
    assert_eq!(reply.n, 1);
    assert_eq!(transport.sent_to(), vec![address("a"), address("b")]);

    client.event_bus().flush().await;
    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], CommandEvent::Started(_)));
    assert!(matches!(events[1], CommandEvent::Failed(_)));
    assert!(matches!(events[2], CommandEvent::Started(_)));
    assert!(matches!(events[3], CommandEvent::Succeeded(_)));
    assert_eq!(events[0].request_id(), events[1].request_id());
    assert_eq!(events[2].request_id(), events[3].request_id());
    assert_ne!(events[0].request_id(), events[2].request_id());
    assert_eq!(events[3].address(), &address("b"));
}

#[tokio::test]
async fn second_failure_is_returned() {
    let topology = two_member_set();
    elect_b_on_request(&topology);
    let transport = ScriptedTransport::default();
    transport.script(&address("a"), Scripted::Fail(std::io::ErrorKind::ConnectionReset));
    transport.script(&address("b"), Scripted::Fail(std::io::ErrorKind::BrokenPipe));
    let (client, _) = client(topology, &transport);

    let error = client.execute(insert()).await.unwrap_err();
    assert!(error.is_network_error());
    assert!(error.contains_label(RETRYABLE_WRITE_ERROR));
    let ErrorKind::Io(ref io) = *error.kind else {
        panic!("expected an I/O error, got {error:?}");
    };
    assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);
    assert_eq!(transport.sent_to().len(), 2);
}

#[tokio::test]
async fn abandoned_operation_reports_cancellation() {
    let transport = ScriptedTransport::default();
    transport.script(&address("a"), Scripted::Hang);
    let (client, events) = client(two_member_set(), &transport);

    let result = tokio::time::timeout(Duration::from_millis(50), client.execute(insert())).await;
    assert!(result.is_err());

    client.event_bus().flush().await;
    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    let CommandEvent::Failed(ref failed) = events[1] else {
        panic!("expected a failed event, got {:?}", events[1]);
    };
    assert!(matches!(*failed.failure.kind, ErrorKind::Cancelled));
    assert_eq!(failed.request_id, events[0].request_id());
}

#[tokio::test]
async fn unacknowledged_insert_does_not_wait_for_reply() {
    let transport = ScriptedTransport::default();
    let (client, events) = client(two_member_set(), &transport);

    let reply = client
        .execute(insert().write_concern(WriteConcern::unacknowledged()))
        .await
        .unwrap();
    assert!(!reply.acknowledged);
    assert_eq!(reply.body, doc! { "ok": 1 });

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].1.contains_key("lsid"));

    client.event_bus().flush().await;
    let events = events.lock().unwrap().clone();
    let CommandEvent::Succeeded(ref succeeded) = events[1] else {
        panic!("expected a succeeded event, got {:?}", events[1]);
    };
    assert_eq!(succeeded.reply, doc! { "ok": 1 });
}
