use pretty_assertions::assert_eq;

use super::{build, propagate_session_and_cluster_time, CommandResponse, DeleteModel, UpdateModel};
use crate::{
    bson::{doc, rawdoc, Bson, Document, Timestamp},
    client::session::ClusterTime,
    concern::WriteConcern,
    conn::{MessageFlags, StreamDescription, WireMessage},
    error::ErrorKind,
    operation::{Namespace, Operation},
    test::{implicit_session, localhost, session},
};

fn ns() -> Namespace {
    Namespace::new("d", "c")
}

fn insert_x1() -> (Operation, Document) {
    let op = Operation::insert(ns(), vec![doc! { "x": 1 }]);
    let inserted = match op.kind() {
        super::OperationKind::Insert { documents } => documents[0].clone(),
        _ => unreachable!(),
    };
    (op, inserted)
}

fn legacy() -> StreamDescription {
    StreamDescription::with_wire_version(5)
}

fn modern() -> StreamDescription {
    StreamDescription::with_wire_version(8)
}

fn render(op: &Operation, description: &StreamDescription) -> WireMessage {
    build(op, description).unwrap().into_wire_message().unwrap()
}

fn body_of(message: &WireMessage) -> Document {
    match message {
        WireMessage::Legacy(query) => query.query().clone(),
        WireMessage::Modern(message) => message.document_payload().to_document().unwrap(),
    }
}

#[test]
fn insert_assigns_ids_up_front() {
    let op = Operation::insert(ns(), vec![doc! { "x": 1 }, doc! { "_id": 5, "x": 2 }]);
    let super::OperationKind::Insert { documents } = op.kind() else {
        panic!("expected an insert");
    };

    assert_eq!(documents[0].keys().next().map(String::as_str), Some("_id"));
    assert!(matches!(documents[0].get("_id"), Some(Bson::ObjectId(_))));
    assert_eq!(documents[1], doc! { "_id": 5, "x": 2 });

    // a retry renders the same ids
    let first = render(&op, &modern()).get_command_document();
    let second = render(&op, &modern()).get_command_document();
    assert_eq!(first.get_array("documents").ok(), second.get_array("documents").ok());
}

#[test]
fn legacy_insert_is_single_command_document() {
    let (op, inserted) = insert_x1();
    let message = render(&op, &legacy());

    let WireMessage::Legacy(ref query) = message else {
        panic!("expected OP_QUERY, got {message:?}");
    };
    assert_eq!(query.full_collection_name(), "d.$cmd");
    assert_eq!(
        query.query(),
        &doc! { "insert": "c", "documents": [inserted], "ordered": true }
    );
    assert!(!query.query().contains_key("writeConcern"));
    assert!(!message.more_to_come());
}

#[test]
fn modern_insert_uses_document_sequence() {
    let (op, inserted) = insert_x1();
    let message = render(&op, &modern());

    let WireMessage::Modern(ref msg) = message else {
        panic!("expected OP_MSG, got {message:?}");
    };
    assert_eq!(
        body_of(&message),
        doc! { "insert": "c", "ordered": true, "$db": "d" }
    );
    assert_eq!(msg.document_sequences().len(), 1);
    let sequence = &msg.document_sequences()[0];
    assert_eq!(sequence.identifier(), "documents");
    assert_eq!(
        sequence
            .documents()
            .iter()
            .map(|d| d.to_document().unwrap())
            .collect::<Vec<_>>(),
        vec![inserted]
    );
    assert_eq!(msg.flags(), MessageFlags::empty());
}

#[test]
fn document_sequences_follow_capabilities() {
    let ops = vec![
        insert_x1().0,
        Operation::update(
            ns(),
            vec![UpdateModel::builder()
                .q(doc! { "x": 1 })
                .u(doc! { "$set": { "y": 1 } })
                .upsert(true)
                .build()],
        ),
        Operation::delete(
            ns(),
            vec![DeleteModel::builder().q(doc! { "x": 1 }).limit(1u32).build()],
        ),
    ];

    for op in &ops {
        for wire_version in 0..=8 {
            let description = StreamDescription::with_wire_version(wire_version);
            let message = render(op, &description);
            let identifier = op.kind().payload_identifier().unwrap();
            match message {
                WireMessage::Modern(ref msg) => {
                    assert!(description.supports_op_msg());
                    assert_eq!(msg.document_sequences().len(), 1);
                    assert_eq!(msg.document_sequences()[0].identifier(), identifier);
                    assert!(!body_of(&message).contains_key(identifier));
                }
                WireMessage::Legacy(ref query) => {
                    assert!(!description.supports_op_msg());
                    assert_eq!(query.query().get_array(identifier).unwrap().len(), 1);
                }
            }
        }
    }
}

#[test]
fn update_and_delete_statements() {
    let update = Operation::update(
        ns(),
        vec![UpdateModel::builder()
            .q(doc! { "x": 1 })
            .u(doc! { "$inc": { "x": 1 } })
            .multi(true)
            .build()],
    );
    assert_eq!(
        render(&update, &legacy()).get_command_document(),
        doc! {
            "update": "c",
            "updates": [{ "q": { "x": 1 }, "u": { "$inc": { "x": 1 } }, "multi": true }],
            "ordered": true,
        }
    );

    let delete = Operation::delete(ns(), vec![DeleteModel::builder().q(doc! {}).build()])
        .ordered(false);
    assert_eq!(
        render(&delete, &modern()).get_command_document(),
        doc! {
            "delete": "c",
            "ordered": false,
            "$db": "d",
            "deletes": [{ "q": {}, "limit": 0_i64 }],
        }
    );
}

#[test]
fn write_concern_only_when_explicit() {
    let (op, _) = insert_x1();
    for description in [legacy(), modern()] {
        assert!(!body_of(&render(&op, &description)).contains_key("writeConcern"));
    }

    let op = op.write_concern(WriteConcern::majority());
    for description in [legacy(), modern()] {
        assert_eq!(
            body_of(&render(&op, &description)).get_document("writeConcern").ok(),
            Some(&doc! { "w": "majority" })
        );
    }

    let empty = insert_x1().0.write_concern(WriteConcern::default());
    assert!(!body_of(&render(&empty, &modern())).contains_key("writeConcern"));
}

#[test]
fn unacknowledged_write_sets_more_to_come() {
    let op = insert_x1().0.write_concern(WriteConcern::unacknowledged());

    let message = render(&op, &modern());
    assert!(message.more_to_come());
    assert_eq!(
        body_of(&message).get_document("writeConcern").ok(),
        Some(&doc! { "w": 0 })
    );

    assert!(!render(&op, &legacy()).more_to_come());
    assert!(!render(&insert_x1().0, &modern()).more_to_come());
}

#[test]
fn options_and_commands_pass_through() {
    let op = insert_x1()
        .0
        .options(doc! { "bypassDocumentValidation": true });
    assert_eq!(
        body_of(&render(&op, &modern())).get_bool("bypassDocumentValidation").ok(),
        Some(true)
    );

    let command = Operation::command("admin", doc! { "ping": 1 });
    assert_eq!(command.command_name(), "ping");
    assert_eq!(
        body_of(&render(&command, &modern())),
        doc! { "ping": 1, "$db": "admin" }
    );
    assert_eq!(
        body_of(&render(&command, &legacy())),
        doc! { "ping": 1 }
    );
}

#[test]
fn options_cannot_replace_rendered_fields() {
    for options in [
        doc! { "insert": "other" },
        doc! { "ordered": false },
        doc! { "documents": [{ "x": 2 }] },
        doc! { "writeConcern": { "w": 0 } },
        doc! { "$db": "other" },
        doc! { "lsid": { "id": 1 } },
        doc! { "$clusterTime": { "clusterTime": Timestamp { time: 1, increment: 0 } } },
        doc! { "$readPreference": { "mode": "secondary" } },
    ] {
        let op = insert_x1().0.options(options.clone());
        let error = op.validate().unwrap_err();
        assert!(
            matches!(*error.kind, ErrorKind::InvalidArgument { .. }),
            "{options} was accepted"
        );
        assert!(op.is_ordered());
    }

    let command = Operation::command("admin", doc! { "ping": 1 }).options(doc! { "ping": 2 });
    assert!(matches!(
        *command.validate().unwrap_err().kind,
        ErrorKind::InvalidArgument { .. }
    ));

    // `ordered` is only owned by the client for write batches
    Operation::command("admin", doc! { "ping": 1 })
        .options(doc! { "ordered": true, "comment": "x" })
        .validate()
        .unwrap();
}

#[test]
fn implicit_session_omitted_for_unacknowledged_writes() {
    let op = insert_x1().0.write_concern(WriteConcern::unacknowledged());
    let description = modern();

    let implicit = implicit_session();
    let mut command = build(&op, &description).unwrap();
    propagate_session_and_cluster_time(&mut command, &op, &description, Some(&implicit), None);
    assert_eq!(command.lsid, None);

    let explicit = session();
    let mut command = build(&op, &description).unwrap();
    propagate_session_and_cluster_time(&mut command, &op, &description, Some(&explicit), None);
    assert_eq!(command.lsid.as_ref(), Some(explicit.id()));

    let acknowledged = insert_x1().0;
    let mut command = build(&acknowledged, &description).unwrap();
    propagate_session_and_cluster_time(
        &mut command,
        &acknowledged,
        &description,
        Some(&implicit),
        None,
    );
    assert_eq!(command.lsid.as_ref(), Some(implicit.id()));
}

#[test]
fn session_omitted_without_server_support() {
    let (op, _) = insert_x1();
    let description = StreamDescription::builder().max_wire_version(8).build();
    assert!(!description.supports_sessions());

    let explicit = session();
    let mut command = build(&op, &description).unwrap();
    propagate_session_and_cluster_time(&mut command, &op, &description, Some(&explicit), None);
    assert_eq!(command.lsid, None);
    assert!(!command
        .into_wire_message()
        .unwrap()
        .get_command_document()
        .contains_key("lsid"));
}

#[test]
fn newest_cluster_time_is_gossiped() {
    let (op, _) = insert_x1();
    let older = ClusterTime::new(Timestamp { time: 1, increment: 0 }, doc! { "keyId": 1 });
    let newer = ClusterTime::new(Timestamp { time: 2, increment: 0 }, doc! { "keyId": 1 });

    let description = modern();
    let mut command = build(&op, &description).unwrap();
    propagate_session_and_cluster_time(&mut command, &op, &description, None, None);
    assert_eq!(command.cluster_time, None);

    let session = session();
    session.advance_cluster_time(&newer);
    let mut command = build(&op, &description).unwrap();
    propagate_session_and_cluster_time(
        &mut command,
        &op,
        &description,
        Some(&session),
        Some(&older),
    );
    assert_eq!(command.cluster_time.as_ref(), Some(&newer));
    let sent = command.into_wire_message().unwrap().get_command_document();
    assert_eq!(
        sent.get_document("$clusterTime")
            .unwrap()
            .get_timestamp("clusterTime")
            .ok(),
        Some(Timestamp { time: 2, increment: 0 })
    );

    let description = legacy();
    let mut command = build(&op, &description).unwrap();
    propagate_session_and_cluster_time(&mut command, &op, &description, None, Some(&older));
    assert_eq!(command.cluster_time, None);
}

#[test]
fn invalid_operations_are_rejected() {
    let invalid = vec![
        Operation::insert(ns(), Vec::new()),
        Operation::update(ns(), Vec::new()),
        Operation::delete(ns(), Vec::new()),
        Operation::command("d", doc! {}),
        Operation::insert(Namespace::new("d", ""), vec![doc! {}]),
        Operation::update(
            ns(),
            vec![UpdateModel::builder()
                .q(doc! {})
                .u(doc! { "x": 1 })
                .build()],
        ),
        insert_x1().0.write_concern(
            WriteConcern::builder()
                .w(crate::concern::Acknowledgment::Nodes(0))
                .journal(true)
                .build(),
        ),
    ];

    for op in invalid {
        let error = op.validate().unwrap_err();
        assert!(
            matches!(*error.kind, ErrorKind::InvalidArgument { .. }),
            "{op:?}: {error}"
        );
    }

    insert_x1().0.validate().unwrap();
}

#[test]
fn batch_limits_are_enforced() {
    let description = StreamDescription::builder()
        .max_wire_version(8)
        .max_write_batch_size(2)
        .max_bson_object_size(64)
        .build();

    let too_many = Operation::insert(ns(), vec![doc! {}, doc! {}, doc! {}]);
    assert!(build(&too_many, &description).is_err());

    let too_large = Operation::insert(ns(), vec![doc! { "s": "x".repeat(100) }]);
    assert!(build(&too_large, &description).is_err());

    let fits = Operation::insert(ns(), vec![doc! {}, doc! {}]);
    build(&fits, &description).unwrap();
}

#[test]
fn reply_without_ok_is_invalid() {
    let error = CommandResponse::new(localhost(), rawdoc! { "n": 1 }).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidResponse { .. }));
}

#[test]
fn failed_reply_is_command_error() {
    let response = CommandResponse::new(
        localhost(),
        rawdoc! {
            "ok": 0,
            "code": 10107,
            "codeName": "NotWritablePrimary",
            "errmsg": "not primary",
            "errorLabels": ["RetryableWriteError"],
        },
    )
    .unwrap();

    assert!(!response.is_success());
    let error = response.validate().unwrap_err();
    assert!(error.is_not_writable_primary());
    assert!(error.contains_label("RetryableWriteError"));
    assert_eq!(error.code(), Some(10107));
}

#[test]
fn reply_times_are_read() {
    let response = CommandResponse::new(
        localhost(),
        rawdoc! {
            "ok": 1.0,
            "n": 2,
            "$clusterTime": {
                "clusterTime": Timestamp { time: 9, increment: 1 },
                "signature": { "keyId": 1 },
            },
            "operationTime": Timestamp { time: 8, increment: 1 },
        },
    )
    .unwrap();

    assert!(response.is_success());
    assert_eq!(
        response.cluster_time().map(ClusterTime::timestamp),
        Some(Timestamp { time: 9, increment: 1 })
    );
    assert_eq!(
        response.operation_time(),
        Some(Timestamp { time: 8, increment: 1 })
    );

    let reply = response.into_reply(true).unwrap();
    assert_eq!(reply.n, 2);
    assert!(reply.acknowledged);
}

#[test]
fn write_errors_are_reported_per_batch_kind() {
    let raw = rawdoc! {
        "ok": 1,
        "n": 1,
        "writeErrors": [
            { "index": 1, "code": 11000, "errmsg": "duplicate key" },
            { "index": 3, "code": 11000, "errmsg": "duplicate key" },
        ],
    };

    let ordered = CommandResponse::new(localhost(), raw.clone())
        .unwrap()
        .into_reply(true)
        .unwrap_err();
    let ErrorKind::Write(ref failure) = *ordered.kind else {
        panic!("expected a write failure, got {ordered:?}");
    };
    let (first, preceding) = failure.ordered_failure().unwrap();
    assert_eq!((first.index, preceding), (1, 1));
    assert!(!ordered.is_write_retryable());

    let unordered = CommandResponse::new(localhost(), raw)
        .unwrap()
        .into_reply(false)
        .unwrap_err();
    let ErrorKind::Write(ref failure) = *unordered.kind else {
        panic!("expected a write failure, got {unordered:?}");
    };
    assert_eq!(failure.ordered_failure(), None);
    assert_eq!(failure.write_errors.len(), 2);
}

#[test]
fn upserts_are_reported() {
    let reply = CommandResponse::new(
        localhost(),
        rawdoc! { "ok": 1, "n": 1, "nModified": 0, "upserted": [{ "index": 0, "_id": 7 }] },
    )
    .unwrap()
    .into_reply(true)
    .unwrap();

    assert_eq!(reply.n_modified, Some(0));
    assert_eq!(reply.upserted.len(), 1);
    assert_eq!(reply.upserted[0].id, Bson::Int32(7));
}
