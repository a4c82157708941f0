//! Pushing through a connection.

mod common;

use common::*;
use gitsmart_protocol::{
    Direction, PktLine, PushOutcome, PushSpec, PushStatus, Service, SmartConfig, SmartConnection,
    SmartError, UnpackStatus,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;

const CAPS: &str = "report-status delete-refs ofs-delta";

#[test]
fn test_push_with_report_reconnects() {
    let mut first = advertisement(CAPS, &[(oid(1), "refs/heads/main")]);
    first.extend(encode(&[
        PktLine::Unpack(UnpackStatus::Ok),
        PktLine::Ok("refs/heads/main".into()),
        PktLine::Flush,
    ]));
    let after = advertisement(CAPS, &[(oid(2), "refs/heads/main")]);
    let transport = ScriptedTransport::stateful(vec![first, after]);
    let log = transport.log();

    let mut conn =
        SmartConnection::connect(transport, URL, Direction::Push, SmartConfig::default()).unwrap();
    let specs = [PushSpec::update("refs/heads/main", oid(1), oid(2))];
    let outcome = conn
        .push(&specs, &mut Cursor::new(b"PACK-BYTES".to_vec()))
        .unwrap();

    assert!(outcome.unpack_ok);
    assert_eq!(
        outcome.statuses,
        vec![PushStatus {
            reference: "refs/heads/main".into(),
            message: None
        }]
    );
    assert_eq!(conn.advertisement().find("refs/heads/main").unwrap().oid, oid(2));

    let log = log.lock();
    assert_eq!(
        log.actions,
        vec![Service::ReceivePackLs, Service::ReceivePackLs]
    );
    let expected = format!(
        "0074{} {} refs/heads/main\0report-status\n0000PACK-BYTES",
        oid(1),
        oid(2)
    );
    assert_eq!(String::from_utf8_lossy(&log.written[0]), expected);
}

#[test]
fn test_push_without_updates_reads_no_reply() {
    // Nothing follows the advertisement; reading a reply would hit EOF.
    let transport =
        ScriptedTransport::stateful(vec![advertisement(CAPS, &[(oid(1), "refs/heads/main")])]);
    let log = transport.log();

    let mut conn =
        SmartConnection::connect(transport, URL, Direction::Push, SmartConfig::default()).unwrap();
    let outcome = conn.push(&[], &mut std::io::empty()).unwrap();

    assert_eq!(outcome, PushOutcome::assumed_ok());
    assert_eq!(log.lock().actions, vec![Service::ReceivePackLs]);
    assert!(conn.is_connected());
}

#[test]
fn test_push_rejected_ref() {
    let mut first = advertisement(CAPS, &[(oid(1), "a"), (oid(2), "b")]);
    first.extend_from_slice(b"0008ok a0013ng b bad object0000");
    let transport = ScriptedTransport::stateful(vec![
        first,
        advertisement(CAPS, &[(oid(3), "a"), (oid(2), "b")]),
    ]);

    let mut conn =
        SmartConnection::connect(transport, URL, Direction::Push, SmartConfig::default()).unwrap();
    let specs = [
        PushSpec::update("a", oid(1), oid(3)),
        PushSpec::update("b", oid(2), oid(4)),
    ];
    let outcome = conn.push(&specs, &mut std::io::empty()).unwrap();

    assert_eq!(
        outcome.statuses,
        vec![
            PushStatus {
                reference: "a".into(),
                message: None
            },
            PushStatus {
                reference: "b".into(),
                message: Some("bad object".into())
            },
        ]
    );
    assert!(!outcome.unpack_ok);
    let rejected: Vec<_> = outcome.rejected().map(|s| s.reference.as_str()).collect();
    assert_eq!(rejected, vec!["b"]);
}

#[test]
fn test_unexpected_report_packet() {
    let mut first = advertisement(CAPS, &[(oid(1), "refs/heads/main")]);
    first.extend(encode(&[PktLine::Nak]));
    let transport = ScriptedTransport::stateful(vec![first]);

    let mut conn =
        SmartConnection::connect(transport, URL, Direction::Push, SmartConfig::default()).unwrap();
    let specs = [PushSpec::update("refs/heads/main", oid(1), oid(2))];
    let err = conn.push(&specs, &mut std::io::empty()).unwrap_err();
    assert!(matches!(err, SmartError::Protocol(_)));
}

#[test]
fn test_stateless_push_opens_receive_pack() {
    let transport = ScriptedTransport::stateless(vec![
        rpc_advertisement("git-receive-pack", CAPS, &[(oid(1), "refs/heads/old")]),
        encode(&[
            PktLine::Unpack(UnpackStatus::Ok),
            PktLine::Ok("refs/heads/old".into()),
            PktLine::Flush,
        ]),
        rpc_advertisement("git-receive-pack", CAPS, &[(oid(5), "refs/heads/other")]),
    ]);
    let log = transport.log();

    let mut conn =
        SmartConnection::connect(transport, URL, Direction::Push, SmartConfig::default()).unwrap();
    let outcome = conn
        .push(&[PushSpec::delete("refs/heads/old")], &mut std::io::empty())
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(outcome.statuses.len(), 1);
    assert!(conn.advertisement().find("refs/heads/old").is_none());

    let log = log.lock();
    assert_eq!(
        log.actions,
        vec![
            Service::ReceivePackLs,
            Service::ReceivePack,
            Service::ReceivePackLs
        ]
    );
    let expected = format!(
        "0073{} {} refs/heads/old\0report-status\n0000",
        oid(1),
        gitsmart_protocol::ObjectId::ZERO
    );
    assert_eq!(String::from_utf8_lossy(&log.written[1]), expected);
}

#[test]
fn test_delete_unknown_ref_sends_nothing() {
    let transport =
        ScriptedTransport::stateful(vec![advertisement(CAPS, &[(oid(1), "refs/heads/main")])]);
    let log = transport.log();

    let mut conn =
        SmartConnection::connect(transport, URL, Direction::Push, SmartConfig::default()).unwrap();
    let err = conn
        .push(&[PushSpec::delete("refs/heads/missing")], &mut std::io::empty())
        .unwrap_err();

    assert!(matches!(err, SmartError::InvalidRequest(_)));
    assert!(log.lock().written[0].is_empty());
    assert!(conn.is_connected());
}
