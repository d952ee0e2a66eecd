//! Negotiation over real sockets: every client starts from the inventory
//! present when its own negotiation began.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{connect_control, start_server};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use trackwire::config::UdpKind;
use trackwire::core::codec::FrameCodec;
use trackwire::core::record::{BeamHeader, Header, PlatformHeader, TimeHeader};
use trackwire::protocol::message::MessageCode;
use trackwire::protocol::ControlMessage;

#[tokio::test]
async fn test_client_receives_every_stored_header() {
    let mut harness = start_server().await;
    for id in 1..=25u64 {
        harness
            .server
            .insert_header(PlatformHeader::new(id, format!("P{id}")).into(), 0.0)
            .await
            .unwrap();
    }
    harness
        .server
        .insert_header(BeamHeader::new(100, 1, "BEAM").into(), 0.0)
        .await
        .unwrap();

    let client = connect_control(&mut harness).await;
    assert_eq!(client.headers().len(), 26);
    let ids: Vec<u64> = client.headers().iter().map(Header::id).collect();
    let stored: Vec<u64> = harness
        .server
        .container()
        .snapshot()
        .unwrap()
        .iter()
        .map(Header::id)
        .collect();
    assert_eq!(ids, stored);
    assert_eq!(client.transport().kind, UdpKind::Unicast);
    assert_eq!(client.transport().port, harness.config.transport.port);
}

#[tokio::test]
async fn test_later_client_sees_inserts_made_before_it() {
    let mut harness = start_server().await;
    harness
        .server
        .insert_header(PlatformHeader::new(1, "FIRST").into(), 0.0)
        .await
        .unwrap();
    let mut early = connect_control(&mut harness).await;
    assert_eq!(early.headers().len(), 1);

    harness
        .server
        .insert_header(PlatformHeader::new(2, "SECOND").into(), 0.0)
        .await
        .unwrap();
    let late = connect_control(&mut harness).await;

    // The early client learns of id 2 by push, the late one by negotiation.
    match early.recv_push().await.unwrap() {
        ControlMessage::Header(Some(h)) => assert_eq!(h.id(), 2),
        other => panic!("expected header push, got {other:?}"),
    }
    let late_ids: Vec<u64> = late.headers().iter().map(Header::id).collect();
    assert_eq!(late_ids, vec![1, 2]);
    assert_eq!(early.pending_pushes(), 0);
}

#[tokio::test]
async fn test_negotiation_batch_order_on_the_wire() {
    let mut harness = start_server().await;
    harness
        .server
        .set_time(TimeHeader {
            time: 99.0,
            ..TimeHeader::default()
        })
        .await;
    harness
        .server
        .insert_header(PlatformHeader::new(1, "ONE").into(), 0.0)
        .await
        .unwrap();

    let address = harness.config.client.address.clone();
    let task = tokio::spawn(async move {
        let stream = TcpStream::connect(address).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec);
        let mut codes = Vec::new();
        for _ in 0..5 {
            codes.push(framed.next().await.unwrap().unwrap().code);
        }
        framed
            .send(ControlMessage::Disconnect.to_frame())
            .await
            .unwrap();
        codes
    });
    let codes = common::serve_until(&mut harness.server, 0.0, task).await;

    let expected: Vec<u8> = [
        MessageCode::DataMode,
        MessageCode::Time,
        MessageCode::Scenario,
        MessageCode::Headers,
        MessageCode::Header,
    ]
    .iter()
    .map(|c| c.as_u8())
    .collect();
    assert_eq!(codes, expected);
}
