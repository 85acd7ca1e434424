// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use gquic_core::{
    recovery::TcpSender,
    time::{Clock, NoopClock},
};
use std::collections::VecDeque;

const MS: Duration = Duration::from_millis(1);

/// Collects outgoing datagrams for hand delivery
#[derive(Debug, Default)]
struct Pipe {
    datagrams: VecDeque<Vec<u8>>,
}

impl DatagramWriter for Pipe {
    fn write_datagram(&mut self, datagram: &[u8]) -> Result<(), WouldBlock> {
        self.datagrams.push_back(datagram.to_vec());
        Ok(())
    }
}

/// A socket that refuses everything
#[derive(Debug, Default)]
struct FullSocket;

impl DatagramWriter for FullSocket {
    fn write_datagram(&mut self, _datagram: &[u8]) -> Result<(), WouldBlock> {
        Err(WouldBlock)
    }
}

fn pair(now: Timestamp) -> (Connection<TcpSender>, Connection<TcpSender>) {
    let connection_id = connection::Id::new(0x1234);
    let client = Connection::new(
        endpoint::Type::Client,
        connection_id,
        TcpSender::new(true, 1000),
        Limits::default(),
        now,
    );
    let server = Connection::new(
        endpoint::Type::Server,
        connection_id,
        TcpSender::new(true, 1000),
        Limits::default(),
        now,
    );
    (client, server)
}

fn deliver<W: DatagramWriter>(
    from: &mut Pipe,
    to: &mut Connection<TcpSender>,
    now: Timestamp,
    reply: &mut W,
) {
    while let Some(datagram) = from.datagrams.pop_front() {
        to.on_datagram(&datagram, now, reply);
    }
}

#[test]
fn stream_data_reaches_the_peer() {
    let now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    let written = client
        .write(
            stream_id,
            Bytes::from_static(b"hello world"),
            true,
            now,
            &mut client_out,
        )
        .unwrap();
    assert_eq!(written, 11);
    assert!(!client_out.datagrams.is_empty());

    deliver(&mut client_out, &mut server, now, &mut server_out);

    assert_eq!(
        server.poll_event(),
        Some(SessionEvent::StreamData { stream_id })
    );
    assert_eq!(
        server.read(stream_id, now).unwrap(),
        Bytes::from_static(b"hello world")
    );
}

#[test]
fn acks_drain_the_senders_ledger() {
    let mut now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    client
        .write(
            stream_id,
            Bytes::from_static(b"data"),
            false,
            now,
            &mut client_out,
        )
        .unwrap();
    assert!(client.sent_packets().bytes_in_flight() > 0);

    deliver(&mut client_out, &mut server, now, &mut server_out);

    // the delayed-ack timer forces the ack out
    now += 30 * MS;
    server.on_timeout(now, &mut server_out);
    assert!(
        !server_out.datagrams.is_empty(),
        "server should have acked by now"
    );

    deliver(&mut server_out, &mut client, now, &mut client_out);
    assert_eq!(client.sent_packets().bytes_in_flight(), 0);
    assert!(client.sent_packets().rtt().has_samples());
}

#[test]
fn second_packet_forces_an_immediate_ack() {
    let now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    client
        .write(stream_id, Bytes::from_static(b"one"), false, now, &mut client_out)
        .unwrap();
    client
        .write(stream_id, Bytes::from_static(b"two"), false, now, &mut client_out)
        .unwrap();

    deliver(&mut client_out, &mut server, now, &mut server_out);

    // no timer needed: the second retransmittable packet acks at once
    assert!(!server_out.datagrams.is_empty());
}

#[test]
fn writes_after_close_return_not_connected() {
    let now = NoopClock.get_time();
    let (mut client, _server) = pair(now);
    let mut out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    client.close(transport::Error::NO_ERROR, now, &mut out);

    let result = client.write(stream_id, Bytes::from_static(b"x"), false, now, &mut out);
    assert_eq!(result.unwrap_err(), Error::NotConnected);
    assert_eq!(client.create_outgoing_stream().unwrap_err(), Error::NotConnected);
}

#[test]
fn close_enters_time_wait_and_answers_with_public_resets() {
    let mut now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    client.close(transport::Error::NO_ERROR, now, &mut client_out);
    assert!(!client.is_open());
    assert_eq!(client_out.datagrams.len(), 1, "exactly one CONNECTION_CLOSE");

    // the peer learns of the close
    deliver(&mut client_out, &mut server, now, &mut server_out);
    assert!(server.is_drained());
    assert_eq!(
        server.close_error().unwrap().code,
        transport::Error::NO_ERROR.code
    );

    // strays during time-wait draw a public reset
    client.on_datagram(&[0u8; 32], now, &mut client_out);
    let stray_reply = client_out.datagrams.pop_front().unwrap();
    assert_eq!(stray_reply[0] & packet::header::FLAG_PUBLIC_RESET, 0x02);

    // after the period the connection drains completely
    now += Limits::default().time_wait_period + MS;
    client.on_timeout(now, &mut client_out);
    assert!(client.is_drained());
    client.on_datagram(&[0u8; 32], now, &mut client_out);
    assert!(client_out.datagrams.is_empty(), "drained connections are silent");
}

#[test]
fn idle_timeout_closes_the_connection() {
    let now = NoopClock.get_time();
    let (mut client, _server) = pair(now);
    let mut out = Pipe::default();

    let deadline = client.next_timeout(now).unwrap();
    assert_eq!(deadline, now + Limits::default().handshake_idle_timeout);

    client.on_timeout(deadline + MS, &mut out);
    assert!(!client.is_open());
    assert_eq!(
        client.close_error().unwrap().code,
        transport::Error::CONNECTION_TIMED_OUT.code
    );
}

#[test]
fn activity_pushes_the_idle_deadline_out() {
    let mut now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();

    now += Duration::from_secs(5);
    client
        .write(stream_id, Bytes::from_static(b"ping"), false, now, &mut client_out)
        .unwrap();
    deliver(&mut client_out, &mut server, now, &mut server_out);

    // let the pending ack out so only the idle deadline remains
    now += 30 * MS;
    server.on_timeout(now, &mut server_out);

    let deadline = server.next_timeout(now).unwrap();
    assert!(deadline > now + Duration::from_secs(5));
}

#[test]
fn socket_backpressure_parks_the_packet() {
    let now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    client
        .write(
            stream_id,
            Bytes::from_static(b"stuck"),
            false,
            now,
            &mut FullSocket,
        )
        .unwrap();

    // the packet went nowhere, but it is not lost
    let mut out = Pipe::default();
    client.on_writable(now, &mut out);
    assert_eq!(out.datagrams.len(), 1);

    deliver(&mut out, &mut server, now, &mut server_out);
    assert_eq!(
        server.poll_event(),
        Some(SessionEvent::StreamData { stream_id })
    );
}

#[test]
fn unsupported_versions_draw_a_negotiation_packet() {
    let now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut server_out = Pipe::default();
    let mut client_out = Pipe::default();

    // a client offering an unknown version
    let mut datagram = vec![packet::header::FLAG_VERSION];
    datagram.extend_from_slice(&0x1234u64.to_be_bytes());
    datagram.extend_from_slice(b"Q999");
    datagram.extend_from_slice(&[1, 0, 0]);

    server.on_datagram(&datagram, now, &mut server_out);
    assert!(server.is_open(), "the server merely answers");

    let negotiation = server_out.datagrams.pop_front().unwrap();
    assert_eq!(negotiation[0] & packet::header::FLAG_VERSION, 0x01);

    // this implementation only speaks one version, so a negotiation
    // demand ends the connection
    client.on_datagram(&negotiation, now, &mut client_out);
    assert!(!client.is_open());
    assert_eq!(
        client.close_error().unwrap().code,
        transport::Error::INVALID_VERSION.code
    );
}

#[test]
fn retransmission_alarm_replays_lost_data() {
    let mut now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    client
        .write(stream_id, Bytes::from_static(b"lost"), false, now, &mut client_out)
        .unwrap();

    // the datagram never arrives; run the alarms until a replay shows up
    client_out.datagrams.clear();
    for _ in 0..4 {
        let deadline = match client.next_timeout(now) {
            Some(deadline) => deadline,
            None => break,
        };
        now = deadline + MS;
        client.on_timeout(now, &mut client_out);
        if !client_out.datagrams.is_empty() {
            break;
        }
    }
    assert!(
        !client_out.datagrams.is_empty(),
        "a probe or retransmission should have left"
    );

    // the replayed data still reaches the application
    deliver(&mut client_out, &mut server, now, &mut server_out);
    assert_eq!(
        server.read(stream_id, now).unwrap(),
        Bytes::from_static(b"lost")
    );
}

#[test]
fn duplicate_datagrams_are_processed_once() {
    let now = NoopClock.get_time();
    let (mut client, mut server) = pair(now);
    let mut client_out = Pipe::default();
    let mut server_out = Pipe::default();

    let stream_id = client.create_outgoing_stream().unwrap().unwrap();
    client
        .write(stream_id, Bytes::from_static(b"once"), true, now, &mut client_out)
        .unwrap();

    let datagram = client_out.datagrams.pop_front().unwrap();
    server.on_datagram(&datagram, now, &mut server_out);
    server.on_datagram(&datagram, now, &mut server_out);

    assert_eq!(
        server.poll_event(),
        Some(SessionEvent::StreamData { stream_id })
    );
    assert_eq!(server.poll_event(), None, "the replay produced nothing");
}
