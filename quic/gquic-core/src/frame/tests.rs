// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    frame::ack::AckRanges, packet::number::PacketNumber, stream::StreamId, transport,
    ufloat16::Ufloat16,
};
use s2n_codec::EncoderBuffer;

fn round_trip(frame: &FrameRef) {
    let mut bytes = [0u8; 1500];
    let mut encoder = EncoderBuffer::new(&mut bytes);
    encoder.encode(frame);
    let len = encoder.len();

    let buffer = DecoderBuffer::new(&bytes[..len]);
    let (decoded, remaining) = FrameRef::decode(buffer).unwrap();
    assert!(remaining.is_empty(), "frame under-consumed its encoding");
    assert_eq!(&decoded, frame);
}

#[test]
fn ping_round_trip() {
    round_trip(&Frame::Ping(Ping));
}

#[test]
fn padding_round_trip() {
    round_trip(&Frame::Padding(Padding { length: 8 }));
    round_trip(&Frame::Padding(Padding { length: 1 }));
}

#[test]
fn stream_round_trip() {
    for offset in [0u64, 1, 500, 70_000, u32::MAX as u64 + 1] {
        for is_fin in [false, true] {
            round_trip(&Frame::Stream(Stream {
                stream_id: StreamId::new(5),
                offset,
                is_last_frame: false,
                is_fin,
                data: b"some stream data".as_slice(),
            }));
        }
    }
}

#[test]
fn stream_last_frame_consumes_remainder() {
    let frame = Frame::Stream(Stream {
        stream_id: StreamId::new(261),
        offset: 9000,
        is_last_frame: true,
        is_fin: true,
        data: b"tail".as_slice(),
    });
    round_trip(&frame);
}

#[test]
fn ack_round_trip() {
    let mut ranges = AckRanges::new();
    ranges.insert_range(1, 3);
    ranges.insert_range(7, 9);
    round_trip(&Frame::Ack(Ack {
        ack_delay: Ufloat16::new(450),
        ranges,
        timestamps: None,
    }));
}

#[test]
fn stop_waiting_round_trip() {
    round_trip(&Frame::StopWaiting(StopWaiting {
        least_unacked: PacketNumber::new(42),
    }));
}

#[test]
fn rst_stream_round_trip() {
    round_trip(&Frame::RstStream(RstStream {
        stream_id: StreamId::new(7),
        final_offset: 123_456,
        error_code: transport::StreamError::STREAM_CANCELLED.code,
    }));
}

#[test]
fn connection_close_round_trip() {
    round_trip(&Frame::ConnectionClose(ConnectionClose {
        error_code: transport::Error::NO_ERROR.code,
        reason: b"going away".as_slice(),
    }));
}

#[test]
fn goaway_round_trip() {
    round_trip(&Frame::Goaway(Goaway {
        error_code: transport::Error::NO_ERROR.code,
        last_good_stream: StreamId::new(3),
        reason: b"".as_slice(),
    }));
}

#[test]
fn window_update_round_trip() {
    round_trip(&Frame::WindowUpdate(WindowUpdate {
        stream_id: StreamId::new(0),
        byte_offset: 1 << 40,
    }));
}

#[test]
fn blocked_round_trip() {
    round_trip(&Frame::Blocked(Blocked {
        stream_id: StreamId::new(5),
    }));
}

#[test]
fn known_wire_images() {
    use hex_literal::hex;

    let mut bytes = [0u8; 64];

    let len = {
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&Frame::<&[u8]>::WindowUpdate(WindowUpdate {
            stream_id: StreamId::new(5),
            byte_offset: 0x1000,
        }));
        encoder.len()
    };
    assert_eq!(bytes[..len], hex!("04 00000005 0000000000001000"));

    let len = {
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&Frame::<&[u8]>::RstStream(RstStream {
            stream_id: StreamId::new(2),
            final_offset: 0xabcd,
            error_code: transport::Code::new(6),
        }));
        encoder.len()
    };
    assert_eq!(bytes[..len], hex!("01 00000002 000000000000abcd 00000006"));

    let len = {
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&Frame::<&[u8]>::Stream(Stream {
            stream_id: StreamId::new(5),
            offset: 0,
            is_last_frame: false,
            is_fin: true,
            data: b"hi".as_slice(),
        }));
        encoder.len()
    };
    // stream bit + fin + explicit length, 1-byte id, no offset
    assert_eq!(bytes[..len], hex!("e0 05 0002 6869"));
}

#[test]
fn unknown_tag_is_rejected() {
    // 0x08..=0x3f is unassigned
    let bytes = [0x08u8, 0, 0];
    let buffer = DecoderBuffer::new(&bytes);
    assert!(FrameRef::decode(buffer).is_err());
}

#[test]
fn frames_decode_in_wire_order() {
    let mut bytes = [0u8; 64];
    let len = {
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&Frame::<&[u8]>::Ping(Ping));
        encoder.encode(&Frame::<&[u8]>::Blocked(Blocked {
            stream_id: StreamId::new(0),
        }));
        encoder.encode(&Frame::<&[u8]>::Ping(Ping));
        encoder.len()
    };

    let mut buffer = DecoderBuffer::new(&bytes[..len]);
    let mut tags = alloc::vec::Vec::new();
    while !buffer.is_empty() {
        let (frame, remaining) = FrameRef::decode(buffer).unwrap();
        tags.push(match frame {
            Frame::Ping(_) => "ping",
            Frame::Blocked(_) => "blocked",
            _ => "other",
        });
        buffer = remaining;
    }
    assert_eq!(tags, ["ping", "blocked", "ping"]);
}

#[test]
fn retransmittable_classification() {
    let ack: Frame<&[u8]> = Frame::Ack(Ack {
        ack_delay: Ufloat16::ZERO,
        ranges: [PacketNumber::new(1)].into_iter().collect(),
        timestamps: None,
    });
    assert!(!ack.is_retransmittable());
    assert!(!Frame::<&[u8]>::Padding(Padding { length: 3 }).is_retransmittable());
    assert!(!Frame::<&[u8]>::StopWaiting(StopWaiting {
        least_unacked: PacketNumber::new(1)
    })
    .is_retransmittable());

    assert!(Frame::<&[u8]>::Ping(Ping).is_retransmittable());
    assert!(Frame::<&[u8]>::Stream(Stream {
        stream_id: StreamId::new(5),
        offset: 0,
        is_last_frame: false,
        is_fin: false,
        data: b"data".as_slice(),
    })
    .is_retransmittable());
}
