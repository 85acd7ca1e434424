// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use gquic_core::{
    connection,
    crypto::{EncryptionLevel, KeySet, TAG_LEN},
    frame::Frame,
    packet::{
        self, encode_packet,
        number::{PacketNumber, PacketNumberLen},
        Header, MAX_PACKET_SIZE,
    },
    version::Version,
};

/// Assembles outgoing packets: assigns monotonically increasing packet
/// numbers, picks the shortest safe wire length for each, and seals the
/// payload.
#[derive(Debug)]
pub struct PacketCreator {
    connection_id: connection::Id,
    next_packet_number: PacketNumber,
    /// Carried in the public header until the version is settled
    version: Option<Version>,
}

/// A packet ready for the wire, with what the ledger needs to know
#[derive(Debug)]
pub struct SerializedPacket {
    pub packet_number: PacketNumber,
    pub packet_number_len: PacketNumberLen,
    pub bytes: Vec<u8>,
}

impl PacketCreator {
    pub fn new(connection_id: connection::Id, version: Option<Version>) -> Self {
        Self {
            connection_id,
            next_packet_number: PacketNumber::new(1),
            version,
        }
    }

    #[inline]
    pub fn connection_id(&self) -> connection::Id {
        self.connection_id
    }

    /// Stops offering a version once negotiation settles
    pub fn clear_version(&mut self) {
        self.version = None;
    }

    /// The payload bytes available in the next packet
    pub fn max_payload(&self, least_unacked: PacketNumber) -> usize {
        let header = self.header(self.next_packet_number, least_unacked);
        MAX_PACKET_SIZE - header.wire_len() - TAG_LEN
    }

    fn header(&self, packet_number: PacketNumber, least_unacked: PacketNumber) -> Header {
        // the receiver reconstructs from twice the distance to the
        // oldest packet it might still be missing
        let truncated = packet_number.truncate(least_unacked);
        Header {
            connection_id: self.connection_id,
            version: self.version,
            packet_number,
            packet_number_len: truncated.len(),
        }
    }

    /// Serializes and seals one packet carrying `frames`
    pub fn build(
        &mut self,
        frames: &[Frame<Bytes>],
        level: EncryptionLevel,
        keys: &KeySet,
        least_unacked: PacketNumber,
    ) -> Result<SerializedPacket, packet::Error> {
        let packet_number = self.next_packet_number;
        let header = self.header(packet_number, least_unacked);

        let bytes = encode_packet(&header, frames, level, keys)?;

        self.next_packet_number = packet_number.next();

        Ok(SerializedPacket {
            packet_number,
            packet_number_len: header.packet_number_len,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gquic_core::frame::Ping;

    fn creator() -> PacketCreator {
        PacketCreator::new(connection::Id::new(7), None)
    }

    #[test]
    fn packet_numbers_increase_monotonically() {
        let mut creator = creator();
        let keys = KeySet::new();
        let frames: [Frame<Bytes>; 1] = [Ping.into()];

        let first = creator
            .build(&frames, EncryptionLevel::Unencrypted, &keys, PacketNumber::new(1))
            .unwrap();
        let second = creator
            .build(&frames, EncryptionLevel::Unencrypted, &keys, PacketNumber::new(1))
            .unwrap();

        assert_eq!(first.packet_number, PacketNumber::new(1));
        assert_eq!(second.packet_number, PacketNumber::new(2));
    }

    #[test]
    fn packet_number_length_grows_with_the_unacked_distance() {
        let mut creator = creator();
        // simulate a long-lived connection
        creator.next_packet_number = PacketNumber::new(100_000);

        let keys = KeySet::new();
        let frames: [Frame<Bytes>; 1] = [Ping.into()];

        // everything acked: the shortest form suffices
        let packet = creator
            .build(
                &frames,
                EncryptionLevel::Unencrypted,
                &keys,
                PacketNumber::new(100_000),
            )
            .unwrap();
        assert_eq!(packet.packet_number_len, PacketNumberLen::U8);

        // a long tail of unacked packets needs more bytes
        let packet = creator
            .build(
                &frames,
                EncryptionLevel::Unencrypted,
                &keys,
                PacketNumber::new(10),
            )
            .unwrap();
        assert_eq!(packet.packet_number_len, PacketNumberLen::U32);
    }

    #[test]
    fn max_payload_accounts_for_header_and_tag() {
        let creator = creator();
        let expected = MAX_PACKET_SIZE - (1 + 8 + 1) - TAG_LEN;
        assert_eq!(creator.max_payload(PacketNumber::new(1)), expected);
    }
}
