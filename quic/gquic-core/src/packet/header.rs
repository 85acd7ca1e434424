// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The public packet header.
//!
//! Layout: `[public_flags:1][connection_id:8][version:4, optional]
//! [packet_number:1|2|4|6]`. The flags byte leads so the receiver can
//! learn the packet number length (and whether a version is present)
//! before reading the variable fields.

use crate::{
    connection,
    endpoint,
    packet::number::{PacketNumber, PacketNumberLen, TruncatedPacketNumber},
    version::Version,
};
use s2n_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

/// The first packet of a connection carries a version offer
pub const FLAG_VERSION: u8 = 0x01;
/// Marks a stateless public reset packet
pub const FLAG_PUBLIC_RESET: u8 = 0x02;

const PACKET_NUMBER_LEN_SHIFT: u32 = 4;
const PACKET_NUMBER_LEN_MASK: u8 = 0x30;

const FLAGS_MAX: u8 = FLAG_VERSION | FLAG_PUBLIC_RESET | PACKET_NUMBER_LEN_MASK;

/// A fully decoded (or to-be-encoded) packet header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub connection_id: connection::Id,
    pub version: Option<Version>,
    pub packet_number: PacketNumber,
    pub packet_number_len: PacketNumberLen,
}

impl Header {
    /// The number of bytes the header occupies on the wire
    #[inline]
    pub fn wire_len(&self) -> usize {
        let mut len = 1 + connection::Id::LEN;
        if self.version.is_some() {
            len += 4;
        }
        len + self.packet_number_len.bytesize()
    }

    fn flags(&self) -> u8 {
        let mut flags = self.packet_number_len.into_flag_bits() << PACKET_NUMBER_LEN_SHIFT;
        if self.version.is_some() {
            flags |= FLAG_VERSION;
        }
        flags
    }
}

impl EncoderValue for Header {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.flags());
        buffer.encode(&self.connection_id);
        if let Some(version) = &self.version {
            buffer.encode(version);
        }
        buffer.encode(&self.packet_number.truncate_to(self.packet_number_len));
    }
}

/// A header as read off the wire, before packet number reconstruction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtectedHeader {
    pub connection_id: connection::Id,
    pub version: Option<Version>,
    pub truncated_packet_number: TruncatedPacketNumber,
}

impl ProtectedHeader {
    /// Decodes the header, interpreting the flags from the given
    /// perspective. Returns the header and the remaining (encrypted)
    /// payload.
    pub fn decode<'a>(
        buffer: DecoderBuffer<'a>,
        perspective: endpoint::Type,
    ) -> DecoderBufferResult<'a, Self> {
        let (flags, buffer) = buffer.decode::<u8>()?;

        if flags & !FLAGS_MAX != 0 {
            return Err(DecoderError::InvariantViolation("reserved flag bits set"));
        }

        let (connection_id, buffer) = buffer.decode::<connection::Id>()?;

        // only clients offer versions; a version-flagged packet seen by
        // a client is a version negotiation packet and is handled
        // before header decoding
        let (version, buffer) = if flags & FLAG_VERSION != 0 {
            debug_assert!(perspective.is_server());
            let (version, buffer) = buffer.decode::<Version>()?;
            (Some(version), buffer)
        } else {
            (None, buffer)
        };

        let len = PacketNumberLen::from_flag_bits((flags & PACKET_NUMBER_LEN_MASK) >> PACKET_NUMBER_LEN_SHIFT);
        let (truncated_packet_number, buffer) = TruncatedPacketNumber::decode(buffer, len)?;

        let header = ProtectedHeader {
            connection_id,
            version,
            truncated_packet_number,
        };

        Ok((header, buffer))
    }

    /// Reconstructs the full packet number against the largest packet
    /// number seen so far
    #[inline]
    pub fn unprotect(self, largest_seen: PacketNumber) -> Header {
        Header {
            connection_id: self.connection_id,
            version: self.version,
            packet_number: self.truncated_packet_number.expand(largest_seen),
            packet_number_len: self.truncated_packet_number.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version;
    use s2n_codec::EncoderBuffer;

    fn round_trip(header: Header, perspective: endpoint::Type) {
        let mut bytes = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&header);
        let len = encoder.len();
        assert_eq!(len, header.wire_len());

        let buffer = DecoderBuffer::new(&bytes[..len]);
        let (protected, remaining) = ProtectedHeader::decode(buffer, perspective).unwrap();
        assert!(remaining.is_empty());

        let decoded = protected.unprotect(PacketNumber::new(
            header.packet_number.as_u64().saturating_sub(1),
        ));
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_round_trip() {
        round_trip(
            Header {
                connection_id: connection::Id::new(0x0123_4567_89ab_cdef),
                version: None,
                packet_number: PacketNumber::new(7),
                packet_number_len: PacketNumberLen::U8,
            },
            endpoint::Type::Client,
        );
    }

    #[test]
    fn versioned_header_round_trip() {
        round_trip(
            Header {
                connection_id: connection::Id::new(42),
                version: Some(version::CURRENT),
                packet_number: PacketNumber::new(1),
                packet_number_len: PacketNumberLen::U48,
            },
            endpoint::Type::Server,
        );
    }

    #[test]
    fn reserved_flags_are_rejected() {
        let bytes = [0x80u8, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let buffer = DecoderBuffer::new(&bytes);
        assert!(ProtectedHeader::decode(buffer, endpoint::Type::Server).is_err());
    }
}
