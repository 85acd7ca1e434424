// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection,
    crypto::{EncryptionLevel, KeySet},
    endpoint,
    frame::FrameRef,
    packet::{
        header::{Header, ProtectedHeader, FLAG_PUBLIC_RESET, FLAG_VERSION},
        number::PacketNumber,
        Error,
    },
    transport,
    version::Version,
};
use alloc::vec::Vec;
use s2n_codec::DecoderBuffer;

/// Receives decode events, one packet at a time.
///
/// Frames are delivered in wire order between `on_packet_header` and
/// `on_packet_complete`. Payload slices borrow from a scratch buffer
/// owned by the decoder and do not survive `on_packet_complete`;
/// implementations copy anything they keep.
pub trait Visitor {
    fn on_packet_header(
        &mut self,
        header: &Header,
        level: EncryptionLevel,
    ) -> Result<(), transport::Error>;

    fn on_frame(&mut self, frame: FrameRef) -> Result<(), transport::Error>;

    fn on_packet_complete(&mut self, header: &Header);

    /// A version negotiation packet arrived (clients only)
    fn on_version_negotiation(&mut self, versions: &[Version]) {
        let _ = versions;
    }

    /// A stateless public reset arrived
    fn on_public_reset(&mut self, connection_id: connection::Id) {
        let _ = connection_id;
    }
}

/// Decodes datagrams into header and frame events
pub struct Decoder {
    perspective: endpoint::Type,
}

impl Decoder {
    pub fn new(perspective: endpoint::Type) -> Self {
        Self { perspective }
    }

    /// Decodes a single packet, emitting events into `visitor`.
    ///
    /// `largest_seen` is the largest packet number decoded on this
    /// connection so far and anchors packet number reconstruction.
    /// Decryption is attempted from the highest installed level
    /// downward; the level that authenticated the payload is reported
    /// to the visitor.
    pub fn decode_packet<V: Visitor>(
        &self,
        bytes: &[u8],
        largest_seen: PacketNumber,
        keys: &KeySet,
        visitor: &mut V,
    ) -> Result<(), Error> {
        let buffer = DecoderBuffer::new(bytes);

        let flags = buffer.peek_byte(0).map_err(|_| Error::InvalidHeader)?;

        if flags & FLAG_PUBLIC_RESET != 0 {
            let buffer = buffer.skip(1).map_err(|_| Error::InvalidHeader)?;
            let (connection_id, _) = buffer
                .decode::<connection::Id>()
                .map_err(|_| Error::InvalidHeader)?;
            visitor.on_public_reset(connection_id);
            return Ok(());
        }

        // a version-flagged packet arriving at a client is a version
        // negotiation packet; clients never receive versioned data
        if flags & FLAG_VERSION != 0 && self.perspective.is_client() {
            return self.decode_version_negotiation(buffer, visitor);
        }

        let (protected, payload) = ProtectedHeader::decode(buffer, self.perspective)
            .map_err(|_| Error::InvalidHeader)?;

        let header = protected.unprotect(largest_seen);

        let header_len = bytes.len() - payload.len();
        let associated_data = &bytes[..header_len];

        let (plaintext, level) = self
            .open_payload(
                keys,
                header.packet_number,
                associated_data,
                payload.into_less_safe_slice(),
            )
            .ok_or(Error::DecryptionFailure)?;

        visitor
            .on_packet_header(&header, level)
            .map_err(Error::Transport)?;

        let mut buffer = DecoderBuffer::new(&plaintext);
        while !buffer.is_empty() {
            let (frame, remaining) =
                FrameRef::decode(buffer).map_err(|_| Error::InvalidFrameData)?;
            visitor.on_frame(frame).map_err(Error::Transport)?;
            buffer = remaining;
        }

        visitor.on_packet_complete(&header);

        Ok(())
    }

    fn open_payload(
        &self,
        keys: &KeySet,
        packet_number: PacketNumber,
        associated_data: &[u8],
        payload: &[u8],
    ) -> Option<(Vec<u8>, EncryptionLevel)> {
        for level in [
            EncryptionLevel::ForwardSecure,
            EncryptionLevel::ZeroRtt,
            EncryptionLevel::Unencrypted,
        ] {
            if let Ok(key) = keys.key(level) {
                if let Ok(plaintext) = key.open(packet_number, associated_data, payload) {
                    return Some((plaintext, level));
                }
            }
        }
        None
    }

    fn decode_version_negotiation<V: Visitor>(
        &self,
        buffer: DecoderBuffer,
        visitor: &mut V,
    ) -> Result<(), Error> {
        let buffer = buffer.skip(1).map_err(|_| Error::InvalidHeader)?;
        let (_connection_id, mut buffer) = buffer
            .decode::<connection::Id>()
            .map_err(|_| Error::InvalidHeader)?;

        let mut versions = Vec::new();
        while !buffer.is_empty() {
            let (version, remaining) = buffer
                .decode::<Version>()
                .map_err(|_| Error::InvalidHeader)?;
            versions.push(version);
            buffer = remaining;
        }

        if versions.is_empty() {
            return Err(Error::InvalidHeader);
        }

        visitor.on_version_negotiation(&versions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::{Frame, Ping},
        packet::{
            encode_packet,
            number::{PacketNumber, PacketNumberLen},
            version_negotiation,
        },
        version,
    };

    #[derive(Default)]
    struct Recorder {
        headers: usize,
        frames: usize,
        completed: usize,
        version_negotiations: usize,
        public_resets: usize,
        last_packet_number: Option<PacketNumber>,
    }

    impl Visitor for Recorder {
        fn on_packet_header(
            &mut self,
            header: &Header,
            _level: EncryptionLevel,
        ) -> Result<(), transport::Error> {
            self.headers += 1;
            self.last_packet_number = Some(header.packet_number);
            Ok(())
        }

        fn on_frame(&mut self, _frame: FrameRef) -> Result<(), transport::Error> {
            self.frames += 1;
            Ok(())
        }

        fn on_packet_complete(&mut self, _header: &Header) {
            self.completed += 1;
        }

        fn on_version_negotiation(&mut self, _versions: &[Version]) {
            self.version_negotiations += 1;
        }

        fn on_public_reset(&mut self, _connection_id: connection::Id) {
            self.public_resets += 1;
        }
    }

    fn header(packet_number: u64) -> Header {
        Header {
            connection_id: connection::Id::new(77),
            version: None,
            packet_number: PacketNumber::new(packet_number),
            packet_number_len: PacketNumberLen::U16,
        }
    }

    #[test]
    fn decode_emits_events_in_order() {
        let keys = KeySet::new();
        let frames: [Frame<&[u8]>; 2] = [Ping.into(), Ping.into()];
        let packet = encode_packet(
            &header(5),
            &frames,
            EncryptionLevel::Unencrypted,
            &keys,
        )
        .unwrap();

        let decoder = Decoder::new(endpoint::Type::Server);
        let mut recorder = Recorder::default();
        decoder
            .decode_packet(&packet, PacketNumber::new(4), &keys, &mut recorder)
            .unwrap();

        assert_eq!(recorder.headers, 1);
        assert_eq!(recorder.frames, 2);
        assert_eq!(recorder.completed, 1);
        assert_eq!(recorder.last_packet_number, Some(PacketNumber::new(5)));
    }

    #[test]
    fn corrupted_payload_is_a_decryption_failure() {
        let keys = KeySet::new();
        let frames: [Frame<&[u8]>; 1] = [Ping.into()];
        let mut packet =
            encode_packet(&header(5), &frames, EncryptionLevel::Unencrypted, &keys).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;

        let decoder = Decoder::new(endpoint::Type::Server);
        let mut recorder = Recorder::default();
        let result = decoder.decode_packet(&packet, PacketNumber::new(4), &keys, &mut recorder);
        assert_eq!(result.unwrap_err(), Error::DecryptionFailure);
        assert_eq!(recorder.headers, 0);
    }

    #[test]
    fn truncated_header_is_invalid() {
        let decoder = Decoder::new(endpoint::Type::Server);
        let mut recorder = Recorder::default();
        let keys = KeySet::new();
        let result = decoder.decode_packet(&[0x00, 0x01], PacketNumber::ZERO, &keys, &mut recorder);
        assert_eq!(result.unwrap_err(), Error::InvalidHeader);
    }

    #[test]
    fn version_negotiation_reaches_clients() {
        let packet = version_negotiation::encode(connection::Id::new(9), version::SUPPORTED);

        let decoder = Decoder::new(endpoint::Type::Client);
        let mut recorder = Recorder::default();
        let keys = KeySet::new();
        decoder
            .decode_packet(&packet, PacketNumber::ZERO, &keys, &mut recorder)
            .unwrap();
        assert_eq!(recorder.version_negotiations, 1);
        assert_eq!(recorder.headers, 0);
    }

    #[test]
    fn public_reset_short_circuits() {
        let packet = crate::packet::public_reset::encode(connection::Id::new(9));

        let decoder = Decoder::new(endpoint::Type::Client);
        let mut recorder = Recorder::default();
        let keys = KeySet::new();
        decoder
            .decode_packet(&packet, PacketNumber::ZERO, &keys, &mut recorder)
            .unwrap();
        assert_eq!(recorder.public_resets, 1);
    }
}
