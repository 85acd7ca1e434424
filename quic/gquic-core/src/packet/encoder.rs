// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{CryptoError, EncryptionLevel, KeySet, TAG_LEN},
    frame::Frame,
    packet::{header::Header, Error, MAX_PACKET_SIZE},
};
use alloc::vec::Vec;
use s2n_codec::{Encoder, EncoderBuffer, EncoderValue};

/// Serializes and seals a packet.
///
/// The header bytes double as the associated data, binding them to the
/// payload's authentication tag. Fails with [`Error::TooLarge`] when the
/// frames exceed the packet budget and with
/// [`Error::EncryptionFailure`] when no key is installed for `level`.
pub fn encode_packet<Data: EncoderValue>(
    header: &Header,
    frames: &[Frame<Data>],
    level: EncryptionLevel,
    keys: &KeySet,
) -> Result<Vec<u8>, Error> {
    debug_assert!(!frames.is_empty(), "packets always carry at least one frame");

    let header_len = header.wire_len();
    let payload_len: usize = frames.iter().map(|frame| frame.encoding_size()).sum();

    if header_len + payload_len + TAG_LEN > MAX_PACKET_SIZE {
        return Err(Error::TooLarge);
    }

    let mut scratch = alloc::vec![0u8; header_len + payload_len];
    let (header_bytes, payload_bytes) = scratch.split_at_mut(header_len);

    let mut encoder = EncoderBuffer::new(header_bytes);
    encoder.encode(header);
    debug_assert_eq!(encoder.len(), header_len);

    let mut encoder = EncoderBuffer::new(payload_bytes);
    for frame in frames {
        encoder.encode(frame);
    }
    debug_assert_eq!(encoder.len(), payload_len);

    let key = keys.key(level).map_err(|error| match error {
        CryptoError::MissingKey(_) => Error::EncryptionFailure,
        CryptoError::DecryptError => Error::EncryptionFailure,
    })?;

    let sealed = key.seal(header.packet_number, header_bytes, payload_bytes);

    let mut packet = Vec::with_capacity(header_len + sealed.len());
    packet.extend_from_slice(header_bytes);
    packet.extend_from_slice(&sealed);

    Ok(packet)
}
