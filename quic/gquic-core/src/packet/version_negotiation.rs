// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The version negotiation packet.
//!
//! A server answering a client that offered an unsupported version
//! replies with the list of versions it speaks, then drops the
//! connection.

use crate::{connection, packet::header::FLAG_VERSION, version::Version};
use alloc::vec::Vec;
use s2n_codec::{Encoder, EncoderBuffer, EncoderValue};

pub fn encode(connection_id: connection::Id, versions: &[Version]) -> Vec<u8> {
    debug_assert!(!versions.is_empty());

    let mut bytes = alloc::vec![0u8; 1 + connection::Id::LEN + versions.len() * 4];
    let mut encoder = EncoderBuffer::new(&mut bytes);
    encoder.encode(&FLAG_VERSION);
    encoder.encode(&connection_id);
    for version in versions {
        encoder.encode(version);
    }
    debug_assert_eq!(encoder.len(), bytes.len());
    bytes
}
