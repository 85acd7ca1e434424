// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The stateless public reset packet.
//!
//! Sent in response to stray packets for a connection the endpoint no
//! longer tracks (or is in time-wait for). Carries only the flags byte
//! and the connection id; receipt terminates the peer's connection
//! with `PublicReset`.

use crate::{connection, packet::header::FLAG_PUBLIC_RESET};
use alloc::vec::Vec;
use s2n_codec::{Encoder, EncoderBuffer, EncoderValue};

pub fn encode(connection_id: connection::Id) -> Vec<u8> {
    let mut bytes = alloc::vec![0u8; 1 + connection::Id::LEN];
    let mut encoder = EncoderBuffer::new(&mut bytes);
    encoder.encode(&FLAG_PUBLIC_RESET);
    encoder.encode(&connection_id);
    debug_assert_eq!(encoder.len(), bytes.len());
    bytes
}
