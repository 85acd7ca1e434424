// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The null packet protection used before any keys are negotiated and
//! by tests.
//!
//! Payloads travel in the clear; integrity comes from an FNV-1a 128-bit
//! hash over the associated data and plaintext, truncated to the tag
//! length.

use crate::{
    crypto::{CryptoError, PacketKey, TAG_LEN},
    packet::number::PacketNumber,
};
use alloc::vec::Vec;

const FNV_OFFSET_BASIS: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const FNV_PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

fn fnv1a_128(parts: &[&[u8]]) -> u128 {
    let mut hash = FNV_OFFSET_BASIS;
    for part in parts {
        for byte in *part {
            hash ^= *byte as u128;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

fn tag(associated_data: &[u8], plaintext: &[u8]) -> [u8; TAG_LEN] {
    fnv1a_128(&[associated_data, plaintext]).to_be_bytes()
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullKey;

impl PacketKey for NullKey {
    fn seal(
        &self,
        _packet_number: PacketNumber,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(plaintext.len() + TAG_LEN);
        out.extend_from_slice(plaintext);
        out.extend_from_slice(&tag(associated_data, plaintext));
        out
    }

    fn open(
        &self,
        _packet_number: PacketNumber,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let split = ciphertext
            .len()
            .checked_sub(TAG_LEN)
            .ok_or(CryptoError::DecryptError)?;
        let (plaintext, received_tag) = ciphertext.split_at(split);

        if tag(associated_data, plaintext) != received_tag {
            return Err(CryptoError::DecryptError);
        }

        Ok(plaintext.to_vec())
    }
}
