// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    crypto::{CryptoError, EncryptionLevel},
    packet::number::PacketNumber,
};
use alloc::{boxed::Box, vec::Vec};

/// A key capable of sealing and opening packet payloads.
///
/// The packet number contributes to the nonce, so each may only ever
/// protect a single packet. The associated data covers the public
/// header bytes, binding them to the payload.
pub trait PacketKey {
    /// Protects `plaintext`, returning ciphertext with the
    /// authentication tag appended
    fn seal(
        &self,
        packet_number: PacketNumber,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Vec<u8>;

    /// Authenticates and decrypts `ciphertext`
    fn open(
        &self,
        packet_number: PacketNumber,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// The set of keys installed on a connection, one per encryption level.
///
/// Sealing with an absent level is an [`CryptoError::MissingKey`]
/// failure, which the codec surfaces as `EncryptionFailure`.
pub struct KeySet {
    keys: [Option<Box<dyn PacketKey>>; EncryptionLevel::COUNT],
}

impl Default for KeySet {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySet {
    /// Creates a key set with the null cipher installed at the
    /// unencrypted level, matching the state of a fresh connection.
    pub fn new() -> Self {
        let mut set = Self {
            keys: [None, None, None],
        };
        set.install(EncryptionLevel::Unencrypted, Box::new(super::null::NullKey));
        set
    }

    /// Installs `key` for `level`, replacing any previous key
    pub fn install(&mut self, level: EncryptionLevel, key: Box<dyn PacketKey>) {
        self.keys[level.into_index()] = Some(key);
    }

    pub fn key(&self, level: EncryptionLevel) -> Result<&dyn PacketKey, CryptoError> {
        self.keys[level.into_index()]
            .as_deref()
            .ok_or(CryptoError::MissingKey(level))
    }

    pub fn has_key(&self, level: EncryptionLevel) -> bool {
        self.keys[level.into_index()].is_some()
    }

    /// Removes keys below `level` once the connection has settled on a
    /// higher level
    pub fn discard_below(&mut self, level: EncryptionLevel) {
        for index in 0..level.into_index() {
            self.keys[index] = None;
        }
    }
}

impl core::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("KeySet")
            .field("unencrypted", &self.has_key(EncryptionLevel::Unencrypted))
            .field("zero_rtt", &self.has_key(EncryptionLevel::ZeroRtt))
            .field(
                "forward_secure",
                &self.has_key(EncryptionLevel::ForwardSecure),
            )
            .finish()
    }
}
