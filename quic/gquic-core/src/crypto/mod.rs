// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet protection interfaces.
//!
//! The handshake state machine itself lives outside the core; this
//! module defines the narrow surface the codec consumes: a
//! [`PacketKey`] per [`EncryptionLevel`] and the message-level
//! [`handshake`] interface used to drive an external implementation.

pub mod handshake;
mod key;
pub mod null;

pub use key::*;

use core::fmt;

/// The protection applied to a packet's payload.
///
/// Levels are strictly ordered: a connection starts unencrypted, moves
/// to the 0-RTT keys derived from the server config, and settles on the
/// forward-secure keys derived after the handshake completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncryptionLevel {
    Unencrypted,
    ZeroRtt,
    ForwardSecure,
}

impl EncryptionLevel {
    pub const COUNT: usize = 3;

    #[inline]
    pub const fn into_index(self) -> usize {
        match self {
            Self::Unencrypted => 0,
            Self::ZeroRtt => 1,
            Self::ForwardSecure => 2,
        }
    }
}

/// The length in bytes of every authentication tag
pub const TAG_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CryptoError {
    /// The payload failed authentication or could not be decrypted
    DecryptError,
    /// No key is installed for the requested level
    MissingKey(EncryptionLevel),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DecryptError => write!(f, "payload failed authentication"),
            Self::MissingKey(level) => write!(f, "no key installed for {level:?}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}
