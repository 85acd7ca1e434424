// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The narrow interface to the external crypto handshake.
//!
//! The handshake rides on the crypto stream as a sequence of tagged
//! messages. The state machine, certificate handling, and key schedule
//! live outside the core; the session only needs to feed messages in
//! and learn the negotiated parameters out.

use crate::{crypto::EncryptionLevel, transport};
use alloc::vec::Vec;
use core::fmt;

/// A 4-byte ASCII message or parameter tag
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match core::str::from_utf8(&self.0) {
            Ok(tag) => write!(f, "Tag({tag})"),
            Err(_) => write!(f, "Tag({:02x?})", self.0),
        }
    }
}

/// Client hello
pub const CHLO: Tag = Tag(*b"CHLO");
/// Server hello, completing the handshake
pub const SHLO: Tag = Tag(*b"SHLO");
/// Server config; a distinct tag, never aliased to SHLO
pub const SCFG: Tag = Tag(*b"SCFG");
/// Rejection carrying a server config for a future attempt
pub const REJ: Tag = Tag(*b"REJ\0");

/// The AEAD negotiated for packet protection
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Aead {
    /// AES-128-GCM
    Aes128Gcm,
    /// The null cipher, for tests only
    Null,
}

/// The key exchange negotiated for the premaster secret
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyExchange {
    Curve25519,
    P256,
}

/// Everything the session learns from a completed handshake
#[derive(Clone, Debug)]
pub struct NegotiatedParameters {
    pub aead: Aead,
    pub key_exchange: KeyExchange,
    /// Premaster secret the key schedule derives the 1-RTT keys from
    pub premaster_secret: Vec<u8>,
    /// Idle timeout the peer asked for, in seconds
    pub idle_timeout_seconds: u32,
    /// Highest number of incoming streams the peer will accept
    pub max_open_streams: u32,
}

/// A handshake message as it appears on the crypto stream
#[derive(Clone, Debug)]
pub struct Message {
    pub tag: Tag,
    /// Tag/value pairs in wire order
    pub values: Vec<(Tag, Vec<u8>)>,
}

/// One side of the crypto handshake.
///
/// Implementations own all handshake state; the session calls these
/// entry points as crypto-stream data arrives and installs the keys the
/// implementation derives.
pub trait HandshakeSession {
    /// Builds the initial client hello
    fn fill_client_hello(
        &mut self,
        out_message: &mut Message,
        nonce: &[u8],
        server_hostname: &str,
    );

    /// Consumes a server hello, yielding the negotiated parameters
    fn process_server_hello(
        &mut self,
        message: &Message,
    ) -> Result<NegotiatedParameters, transport::Error>;

    /// Consumes a client hello, filling the response message and the
    /// negotiated parameters on success
    fn process_client_hello(
        &mut self,
        message: &Message,
        nonce: &[u8],
        out_message: &mut Message,
        out_params: &mut Option<NegotiatedParameters>,
    ) -> Result<(), transport::Error>;

    /// The highest encryption level the session may currently send at
    fn encryption_level(&self) -> EncryptionLevel;

    /// True once the forward-secure keys are established
    fn is_complete(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scfg_is_distinct_from_shlo() {
        assert_ne!(SCFG, SHLO);
        assert_eq!(SCFG.0, *b"SCFG");
    }
}
