// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::endpoint;
use core::fmt;
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// The id of a stream within a connection.
///
/// Odd ids belong to client-initiated streams and even ids to
/// server-initiated streams. Id 1 is reserved for the crypto handshake
/// stream and id 3 for the headers stream; both are client-initiated on
/// every connection.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u32);

/// The stream on which the crypto handshake is exchanged
pub const CRYPTO_STREAM_ID: StreamId = StreamId(1);

/// The stream on which headers are exchanged
pub const HEADERS_STREAM_ID: StreamId = StreamId(3);

impl StreamId {
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the first id available to data streams initiated by the
    /// given endpoint. Ids 1 and 3 are reserved, so clients start at 5
    /// and servers at 2.
    #[inline]
    pub fn initial(initiator: endpoint::Type) -> Self {
        match initiator {
            endpoint::Type::Client => Self(5),
            endpoint::Type::Server => Self(2),
        }
    }

    /// Returns the id of the stream opened after this one by the same
    /// initiator, or `None` at the end of the id space.
    #[inline]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(2).map(Self)
    }

    /// Returns the endpoint which initiates a stream with this id
    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        if self.0 % 2 == 0 {
            endpoint::Type::Server
        } else {
            endpoint::Type::Client
        }
    }

    #[inline]
    pub fn is_crypto(self) -> bool {
        self == CRYPTO_STREAM_ID
    }

    #[inline]
    pub fn is_headers(self) -> bool {
        self == HEADERS_STREAM_ID
    }

    /// Returns true for the reserved (crypto and headers) streams
    #[inline]
    pub fn is_reserved(self) -> bool {
        self.is_crypto() || self.is_headers()
    }

    /// The connection-level flow controller is addressed with stream id 0
    /// in WINDOW_UPDATE and BLOCKED frames
    #[inline]
    pub fn is_connection_level(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<StreamId> for u32 {
    #[inline]
    fn from(id: StreamId) -> u32 {
        id.0
    }
}

decoder_value!(
    impl<'a> StreamId {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (value, buffer) = buffer.decode::<u32>()?;
            Ok((Self(value), buffer))
        }
    }
);

impl EncoderValue for StreamId {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_parity() {
        assert_eq!(StreamId::new(2).initiator(), endpoint::Type::Server);
        assert_eq!(StreamId::new(5).initiator(), endpoint::Type::Client);
        assert_eq!(CRYPTO_STREAM_ID.initiator(), endpoint::Type::Client);
    }

    #[test]
    fn initial_skips_reserved_ids() {
        assert_eq!(StreamId::initial(endpoint::Type::Client), StreamId::new(5));
        assert_eq!(StreamId::initial(endpoint::Type::Server), StreamId::new(2));

        let mut id = StreamId::initial(endpoint::Type::Client);
        id = id.next().unwrap();
        assert_eq!(id, StreamId::new(7));
    }
}
