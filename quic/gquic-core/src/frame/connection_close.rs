// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Tag, CONNECTION_CLOSE_TAG},
    transport,
};
use s2n_codec::{decoder_parameterized_value, DecoderBuffer, Encoder, EncoderValue};

/// Terminates the connection.
///
/// Sent exactly once; the sender then enters time-wait and the receiver
/// tears down every stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionClose<Data> {
    pub error_code: transport::Code,
    /// Human readable detail, not interpreted by the transport
    pub reason: Data,
}

impl<Data> ConnectionClose<Data> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        CONNECTION_CLOSE_TAG
    }

    #[inline]
    pub fn map_data<F: FnOnce(Data) -> Out, Out>(self, map: F) -> ConnectionClose<Out> {
        ConnectionClose {
            error_code: self.error_code,
            reason: map(self.reason),
        }
    }
}

decoder_parameterized_value!(
    impl<'a, Data> ConnectionClose<Data> {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (error_code, buffer) = buffer.decode::<u32>()?;
            let (reason, buffer) = buffer.decode_with_len_prefix::<u16, Data>()?;

            let frame = ConnectionClose {
                error_code: transport::Code::new(error_code),
                reason,
            };

            Ok((frame, buffer))
        }
    }
);

impl<'a, Data: s2n_codec::DecoderValue<'a>> s2n_codec::DecoderValue<'a> for ConnectionClose<Data> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> s2n_codec::DecoderBufferResult<'a, Self> {
        buffer.decode_parameterized(CONNECTION_CLOSE_TAG)
    }
}

impl<Data: EncoderValue> EncoderValue for ConnectionClose<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code.as_u32());
        buffer.encode_with_len_prefix::<u16, _>(&self.reason);
    }
}

impl<Data: From<&'static [u8]>> From<transport::Error> for ConnectionClose<Data> {
    fn from(error: transport::Error) -> Self {
        Self {
            error_code: error.code,
            reason: error.reason.as_bytes().into(),
        }
    }
}
