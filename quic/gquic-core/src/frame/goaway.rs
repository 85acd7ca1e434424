// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Tag, GOAWAY_TAG},
    stream::StreamId,
    transport,
};
use s2n_codec::{decoder_parameterized_value, DecoderBuffer, Encoder, EncoderValue};

/// Announces that the sender will accept no new streams.
///
/// Streams at or below `last_good_stream` complete normally; anything
/// the peer opens above it is refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Goaway<Data> {
    pub error_code: transport::Code,
    pub last_good_stream: StreamId,
    pub reason: Data,
}

impl<Data> Goaway<Data> {
    #[inline]
    pub const fn tag(&self) -> Tag {
        GOAWAY_TAG
    }

    #[inline]
    pub fn map_data<F: FnOnce(Data) -> Out, Out>(self, map: F) -> Goaway<Out> {
        Goaway {
            error_code: self.error_code,
            last_good_stream: self.last_good_stream,
            reason: map(self.reason),
        }
    }
}

decoder_parameterized_value!(
    impl<'a, Data> Goaway<Data> {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (error_code, buffer) = buffer.decode::<u32>()?;
            let (last_good_stream, buffer) = buffer.decode()?;
            let (reason, buffer) = buffer.decode_with_len_prefix::<u16, Data>()?;

            let frame = Goaway {
                error_code: transport::Code::new(error_code),
                last_good_stream,
                reason,
            };

            Ok((frame, buffer))
        }
    }
);

impl<'a, Data: s2n_codec::DecoderValue<'a>> s2n_codec::DecoderValue<'a> for Goaway<Data> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> s2n_codec::DecoderBufferResult<'a, Self> {
        buffer.decode_parameterized(GOAWAY_TAG)
    }
}

impl<Data: EncoderValue> EncoderValue for Goaway<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code.as_u32());
        buffer.encode(&self.last_good_stream);
        buffer.encode_with_len_prefix::<u16, _>(&self.reason);
    }
}
