// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Tag, RST_STREAM_TAG},
    stream::StreamId,
    transport,
};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// Abruptly terminates a stream.
///
/// `final_offset` fixes the total number of bytes the sender ever
/// transmitted on the stream, which the receiver needs to settle its
/// connection-level flow control accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RstStream {
    pub stream_id: StreamId,
    pub final_offset: u64,
    pub error_code: transport::Code,
}

impl RstStream {
    #[inline]
    pub const fn tag(&self) -> Tag {
        RST_STREAM_TAG
    }
}

decoder_value!(
    impl<'a> RstStream {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            let (final_offset, buffer) = buffer.decode()?;
            let (error_code, buffer) = buffer.decode::<u32>()?;

            let frame = RstStream {
                stream_id,
                final_offset,
                error_code: transport::Code::new(error_code),
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for RstStream {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
        buffer.encode(&self.final_offset);
        buffer.encode(&self.error_code.as_u32());
    }
}
