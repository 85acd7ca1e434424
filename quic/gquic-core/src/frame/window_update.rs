// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Tag, WINDOW_UPDATE_TAG},
    stream::StreamId,
};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// Raises a flow control window.
///
/// Stream id 0 addresses the connection-level window; any other id
/// addresses that stream's window. `byte_offset` is an absolute limit,
/// so reordered or duplicated frames are harmless.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowUpdate {
    pub stream_id: StreamId,
    pub byte_offset: u64,
}

impl WindowUpdate {
    #[inline]
    pub const fn tag(&self) -> Tag {
        WINDOW_UPDATE_TAG
    }
}

decoder_value!(
    impl<'a> WindowUpdate {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            let (byte_offset, buffer) = buffer.decode()?;

            let frame = WindowUpdate {
                stream_id,
                byte_offset,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for WindowUpdate {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
        buffer.encode(&self.byte_offset);
    }
}
