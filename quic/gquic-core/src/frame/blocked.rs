// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Tag, BLOCKED_TAG},
    stream::StreamId,
};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// Signals that the sender has data but is blocked by a flow control
/// window. Stream id 0 indicates the connection-level window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Blocked {
    pub stream_id: StreamId,
}

impl Blocked {
    #[inline]
    pub const fn tag(&self) -> Tag {
        BLOCKED_TAG
    }
}

decoder_value!(
    impl<'a> Blocked {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            Ok((Blocked { stream_id }, buffer))
        }
    }
);

impl EncoderValue for Blocked {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
    }
}
