// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{Tag, STOP_WAITING_TAG},
    packet::number::PacketNumber,
};
use s2n_codec::{decoder_value, u48, Encoder, EncoderValue};

/// Tells the peer to stop waiting for packets below `least_unacked`.
///
/// The receiver drops its ack-range state below that point; nothing
/// older will ever be retransmitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopWaiting {
    /// The smallest packet number the sender may still retransmit
    pub least_unacked: PacketNumber,
}

impl StopWaiting {
    #[inline]
    pub const fn tag(&self) -> Tag {
        STOP_WAITING_TAG
    }
}

decoder_value!(
    impl<'a> StopWaiting {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (least_unacked, buffer) = buffer.decode::<u48>()?;
            let frame = StopWaiting {
                least_unacked: PacketNumber::new(u64::from(least_unacked)),
            };
            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for StopWaiting {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&u48::new_truncated(self.least_unacked.as_u64()));
    }
}
