// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::{Tag, PING_TAG};
use s2n_codec::{Encoder, EncoderValue};

/// Elicits an ack from the peer to keep the connection alive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ping;

impl Ping {
    #[inline]
    pub const fn tag(&self) -> Tag {
        PING_TAG
    }
}

impl EncoderValue for Ping {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
    }
}
