// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::{Tag, PADDING_TAG};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// Padding fills the remainder of a packet with zero bytes.
///
/// Each zero byte is its own tag, so a run of padding decodes as a
/// single frame spanning the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Padding {
    /// Total length of the run, including the first tag byte
    pub length: usize,
}

impl Padding {
    #[inline]
    pub const fn tag(&self) -> Tag {
        PADDING_TAG
    }
}

decoder_value!(
    impl<'a> Padding {
        fn decode(buffer: Buffer) -> Result<Self> {
            // the first tag byte was already consumed by the dispatcher
            let mut length = 1;
            let mut remaining = buffer;

            while let Ok(0) = remaining.peek_byte(0) {
                remaining = remaining.skip(1)?;
                length += 1;
            }

            Ok((Padding { length }, remaining))
        }
    }
);

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.write_repeated(self.length, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_codec::DecoderBuffer;

    #[test]
    fn run_length_decode() {
        // dispatcher consumed the first 0x00 already
        let bytes = [0u8, 0, 0];
        let buffer = DecoderBuffer::new(&bytes);
        let (padding, remaining) = buffer.decode::<Padding>().unwrap();
        assert_eq!(padding.length, 4);
        assert!(remaining.is_empty());
    }

    #[test]
    fn stops_at_non_zero() {
        let bytes = [0u8, 7];
        let buffer = DecoderBuffer::new(&bytes);
        let (padding, remaining) = buffer.decode::<Padding>().unwrap();
        assert_eq!(padding.length, 2);
        assert_eq!(remaining.len(), 1);
    }
}
