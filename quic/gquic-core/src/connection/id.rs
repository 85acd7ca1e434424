// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::random;
use core::fmt;
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// The 64-bit connection identifier negotiated at connect time.
///
/// Packets arriving on a shared socket are demultiplexed to their
/// connection by this value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    pub const LEN: usize = core::mem::size_of::<u64>();

    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generates a fresh random connection id
    #[inline]
    pub fn generate<R: random::Generator>(generator: &mut R) -> Self {
        let mut bytes = [0u8; Self::LEN];
        generator.public_random_fill(&mut bytes);
        Self(u64::from_be_bytes(bytes))
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "connection::Id({:#018x})", self.0)
    }
}

impl From<u64> for Id {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

decoder_value!(
    impl<'a> Id {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (value, buffer) = buffer.decode::<u64>()?;
            Ok((Self(value), buffer))
        }
    }
);

impl EncoderValue for Id {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{testing::Generator, Generator as _};

    #[test]
    fn generate_uses_public_randomness() {
        let mut generator = Generator::default();
        let id = Id::generate(&mut generator);

        let mut expected = [0u8; 8];
        Generator::default().public_random_fill(&mut expected);
        assert_eq!(id, Id::new(u64::from_be_bytes(expected)));
    }
}
