// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A 16-bit unsigned floating point codec used for ack delays.
//!
//! The encoding has 11 mantissa bits and 5 exponent bits and preserves
//! roughly 0.5% precision across the 0-16s range of microsecond values
//! an ack delay can take. Values below 2^12 encode verbatim; above that
//! the exponent field counts the shifts applied to a mantissa with an
//! implicit leading bit.

use core::time::Duration;
use s2n_codec::{decoder_value, Encoder, EncoderValue};

const MANTISSA_BITS: u32 = 11;
const MANTISSA_EFFECTIVE_BITS: u32 = MANTISSA_BITS + 1;
const MAX_EXPONENT: u64 = (1 << 5) - 2;

/// The largest microsecond value the encoding can represent
pub const MAX_VALUE: u64 = 0x3FF_C000_0000;

/// A microsecond quantity that is carried on the wire as a ufloat16.
///
/// The stored value is canonical: construction quantizes through the
/// lossy wire encoding, so two equal `Ufloat16`s always encode to the
/// same bytes and a decode/encode round trip is exact.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ufloat16(u64);

impl Ufloat16 {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(micros: u64) -> Self {
        Self(decode(encode(micros)))
    }

    /// The value in microseconds
    #[inline]
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_duration(self) -> Duration {
        Duration::from_micros(self.as_micros())
    }
}

impl From<Duration> for Ufloat16 {
    #[inline]
    fn from(duration: Duration) -> Self {
        let micros = duration.as_micros();
        Self::new(if micros > MAX_VALUE as u128 {
            MAX_VALUE
        } else {
            micros as u64
        })
    }
}

/// Encodes a microsecond value into its 16-bit wire form
#[inline]
pub const fn encode(mut value: u64) -> u16 {
    // Fast path: small values encode verbatim, covering the two
    // denormal exponents.
    if value < (1 << MANTISSA_EFFECTIVE_BITS) {
        return value as u16;
    }

    let mut exponent = 0u64;
    while value >= (1 << MANTISSA_EFFECTIVE_BITS) && exponent < MAX_EXPONENT {
        value >>= 1;
        exponent += 1;
    }

    if value >= (1 << MANTISSA_EFFECTIVE_BITS) {
        // beyond the representable range
        return u16::MAX;
    }

    (value + (exponent << MANTISSA_BITS)) as u16
}

/// Decodes the 16-bit wire form back into microseconds
#[inline]
pub const fn decode(value: u16) -> u64 {
    if value < (1 << MANTISSA_EFFECTIVE_BITS) {
        return value as u64;
    }

    let exponent = (value >> MANTISSA_BITS) as u64 - 1;
    let mantissa = (value as u64 & ((1 << MANTISSA_BITS) - 1)) | (1 << MANTISSA_BITS);
    mantissa << exponent
}

decoder_value!(
    impl<'a> Ufloat16 {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (value, buffer) = buffer.decode::<u16>()?;
            Ok((Self(decode(value)), buffer))
        }
    }
);

impl EncoderValue for Ufloat16 {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&encode(self.0));
    }
}
