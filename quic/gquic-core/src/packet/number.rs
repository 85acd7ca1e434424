// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet numbers and their truncated wire representation.
//!
//! A packet number is a 64-bit value that increases monotonically over
//! the life of a connection and is never reused, not even for
//! retransmissions. On the wire it is truncated to 1, 2, 4 or 6 bytes;
//! the receiver reconstructs the full value by picking the candidate
//! closest to the next packet number it expects.

use core::fmt;
use s2n_codec::{u48, DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

/// A full 64-bit packet number
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketNumber(u64);

impl PacketNumber {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the packet number after this one
    #[inline]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<u64> {
        self.0.checked_sub(rhs.0)
    }

    /// Truncates the packet number for the wire.
    ///
    /// `least_unacked` is the smallest packet number the peer might
    /// still be missing; the chosen length must unambiguously encode
    /// twice the distance to it so reconstruction picks the right
    /// candidate.
    #[inline]
    pub fn truncate(self, least_unacked: Self) -> TruncatedPacketNumber {
        let range = self.0.saturating_sub(least_unacked.0).saturating_mul(2);
        self.truncate_to(PacketNumberLen::for_range(range))
    }

    /// Truncates the packet number to an externally chosen length
    #[inline]
    pub fn truncate_to(self, len: PacketNumberLen) -> TruncatedPacketNumber {
        TruncatedPacketNumber {
            value: self.0 & len.mask(),
            len,
        }
    }
}

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PacketNumber({})", self.0)
    }
}

impl fmt::Display for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for PacketNumber {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// The number of bytes a packet number occupies on the wire
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketNumberLen {
    U8,
    U16,
    U32,
    U48,
}

impl PacketNumberLen {
    /// Returns the shortest length able to represent `range` distinct values
    #[inline]
    pub fn for_range(range: u64) -> Self {
        if range <= u8::MAX as u64 {
            Self::U8
        } else if range <= u16::MAX as u64 {
            Self::U16
        } else if range <= u32::MAX as u64 {
            Self::U32
        } else {
            Self::U48
        }
    }

    #[inline]
    pub const fn bytesize(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U48 => 6,
        }
    }

    #[inline]
    pub const fn bitsize(self) -> usize {
        self.bytesize() * 8
    }

    #[inline]
    pub const fn mask(self) -> u64 {
        (1u64 << self.bitsize()) - 1
    }

    /// The two-bit value carried in the public flags
    #[inline]
    pub const fn into_flag_bits(self) -> u8 {
        match self {
            Self::U8 => 0b00,
            Self::U16 => 0b01,
            Self::U32 => 0b10,
            Self::U48 => 0b11,
        }
    }

    #[inline]
    pub const fn from_flag_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::U8,
            0b01 => Self::U16,
            0b10 => Self::U32,
            _ => Self::U48,
        }
    }
}

/// A packet number as it appears on the wire, before reconstruction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TruncatedPacketNumber {
    value: u64,
    len: PacketNumberLen,
}

impl TruncatedPacketNumber {
    #[inline]
    pub fn new(value: u64, len: PacketNumberLen) -> Self {
        debug_assert!(value <= len.mask());
        Self {
            value: value & len.mask(),
            len,
        }
    }

    #[inline]
    pub const fn len(self) -> PacketNumberLen {
        self.len
    }

    #[inline]
    pub const fn into_u64(self) -> u64 {
        self.value
    }

    /// Reconstructs the full packet number by choosing the candidate
    /// closest to the next number the receiver expects.
    #[inline]
    pub fn expand(self, largest_seen: PacketNumber) -> PacketNumber {
        let pn_nbits = self.len.bitsize();
        let expected = largest_seen.as_u64() + 1;
        let pn_win = 1u64 << pn_nbits;
        let pn_hwin = pn_win / 2;
        let pn_mask = pn_win - 1;

        let candidate = (expected & !pn_mask) | self.value;

        if let Some(lower_bound) = expected.checked_sub(pn_hwin) {
            if candidate <= lower_bound && candidate < u64::MAX - pn_win {
                return PacketNumber::new(candidate + pn_win);
            }
        }

        if candidate > expected + pn_hwin && candidate >= pn_win {
            return PacketNumber::new(candidate - pn_win);
        }

        PacketNumber::new(candidate)
    }

    /// Decodes a truncated packet number of known length
    #[inline]
    pub fn decode(
        buffer: DecoderBuffer,
        len: PacketNumberLen,
    ) -> DecoderBufferResult<'_, TruncatedPacketNumber> {
        let (value, buffer) = match len {
            PacketNumberLen::U8 => {
                let (value, buffer) = buffer.decode::<u8>()?;
                (value as u64, buffer)
            }
            PacketNumberLen::U16 => {
                let (value, buffer) = buffer.decode::<u16>()?;
                (value as u64, buffer)
            }
            PacketNumberLen::U32 => {
                let (value, buffer) = buffer.decode::<u32>()?;
                (value as u64, buffer)
            }
            PacketNumberLen::U48 => {
                let (value, buffer) = buffer.decode::<u48>()?;
                (u64::from(value), buffer)
            }
        };

        Ok((TruncatedPacketNumber { value, len }, buffer))
    }
}

impl EncoderValue for TruncatedPacketNumber {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self.len {
            PacketNumberLen::U8 => buffer.encode(&(self.value as u8)),
            PacketNumberLen::U16 => buffer.encode(&(self.value as u16)),
            PacketNumberLen::U32 => buffer.encode(&(self.value as u32)),
            PacketNumberLen::U48 => {
                buffer.encode(&u48::new_truncated(self.value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    #[test]
    fn truncation_picks_shortest_length() {
        let least_unacked = PacketNumber::new(1000);

        let close = PacketNumber::new(1100).truncate(least_unacked);
        assert_eq!(close.len(), PacketNumberLen::U8);

        let medium = PacketNumber::new(1000 + 200).truncate(least_unacked);
        assert_eq!(medium.len(), PacketNumberLen::U16);

        let far = PacketNumber::new(1000 + 40_000).truncate(least_unacked);
        assert_eq!(far.len(), PacketNumberLen::U32);
    }

    #[test]
    fn expand_example() {
        // from the packet number reconstruction rules: a 16-bit value
        // of 0x9b32 after seeing 0xa82f30ea decodes to 0xa82f9b32
        let largest = PacketNumber::new(0xa82f_30ea);
        let truncated = TruncatedPacketNumber::new(0x9b32, PacketNumberLen::U16);
        assert_eq!(truncated.expand(largest), PacketNumber::new(0xa82f_9b32));
    }

    #[test]
    fn truncate_expand_round_trip() {
        check!()
            .with_type::<(u64, u16)>()
            .cloned()
            .for_each(|(largest, delta)| {
                let largest = PacketNumber::new(largest >> 8);
                let packet_number = PacketNumber::new(largest.as_u64() + delta as u64 + 1);

                // the sender guarantees least_unacked is no further back
                // than the reconstruction window allows
                let truncated = packet_number.truncate(largest);
                assert_eq!(truncated.expand(largest), packet_number);
            });
    }

    #[test]
    fn flag_bits_round_trip() {
        for len in [
            PacketNumberLen::U8,
            PacketNumberLen::U16,
            PacketNumberLen::U32,
            PacketNumberLen::U48,
        ] {
            assert_eq!(PacketNumberLen::from_flag_bits(len.into_flag_bits()), len);
        }
    }
}
