// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::{encode_uint, Tag, ACK_FRAME_BIT},
    packet::number::{PacketNumber, PacketNumberLen},
    ufloat16::Ufloat16,
};
use alloc::{collections::BTreeMap, vec::Vec};
use s2n_codec::{decoder_parameterized_value, Encoder, EncoderValue};

const HAS_ACK_BLOCKS_BIT: Tag = 0x20;
const LARGEST_ACKED_LEN_SHIFT: u32 = 2;
const LARGEST_ACKED_LEN_MASK: Tag = 0x0C;
const BLOCK_LEN_MASK: Tag = 0x03;

/// The most additional ack blocks a single frame can carry
const MAX_ACK_BLOCKS: usize = u8::MAX as usize;

/// An ordered set of acked packet numbers, stored as inclusive ranges.
///
/// Ranges merge on insert, so the set stays proportional to the number
/// of gaps the peer has observed rather than the number of packets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AckRanges {
    // start -> end, both inclusive
    ranges: BTreeMap<u64, u64>,
}

impl AckRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a single packet number
    pub fn insert(&mut self, packet_number: PacketNumber) {
        let value = packet_number.as_u64();
        self.insert_range(value, value);
    }

    /// Inserts the inclusive range `start..=end`
    pub fn insert_range(&mut self, start: u64, end: u64) {
        debug_assert!(start <= end);
        let mut start = start;
        let mut end = end;

        // absorb a range we extend on the left
        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=end.saturating_add(1)).next_back() {
            if prev_end.saturating_add(1) >= start {
                start = start.min(prev_start);
                end = end.max(prev_end);
                self.ranges.remove(&prev_start);
            }
        }

        // absorb every range the new one covers or touches
        loop {
            let next = self
                .ranges
                .range(start..=end.saturating_add(1))
                .next()
                .map(|(&s, &e)| (s, e));
            match next {
                Some((s, e)) => {
                    end = end.max(e);
                    self.ranges.remove(&s);
                }
                None => break,
            }
        }

        self.ranges.insert(start, end);
    }

    pub fn contains(&self, packet_number: PacketNumber) -> bool {
        let value = packet_number.as_u64();
        self.ranges
            .range(..=value)
            .next_back()
            .map_or(false, |(_, &end)| value <= end)
    }

    pub fn largest(&self) -> Option<PacketNumber> {
        self.ranges
            .values()
            .next_back()
            .map(|&end| PacketNumber::new(end))
    }

    pub fn smallest(&self) -> Option<PacketNumber> {
        self.ranges
            .keys()
            .next()
            .map(|&start| PacketNumber::new(start))
    }

    /// Drops every packet number below `packet_number`
    pub fn remove_below(&mut self, packet_number: PacketNumber) {
        let cutoff = packet_number.as_u64();
        let obsolete: Vec<u64> = self
            .ranges
            .range(..cutoff)
            .map(|(&start, _)| start)
            .collect();
        for start in obsolete {
            let end = self.ranges.remove(&start).expect("range exists");
            if end >= cutoff {
                self.ranges.insert(cutoff, end);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The number of distinct ranges
    pub fn interval_len(&self) -> usize {
        self.ranges.len()
    }

    /// Iterates the inclusive ranges in ascending order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (PacketNumber, PacketNumber)> + '_ {
        self.ranges
            .iter()
            .map(|(&start, &end)| (PacketNumber::new(start), PacketNumber::new(end)))
    }
}

impl FromIterator<PacketNumber> for AckRanges {
    fn from_iter<T: IntoIterator<Item = PacketNumber>>(iter: T) -> Self {
        let mut ranges = Self::new();
        for packet_number in iter {
            ranges.insert(packet_number);
        }
        ranges
    }
}

/// Receive-time feedback carried alongside the ack blocks
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timestamps {
    /// How far below the largest acked the first timestamped packet is
    pub delta_largest_acked: u8,
    /// Microseconds from packet receipt epoch to the first timestamped
    /// packet's arrival
    pub first_micros: u32,
    /// (delta below largest acked, microseconds since the previous
    /// entry) pairs for the remaining timestamped packets
    pub subsequent: Vec<(u8, Ufloat16)>,
}

/// Acknowledges received packets.
///
/// Carries the largest acked packet number, the delay between receiving
/// it and sending this frame, and the set of contiguous acked ranges
/// below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    /// Time between receipt of the largest acked packet and this frame
    pub ack_delay: Ufloat16,
    pub ranges: AckRanges,
    pub timestamps: Option<Timestamps>,
}

impl Ack {
    #[inline]
    pub fn largest_acked(&self) -> PacketNumber {
        self.ranges.largest().expect("ack frames are never empty")
    }

    fn largest_acked_len(&self) -> PacketNumberLen {
        PacketNumberLen::for_range(self.largest_acked().as_u64())
    }

    fn block_len(&self) -> PacketNumberLen {
        let longest = self
            .blocks()
            .map(|(_, length)| length)
            .max()
            .unwrap_or_default();
        PacketNumberLen::for_range(longest)
    }

    /// The ack blocks in descending order as (gap, length) pairs. The
    /// first entry's gap is unused. Gaps wider than a byte are split by
    /// zero-length blocks, matching the wire format.
    fn blocks(&self) -> impl Iterator<Item = (u8, u64)> + '_ {
        let mut previous_start: Option<u64> = None;
        self.ranges.iter().rev().flat_map(move |(start, end)| {
            let mut entries = Vec::new();
            let length = end.as_u64() - start.as_u64() + 1;
            match previous_start {
                None => entries.push((0, length)),
                Some(prev) => {
                    let mut gap = prev - end.as_u64() - 1;
                    while gap > u8::MAX as u64 {
                        entries.push((u8::MAX, 0));
                        gap -= u8::MAX as u64;
                    }
                    entries.push((gap as u8, length));
                }
            }
            previous_start = Some(start.as_u64());
            entries
        })
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = ACK_FRAME_BIT;

        if self.ranges.interval_len() > 1 {
            tag |= HAS_ACK_BLOCKS_BIT;
        }

        tag |= self.largest_acked_len().into_flag_bits() << LARGEST_ACKED_LEN_SHIFT;
        tag |= self.block_len().into_flag_bits();

        tag
    }
}

decoder_parameterized_value!(
    impl<'a> Ack {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let has_blocks = tag & HAS_ACK_BLOCKS_BIT != 0;
            let largest_acked_len =
                PacketNumberLen::from_flag_bits((tag & LARGEST_ACKED_LEN_MASK) >> LARGEST_ACKED_LEN_SHIFT);
            let block_len = PacketNumberLen::from_flag_bits(tag & BLOCK_LEN_MASK);

            let (largest_acked, buffer) = decode_uint!(buffer, largest_acked_len.bytesize());
            let (ack_delay, buffer) = buffer.decode::<Ufloat16>()?;

            let (num_blocks, buffer) = if has_blocks {
                let (count, buffer) = buffer.decode::<u8>()?;
                (count as usize, buffer)
            } else {
                (0, buffer)
            };

            let (first_block_length, mut buffer) = decode_uint!(buffer, block_len.bytesize());
            s2n_codec::decoder_invariant!(
                first_block_length > 0 && first_block_length <= largest_acked + 1,
                "malformed first ack block"
            );

            let mut ranges = AckRanges::new();
            let mut cursor = largest_acked + 1 - first_block_length;
            ranges.insert_range(cursor, largest_acked);

            for _ in 0..num_blocks {
                let (gap, rest) = buffer.decode::<u8>()?;
                let (length, rest) = decode_uint!(rest, block_len.bytesize());
                buffer = rest;

                s2n_codec::decoder_invariant!(
                    cursor >= gap as u64 + length,
                    "ack block underflows packet number space"
                );
                cursor -= gap as u64;
                if length > 0 {
                    let end = cursor - 1;
                    let start = cursor - length;
                    ranges.insert_range(start, end);
                    cursor = start;
                }
            }

            let (num_timestamps, mut buffer) = buffer.decode::<u8>()?;
            let timestamps = if num_timestamps > 0 {
                let (delta_largest_acked, rest) = buffer.decode::<u8>()?;
                let (first_micros, rest) = rest.decode::<u32>()?;
                buffer = rest;

                let mut subsequent = Vec::with_capacity(num_timestamps as usize - 1);
                for _ in 1..num_timestamps {
                    let (delta, rest) = buffer.decode::<u8>()?;
                    let (micros, rest) = rest.decode::<Ufloat16>()?;
                    buffer = rest;
                    subsequent.push((delta, micros));
                }

                Some(Timestamps {
                    delta_largest_acked,
                    first_micros,
                    subsequent,
                })
            } else {
                None
            };

            let frame = Ack {
                ack_delay,
                ranges,
                timestamps,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for Ack {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        debug_assert!(!self.ranges.is_empty(), "ack frames are never empty");

        buffer.encode(&self.tag());

        let largest_acked_len = self.largest_acked_len().bytesize();
        let block_len = self.block_len().bytesize();

        encode_uint(buffer, self.largest_acked().as_u64(), largest_acked_len);
        buffer.encode(&self.ack_delay);

        let blocks: Vec<(u8, u64)> = self.blocks().take(1 + MAX_ACK_BLOCKS).collect();
        if self.ranges.interval_len() > 1 {
            buffer.encode(&((blocks.len() - 1) as u8));
        }

        for (index, (gap, length)) in blocks.iter().enumerate() {
            if index > 0 {
                buffer.encode(gap);
            }
            encode_uint(buffer, *length, block_len);
        }

        match &self.timestamps {
            None => buffer.encode(&0u8),
            Some(timestamps) => {
                buffer.encode(&(1 + timestamps.subsequent.len() as u8));
                buffer.encode(&timestamps.delta_largest_acked);
                buffer.encode(&timestamps.first_micros);
                for (delta, micros) in &timestamps.subsequent {
                    buffer.encode(delta);
                    buffer.encode(micros);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_codec::{DecoderBuffer, EncoderBuffer};

    fn ack(ranges: AckRanges) -> Ack {
        Ack {
            ack_delay: Ufloat16::new(200),
            ranges,
            timestamps: None,
        }
    }

    fn round_trip(frame: &Ack) -> Ack {
        let mut bytes = [0u8; 128];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(frame);
        let len = encoder.len();

        let buffer = DecoderBuffer::new(&bytes[..len]);
        let tag = buffer.peek_byte(0).unwrap();
        let (decoded, remaining) = buffer
            .skip(1)
            .unwrap()
            .decode_parameterized::<Ack>(tag)
            .unwrap();
        assert!(remaining.is_empty());
        decoded
    }

    #[test]
    fn range_insert_merges() {
        let mut ranges = AckRanges::new();
        ranges.insert(PacketNumber::new(5));
        ranges.insert(PacketNumber::new(7));
        assert_eq!(ranges.interval_len(), 2);

        // filling the hole merges everything
        ranges.insert(PacketNumber::new(6));
        assert_eq!(ranges.interval_len(), 1);
        assert!(ranges.contains(PacketNumber::new(5)));
        assert!(ranges.contains(PacketNumber::new(7)));
        assert!(!ranges.contains(PacketNumber::new(8)));
    }

    #[test]
    fn remove_below_truncates() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(1, 10);
        ranges.insert_range(20, 30);

        ranges.remove_below(PacketNumber::new(5));
        assert!(!ranges.contains(PacketNumber::new(4)));
        assert!(ranges.contains(PacketNumber::new(5)));
        assert!(ranges.contains(PacketNumber::new(25)));

        ranges.remove_below(PacketNumber::new(15));
        assert_eq!(ranges.smallest(), Some(PacketNumber::new(20)));
    }

    #[test]
    fn single_range_round_trip() {
        let frame = ack([4u64, 2, 3].iter().map(|&n| PacketNumber::new(n)).collect());
        assert_eq!(round_trip(&frame), frame);
        assert_eq!(frame.largest_acked(), PacketNumber::new(4));
    }

    #[test]
    fn multi_range_round_trip() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(2, 4);
        ranges.insert_range(8, 8);
        ranges.insert_range(1000, 1100);
        let frame = ack(ranges);
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn wide_gap_round_trip() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(1, 1);
        ranges.insert_range(1000, 1000);
        let frame = ack(ranges);
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn timestamps_round_trip() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(1, 10);
        let mut frame = ack(ranges);
        frame.timestamps = Some(Timestamps {
            delta_largest_acked: 0,
            first_micros: 12_345,
            subsequent: alloc::vec![(1, Ufloat16::new(500)), (2, Ufloat16::new(800))],
        });
        assert_eq!(round_trip(&frame), frame);
    }
}
