// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use gquic_core::transport;
use std::collections::BTreeMap;

/// Reassembles stream data received out of order.
///
/// Segments are stored keyed by offset, trimmed so they never overlap:
/// re-sent ranges merge into at-most-once delivery. Bytes drain to the
/// application strictly in offset order.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    segments: BTreeMap<u64, Bytes>,
    /// Everything below this offset has been delivered
    read_offset: u64,
    /// The stream's total length, once a FIN has pinned it
    final_offset: Option<u64>,
    highest_received: u64,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts newly received data.
    ///
    /// `fin` pins the stream's final offset at the end of this chunk;
    /// data past a pinned final offset (or a FIN that contradicts an
    /// earlier one) is a protocol violation.
    pub fn write(&mut self, offset: u64, data: Bytes, fin: bool) -> Result<(), transport::Error> {
        let end = offset + data.len() as u64;

        if let Some(final_offset) = self.final_offset {
            let past_fin = end > final_offset || (fin && end != final_offset);
            if past_fin {
                return Err(transport::Error::STREAM_DATA_AFTER_TERMINATION);
            }
        } else if fin {
            if end < self.highest_received {
                return Err(transport::Error::STREAM_DATA_AFTER_TERMINATION);
            }
            self.final_offset = Some(end);
        }

        self.highest_received = self.highest_received.max(end);

        let mut offset = offset;
        let mut data = data;

        // drop what was already delivered
        if offset < self.read_offset {
            let skip = (self.read_offset - offset).min(data.len() as u64) as usize;
            data = data.slice(skip..);
            offset = self.read_offset;
        }

        if data.is_empty() {
            return Ok(());
        }

        // trim against the segment starting at or before us
        if let Some((&prev_offset, prev)) = self.segments.range(..=offset).next_back() {
            let prev_end = prev_offset + prev.len() as u64;
            if prev_end >= offset + data.len() as u64 {
                // fully covered by an earlier segment
                return Ok(());
            }
            if prev_end > offset {
                let skip = (prev_end - offset) as usize;
                data = data.slice(skip..);
                offset = prev_end;
            }
        }

        // trim or absorb segments we overlap on the right
        loop {
            let next = self
                .segments
                .range(offset..)
                .next()
                .map(|(&next_offset, next)| (next_offset, next.len() as u64));
            let Some((next_offset, next_len)) = next else {
                break;
            };

            let end = offset + data.len() as u64;
            if next_offset >= end {
                break;
            }
            if next_offset + next_len <= end {
                // fully covered by the new segment
                self.segments.remove(&next_offset);
            } else {
                // keep only our non-overlapping prefix
                let keep = (next_offset - offset) as usize;
                data = data.slice(..keep);
                break;
            }
        }

        if !data.is_empty() {
            self.segments.insert(offset, data);
        }

        Ok(())
    }

    /// Removes and returns the next in-order chunk, if any
    pub fn pop(&mut self) -> Option<Bytes> {
        let (&offset, _) = self.segments.first_key_value()?;
        if offset != self.read_offset {
            return None;
        }
        let data = self.segments.remove(&offset)?;
        self.read_offset += data.len() as u64;
        Some(data)
    }

    /// Bytes available for in-order delivery right now
    pub fn readable_bytes(&self) -> u64 {
        let mut cursor = self.read_offset;
        let mut readable = 0;
        for (&offset, data) in &self.segments {
            if offset != cursor {
                break;
            }
            readable += data.len() as u64;
            cursor += data.len() as u64;
        }
        readable
    }

    #[inline]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    #[inline]
    pub fn highest_received(&self) -> u64 {
        self.highest_received
    }

    #[inline]
    pub fn final_offset(&self) -> Option<u64> {
        self.final_offset
    }

    /// True once a FIN arrived and every byte before it was delivered
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.final_offset == Some(self.read_offset)
    }

    /// Discards all buffered data, as a reset does
    pub fn clear(&mut self) {
        self.segments.clear();
    }
}
