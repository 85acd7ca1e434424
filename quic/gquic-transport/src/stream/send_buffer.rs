// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use std::collections::VecDeque;

/// Bytes accepted from the application but not yet packetized.
///
/// Once bytes leave through [`Self::pop`] they are owned by the
/// sent-packet ledger, which replays them on loss; this buffer only
/// tracks what has not been offered to the wire at all.
#[derive(Debug, Default)]
pub struct SendBuffer {
    chunks: VecDeque<Bytes>,
    buffered: u64,
    /// The stream offset of the first unqueued byte
    stream_offset: u64,
    fin_buffered: bool,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends data (and optionally the FIN) to the queue, returning
    /// the number of bytes accepted
    pub fn push(&mut self, data: Bytes, fin: bool) -> usize {
        debug_assert!(!self.fin_buffered, "no writes after fin");

        let len = data.len();
        if !data.is_empty() {
            self.buffered += len as u64;
            self.chunks.push_back(data);
        }
        if fin {
            self.fin_buffered = true;
        }
        len
    }

    /// Takes up to `max_bytes` from the front of the queue. Returns the
    /// chunk's stream offset, the data, and whether the stream's FIN
    /// rides along (only when the buffer is emptied by this call).
    pub fn pop(&mut self, max_bytes: usize) -> Option<(u64, Bytes, bool)> {
        if self.chunks.is_empty() {
            if self.fin_buffered {
                self.fin_buffered = false;
                return Some((self.stream_offset, Bytes::new(), true));
            }
            return None;
        }

        if max_bytes == 0 {
            return None;
        }

        let offset = self.stream_offset;
        let mut data = self.chunks.pop_front()?;

        if data.len() > max_bytes {
            let rest = data.split_off(max_bytes);
            self.chunks.push_front(rest);
        }

        self.buffered -= data.len() as u64;
        self.stream_offset += data.len() as u64;

        let fin = self.chunks.is_empty() && self.fin_buffered;
        if fin {
            self.fin_buffered = false;
        }

        Some((offset, data, fin))
    }

    /// Drops everything still queued, as a reset does. Returns the
    /// final offset of the stream: every byte at or past it will never
    /// be sent.
    pub fn clear(&mut self) -> u64 {
        self.chunks.clear();
        self.buffered = 0;
        self.fin_buffered = false;
        self.stream_offset
    }

    #[inline]
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.chunks.is_empty() || self.fin_buffered
    }

    /// The offset the next popped byte will carry
    #[inline]
    pub fn stream_offset(&self) -> u64 {
        self.stream_offset
    }
}
