// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::{FlowController, ReceiveBuffer, SendBuffer};
use bytes::Bytes;
use gquic_core::{
    frame::{self, WindowUpdate},
    stream::{Priority, StreamId},
    time::{Duration, Timestamp},
    transport,
};

/// A bidirectional byte pipe with offsets, FIN, reset and flow control.
///
/// Lifecycle: *open* until a FIN has been both sent and received
/// (*draining*); *closed* once draining and fully consumed, or on
/// reset. A closed stream with sent bytes still unacked lingers as a
/// *zombie* purely so acks can prune the ledger.
#[derive(Debug)]
pub struct Stream {
    stream_id: StreamId,
    priority: Priority,

    send: SendBuffer,
    recv: ReceiveBuffer,
    flow: FlowController,

    /// Bytes handed to the wire and not yet acked
    bytes_outstanding: u64,
    fin_outstanding: bool,

    fin_sent: bool,
    fin_received: bool,
    rst_sent: Option<transport::Code>,
    rst_received: Option<transport::Code>,
}

impl Stream {
    pub fn new(stream_id: StreamId, priority: Priority, flow: FlowController) -> Self {
        debug_assert_eq!(stream_id, flow.stream_id());
        Self {
            stream_id,
            priority,
            send: SendBuffer::new(),
            recv: ReceiveBuffer::new(),
            flow,
            bytes_outstanding: 0,
            fin_outstanding: false,
            fin_sent: false,
            fin_received: false,
            rst_sent: None,
            rst_received: None,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    #[inline]
    pub fn flow(&mut self) -> &mut FlowController {
        &mut self.flow
    }

    // === send side ===

    /// Buffers application data, returning the number of bytes accepted
    pub fn write(&mut self, data: Bytes, fin: bool) -> Result<usize, transport::Error> {
        if self.fin_sent || self.rst_sent.is_some() || self.rst_received.is_some() {
            return Err(transport::Error::STREAM_DATA_AFTER_TERMINATION);
        }
        Ok(self.send.push(data, fin))
    }

    /// True if the stream has bytes (or a FIN) waiting for the wire
    #[inline]
    pub fn has_write_pending(&self) -> bool {
        self.rst_sent.is_none() && self.rst_received.is_none() && self.send.has_pending()
    }

    /// True if pending data exists but the stream window refuses it
    #[inline]
    pub fn is_flow_blocked(&self) -> bool {
        self.has_write_pending()
            && self.send.buffered_bytes() > 0
            && self.flow.is_send_blocked()
    }

    /// Produces the next STREAM frame, honoring the stream window and a
    /// connection-level `allowance`. Returns the frame and how many
    /// bytes it consumed from the allowance.
    pub fn next_frame(
        &mut self,
        max_bytes: usize,
        allowance: u64,
    ) -> Option<(frame::Stream<Bytes>, u64)> {
        if !self.has_write_pending() {
            return None;
        }

        let budget = (max_bytes as u64)
            .min(self.flow.available_send_window())
            .min(allowance)
            .min(usize::MAX as u64) as usize;

        let (offset, data, fin) = self.send.pop(budget)?;
        let bytes = data.len() as u64;

        self.flow
            .on_bytes_sent(bytes)
            .expect("pop never exceeds the window");

        self.bytes_outstanding += bytes;
        if fin {
            self.fin_sent = true;
            self.fin_outstanding = true;
        }

        let frame = frame::Stream {
            stream_id: self.stream_id,
            offset,
            is_last_frame: false,
            is_fin: fin,
            data,
        };

        Some((frame, bytes))
    }

    /// A send-window BLOCKED report, at most once per window edge
    pub fn maybe_send_blocked(&mut self) -> Option<frame::Blocked> {
        if self.send.buffered_bytes() == 0 {
            return None;
        }
        self.flow.maybe_send_blocked()
    }

    pub fn on_window_update(&mut self, byte_offset: u64) {
        self.flow.on_window_update(byte_offset);
    }

    /// The ledger delivered an ack covering `len` bytes at `offset`
    pub fn on_frame_acked(&mut self, len: u64, fin: bool) {
        self.bytes_outstanding = self.bytes_outstanding.saturating_sub(len);
        if fin {
            self.fin_outstanding = false;
        }
    }

    // === receive side ===

    /// Handles an incoming STREAM frame. Returns the number of bytes
    /// that count against the connection-level window (the advance of
    /// the highest received offset).
    pub fn on_stream_frame(
        &mut self,
        offset: u64,
        data: Bytes,
        fin: bool,
    ) -> Result<u64, transport::Error> {
        if self.rst_received.is_some() || self.rst_sent.is_some() {
            // both sides are closed; late data is noise
            return Ok(0);
        }

        let end = offset + data.len() as u64;
        let previous_highest = self.recv.highest_received();
        self.flow.on_bytes_received(end)?;
        self.recv.write(offset, data, fin)?;

        if fin {
            self.fin_received = true;
        }

        Ok(self.recv.highest_received().saturating_sub(previous_highest))
    }

    /// Drains the next in-order chunk. A window update may accompany
    /// the read once enough bytes have been consumed.
    pub fn read(&mut self, now: Timestamp, smoothed_rtt: Duration) -> (Option<Bytes>, Option<WindowUpdate>) {
        if self.rst_received.is_some() {
            return (None, None);
        }
        match self.recv.pop() {
            Some(data) => {
                let update = self
                    .flow
                    .on_bytes_consumed(data.len() as u64, now, smoothed_rtt);
                (Some(data), update)
            }
            None => (None, None),
        }
    }

    /// True once the peer's FIN arrived and every byte was read
    #[inline]
    pub fn is_read_finished(&self) -> bool {
        self.recv.is_finished()
    }

    // === reset ===

    /// Locally cancels the stream. Buffered send data is dropped and
    /// the frame fixing our final offset is returned; `None` if a reset
    /// was already exchanged.
    pub fn reset(&mut self, error: transport::StreamError) -> Option<frame::RstStream> {
        if self.rst_sent.is_some() || self.rst_received.is_some() {
            return None;
        }
        self.rst_sent = Some(error.code);
        let final_offset = self.send.clear();
        self.recv.clear();

        Some(frame::RstStream {
            stream_id: self.stream_id,
            final_offset,
            error_code: error.code,
        })
    }

    /// The peer reset the stream: both directions close and pending
    /// reads are discarded. Returns the bytes the peer's final offset
    /// adds to the connection-level accounting.
    pub fn on_rst_stream(
        &mut self,
        frame: &frame::RstStream,
    ) -> Result<u64, transport::Error> {
        self.flow.on_bytes_received(frame.final_offset)?;
        let newly_counted = frame
            .final_offset
            .saturating_sub(self.recv.highest_received());

        self.rst_received = Some(frame.error_code);
        self.send.clear();
        self.recv.clear();

        Ok(newly_counted)
    }

    #[inline]
    pub fn rst_sent(&self) -> Option<transport::Code> {
        self.rst_sent
    }

    #[inline]
    pub fn rst_received(&self) -> Option<transport::Code> {
        self.rst_received
    }

    // === lifecycle ===

    /// FIN exchanged in both directions, receive side not yet drained
    #[inline]
    pub fn is_draining(&self) -> bool {
        self.fin_sent && self.fin_received && !self.is_closed()
    }

    /// Fully terminated from the application's point of view
    #[inline]
    pub fn is_closed(&self) -> bool {
        if self.rst_sent.is_some() || self.rst_received.is_some() {
            return true;
        }
        self.fin_sent && !self.send.has_pending() && self.recv.is_finished()
    }

    /// Closed, but sent bytes are still unacked; kept alive solely so
    /// acks can prune the ledger
    #[inline]
    pub fn is_zombie(&self) -> bool {
        self.is_closed() && (self.bytes_outstanding > 0 || self.fin_outstanding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gquic_core::time::{Clock, NoopClock};

    const MS: Duration = Duration::from_millis(1);

    fn stream() -> Stream {
        let id = StreamId::new(5);
        Stream::new(
            id,
            gquic_core::stream::DEFAULT_PRIORITY,
            FlowController::new(id, 1000, 1000, 4000),
        )
    }

    #[test]
    fn write_then_send_then_ack() {
        let mut subject = stream();
        assert_eq!(
            subject.write(Bytes::from_static(b"hello"), true).unwrap(),
            5
        );
        assert!(subject.has_write_pending());

        let (frame, consumed) = subject.next_frame(100, u64::MAX).unwrap();
        assert_eq!(consumed, 5);
        assert_eq!(frame.offset, 0);
        assert!(frame.is_fin);
        assert!(!subject.has_write_pending());
        assert!(!subject.is_closed(), "peer fin still missing");

        subject.on_frame_acked(5, true);
        assert_eq!(subject.bytes_outstanding, 0);
    }

    #[test]
    fn window_gates_the_frame_size() {
        let mut subject = stream();
        let data = Bytes::from(vec![0u8; 2000]);
        subject.write(data, false).unwrap();

        // stream window is 1000
        let (frame, _) = subject.next_frame(usize::MAX, u64::MAX).unwrap();
        assert_eq!(frame.data.len(), 1000);
        assert!(subject.is_flow_blocked());
        assert!(subject.maybe_send_blocked().is_some());

        // the window opens and the rest drains
        subject.on_window_update(2000);
        assert!(!subject.is_flow_blocked());
        let (frame, _) = subject.next_frame(usize::MAX, u64::MAX).unwrap();
        assert_eq!(frame.offset, 1000);
        assert_eq!(frame.data.len(), 1000);
    }

    #[test]
    fn connection_allowance_gates_too() {
        let mut subject = stream();
        subject.write(Bytes::from_static(b"abcdef"), false).unwrap();

        let (frame, consumed) = subject.next_frame(usize::MAX, 2).unwrap();
        assert_eq!(&frame.data[..], b"ab");
        assert_eq!(consumed, 2);
    }

    #[test]
    fn receive_and_drain() {
        let mut subject = stream();
        let now = NoopClock.get_time();

        let counted = subject
            .on_stream_frame(0, Bytes::from_static(b"hi"), true)
            .unwrap();
        assert_eq!(counted, 2);

        // a retransmission adds nothing to the connection accounting
        let counted = subject
            .on_stream_frame(0, Bytes::from_static(b"hi"), true)
            .unwrap();
        assert_eq!(counted, 0);

        let (data, _) = subject.read(now, 100 * MS);
        assert_eq!(data.unwrap(), Bytes::from_static(b"hi"));
        assert!(subject.is_read_finished());
    }

    #[test]
    fn lifecycle_draining_closed_zombie() {
        let mut subject = stream();
        let now = NoopClock.get_time();

        subject.write(Bytes::from_static(b"out"), true).unwrap();
        subject.next_frame(100, u64::MAX).unwrap();
        subject
            .on_stream_frame(0, Bytes::from_static(b"in"), true)
            .unwrap();

        // both fins exchanged, receive side not drained
        assert!(subject.is_draining());
        assert!(!subject.is_closed());

        let (data, _) = subject.read(now, 100 * MS);
        assert_eq!(data.unwrap(), Bytes::from_static(b"in"));

        // closed now, but zombie until the sent bytes are acked
        assert!(subject.is_closed());
        assert!(subject.is_zombie());

        subject.on_frame_acked(3, true);
        assert!(!subject.is_zombie());
    }

    #[test]
    fn local_reset_fixes_the_final_offset() {
        let mut subject = stream();
        subject
            .write(Bytes::from_static(b"abcdef"), false)
            .unwrap();
        subject.next_frame(4, u64::MAX).unwrap();

        let rst = subject
            .reset(transport::StreamError::STREAM_CANCELLED)
            .unwrap();
        assert_eq!(rst.final_offset, 4);
        assert!(subject.is_closed());
        assert!(!subject.has_write_pending());

        // writes after a reset fail
        assert!(subject.write(Bytes::from_static(b"x"), false).is_err());
        // a second reset emits nothing
        assert!(subject.reset(transport::StreamError::STREAM_CANCELLED).is_none());
    }

    #[test]
    fn peer_reset_closes_both_sides() {
        let mut subject = stream();
        let now = NoopClock.get_time();
        subject
            .on_stream_frame(0, Bytes::from_static(b"pending"), false)
            .unwrap();

        let counted = subject
            .on_rst_stream(&frame::RstStream {
                stream_id: StreamId::new(5),
                final_offset: 10,
                error_code: transport::StreamError::STREAM_CANCELLED.code,
            })
            .unwrap();
        // 7 bytes were already counted when they arrived
        assert_eq!(counted, 3);

        assert!(subject.is_closed());
        // pending reads were discarded
        let (data, _) = subject.read(now, 100 * MS);
        assert!(data.is_none());
        // late data is silently dropped
        let counted = subject
            .on_stream_frame(7, Bytes::from_static(b"zzz"), false)
            .unwrap();
        assert_eq!(counted, 0);
    }

    #[test]
    fn peer_reset_respects_the_receive_window() {
        let mut subject = stream();
        let result = subject.on_rst_stream(&frame::RstStream {
            stream_id: StreamId::new(5),
            final_offset: 5000,
            error_code: transport::StreamError::STREAM_CANCELLED.code,
        });
        assert_eq!(
            result.unwrap_err().code,
            transport::Error::FLOW_CONTROL_RECEIVED_TOO_MUCH_DATA.code
        );
    }
}
