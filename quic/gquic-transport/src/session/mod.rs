// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The stream multiplexer: stream lifecycle, frame routing, the
//! connection-level flow controller, and the priority-ordered write
//! loop.

mod write_blocked_list;

pub use write_blocked_list::WriteBlockedList;

use crate::{
    connection::Limits,
    stream::{FlowController, Stream},
};
use bytes::Bytes;
use gquic_core::{
    endpoint,
    frame::{self, FrameOwned},
    stream::{StreamId, CRYPTO_STREAM_ID, HEADERS_STREAM_ID, HIGHEST_PRIORITY},
    time::{Duration, Timestamp},
    transport,
};
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

/// Something the application wants to hear about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// In-order bytes are ready to read on the stream
    StreamData { stream_id: StreamId },
    /// The peer reset the stream; pending reads were discarded
    StreamReset {
        stream_id: StreamId,
        error_code: transport::Code,
    },
    /// The peer will accept no new streams
    GoawayReceived { last_good_stream: StreamId },
}

/// Multiplexes streams over one connection.
///
/// Routes decoded frames to their streams, arbitrates writes through
/// the write-blocked list (crypto before headers before data), and
/// enforces the connection-level flow window and stream-count limits.
pub struct Session {
    perspective: endpoint::Type,
    limits: Limits,

    streams: HashMap<StreamId, Stream>,
    write_blocked: WriteBlockedList,

    connection_flow: FlowController,
    /// Cumulative highest-offset sum across streams, the quantity the
    /// connection-level receive window bounds
    connection_bytes_received: u64,

    next_outgoing_stream: StreamId,
    largest_peer_created: Option<StreamId>,
    /// Peer ids skipped over by a larger id; they may still open later
    available_streams: HashSet<StreamId>,

    goaway_sent: Option<StreamId>,
    goaway_received: Option<StreamId>,

    /// Control frames awaiting the next outgoing packet
    control_frames: VecDeque<FrameOwned>,
    events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(perspective: endpoint::Type, limits: Limits) -> Self {
        let connection_flow = FlowController::new(
            StreamId::new(0),
            limits.initial_connection_send_window,
            limits.initial_connection_receive_window,
            limits.max_connection_receive_window,
        );

        let mut session = Self {
            perspective,
            limits,
            streams: HashMap::new(),
            write_blocked: WriteBlockedList::new(),
            connection_flow,
            connection_bytes_received: 0,
            next_outgoing_stream: StreamId::initial(perspective),
            largest_peer_created: None,
            available_streams: HashSet::new(),
            goaway_sent: None,
            goaway_received: None,
            control_frames: VecDeque::new(),
            events: VecDeque::new(),
        };

        // the reserved streams exist on every connection
        session.insert_stream(CRYPTO_STREAM_ID);
        session.insert_stream(HEADERS_STREAM_ID);
        session
    }

    fn insert_stream(&mut self, stream_id: StreamId) -> &mut Stream {
        let flow = FlowController::new(
            stream_id,
            self.limits.initial_stream_send_window,
            self.limits.initial_stream_receive_window,
            self.limits.max_stream_receive_window,
        );
        let priority = if stream_id.is_reserved() {
            HIGHEST_PRIORITY
        } else {
            gquic_core::stream::DEFAULT_PRIORITY
        };
        self.streams
            .entry(stream_id)
            .or_insert_with(|| Stream::new(stream_id, priority, flow))
    }

    #[inline]
    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    fn count_open(&self, initiator: endpoint::Type) -> usize {
        self.streams
            .values()
            .filter(|stream| {
                !stream.stream_id().is_reserved()
                    && stream.stream_id().initiator() == initiator
                    && !stream.is_closed()
            })
            .count()
    }

    // === application surface ===

    /// Opens a new outgoing stream, or `None` when the open-stream
    /// limit is reached or a GOAWAY has been exchanged
    pub fn create_outgoing_stream(&mut self) -> Option<StreamId> {
        if self.goaway_sent.is_some() || self.goaway_received.is_some() {
            return None;
        }
        if self.count_open(self.perspective) >= self.limits.max_open_outgoing_streams {
            return None;
        }

        let stream_id = self.next_outgoing_stream;
        self.next_outgoing_stream = stream_id.next()?;
        self.insert_stream(stream_id);
        Some(stream_id)
    }

    /// Buffers data on the stream, registering it for the write loop.
    /// Returns the bytes accepted.
    pub fn write(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        fin: bool,
    ) -> Result<usize, transport::Error> {
        let stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or(transport::Error::INVALID_STREAM_ID)?;
        let written = stream.write(data, fin)?;
        if stream.has_write_pending() {
            let priority = stream.priority();
            self.write_blocked.push(stream_id, priority);
        }
        Ok(written)
    }

    /// Drains the next in-order chunk from the stream, emitting any
    /// flow control updates the consumption triggers
    pub fn read(
        &mut self,
        stream_id: StreamId,
        now: Timestamp,
        smoothed_rtt: Duration,
    ) -> Option<Bytes> {
        let counts_toward_connection = !stream_id.is_reserved();
        let stream = self.streams.get_mut(&stream_id)?;
        let (data, window_update) = stream.read(now, smoothed_rtt);

        if let Some(update) = window_update {
            self.control_frames
                .push_back(frame::Frame::WindowUpdate(update));
        }

        if let Some(data) = &data {
            if counts_toward_connection {
                if let Some(update) = self.connection_flow.on_bytes_consumed(
                    data.len() as u64,
                    now,
                    smoothed_rtt,
                ) {
                    self.control_frames
                        .push_back(frame::Frame::WindowUpdate(update));
                }
            }
        }

        self.retire_if_done(stream_id);
        data
    }

    /// Resets the stream locally; the RST_STREAM frame goes out with
    /// the next packet
    pub fn reset_stream(&mut self, stream_id: StreamId, error: transport::StreamError) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if let Some(rst) = stream.reset(error) {
                self.control_frames.push_back(frame::Frame::RstStream(rst));
            }
            self.write_blocked.remove(stream_id);
            self.retire_if_done(stream_id);
        }
    }

    /// Announces that no new streams will be accepted
    pub fn send_goaway(&mut self, error: transport::Error) {
        if self.goaway_sent.is_some() {
            return;
        }
        let last_good_stream = self.largest_peer_created.unwrap_or(StreamId::new(0));
        self.goaway_sent = Some(last_good_stream);
        self.control_frames
            .push_back(frame::Frame::Goaway(frame::Goaway {
                error_code: error.code,
                last_good_stream,
                reason: Bytes::from_static(b""),
            }));
    }

    #[inline]
    pub fn goaway_sent(&self) -> bool {
        self.goaway_sent.is_some()
    }

    #[inline]
    pub fn goaway_received(&self) -> bool {
        self.goaway_received.is_some()
    }

    // === frame intake ===

    /// Resolves the stream an incoming frame addresses, creating it if
    /// the peer is allowed to. `Ok(None)` means the frame refers to a
    /// stream that is already gone and should be dropped silently.
    fn incoming_stream(
        &mut self,
        stream_id: StreamId,
    ) -> Result<Option<&mut Stream>, transport::Error> {
        if self.streams.contains_key(&stream_id) {
            return Ok(self.streams.get_mut(&stream_id));
        }

        if stream_id.is_connection_level() {
            return Err(transport::Error::INVALID_STREAM_ID
                .with_reason("stream id 0 carries no stream frames"));
        }

        if stream_id.initiator() == self.perspective {
            if stream_id >= self.next_outgoing_stream {
                // we never created this id
                return Err(transport::Error::INVALID_STREAM_ID
                    .with_reason("frame on an outgoing stream that was never opened"));
            }
            // a closed stream of ours; late frames are noise
            return Ok(None);
        }

        // peer-initiated
        let largest = self.largest_peer_created;
        let is_old = largest.is_some_and(|largest| stream_id <= largest);

        if is_old {
            if self.available_streams.remove(&stream_id) {
                return Ok(Some(self.insert_stream(stream_id)));
            }
            // closed (not reset, not available): silently dropped
            return Ok(None);
        }

        // a brand new peer stream
        if let Some(last_good) = self.goaway_sent {
            if stream_id > last_good {
                // refused; tell the peer to stop
                self.control_frames
                    .push_back(frame::Frame::RstStream(frame::RstStream {
                        stream_id,
                        final_offset: 0,
                        error_code: transport::StreamError::STREAM_PEER_GOING_AWAY.code,
                    }));
                return Ok(None);
            }
        }

        // intervening ids become available for later, out-of-order opens
        let mut next = match largest {
            Some(largest) => largest.next().expect("stream id space is not exhausted"),
            None => StreamId::initial(self.perspective.peer_type()),
        };
        while next < stream_id {
            self.available_streams.insert(next);
            next = next.next().expect("stream id space is not exhausted");
        }

        if self.count_open(self.perspective.peer_type())
            >= self.limits.max_open_incoming_streams
        {
            return Err(transport::Error::TOO_MANY_OPEN_STREAMS);
        }

        self.largest_peer_created = Some(stream_id);
        Ok(Some(self.insert_stream(stream_id)))
    }

    /// Routes an incoming STREAM frame
    pub fn on_stream_frame(
        &mut self,
        stream_id: StreamId,
        offset: u64,
        data: Bytes,
        fin: bool,
    ) -> Result<(), transport::Error> {
        let counts_toward_connection = !stream_id.is_reserved();
        let data_len = data.len();

        let newly_counted = match self.incoming_stream(stream_id)? {
            Some(stream) => stream.on_stream_frame(offset, data, fin)?,
            None => return Ok(()),
        };

        if counts_toward_connection && newly_counted > 0 {
            self.connection_bytes_received += newly_counted;
            self.connection_flow
                .on_bytes_received(self.connection_bytes_received)?;
        }

        if data_len > 0 || fin {
            self.events
                .push_back(SessionEvent::StreamData { stream_id });
        }

        Ok(())
    }

    /// Routes an incoming RST_STREAM frame
    pub fn on_rst_stream(&mut self, rst: &frame::RstStream) -> Result<(), transport::Error> {
        let counts_toward_connection = !rst.stream_id.is_reserved();

        let newly_counted = match self.incoming_stream(rst.stream_id)? {
            Some(stream) => stream.on_rst_stream(rst)?,
            None => return Ok(()),
        };

        if counts_toward_connection && newly_counted > 0 {
            self.connection_bytes_received += newly_counted;
            self.connection_flow
                .on_bytes_received(self.connection_bytes_received)?;
        }

        self.write_blocked.remove(rst.stream_id);
        self.events.push_back(SessionEvent::StreamReset {
            stream_id: rst.stream_id,
            error_code: rst.error_code,
        });
        self.retire_if_done(rst.stream_id);

        Ok(())
    }

    /// Routes an incoming WINDOW_UPDATE frame
    pub fn on_window_update(&mut self, update: &frame::WindowUpdate) {
        if update.stream_id.is_connection_level() {
            self.connection_flow.on_window_update(update.byte_offset);
            // the shared window opened: every pending stream may move
            let pending: Vec<(StreamId, u8)> = self
                .streams
                .values()
                .filter(|stream| stream.has_write_pending())
                .map(|stream| (stream.stream_id(), stream.priority()))
                .collect();
            for (stream_id, priority) in pending {
                self.write_blocked.push(stream_id, priority);
            }
            return;
        }

        if let Some(stream) = self.streams.get_mut(&update.stream_id) {
            stream.on_window_update(update.byte_offset);
            if stream.has_write_pending() {
                let priority = stream.priority();
                self.write_blocked.push(update.stream_id, priority);
            }
        }
    }

    /// Routes an incoming GOAWAY frame
    pub fn on_goaway(&mut self, goaway: &frame::Goaway<Bytes>) {
        self.goaway_received = Some(goaway.last_good_stream);
        self.events.push_back(SessionEvent::GoawayReceived {
            last_good_stream: goaway.last_good_stream,
        });
    }

    // === write loop ===

    /// True if anything wants to go out
    pub fn has_write_pending(&self) -> bool {
        !self.control_frames.is_empty() || !self.write_blocked.is_empty()
    }

    /// Collects frames for one outgoing packet, at most `max_payload`
    /// encoded bytes: control frames first, then stream data in
    /// priority order (crypto, headers, data streams).
    pub fn collect_frames(&mut self, max_payload: usize) -> Vec<FrameOwned> {
        use s2n_codec::EncoderValue;

        let mut frames: Vec<FrameOwned> = Vec::new();
        let mut budget = max_payload;

        while let Some(size) = self
            .control_frames
            .front()
            .map(|frame| frame.encoding_size())
        {
            if size > budget {
                break;
            }
            budget -= size;
            frames.push(self.control_frames.pop_front().expect("front exists"));
        }

        // smallest useful stream frame: tag + ids + offset + some data
        const MIN_STREAM_FRAME: usize = 32;

        let mut passes = self.write_blocked.len();
        while budget > MIN_STREAM_FRAME && passes > 0 {
            passes -= 1;
            let stream_id = match self.write_blocked.pop() {
                Some(stream_id) => stream_id,
                None => break,
            };

            let exempt = stream_id.is_reserved();
            let allowance = if exempt {
                u64::MAX
            } else {
                self.connection_flow.available_send_window()
            };

            let stream = match self.streams.get_mut(&stream_id) {
                Some(stream) => stream,
                None => continue,
            };

            // leave room for the frame header
            let overhead = 1 + 4 + 8 + 2;
            let data_budget = budget.saturating_sub(overhead);

            match stream.next_frame(data_budget, allowance) {
                Some((frame, consumed)) => {
                    if !exempt && consumed > 0 {
                        self.connection_flow
                            .on_bytes_sent(consumed)
                            .expect("allowance was checked");
                    }

                    let frame = FrameOwned::Stream(frame);
                    budget = budget.saturating_sub(frame.encoding_size());
                    frames.push(frame);

                    if stream.has_write_pending() {
                        let priority = stream.priority();
                        self.write_blocked.push(stream_id, priority);
                    }
                }
                None => {
                    // no progress: report why, and wait for a window
                    // update instead of spinning
                    if let Some(blocked) = stream.maybe_send_blocked() {
                        self.control_frames.push_back(frame::Frame::Blocked(blocked));
                    } else if !exempt
                        && stream.has_write_pending()
                        && self.connection_flow.is_send_blocked()
                    {
                        if let Some(blocked) = self.connection_flow.maybe_send_blocked() {
                            self.control_frames.push_back(frame::Frame::Blocked(blocked));
                        }
                    }
                }
            }
        }

        // blocked reports raised during the pass ride along immediately
        while let Some(size) = self
            .control_frames
            .front()
            .map(|frame| frame.encoding_size())
        {
            if size > budget {
                break;
            }
            budget -= size;
            frames.push(self.control_frames.pop_front().expect("front exists"));
        }

        frames
    }

    // === delivery callbacks ===

    /// A frame from a sent packet was acked; streams prune their
    /// outstanding accounting and finished streams retire
    pub fn on_frame_acked(&mut self, frame: &FrameOwned) {
        if let frame::Frame::Stream(stream_frame) = frame {
            let stream_id = stream_frame.stream_id;
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.on_frame_acked(stream_frame.data.len() as u64, stream_frame.is_fin);
                self.retire_if_done(stream_id);
            }
        }
    }

    /// A frame was declared lost; the ledger replays it, nothing to do
    /// per-stream
    pub fn on_frame_lost(&mut self, frame: &FrameOwned) {
        let _ = frame;
    }

    /// Whether a queued retransmission is still worth sending
    pub fn should_retransmit(&self, frame: &FrameOwned) -> bool {
        if let frame::Frame::Stream(stream_frame) = frame {
            if let Some(stream) = self.streams.get(&stream_frame.stream_id) {
                return stream.rst_sent().is_none() && stream.rst_received().is_none();
            }
        }
        true
    }

    fn retire_if_done(&mut self, stream_id: StreamId) {
        if stream_id.is_reserved() {
            return;
        }
        if let Some(stream) = self.streams.get(&stream_id) {
            if stream.is_closed() && !stream.is_zombie() {
                self.streams.remove(&stream_id);
                self.write_blocked.remove(stream_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stream(&self, stream_id: StreamId) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }
}
