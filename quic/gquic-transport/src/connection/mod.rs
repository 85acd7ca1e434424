// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection loop: glues the wire codec to the session and the
//! sent-packet manager, owns the idle and retransmission timers, and
//! runs the close / time-wait state machine.

mod packet_creator;

pub use packet_creator::{PacketCreator, SerializedPacket};

use crate::{
    ack::ReceivedPacketManager,
    sent::{AckNotifier, LossDetectionMode, SentPacketManager},
    session::{Session, SessionEvent},
};
use bytes::Bytes;
use gquic_core::{
    connection,
    crypto::{EncryptionLevel, KeySet, PacketKey},
    endpoint,
    frame::{self, FrameOwned, FrameRef},
    packet::{
        self,
        number::PacketNumber,
        public_reset, version_negotiation, Header,
    },
    recovery::CongestionController,
    stream::StreamId,
    time::{Duration, Timestamp},
    transport, version,
};
use s2n_codec::DecoderBuffer;

/// Construction-time connection knobs
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_open_outgoing_streams: usize,
    pub max_open_incoming_streams: usize,
    pub initial_stream_send_window: u64,
    pub initial_stream_receive_window: u64,
    pub max_stream_receive_window: u64,
    pub initial_connection_send_window: u64,
    pub initial_connection_receive_window: u64,
    pub max_connection_receive_window: u64,
    /// Idle limit before the handshake completes
    pub handshake_idle_timeout: Duration,
    /// Idle limit after the handshake completes
    pub idle_timeout: Duration,
    /// How long a closed connection lingers, answering strays with a
    /// public reset
    pub time_wait_period: Duration,
    /// The most we will delay our own acks
    pub max_ack_delay: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_open_outgoing_streams: 100,
            max_open_incoming_streams: 100,
            initial_stream_send_window: 16 * 1024,
            initial_stream_receive_window: 16 * 1024,
            max_stream_receive_window: 1024 * 1024,
            initial_connection_send_window: 24 * 1024,
            initial_connection_receive_window: 24 * 1024,
            max_connection_receive_window: 1536 * 1024,
            handshake_idle_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            time_wait_period: Duration::from_secs(10),
            max_ack_delay: Duration::from_millis(25),
        }
    }
}

macro_rules! limit_setter {
    ($name:ident, $field:ident, $ty:ty) => {
        #[must_use]
        pub fn $name(mut self, value: $ty) -> Self {
            self.$field = value;
            self
        }
    };
}

impl Limits {
    limit_setter!(with_max_open_outgoing_streams, max_open_outgoing_streams, usize);
    limit_setter!(with_max_open_incoming_streams, max_open_incoming_streams, usize);
    limit_setter!(with_initial_stream_send_window, initial_stream_send_window, u64);
    limit_setter!(
        with_initial_stream_receive_window,
        initial_stream_receive_window,
        u64
    );
    limit_setter!(
        with_initial_connection_send_window,
        initial_connection_send_window,
        u64
    );
    limit_setter!(
        with_initial_connection_receive_window,
        initial_connection_receive_window,
        u64
    );
    limit_setter!(with_idle_timeout, idle_timeout, Duration);
    limit_setter!(with_time_wait_period, time_wait_period, Duration);
}

/// The socket could not take the datagram right now. The connection
/// buffers the packet and resumes when the caller signals writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

/// The connection's outlet to the datagram socket
pub trait DatagramWriter {
    fn write_datagram(&mut self, datagram: &[u8]) -> Result<(), WouldBlock>;
}

/// What the connection is doing with its life
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    /// We sent CONNECTION_CLOSE; strays get a public reset until the
    /// period lapses
    TimeWait { until: Timestamp },
    /// Fully gone; the dispatcher may drop the entry
    Drained,
}

/// Errors surfaced to the embedding application
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The connection is closed; no further operations are possible
    NotConnected,
    /// The transport closed with the given wire error
    Transport(transport::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Transport(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

/// Decryption failures tolerated before the first successful decrypt
const MAX_UNDECRYPTABLE_PACKETS: u32 = 10;

/// Packets built per write-loop invocation; timers resume the loop
const MAX_BURST_PACKETS: usize = 16;

/// One QUIC connection: session + codec + recovery + timers.
///
/// All methods are non-blocking and expect to run on a single event
/// loop; external I/O happens through the [`DatagramWriter`] passed
/// into each entry point.
pub struct Connection<CC: CongestionController> {
    perspective: endpoint::Type,
    state: State,
    close_error: Option<transport::Error>,

    keys: KeySet,
    send_level: EncryptionLevel,
    decoder: packet::Decoder,
    creator: PacketCreator,

    sent: SentPacketManager<CC>,
    recv: ReceivedPacketManager,
    session: Session,

    limits: Limits,
    idle_deadline: Timestamp,
    handshake_confirmed: bool,

    /// Pacer wakeup for the write loop
    send_alarm: Option<Timestamp>,
    /// The socket pushed back; holds the packet that didn't fit
    blocked_packet: Option<Vec<u8>>,

    ever_decrypted: bool,
    undecryptable_packets: u32,
}

impl<CC: CongestionController> Connection<CC> {
    pub fn new(
        perspective: endpoint::Type,
        connection_id: connection::Id,
        controller: CC,
        limits: Limits,
        now: Timestamp,
    ) -> Self {
        // clients offer their version until negotiation settles
        let offered_version = match perspective {
            endpoint::Type::Client => Some(version::CURRENT),
            endpoint::Type::Server => None,
        };

        Self {
            perspective,
            state: State::Open,
            close_error: None,
            keys: KeySet::new(),
            send_level: EncryptionLevel::Unencrypted,
            decoder: packet::Decoder::new(perspective),
            creator: PacketCreator::new(connection_id, offered_version),
            sent: SentPacketManager::new(
                controller,
                LossDetectionMode::Nack,
                limits.max_ack_delay,
            ),
            recv: ReceivedPacketManager::new(limits.max_ack_delay),
            session: Session::new(perspective, limits.clone()),
            idle_deadline: now + limits.handshake_idle_timeout,
            limits,
            handshake_confirmed: false,
            send_alarm: None,
            blocked_packet: None,
            ever_decrypted: false,
            undecryptable_packets: 0,
        }
    }

    #[inline]
    pub fn connection_id(&self) -> connection::Id {
        self.creator.connection_id()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open)
    }

    #[inline]
    pub fn is_drained(&self) -> bool {
        matches!(self.state, State::Drained)
    }

    #[inline]
    pub fn close_error(&self) -> Option<transport::Error> {
        self.close_error
    }

    #[inline]
    pub fn sent_packets(&self) -> &SentPacketManager<CC> {
        &self.sent
    }

    // === crypto wiring ===

    /// Installs a key produced by the external handshake
    pub fn install_key(&mut self, level: EncryptionLevel, key: Box<dyn PacketKey>) {
        self.keys.install(level, key);
        if level > self.send_level {
            self.send_level = level;
        }
    }

    /// The external handshake settled on forward-secure keys
    pub fn on_handshake_confirmed(&mut self, now: Timestamp) {
        self.handshake_confirmed = true;
        self.send_level = EncryptionLevel::ForwardSecure;
        self.keys.discard_below(EncryptionLevel::ForwardSecure);
        self.sent.neuter_unencrypted_packets();
        self.creator.clear_version();
        self.idle_deadline = now + self.limits.idle_timeout;
    }

    // === application surface ===

    pub fn create_outgoing_stream(&mut self) -> Result<Option<StreamId>, Error> {
        self.ensure_open()?;
        Ok(self.session.create_outgoing_stream())
    }

    /// Buffers stream data and drives the write loop. Returns the
    /// number of bytes buffered.
    pub fn write<W: DatagramWriter>(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        fin: bool,
        now: Timestamp,
        writer: &mut W,
    ) -> Result<usize, Error> {
        self.ensure_open()?;
        let written = self
            .session
            .write(stream_id, data, fin)
            .map_err(Error::Transport)?;
        self.flush(now, writer);
        Ok(written)
    }

    /// Drains the next in-order chunk from the stream
    pub fn read(&mut self, stream_id: StreamId, now: Timestamp) -> Option<Bytes> {
        let smoothed_rtt = self.sent.rtt().smoothed_or_initial();
        self.session.read(stream_id, now, smoothed_rtt)
    }

    pub fn poll_event(&mut self) -> Option<SessionEvent> {
        self.session.poll_event()
    }

    pub fn reset_stream<W: DatagramWriter>(
        &mut self,
        stream_id: StreamId,
        error: transport::StreamError,
        now: Timestamp,
        writer: &mut W,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.session.reset_stream(stream_id, error);
        self.flush(now, writer);
        Ok(())
    }

    pub fn send_goaway<W: DatagramWriter>(
        &mut self,
        error: transport::Error,
        now: Timestamp,
        writer: &mut W,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.session.send_goaway(error);
        self.flush(now, writer);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    // === datagram intake ===

    /// Feeds one received datagram through the codec and the frame
    /// handlers, then runs the write loop for acks and unblocked data.
    pub fn on_datagram<W: DatagramWriter>(&mut self, bytes: &[u8], now: Timestamp, writer: &mut W) {
        match self.state {
            State::Open => {}
            State::TimeWait { .. } => {
                // answer strays so the peer stops retrying
                let _ = writer.write_datagram(&public_reset::encode(self.connection_id()));
                return;
            }
            State::Drained => return,
        }

        // a server checks the offered version before anything else
        if self.perspective.is_server() {
            if let Some(offered) = peek_version(bytes) {
                if !version::is_supported(offered) {
                    let _ = writer.write_datagram(&version_negotiation::encode(
                        self.connection_id(),
                        version::SUPPORTED,
                    ));
                    return;
                }
            }
        }

        let smoothed_rtt = self.sent.rtt().smoothed_or_initial();
        let largest_seen = self.recv.largest_received();
        let mut handler = PacketHandler {
            session: &mut self.session,
            sent: &mut self.sent,
            recv: &mut self.recv,
            now,
            smoothed_rtt,
            saw_retransmittable: false,
            duplicate: false,
            close_received: None,
            version_negotiation: false,
            public_reset: false,
        };

        let result = self
            .decoder
            .decode_packet(bytes, largest_seen, &self.keys, &mut handler);

        let duplicate = handler.duplicate;
        let close_received = handler.close_received;
        let version_negotiation = handler.version_negotiation;
        let public_reset = handler.public_reset;

        if duplicate {
            return;
        }

        if public_reset {
            self.close_error = Some(transport::Error::PUBLIC_RESET);
            self.state = State::Drained;
            return;
        }

        if version_negotiation {
            // we only speak one version; a negotiation demand is fatal
            self.close_with(transport::Error::INVALID_VERSION, now, writer);
            return;
        }

        match result {
            Ok(()) => {
                self.ever_decrypted = true;
                self.undecryptable_packets = 0;

                if let Some(error) = close_received {
                    // the peer is gone; nothing more to send
                    self.close_error = Some(error);
                    self.state = State::Drained;
                    return;
                }

                // activity refreshes the idle clock
                let idle_timeout = if self.handshake_confirmed {
                    self.limits.idle_timeout
                } else {
                    self.limits.handshake_idle_timeout
                };
                self.idle_deadline = now + idle_timeout;

                self.flush(now, writer);
            }
            Err(packet::Error::DecryptionFailure) => {
                if !self.ever_decrypted {
                    self.undecryptable_packets += 1;
                    if self.undecryptable_packets >= MAX_UNDECRYPTABLE_PACKETS {
                        self.close_with(transport::Error::DECRYPTION_FAILURE, now, writer);
                    }
                }
            }
            Err(packet::Error::InvalidHeader) | Err(packet::Error::TooLarge) => {
                // a malformed datagram discards itself
            }
            Err(packet::Error::InvalidFrameData) => {
                self.close_with(transport::Error::INVALID_FRAME_DATA, now, writer);
            }
            Err(packet::Error::Transport(error)) => {
                self.close_with(error, now, writer);
            }
            Err(packet::Error::EncryptionFailure) => {
                self.close_with(transport::Error::ENCRYPTION_FAILURE, now, writer);
            }
        }
    }

    // === timers ===

    /// The next instant at which [`Self::on_timeout`] wants to run
    pub fn next_timeout(&self, now: Timestamp) -> Option<Timestamp> {
        match self.state {
            State::Open => {}
            State::TimeWait { until } => return Some(until),
            State::Drained => return None,
        }

        let mut deadline = self.idle_deadline;

        for candidate in [
            self.sent.retransmission_time(now),
            self.recv.ack_deadline(),
            self.send_alarm,
        ]
        .into_iter()
        .flatten()
        {
            deadline = deadline.min(candidate);
        }

        Some(deadline)
    }

    /// Runs whichever timers have expired at `now`
    pub fn on_timeout<W: DatagramWriter>(&mut self, now: Timestamp, writer: &mut W) {
        match self.state {
            State::Open => {}
            State::TimeWait { until } => {
                if until.has_elapsed(now) {
                    self.state = State::Drained;
                }
                return;
            }
            State::Drained => return,
        }

        if self.idle_deadline.has_elapsed(now) {
            self.close_with(transport::Error::CONNECTION_TIMED_OUT, now, writer);
            return;
        }

        if let Some(deadline) = self.sent.retransmission_time(now) {
            if deadline.has_elapsed(now) {
                let mut notifier = SessionNotifier {
                    session: &mut self.session,
                };
                self.sent.on_retransmission_alarm(now, &mut notifier);
            }
        }

        if let Some(alarm) = self.send_alarm {
            if alarm.has_elapsed(now) {
                self.send_alarm = None;
            }
        }

        self.flush(now, writer);
    }

    /// The socket became writable again
    pub fn on_writable<W: DatagramWriter>(&mut self, now: Timestamp, writer: &mut W) {
        if let Some(packet) = self.blocked_packet.take() {
            if writer.write_datagram(&packet).is_err() {
                self.blocked_packet = Some(packet);
                return;
            }
        }
        self.flush(now, writer);
    }

    // === close ===

    /// Application-requested close
    pub fn close<W: DatagramWriter>(
        &mut self,
        error: transport::Error,
        now: Timestamp,
        writer: &mut W,
    ) {
        self.close_with(error, now, writer);
    }

    fn close_with<W: DatagramWriter>(
        &mut self,
        error: transport::Error,
        now: Timestamp,
        writer: &mut W,
    ) {
        if !self.is_open() {
            return;
        }

        // CONNECTION_CLOSE leaves exactly once
        let close: frame::ConnectionClose<Bytes> = error.into();
        let frames = [FrameOwned::ConnectionClose(close)];
        if let Ok(packet) = self.creator.build(
            &frames,
            self.send_level,
            &self.keys,
            self.sent.least_unacked(),
        ) {
            let _ = writer.write_datagram(&packet.bytes);
        }

        self.close_error = Some(error);
        self.state = State::TimeWait {
            until: now + self.limits.time_wait_period,
        };
    }

    // === write loop ===

    /// Drives packets out until the congestion gate, the pacer, the
    /// socket, or an empty session stops it
    pub fn flush<W: DatagramWriter>(&mut self, now: Timestamp, writer: &mut W) {
        if !self.is_open() || self.blocked_packet.is_some() {
            return;
        }

        for _ in 0..MAX_BURST_PACKETS {
            let want_ack = self.recv.should_ack(now) || self.recv.has_ack_content();
            let has_retransmissions = self.sent.has_pending_retransmissions();
            let has_data = has_retransmissions || self.session.has_write_pending();

            if !want_ack && !has_data {
                break;
            }

            let mut data_allowed = has_data;
            if has_data {
                match self.sent.time_until_send(now, true) {
                    Some(delay) if delay.is_zero() => {}
                    Some(delay) => {
                        self.send_alarm = Some(now + delay);
                        data_allowed = false;
                    }
                    None => data_allowed = false,
                }
            }

            if !data_allowed && !self.recv.should_ack(now) {
                break;
            }

            // every packet opportunistically bundles the pending ack
            let mut frames: Vec<FrameOwned> = Vec::new();
            if want_ack || self.recv.should_ack(now) {
                if let Some(ack) = self.recv.build_ack_frame(now) {
                    frames.push(FrameOwned::StopWaiting(frame::StopWaiting {
                        least_unacked: self.sent.least_unacked(),
                    }));
                    frames.push(FrameOwned::Ack(ack));
                }
            }

            let mut retransmission: Option<(PacketNumber, gquic_core::transmission::Type)> = None;

            if data_allowed {
                if has_retransmissions {
                    while let Some(pending) = self.sent.dequeue_pending_retransmission() {
                        let keep: Vec<FrameOwned> = pending
                            .frames
                            .into_iter()
                            .filter(|frame| self.session.should_retransmit(frame))
                            .collect();
                        if keep.is_empty() {
                            // the stream died since; drop the payload
                            self.sent.cancel_retransmission(pending.packet_number);
                            continue;
                        }
                        frames.extend(keep);
                        retransmission =
                            Some((pending.packet_number, pending.transmission_type));
                        break;
                    }
                } else {
                    let used: usize = frames
                        .iter()
                        .map(|frame| s2n_codec::EncoderValue::encoding_size(frame))
                        .sum();
                    let budget = self
                        .creator
                        .max_payload(self.sent.least_unacked())
                        .saturating_sub(used);
                    frames.extend(self.session.collect_frames(budget));
                }
            }

            if frames.is_empty() {
                break;
            }

            let least_unacked = self.sent.least_unacked();
            let packet = match self
                .creator
                .build(&frames, self.send_level, &self.keys, least_unacked)
            {
                Ok(packet) => packet,
                Err(_) => break,
            };

            match retransmission {
                Some((old_packet, transmission_type)) => {
                    self.sent.on_retransmission_sent(
                        old_packet,
                        packet.packet_number,
                        transmission_type,
                        self.send_level,
                        packet.packet_number_len,
                        now,
                        packet.bytes.len() as u32,
                    );
                }
                None => {
                    self.sent.on_packet_sent(
                        packet.packet_number,
                        frames,
                        self.send_level,
                        packet.packet_number_len,
                        now,
                        packet.bytes.len() as u32,
                    );
                }
            }

            if writer.write_datagram(&packet.bytes).is_err() {
                // socket backpressure: park the packet and wait for
                // the writable signal
                self.blocked_packet = Some(packet.bytes);
                break;
            }
        }
    }
}

/// Reads the version out of a datagram that offers one
fn peek_version(bytes: &[u8]) -> Option<version::Version> {
    let buffer = DecoderBuffer::new(bytes);
    let (flags, buffer) = buffer.decode::<u8>().ok()?;
    if flags & packet::header::FLAG_VERSION == 0 {
        return None;
    }
    let buffer = buffer.skip(connection::Id::LEN).ok()?;
    let (offered, _) = buffer.decode::<version::Version>().ok()?;
    Some(offered)
}

/// Forwards frame-fate callbacks from the ledger into the session
struct SessionNotifier<'a> {
    session: &'a mut Session,
}

impl AckNotifier for SessionNotifier<'_> {
    fn on_frame_acked(&mut self, frame: &FrameOwned) {
        self.session.on_frame_acked(frame);
    }

    fn on_frame_lost(&mut self, frame: &FrameOwned) {
        self.session.on_frame_lost(frame);
    }
}

/// Routes one packet's decode events into the connection's parts
struct PacketHandler<'a, CC: CongestionController> {
    session: &'a mut Session,
    sent: &'a mut SentPacketManager<CC>,
    recv: &'a mut ReceivedPacketManager,
    now: Timestamp,
    smoothed_rtt: Duration,
    saw_retransmittable: bool,
    duplicate: bool,
    close_received: Option<transport::Error>,
    version_negotiation: bool,
    public_reset: bool,
}

impl<CC: CongestionController> packet::Visitor for PacketHandler<'_, CC> {
    fn on_packet_header(
        &mut self,
        header: &Header,
        _level: EncryptionLevel,
    ) -> Result<(), transport::Error> {
        // at-most-once processing: replays stop before their frames run
        if !self.recv.record(
            header.packet_number,
            false,
            self.now,
            self.smoothed_rtt,
        ) {
            self.duplicate = true;
            return Err(transport::Error::NO_ERROR.with_reason("duplicate packet"));
        }
        Ok(())
    }

    fn on_frame(&mut self, frame: FrameRef) -> Result<(), transport::Error> {
        if frame.is_retransmittable() {
            self.saw_retransmittable = true;
        }

        match frame {
            frame::Frame::Padding(_) => {}
            frame::Frame::Ping(_) => {}
            frame::Frame::Stream(stream) => {
                // the decoder's slices die with the packet; own the bytes
                let data = Bytes::copy_from_slice(stream.data);
                self.session
                    .on_stream_frame(stream.stream_id, stream.offset, data, stream.is_fin)?;
            }
            frame::Frame::Ack(ack) => {
                let mut notifier = SessionNotifier {
                    session: &mut *self.session,
                };
                self.sent.on_ack_frame(&ack, self.now, &mut notifier)?;
            }
            frame::Frame::StopWaiting(stop_waiting) => {
                self.recv.on_stop_waiting(stop_waiting.least_unacked);
            }
            frame::Frame::RstStream(rst) => {
                self.session.on_rst_stream(&rst)?;
            }
            frame::Frame::WindowUpdate(update) => {
                self.session.on_window_update(&update);
            }
            frame::Frame::Blocked(_) => {
                // informational; the window updates go out on their own
            }
            frame::Frame::Goaway(goaway) => {
                let goaway = goaway.map_data(Bytes::copy_from_slice);
                self.session.on_goaway(&goaway);
            }
            frame::Frame::ConnectionClose(close) => {
                self.close_received = Some(
                    transport::Error::new(close.error_code).with_reason("peer closed"),
                );
            }
        }

        Ok(())
    }

    fn on_packet_complete(&mut self, _header: &Header) {
        if self.saw_retransmittable {
            self.recv.mark_ack_eliciting(self.now, self.smoothed_rtt);
        }
    }

    fn on_version_negotiation(&mut self, _versions: &[version::Version]) {
        self.version_negotiation = true;
    }

    fn on_public_reset(&mut self, _connection_id: connection::Id) {
        self.public_reset = true;
    }
}

#[cfg(test)]
mod tests;
