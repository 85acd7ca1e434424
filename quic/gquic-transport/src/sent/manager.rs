// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::sent::{LossDetectionMode, LossDetector, UnackedPacketMap};
use gquic_core::{
    crypto::EncryptionLevel,
    event,
    frame::{self, FrameOwned},
    packet::number::{PacketNumber, PacketNumberLen},
    recovery::{CongestionController, RttEstimator},
    time::{Duration, Timestamp},
    transmission,
};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Tail loss probes before falling back to RTO
const MAX_TAIL_LOSS_PROBES: u32 = 2;

/// The RTO never fires faster than this
const MIN_RTO: Duration = Duration::from_millis(200);

/// Packets replayed when the RTO fires
const PACKETS_ON_RTO: usize = 2;

/// Caps the exponential timer backoffs
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Which flavor of the retransmission alarm fired
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetransmissionMode {
    /// Crypto handshake data is outstanding
    Handshake,
    /// The loss detector's time threshold expired
    LossTimer,
    /// Probe the tail before declaring an RTO
    TailLossProbe,
    /// Full retransmission timeout
    Rto,
}

/// A payload waiting to be replayed in a fresh packet
#[derive(Clone, Debug)]
pub struct PendingRetransmission {
    pub packet_number: PacketNumber,
    pub transmission_type: transmission::Type,
    pub frames: Vec<FrameOwned>,
    pub encryption_level: EncryptionLevel,
    pub has_crypto_handshake: bool,
}

/// Receives per-frame delivery callbacks so streams can prune their
/// send buffers and flow-control accounting
pub trait AckNotifier {
    fn on_frame_acked(&mut self, frame: &FrameOwned);
    fn on_frame_lost(&mut self, frame: &FrameOwned);
}

/// A notifier for callers that don't track frame fates
#[derive(Debug, Default)]
pub struct NoopAckNotifier;

impl AckNotifier for NoopAckNotifier {
    fn on_frame_acked(&mut self, _frame: &FrameOwned) {}
    fn on_frame_lost(&mut self, _frame: &FrameOwned) {}
}

/// Counters kept for the life of the connection
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_acked: u64,
    pub packets_lost: u64,
    pub packets_retransmitted: u64,
    pub spurious_retransmissions: u64,
    pub rto_count: u64,
    pub tlp_count: u64,
    pub crypto_retransmit_count: u64,
}

/// Owns the ledger, RTT statistics, loss detector and congestion
/// controller.
///
/// Every outgoing packet is recorded here; every incoming ack frame is
/// processed here; the single retransmission alarm is computed here by
/// priority: handshake, then loss, then tail-loss probe, then RTO.
pub struct SentPacketManager<CC> {
    unacked: UnackedPacketMap,
    rtt: RttEstimator,
    loss: LossDetector,
    controller: CC,

    pending_retransmissions: BTreeMap<PacketNumber, transmission::Type>,

    consecutive_rto_count: u32,
    consecutive_tlp_count: u32,
    consecutive_crypto_count: u32,

    /// The most the peer will intentionally delay an ack
    peer_max_ack_delay: Duration,

    stats: Stats,
    events: Box<dyn event::Subscriber>,
}

impl<CC: CongestionController> SentPacketManager<CC> {
    pub fn new(controller: CC, loss_mode: LossDetectionMode, peer_max_ack_delay: Duration) -> Self {
        Self {
            unacked: UnackedPacketMap::new(),
            rtt: RttEstimator::new(),
            loss: LossDetector::new(loss_mode),
            controller,
            pending_retransmissions: BTreeMap::new(),
            consecutive_rto_count: 0,
            consecutive_tlp_count: 0,
            consecutive_crypto_count: 0,
            peer_max_ack_delay,
            stats: Stats::default(),
            events: Box::new(event::NoopSubscriber),
        }
    }

    pub fn with_subscriber(mut self, events: Box<dyn event::Subscriber>) -> Self {
        self.events = events;
        self
    }

    #[inline]
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    #[inline]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[inline]
    pub fn controller(&self) -> &CC {
        &self.controller
    }

    #[inline]
    pub fn unacked(&self) -> &UnackedPacketMap {
        &self.unacked
    }

    #[inline]
    pub fn bytes_in_flight(&self) -> u64 {
        self.unacked.bytes_in_flight()
    }

    #[inline]
    pub fn least_unacked(&self) -> PacketNumber {
        self.unacked.least_unacked()
    }

    #[inline]
    pub fn largest_sent(&self) -> PacketNumber {
        self.unacked.largest_sent()
    }

    /// Records an outgoing packet
    #[allow(clippy::too_many_arguments)]
    pub fn on_packet_sent(
        &mut self,
        packet_number: PacketNumber,
        frames: Vec<FrameOwned>,
        encryption_level: EncryptionLevel,
        packet_number_len: PacketNumberLen,
        sent_time: Timestamp,
        bytes_sent: u32,
    ) {
        let retransmittable: Vec<FrameOwned> = frames
            .into_iter()
            .filter(|frame| frame.is_retransmittable())
            .collect();
        let has_crypto = retransmittable.iter().any(is_crypto_frame);
        let is_retransmittable = !retransmittable.is_empty();
        let set_in_flight = self.controller.on_packet_sent(
            sent_time,
            packet_number,
            bytes_sent as usize,
            is_retransmittable,
        );

        self.unacked.add_sent(
            packet_number,
            retransmittable,
            encryption_level,
            packet_number_len,
            transmission::Type::Initial,
            sent_time,
            bytes_sent,
            set_in_flight,
            has_crypto,
        );

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes_sent as u64;
        self.events
            .on_packet_sent(packet_number, bytes_sent as usize, sent_time);
    }

    /// Records that a pending retransmission left in a fresh packet
    #[allow(clippy::too_many_arguments)]
    pub fn on_retransmission_sent(
        &mut self,
        old_packet: PacketNumber,
        new_packet: PacketNumber,
        transmission_type: transmission::Type,
        encryption_level: EncryptionLevel,
        packet_number_len: PacketNumberLen,
        sent_time: Timestamp,
        bytes_sent: u32,
    ) {
        self.controller
            .on_packet_sent(sent_time, new_packet, bytes_sent as usize, true);
        self.unacked.on_retransmitted(
            old_packet,
            new_packet,
            encryption_level,
            packet_number_len,
            transmission_type,
            sent_time,
            bytes_sent,
        );

        self.stats.packets_sent += 1;
        self.stats.packets_retransmitted += 1;
        self.stats.bytes_sent += bytes_sent as u64;
        self.events.on_retransmission(new_packet, transmission_type);
    }

    /// Processes an incoming ack frame.
    ///
    /// Newly acked packets feed the congestion controller in ascending
    /// order; the newest transmission of a chain also feeds the RTT
    /// estimator. Losses inferred from the new ack state are queued for
    /// retransmission and reported through `notifier`.
    pub fn on_ack_frame<N: AckNotifier>(
        &mut self,
        ack: &frame::Ack,
        now: Timestamp,
        notifier: &mut N,
    ) -> Result<(), gquic_core::transport::Error> {
        let largest_acked = ack.largest_acked();
        if largest_acked > self.unacked.largest_sent() {
            return Err(gquic_core::transport::Error::INVALID_ACK_DATA
                .with_reason("ack for a packet that was never sent"));
        }

        // collect the newly acked packets in ascending order
        let newly_acked: SmallVec<[PacketNumber; 8]> = self
            .unacked
            .iter()
            .filter(|(packet_number, info)| {
                ack.ranges.contains(**packet_number) && !info.is_unackable
            })
            .map(|(packet_number, _)| *packet_number)
            .collect();

        let largest_newly_acked = match newly_acked.last() {
            Some(largest) => *largest,
            None => {
                self.unacked.increase_largest_observed(largest_acked);
                return Ok(());
            }
        };

        let ack_delay = ack.ack_delay.as_duration();

        for &packet_number in &newly_acked {
            let info = self
                .unacked
                .get(packet_number)
                .expect("newly acked packets are in the ledger");
            let bytes_sent = info.bytes_sent;
            let sent_time = info.sent_time;
            let was_in_flight = info.in_flight;
            let newest_in_chain = info.is_newest_transmission(packet_number);
            let newest_member = *info.all_transmissions().last().expect("chain is never empty");
            let frames = info.retransmittable_frames.clone();

            if newest_in_chain {
                // ambiguity-free: only the newest transmission of a
                // payload produces an RTT sample
                self.rtt
                    .update(now.saturating_duration_since(sent_time), ack_delay);
                self.controller.on_rtt_update(&self.rtt);
                self.events
                    .on_rtt_updated(self.rtt.latest_rtt(), self.rtt.smoothed_rtt());
            } else {
                // the peer delivered the original after all; the
                // retransmission was spurious
                self.stats.spurious_retransmissions += 1;
                self.events.on_spurious_retransmission(packet_number);
                self.loss
                    .on_spurious_retransmit(&self.unacked, now, &self.rtt, newest_member);
            }

            if was_in_flight {
                self.controller
                    .on_packet_acked(packet_number, bytes_sent as usize, &self.rtt, now);
            }

            for frame in &frames {
                notifier.on_frame_acked(frame);
            }

            // a queued retransmission of an acked payload is moot
            for member in self.unacked.get(packet_number).map_or_else(Vec::new, |info| {
                info.all_transmissions()
            }) {
                self.pending_retransmissions.remove(&member);
            }

            for (_, bytes) in self.unacked.on_packet_acked(packet_number) {
                self.controller.on_packet_abandoned(bytes as usize);
            }

            self.stats.packets_acked += 1;
            self.events.on_packet_acked(packet_number, now);
        }

        // the peer saw these packets; anything below them was passed over
        let nacked: SmallVec<[PacketNumber; 8]> = self
            .unacked
            .iter()
            .take_while(|(packet_number, _)| **packet_number < largest_newly_acked)
            .filter(|(packet_number, info)| {
                info.in_flight && !ack.ranges.contains(**packet_number)
            })
            .map(|(packet_number, _)| *packet_number)
            .collect();
        for packet_number in nacked {
            self.unacked.nack(packet_number, 1);
        }

        self.unacked.increase_largest_observed(largest_acked);

        self.detect_and_queue_losses(now, largest_newly_acked, notifier);

        // forward progress: the backoff epochs are over
        self.consecutive_rto_count = 0;
        self.consecutive_tlp_count = 0;
        self.consecutive_crypto_count = 0;

        Ok(())
    }

    fn detect_and_queue_losses<N: AckNotifier>(
        &mut self,
        now: Timestamp,
        largest_newly_acked: PacketNumber,
        notifier: &mut N,
    ) {
        let lost = self
            .loss
            .detect_losses(&self.unacked, now, &self.rtt, largest_newly_acked);

        let transmission_type = match self.loss.mode() {
            LossDetectionMode::Nack => transmission::Type::NackRetransmission,
            _ => transmission::Type::TimeLoss,
        };

        for (packet_number, bytes) in lost {
            self.stats.packets_lost += 1;
            self.events.on_packet_lost(packet_number, now);
            self.controller
                .on_packet_lost(packet_number, bytes as usize, now);
            self.unacked.remove_from_in_flight(packet_number);

            if let Some(info) = self.unacked.get(packet_number) {
                if !info.retransmittable_frames.is_empty() {
                    for frame in &info.retransmittable_frames {
                        notifier.on_frame_lost(frame);
                    }
                    self.pending_retransmissions
                        .insert(packet_number, transmission_type);
                }
            }
        }
    }

    /// True if any payload is waiting to be replayed
    #[inline]
    pub fn has_pending_retransmissions(&self) -> bool {
        !self.pending_retransmissions.is_empty()
    }

    /// Pops the oldest pending retransmission. The caller serializes
    /// the frames into a fresh packet and reports it back through
    /// [`Self::on_retransmission_sent`].
    pub fn dequeue_pending_retransmission(&mut self) -> Option<PendingRetransmission> {
        while let Some((packet_number, transmission_type)) =
            self.pending_retransmissions.pop_first()
        {
            if let Some(info) = self.unacked.get(packet_number) {
                if !info.retransmittable_frames.is_empty() {
                    return Some(PendingRetransmission {
                        packet_number,
                        transmission_type,
                        frames: info.retransmittable_frames.clone(),
                        encryption_level: info.encryption_level,
                        has_crypto_handshake: info.has_crypto_handshake,
                    });
                }
            }
        }
        None
    }

    /// The congestion controller's answer to "may a packet leave now?"
    #[inline]
    pub fn time_until_send(&self, now: Timestamp, has_retransmittable: bool) -> Option<Duration> {
        self.controller.time_until_send(now, has_retransmittable)
    }

    /// Computes the single retransmission alarm deadline, chosen by
    /// priority: handshake, loss, tail-loss probe, RTO.
    pub fn retransmission_time(&self, now: Timestamp) -> Option<Timestamp> {
        if !self.unacked.has_in_flight_packets() && self.pending_retransmissions.is_empty() {
            return None;
        }

        if self.unacked.has_crypto_handshake_in_flight() {
            let base = self
                .unacked
                .last_retransmittable_sent_time()
                .unwrap_or(now);
            return Some((base + self.crypto_retransmission_delay()).max(now));
        }

        if let Some(loss_time) = self.loss.loss_timeout() {
            return Some(loss_time.max(now));
        }

        if self.unacked.has_unacked_retransmittable_frames()
            && self.consecutive_tlp_count < MAX_TAIL_LOSS_PROBES
        {
            let base = self
                .unacked
                .last_retransmittable_sent_time()
                .unwrap_or(now);
            return Some((base + self.tail_loss_probe_delay()).max(now));
        }

        let base = self.unacked.first_in_flight_sent_time()?;
        Some((base + self.retransmission_delay()).max(now))
    }

    /// Handles the retransmission alarm firing; returns which mode ran
    pub fn on_retransmission_alarm<N: AckNotifier>(
        &mut self,
        now: Timestamp,
        notifier: &mut N,
    ) -> RetransmissionMode {
        let mode = self.retransmission_mode();

        match mode {
            RetransmissionMode::Handshake => {
                self.retransmit_crypto_packets();
                self.consecutive_crypto_count += 1;
                self.stats.crypto_retransmit_count += 1;
            }
            RetransmissionMode::LossTimer => {
                let largest_observed = self.unacked.largest_observed();
                self.detect_and_queue_losses(now, largest_observed, notifier);
            }
            RetransmissionMode::TailLossProbe => {
                self.queue_tail_loss_probe();
                self.consecutive_tlp_count += 1;
                self.stats.tlp_count += 1;
            }
            RetransmissionMode::Rto => {
                let retransmitted = self.queue_rto_retransmissions();
                self.rtt.expire_smoothed_metrics();
                self.controller.on_retransmission_timeout(retransmitted);
                self.consecutive_rto_count += 1;
                self.stats.rto_count += 1;
            }
        }

        mode
    }

    fn retransmission_mode(&self) -> RetransmissionMode {
        if self.unacked.has_crypto_handshake_in_flight() {
            RetransmissionMode::Handshake
        } else if self.loss.loss_timeout().is_some() {
            RetransmissionMode::LossTimer
        } else if self.consecutive_tlp_count < MAX_TAIL_LOSS_PROBES
            && self.unacked.has_unacked_retransmittable_frames()
        {
            RetransmissionMode::TailLossProbe
        } else {
            RetransmissionMode::Rto
        }
    }

    fn retransmit_crypto_packets(&mut self) {
        let crypto_packets: Vec<PacketNumber> = self
            .unacked
            .iter()
            .filter(|(_, info)| {
                info.in_flight
                    && info.has_crypto_handshake
                    && !info.retransmittable_frames.is_empty()
            })
            .map(|(packet_number, _)| *packet_number)
            .collect();

        for packet_number in crypto_packets {
            self.pending_retransmissions
                .insert(packet_number, transmission::Type::Handshake);
        }
    }

    fn queue_tail_loss_probe(&mut self) {
        let newest = self
            .unacked
            .iter()
            .rev()
            .find(|(_, info)| info.in_flight && !info.retransmittable_frames.is_empty())
            .map(|(packet_number, _)| *packet_number);

        if let Some(packet_number) = newest {
            self.pending_retransmissions
                .insert(packet_number, transmission::Type::TailLossProbe);
        }
    }

    fn queue_rto_retransmissions(&mut self) -> bool {
        let oldest: Vec<PacketNumber> = self
            .unacked
            .iter()
            .filter(|(_, info)| !info.retransmittable_frames.is_empty())
            .take(PACKETS_ON_RTO)
            .map(|(packet_number, _)| *packet_number)
            .collect();

        let retransmitted = !oldest.is_empty();
        for packet_number in oldest {
            self.pending_retransmissions
                .insert(packet_number, transmission::Type::Rto);
        }
        retransmitted
    }

    /// Abandons a dequeued retransmission whose frames are no longer
    /// worth replaying (e.g. the stream was reset since)
    pub fn cancel_retransmission(&mut self, packet_number: PacketNumber) {
        if let Some(info) = self.unacked.get(packet_number) {
            if info.in_flight {
                self.controller.on_packet_abandoned(info.bytes_sent as usize);
            }
        }
        self.unacked.neuter(packet_number);
    }

    /// Neuters every packet sent at the unencrypted level once the
    /// handshake has produced real keys; their payloads will be
    /// retransmitted under encryption if still needed.
    pub fn neuter_unencrypted_packets(&mut self) {
        let unencrypted: Vec<PacketNumber> = self
            .unacked
            .iter()
            .filter(|(_, info)| info.encryption_level == EncryptionLevel::Unencrypted)
            .map(|(packet_number, _)| *packet_number)
            .collect();

        for packet_number in unencrypted {
            if let Some(info) = self.unacked.get(packet_number) {
                if info.in_flight {
                    self.controller.on_packet_abandoned(info.bytes_sent as usize);
                }
            }
            self.unacked.neuter(packet_number);
            self.pending_retransmissions.remove(&packet_number);
        }
    }

    fn crypto_retransmission_delay(&self) -> Duration {
        // conservative while no samples exist, doubling per attempt
        let base = 2 * self.rtt.smoothed_or_initial();
        base * (1 << self.consecutive_crypto_count.min(MAX_BACKOFF_SHIFT))
    }

    fn tail_loss_probe_delay(&self) -> Duration {
        let srtt = self.rtt.smoothed_or_initial();
        (2 * srtt).max(srtt * 3 / 2 + self.peer_max_ack_delay)
    }

    fn retransmission_delay(&self) -> Duration {
        let base = self.controller.retransmission_delay(&self.rtt);
        let base = if base.is_zero() {
            2 * self.rtt.smoothed_or_initial()
        } else {
            base
        };
        base.max(MIN_RTO) * (1 << self.consecutive_rto_count.min(MAX_BACKOFF_SHIFT))
    }
}

fn is_crypto_frame(frame: &FrameOwned) -> bool {
    matches!(
        frame,
        frame::Frame::Stream(stream) if stream.stream_id.is_crypto()
    )
}
